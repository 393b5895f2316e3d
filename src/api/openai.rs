use crate::api::{HttpStatusError, RetryPolicy, WordTranscriber, with_retry};
use crate::config::Config;
use crate::logw;
use crate::timing::WordTiming;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Deserialize)]
struct RawWord {
    word: String,
    start: f64,
    end: f64,
}

#[derive(Debug, Default, Deserialize)]
struct RawSegment {
    #[serde(default)]
    words: Vec<RawWord>,
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    words: Option<Vec<RawWord>>,
    #[serde(default)]
    segments: Vec<RawSegment>,
}

fn openai_error_message(raw: &str) -> Option<String> {
    let root: serde_json::Value = serde_json::from_str(raw).ok()?;
    let err = root.get("error")?;
    let msg = err.get("message").and_then(|v| v.as_str()).unwrap_or("unknown error");
    match err.get("code").and_then(|v| v.as_str()) {
        Some(code) => Some(format!("{} ({})", msg, code)),
        None => Some(msg.to_string()),
    }
}

/// Word timings from a `verbose_json` transcription body.
///
/// Uses the top-level `words` array when present, otherwise the words nested
/// in each segment, in segment order.
pub fn parse_word_timings(raw: &str) -> Result<Vec<WordTiming>> {
    let body: VerboseTranscription =
        serde_json::from_str(raw).context("Failed to parse transcription JSON")?;

    let raw_words: Vec<RawWord> = match body.words {
        Some(words) if !words.is_empty() => words,
        _ => body.segments.into_iter().flat_map(|s| s.words).collect(),
    };

    Ok(raw_words
        .into_iter()
        .filter_map(|w| WordTiming::new(&w.word, w.start, w.end))
        .collect())
}

pub struct OpenAiTranscriber {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl OpenAiTranscriber {
    pub fn new(client: Client, cfg: &Config) -> Self {
        Self {
            client,
            api_key: cfg.openai_key.clone(),
            base_url: cfg.openai_base_url.clone(),
            model: cfg.transcribe_model.clone(),
            timeout: cfg.request_timeout(),
            retry: RetryPolicy::from_config(cfg),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/audio/transcriptions", self.base_url.trim_end_matches('/'))
    }

    async fn request_once(&self, file_name: &str, audio: &[u8]) -> Result<String> {
        let part = multipart::Part::bytes(audio.to_vec())
            .file_name(file_name.to_string())
            .mime_str("application/octet-stream")
            .context("failed to build multipart part")?;

        let form = multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "word");

        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await
            .context("OpenAI transcription request failed")?;

        let status = resp.status();
        let raw = resp.text().await.context("failed to read transcription body")?;

        if !status.is_success() {
            let detail =
                openai_error_message(&raw).unwrap_or_else(|| raw.chars().take(800).collect());
            return Err(HttpStatusError {
                service: "OpenAI transcription",
                status: status.as_u16(),
                detail,
            }
            .into());
        }

        Ok(raw)
    }
}

#[async_trait]
impl WordTranscriber for OpenAiTranscriber {
    async fn transcribe(&self, audio_path: &Path) -> Result<Vec<WordTiming>> {
        let audio = fs::read(audio_path).await.with_context(|| {
            format!("failed to read narration audio: {}", audio_path.display())
        })?;
        let file_name = audio_path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("narration.mp3")
            .to_string();

        let raw = with_retry(&self.retry, "OpenAI transcription", || {
            self.request_once(&file_name, &audio)
        })
        .await?;

        let words = parse_word_timings(&raw)?;
        if words.is_empty() {
            logw("Transcription returned no words; video will carry no subtitles.");
        }
        Ok(words)
    }
}
