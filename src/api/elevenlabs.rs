use crate::api::{HttpStatusError, RetryPolicy, SpeechSynthesizer, with_retry};
use crate::config::Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

const ELEVENLABS_BASE: &str = "https://api.elevenlabs.io";

pub struct ElevenLabsSynthesizer {
    client: Client,
    api_key: String,
    voice_id: String,
    model_id: String,
    base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl ElevenLabsSynthesizer {
    pub fn new(client: Client, cfg: &Config) -> Self {
        Self {
            client,
            api_key: cfg.elevenlabs_key.clone(),
            voice_id: cfg.eleven_voice_id.clone(),
            model_id: cfg.eleven_model_id.clone(),
            base_url: ELEVENLABS_BASE.to_string(),
            timeout: cfg.request_timeout(),
            retry: RetryPolicy::from_config(cfg),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/text-to-speech/{}?output_format=mp3_44100_128",
            self.base_url.trim_end_matches('/'),
            self.voice_id
        )
    }

    async fn request_once(&self, text: &str) -> Result<Vec<u8>> {
        let body = serde_json::json!({
            "text": text,
            "model_id": self.model_id,
        });

        let resp = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .context("ElevenLabs request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let raw = resp.text().await.unwrap_or_default();
            return Err(HttpStatusError {
                service: "ElevenLabs TTS",
                status: status.as_u16(),
                detail: raw.chars().take(400).collect(),
            }
            .into());
        }

        let bytes = resp.bytes().await.context("ElevenLabs response read failed")?;
        if bytes.is_empty() {
            anyhow::bail!("ElevenLabs returned an empty audio body");
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn synthesize(&self, text: &str, out_path: &Path) -> Result<()> {
        if text.trim().is_empty() {
            anyhow::bail!("script text is empty");
        }

        let audio = with_retry(&self.retry, "ElevenLabs TTS", || self.request_once(text)).await?;

        if let Some(parent) = out_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create dir {}", parent.display()))?;
            }
        }
        fs::write(out_path, &audio)
            .await
            .with_context(|| format!("Failed to write narration {}", out_path.display()))?;
        Ok(())
    }
}
