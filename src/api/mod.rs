use crate::config::Config;
use crate::logw;
use crate::timing::WordTiming;
use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

pub mod elevenlabs;
#[cfg(test)]
pub(crate) mod mock_http;
pub mod openai;

/// Text-to-speech backend: writes the narration for `text` to `out_path`.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, out_path: &Path) -> Result<()>;
}

/// Speech-to-text backend producing word-level timings, ordered by start.
#[async_trait]
pub trait WordTranscriber: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<Vec<WordTiming>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            attempts: cfg.retry_attempts.max(1),
            backoff: Duration::from_millis(cfg.retry_backoff_ms),
        }
    }
}

/// Non-success HTTP status returned by a backend.
#[derive(Debug, thiserror::Error)]
#[error("{service} HTTP {status}: {detail}")]
pub struct HttpStatusError {
    pub service: &'static str,
    pub status: u16,
    pub detail: String,
}

impl HttpStatusError {
    /// Timeouts, rate limits and server errors may succeed on a second try.
    pub fn is_transient(&self) -> bool {
        matches!(self.status, 408 | 429) || self.status >= 500
    }
}

/// Everything except a permanent HTTP status (auth, validation, not found) is retried.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    err.chain()
        .find_map(|e| e.downcast_ref::<HttpStatusError>())
        .is_none_or(HttpStatusError::is_transient)
}

/// Runs `op` up to `policy.attempts` times, sleeping `backoff * n` before attempt `n + 1`.
///
/// Errors rejected by [`is_retryable`] are returned immediately.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts && is_retryable(&err) => {
                let wait = policy.backoff * attempt;
                logw(format!(
                    "{} failed (attempt {}/{}): {:#}. Retrying in {:.1}s",
                    label,
                    attempt,
                    attempts,
                    err,
                    wait.as_secs_f64()
                ));
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
