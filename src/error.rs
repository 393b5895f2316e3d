use thiserror::Error;

/// Failure of one pipeline step. Each variant carries the step's context chain.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("narration synthesis failed: {0:#}")]
    Synthesis(#[source] anyhow::Error),

    #[error("silent video composition failed: {0:#}")]
    Compose(#[source] anyhow::Error),

    #[error("word timing extraction failed: {0:#}")]
    Transcription(#[source] anyhow::Error),

    #[error("subtitle rendering failed: {0:#}")]
    Render(#[source] anyhow::Error),

    #[error("final mux failed: {0:#}")]
    Mux(#[source] anyhow::Error),

    #[error("i/o error: {0:#}")]
    Io(#[source] anyhow::Error),
}

impl PipelineError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Config(_) => 2,
            _ => 1,
        }
    }
}
