use crate::error::PipelineError;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

const API_KEY_PLACEHOLDERS: &[&str] = &[
    "ELEVEN_LABS_API_KEY",
    "YOUR_ELEVENLABS_API_KEY",
    "OPENAI_API_KEY",
    "YOUR_OPENAI_API_KEY",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "elevenlabs_api_key")]
    pub elevenlabs_key: String,
    #[serde(rename = "openai_api_key")]
    pub openai_key: String,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_transcribe_model")]
    pub transcribe_model: String,
    #[serde(default = "default_voice_id")]
    pub eleven_voice_id: String,
    #[serde(default = "default_model_id")]
    pub eleven_model_id: String,

    #[serde(default = "default_input_text_file")]
    pub input_text_file: PathBuf,
    #[serde(default = "default_input_background_file")]
    pub input_background_file: PathBuf,
    #[serde(default = "default_output_video_file")]
    pub output_video_file: PathBuf,
    #[serde(default = "default_temp_narration_file")]
    pub temp_narration_file: PathBuf,
    #[serde(default = "default_temp_silent_video_file")]
    pub temp_silent_video_file: PathBuf,
    #[serde(default = "default_temp_subtitled_video_file")]
    pub temp_subtitled_video_file: PathBuf,

    #[serde(default = "default_video_width")]
    pub video_width: u32,
    #[serde(default = "default_video_height")]
    pub video_height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,

    #[serde(default = "default_font_path")]
    pub font_path: PathBuf,
    #[serde(default = "default_font_size")]
    pub font_size: f32,
    #[serde(default = "default_font_color")]
    pub font_color: [u8; 3],
    #[serde(default = "default_font_thickness")]
    pub font_thickness: u32,
    #[serde(default = "default_outline_color")]
    pub outline_color: [u8; 3],
    #[serde(default = "default_outline_thickness")]
    pub outline_thickness: u32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub keep_scratch_files: bool,
}

fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_transcribe_model() -> String {
    "whisper-1".to_string()
}

// "Jessica" in the ElevenLabs premade voice library.
fn default_voice_id() -> String {
    "cgSgspJ2msm6clMCkdW9".to_string()
}

fn default_model_id() -> String {
    "eleven_multilingual_v2".to_string()
}

fn default_input_text_file() -> PathBuf {
    PathBuf::from("script.txt")
}

fn default_input_background_file() -> PathBuf {
    PathBuf::from("background.jpg")
}

fn default_output_video_file() -> PathBuf {
    PathBuf::from("final_short.mp4")
}

fn default_temp_narration_file() -> PathBuf {
    PathBuf::from("narration.mp3")
}

fn default_temp_silent_video_file() -> PathBuf {
    PathBuf::from("temp_silent_video.mp4")
}

fn default_temp_subtitled_video_file() -> PathBuf {
    PathBuf::from("temp_subtitled_video.mp4")
}

fn default_video_width() -> u32 {
    1080
}

fn default_video_height() -> u32 {
    1920
}

fn default_fps() -> u32 {
    24
}

fn default_font_path() -> PathBuf {
    PathBuf::from("resources/Inter-Regular.ttf")
}

fn default_font_size() -> f32 {
    96.0
}

fn default_font_color() -> [u8; 3] {
    [255, 255, 255]
}

fn default_font_thickness() -> u32 {
    1
}

fn default_outline_color() -> [u8; 3] {
    [0, 0, 0]
}

fn default_outline_thickness() -> u32 {
    6
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_retry_attempts() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    2000
}

fn is_placeholder_key(key: &str) -> bool {
    let key = key.trim();
    key.is_empty() || API_KEY_PLACEHOLDERS.contains(&key)
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))
            .map_err(PipelineError::Io)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, PipelineError> {
        let config: Config = serde_json::from_str(content)
            .map_err(|e| PipelineError::Config(format!("config.json: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if is_placeholder_key(&self.elevenlabs_key) {
            return Err(PipelineError::Config(
                "config.json: elevenlabs_api_key is missing or still a placeholder".into(),
            ));
        }
        if is_placeholder_key(&self.openai_key) {
            return Err(PipelineError::Config(
                "config.json: openai_api_key is missing or still a placeholder".into(),
            ));
        }
        if self.video_width == 0 || self.video_height == 0 {
            return Err(PipelineError::Config(
                "config.json: video_width and video_height must be non-zero".into(),
            ));
        }
        if self.video_width % 2 != 0 || self.video_height % 2 != 0 {
            return Err(PipelineError::Config(format!(
                "config.json: video size {}x{} must be even for yuv420p",
                self.video_width, self.video_height
            )));
        }
        if self.fps == 0 {
            return Err(PipelineError::Config("config.json: fps must be non-zero".into()));
        }
        if self.font_size.is_nan() || self.font_size <= 0.0 {
            return Err(PipelineError::Config("config.json: font_size must be positive".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Duration of one frame in seconds.
    pub fn frame_interval(&self) -> f64 {
        1.0 / self.fps as f64
    }
}
