use crate::api::elevenlabs::ElevenLabsSynthesizer;
use crate::api::openai::OpenAiTranscriber;
use crate::api::{SpeechSynthesizer, WordTranscriber};
use crate::config::Config;
use crate::error::PipelineError;
use crate::scratch::ScratchFiles;
use crate::timing::WordTiming;
use crate::{compose, ffmpeg, init, subtitle};
use crate::{logi, logok, logw};
use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

async fn read_script(path: &Path) -> Result<String, PipelineError> {
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read script {}", path.display()))
        .map_err(PipelineError::Io)?;
    if text.trim().is_empty() {
        return Err(PipelineError::Config(format!(
            "script file {} is empty",
            path.display()
        )));
    }
    Ok(text)
}

/// Whether `actual` is within one frame of `expected`.
pub fn duration_matches(expected: f64, actual: f64, frame_interval: f64) -> bool {
    (expected - actual).abs() <= frame_interval
}

/// The media steps of a run: probing, composing, burning and muxing.
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    async fn probe_duration(&self, path: &Path) -> anyhow::Result<f64>;

    async fn compose_silent_video(
        &self,
        cfg: &Config,
        duration_s: f64,
        out_path: &Path,
    ) -> anyhow::Result<()>;

    async fn burn_subtitles(
        &self,
        cfg: &Config,
        words: &[WordTiming],
        input: &Path,
        output: &Path,
    ) -> anyhow::Result<()>;

    /// `Ok(false)` when ffmpeg exited cleanly but left no output file.
    async fn mux_audio(
        &self,
        video: &Path,
        audio: &Path,
        out_path: &Path,
    ) -> anyhow::Result<bool>;
}

/// ffmpeg/ffprobe on PATH.
pub struct Ffmpeg;

#[async_trait]
impl MediaToolkit for Ffmpeg {
    async fn probe_duration(&self, path: &Path) -> anyhow::Result<f64> {
        ffmpeg::ffprobe_duration_seconds(path).await
    }

    async fn compose_silent_video(
        &self,
        cfg: &Config,
        duration_s: f64,
        out_path: &Path,
    ) -> anyhow::Result<()> {
        compose::compose_silent_video(cfg, duration_s, out_path).await
    }

    async fn burn_subtitles(
        &self,
        cfg: &Config,
        words: &[WordTiming],
        input: &Path,
        output: &Path,
    ) -> anyhow::Result<()> {
        subtitle::render_subtitled_video(cfg, words, input, output).await?;
        Ok(())
    }

    async fn mux_audio(
        &self,
        video: &Path,
        audio: &Path,
        out_path: &Path,
    ) -> anyhow::Result<bool> {
        ffmpeg::ffmpeg_mux_audio(video, audio, out_path).await
    }
}

/// Narration → silent video → word timings → subtitles → mux → cleanup.
pub struct Generator {
    cfg: Config,
    synthesizer: Box<dyn SpeechSynthesizer>,
    transcriber: Box<dyn WordTranscriber>,
    media: Box<dyn MediaToolkit>,
}

impl Generator {
    pub fn new(
        cfg: Config,
        synthesizer: Box<dyn SpeechSynthesizer>,
        transcriber: Box<dyn WordTranscriber>,
    ) -> Self {
        Self {
            cfg,
            synthesizer,
            transcriber,
            media: Box::new(Ffmpeg),
        }
    }

    pub fn with_media(mut self, media: Box<dyn MediaToolkit>) -> Self {
        self.media = media;
        self
    }

    /// Generator backed by ElevenLabs and OpenAI.
    pub fn from_config(cfg: Config) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")
            .map_err(PipelineError::Io)?;
        let synthesizer = ElevenLabsSynthesizer::new(client.clone(), &cfg);
        let transcriber = OpenAiTranscriber::new(client, &cfg);
        Ok(Self::new(cfg, Box::new(synthesizer), Box::new(transcriber)))
    }

    pub async fn run(&self) -> Result<PathBuf, PipelineError> {
        let cfg = &self.cfg;
        logi("--- Starting shorts generator ---");

        let script = read_script(&cfg.input_text_file).await?;
        init::ensure_parent_dirs([
            cfg.output_video_file.as_path(),
            cfg.temp_narration_file.as_path(),
            cfg.temp_silent_video_file.as_path(),
            cfg.temp_subtitled_video_file.as_path(),
        ])
        .await
        .map_err(PipelineError::Io)?;

        let mut scratch = ScratchFiles::new().keep(cfg.keep_scratch_files);

        // 1. narration
        logi(format!("Generating narration ({} chars)...", script.chars().count()));
        let narration = scratch.track(&cfg.temp_narration_file);
        self.synthesizer
            .synthesize(&script, &narration)
            .await
            .map_err(PipelineError::Synthesis)?;
        let narration_dur = self
            .media
            .probe_duration(&narration)
            .await
            .context("narration audio is unreadable")
            .map_err(PipelineError::Synthesis)?;
        logok(format!("Narration ready: {} ({:.2}s)", narration.display(), narration_dur));

        // 2. silent base video
        logi("Creating silent base video...");
        let silent = scratch.track(&cfg.temp_silent_video_file);
        self.media
            .compose_silent_video(cfg, narration_dur, &silent)
            .await
            .map_err(PipelineError::Compose)?;

        // 3. word timings
        logi("Generating word timestamps...");
        let words = self
            .transcriber
            .transcribe(&narration)
            .await
            .map_err(PipelineError::Transcription)?;
        logok(format!("Found {} words.", words.len()));

        // 4. subtitles
        logi("Drawing subtitles onto video...");
        let subtitled = scratch.track(&cfg.temp_subtitled_video_file);
        self.media
            .burn_subtitles(cfg, &words, &silent, &subtitled)
            .await
            .map_err(PipelineError::Render)?;

        // 5. final mux
        logi("Combining final video and audio...");
        let output = cfg.output_video_file.clone();
        let muxed = self
            .media
            .mux_audio(&subtitled, &narration, &output)
            .await
            .map_err(PipelineError::Mux)?;
        if !muxed {
            return Err(PipelineError::Mux(anyhow::anyhow!(
                "ffmpeg produced no file at {}",
                output.display()
            )));
        }
        match self.media.probe_duration(&output).await {
            Ok(final_dur) if !duration_matches(narration_dur, final_dur, cfg.frame_interval()) => {
                logw(format!(
                    "Final duration {:.3}s differs from narration {:.3}s by more than one frame",
                    final_dur, narration_dur
                ));
            }
            Ok(final_dur) => logok(format!("Final video and audio combined ({:.2}s)", final_dur)),
            Err(err) => logw(format!("Could not probe final duration: {:#}", err)),
        }

        // 6. cleanup
        logi("Cleaning up temporary files...");
        let removed = scratch.cleanup();
        logok(format!("Removed {} temporary files", removed));

        logok(format!("Your video is ready: {}", output.display()));
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct FailingSynthesizer {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SpeechSynthesizer for FailingSynthesizer {
        async fn synthesize(&self, _text: &str, out_path: &Path) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::fs::write(out_path, b"partial")?;
            anyhow::bail!("HTTP 401 from TTS")
        }
    }

    /// Writes a real audio file with ffmpeg's sine source.
    struct ToneSynthesizer {
        seconds: f64,
    }

    #[async_trait]
    impl SpeechSynthesizer for ToneSynthesizer {
        async fn synthesize(&self, _text: &str, out_path: &Path) -> Result<()> {
            let status = tokio::process::Command::new("ffmpeg")
                .args(["-y", "-hide_banner", "-loglevel", "error", "-f", "lavfi", "-i"])
                .arg(format!("sine=frequency=440:duration={}", self.seconds))
                .arg(out_path)
                .status()
                .await?;
            anyhow::ensure!(status.success(), "ffmpeg tone failed");
            Ok(())
        }
    }

    struct WritingSynthesizer;

    #[async_trait]
    impl SpeechSynthesizer for WritingSynthesizer {
        async fn synthesize(&self, _text: &str, out_path: &Path) -> Result<()> {
            std::fs::write(out_path, b"ID3")?;
            Ok(())
        }
    }

    /// Writes placeholder files instead of running ffmpeg.
    struct FakeMedia {
        duration_s: f64,
        mux_writes_output: bool,
        burned: Arc<Mutex<Vec<String>>>,
    }

    impl FakeMedia {
        fn new(burned: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                duration_s: 2.0,
                mux_writes_output: true,
                burned: Arc::clone(burned),
            }
        }
    }

    #[async_trait]
    impl MediaToolkit for FakeMedia {
        async fn probe_duration(&self, path: &Path) -> Result<f64> {
            anyhow::ensure!(path.exists(), "nothing to probe at {}", path.display());
            Ok(self.duration_s)
        }

        async fn compose_silent_video(
            &self,
            _cfg: &Config,
            _duration_s: f64,
            out_path: &Path,
        ) -> Result<()> {
            std::fs::write(out_path, b"silent")?;
            Ok(())
        }

        async fn burn_subtitles(
            &self,
            _cfg: &Config,
            words: &[WordTiming],
            input: &Path,
            output: &Path,
        ) -> Result<()> {
            anyhow::ensure!(input.exists(), "silent video missing");
            let mut burned = self.burned.lock().unwrap();
            burned.extend(words.iter().map(|w| w.word.clone()));
            std::fs::write(output, b"subtitled")?;
            Ok(())
        }

        async fn mux_audio(&self, video: &Path, audio: &Path, out_path: &Path) -> Result<bool> {
            anyhow::ensure!(video.exists() && audio.exists(), "mux inputs missing");
            if self.mux_writes_output {
                std::fs::write(out_path, b"final")?;
            }
            Ok(self.mux_writes_output)
        }
    }

    struct FixedTranscriber {
        words: Vec<WordTiming>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl WordTranscriber for FixedTranscriber {
        async fn transcribe(&self, _audio_path: &Path) -> Result<Vec<WordTiming>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.words.clone())
        }
    }

    fn config_in(dir: &Path) -> Config {
        let mut cfg =
            Config::from_json(r#"{"elevenlabs_api_key":"k","openai_api_key":"o"}"#).unwrap();
        cfg.input_text_file = dir.join("script.txt");
        cfg.input_background_file = dir.join("background.png");
        cfg.output_video_file = dir.join("out/final_short.mp4");
        cfg.temp_narration_file = dir.join("narration.wav");
        cfg.temp_silent_video_file = dir.join("temp_silent_video.mp4");
        cfg.temp_subtitled_video_file = dir.join("temp_subtitled_video.mp4");
        cfg
    }

    fn scratch_paths(cfg: &Config) -> [PathBuf; 3] {
        [
            cfg.temp_narration_file.clone(),
            cfg.temp_silent_video_file.clone(),
            cfg.temp_subtitled_video_file.clone(),
        ]
    }

    fn counting_transcriber(calls: &Arc<AtomicUsize>) -> Box<FixedTranscriber> {
        Box::new(FixedTranscriber {
            words: Vec::new(),
            calls: Arc::clone(calls),
        })
    }

    #[test]
    fn duration_tolerance_is_one_frame() {
        assert!(duration_matches(2.0, 2.04, 1.0 / 24.0));
        assert!(!duration_matches(2.0, 2.05, 1.0 / 24.0));
    }

    #[tokio::test]
    async fn synthesis_failure_aborts_and_cleans_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_in(dir.path());
        std::fs::write(&cfg.input_text_file, "Hello world").unwrap();

        let lines = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&lines);
        crate::set_log_hook(Some(Arc::new(Mutex::new(move |line: &str| {
            sink.lock().unwrap().push(line.to_string());
        }))));

        let tts_calls = Arc::new(AtomicUsize::new(0));
        let stt_calls = Arc::new(AtomicUsize::new(0));
        let generator = Generator::new(
            cfg.clone(),
            Box::new(FailingSynthesizer {
                calls: Arc::clone(&tts_calls),
            }),
            counting_transcriber(&stt_calls),
        );

        let err = generator.run().await.unwrap_err();
        crate::set_log_hook(None);

        assert!(matches!(err, PipelineError::Synthesis(_)));
        assert!(err.to_string().contains("HTTP 401"));
        assert_eq!(tts_calls.load(Ordering::SeqCst), 1);
        assert_eq!(stt_calls.load(Ordering::SeqCst), 0);
        for path in scratch_paths(&cfg) {
            assert!(!path.exists(), "{} left behind", path.display());
        }
        assert!(!cfg.output_video_file.exists());
        assert!(
            lines
                .lock()
                .unwrap()
                .iter()
                .any(|l| l.contains("Generating narration"))
        );
    }

    #[tokio::test]
    async fn empty_script_is_rejected_before_synthesis() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_in(dir.path());
        std::fs::write(&cfg.input_text_file, " \n\t").unwrap();

        let tts_calls = Arc::new(AtomicUsize::new(0));
        let generator = Generator::new(
            cfg,
            Box::new(FailingSynthesizer {
                calls: Arc::clone(&tts_calls),
            }),
            counting_transcriber(&Arc::new(AtomicUsize::new(0))),
        );

        let err = generator.run().await.unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
        assert_eq!(err.exit_code(), 2);
        assert_eq!(tts_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_script_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Generator::new(
            config_in(dir.path()),
            Box::new(ToneSynthesizer { seconds: 1.0 }),
            counting_transcriber(&Arc::new(AtomicUsize::new(0))),
        );
        assert!(matches!(
            generator.run().await,
            Err(PipelineError::Io(_))
        ));
    }

    fn hello_world() -> Vec<WordTiming> {
        vec![
            WordTiming::new("hello", 0.0, 1.0).unwrap(),
            WordTiming::new("world", 1.0, 2.0).unwrap(),
        ]
    }

    #[tokio::test]
    async fn successful_run_leaves_only_the_output() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_in(dir.path());
        std::fs::write(&cfg.input_text_file, "Hello world").unwrap();

        let burned = Arc::new(Mutex::new(Vec::new()));
        let stt_calls = Arc::new(AtomicUsize::new(0));
        let generator = Generator::new(
            cfg.clone(),
            Box::new(WritingSynthesizer),
            Box::new(FixedTranscriber {
                words: hello_world(),
                calls: Arc::clone(&stt_calls),
            }),
        )
        .with_media(Box::new(FakeMedia::new(&burned)));

        let output = generator.run().await.unwrap();

        assert_eq!(output, cfg.output_video_file);
        assert_eq!(std::fs::read(&output).unwrap(), b"final");
        assert_eq!(stt_calls.load(Ordering::SeqCst), 1);
        assert_eq!(*burned.lock().unwrap(), vec!["HELLO", "WORLD"]);
        for path in scratch_paths(&cfg) {
            assert!(!path.exists(), "{} left behind", path.display());
        }
    }

    #[tokio::test]
    async fn keep_flag_leaves_scratch_files_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config_in(dir.path());
        cfg.keep_scratch_files = true;
        std::fs::write(&cfg.input_text_file, "Hello world").unwrap();

        let burned = Arc::new(Mutex::new(Vec::new()));
        let generator = Generator::new(
            cfg.clone(),
            Box::new(WritingSynthesizer),
            counting_transcriber(&Arc::new(AtomicUsize::new(0))),
        )
        .with_media(Box::new(FakeMedia::new(&burned)));

        generator.run().await.unwrap();

        for path in scratch_paths(&cfg) {
            assert!(path.exists(), "{} was removed", path.display());
        }
    }

    #[tokio::test]
    async fn missing_mux_output_is_a_mux_error_and_cleans_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_in(dir.path());
        std::fs::write(&cfg.input_text_file, "Hello world").unwrap();

        let burned = Arc::new(Mutex::new(Vec::new()));
        let media = FakeMedia {
            mux_writes_output: false,
            ..FakeMedia::new(&burned)
        };
        let generator = Generator::new(
            cfg.clone(),
            Box::new(WritingSynthesizer),
            counting_transcriber(&Arc::new(AtomicUsize::new(0))),
        )
        .with_media(Box::new(media));

        let err = generator.run().await.unwrap_err();

        assert!(matches!(err, PipelineError::Mux(_)));
        assert_eq!(err.exit_code(), 1);
        for path in scratch_paths(&cfg) {
            assert!(!path.exists(), "{} left behind", path.display());
        }
    }

    async fn media_toolchain_ready() -> Option<PathBuf> {
        if !init::check_ffmpeg().await || !init::check_ffprobe().await {
            return None;
        }
        let encoders = tokio::process::Command::new("ffmpeg")
            .args(["-hide_banner", "-encoders"])
            .output()
            .await
            .ok()?;
        if !String::from_utf8_lossy(&encoders.stdout).contains("libx264") {
            return None;
        }
        [
            "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
            "/usr/share/fonts/TTF/DejaVuSans.ttf",
        ]
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
    }

    #[tokio::test]
    #[ignore = "needs ffmpeg with libx264 and DejaVuSans"]
    async fn end_to_end_with_local_backends() {
        let font = media_toolchain_ready()
            .await
            .expect("ffmpeg, ffprobe, libx264 and DejaVuSans are required");
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config_in(dir.path());
        cfg.font_path = font;
        cfg.video_width = 180;
        cfg.video_height = 320;
        cfg.font_size = 24.0;
        cfg.outline_thickness = 2;
        std::fs::write(&cfg.input_text_file, "HELLO WORLD").unwrap();

        let status = tokio::process::Command::new("ffmpeg")
            .args([
                "-y", "-hide_banner", "-loglevel", "error", "-f", "lavfi", "-i",
                "color=c=blue:s=400x200", "-frames:v", "1",
            ])
            .arg(&cfg.input_background_file)
            .status()
            .await
            .unwrap();
        assert!(status.success());

        let stt_calls = Arc::new(AtomicUsize::new(0));
        let generator = Generator::new(
            cfg.clone(),
            Box::new(ToneSynthesizer { seconds: 2.0 }),
            Box::new(FixedTranscriber {
                words: hello_world(),
                calls: Arc::clone(&stt_calls),
            }),
        );

        let output = generator.run().await.unwrap();
        assert_eq!(output, cfg.output_video_file);
        assert!(output.exists());
        assert_eq!(stt_calls.load(Ordering::SeqCst), 1);
        for path in scratch_paths(&cfg) {
            assert!(!path.exists(), "{} left behind", path.display());
        }

        let (w, h) = ffmpeg::ffprobe_video_dimensions(&output).await.unwrap();
        assert_eq!((w, h), (180, 320));
        let dur = ffmpeg::ffprobe_duration_seconds(&output).await.unwrap();
        assert!((dur - 2.0).abs() < 0.1, "final duration {}", dur);
    }
}
