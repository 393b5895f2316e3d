use crate::compose::CropRect;
use crate::subtitle::{FrameSink, FrameSource};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

/// Bytes per pixel of the rawvideo frames exchanged with ffmpeg (rgb24).
pub const BYTES_PER_PIXEL: usize = 3;

async fn run_cmd(args: &[String]) -> Result<()> {
    if args.is_empty() {
        return Ok(());
    }

    let mut cmd = Command::new(&args[0]);
    if args.len() > 1 {
        cmd.args(&args[1..]);
    }

    let status = cmd.status().await.context("Command execution failed")?;
    if !status.success() {
        return Err(anyhow!("Command failed ({}): {:?}", status, args));
    }

    Ok(())
}

fn spawn_error(err: std::io::Error) -> anyhow::Error {
    if err.kind() == ErrorKind::NotFound {
        anyhow!("ffmpeg was not found on PATH. Install ffmpeg and verify `ffmpeg -version` works.")
    } else {
        anyhow!("failed to spawn ffmpeg: {err}")
    }
}

pub fn frame_len(width: u32, height: u32) -> Result<usize> {
    usize::try_from(width)
        .ok()
        .and_then(|w| {
            usize::try_from(height)
                .ok()
                .and_then(|h| w.checked_mul(h))
                .and_then(|px| px.checked_mul(BYTES_PER_PIXEL))
        })
        .context("frame size overflow")
}

pub async fn ffprobe_video_dimensions(path: &Path) -> Result<(u32, u32)> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=s=x:p=0",
        ])
        .arg(path)
        .output()
        .await
        .context("ffprobe execution failed")?;

    if !output.status.success() {
        return Err(anyhow!("ffprobe failed for {}", path.display()));
    }

    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    parse_dimensions(&text)
        .ok_or_else(|| anyhow!("Invalid dimensions {:?} for {}", text, path.display()))
}

fn parse_dimensions(text: &str) -> Option<(u32, u32)> {
    let line = text.lines().next()?;
    let mut parts = line.trim().trim_end_matches('x').split('x');
    let w = parts.next()?.parse::<u32>().ok()?;
    let h = parts.next()?.parse::<u32>().ok()?;
    if w == 0 || h == 0 {
        return None;
    }
    Some((w, h))
}

pub async fn ffprobe_duration_seconds(path: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await
        .context("ffprobe duration failed")?;

    if !output.status.success() {
        return Err(anyhow!("ffprobe failed for {}", path.display()));
    }

    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let duration = text.parse::<f64>().unwrap_or(-1.0);
    if duration <= 0.0 {
        return Err(anyhow!("Invalid duration {:?} for {}", text, path.display()));
    }
    Ok(duration)
}

pub fn still_video_filter(crop: &CropRect, width: u32, height: u32) -> String {
    format!(
        "crop={}:{}:{}:{},scale={}:{},setsar=1",
        crop.width, crop.height, crop.x, crop.y, width, height
    )
}

/// Holds `image` for `duration_s` seconds at `fps`, cropped then scaled to
/// `width`x`height`. No audio.
pub async fn ffmpeg_still_video(
    image: &Path,
    crop: &CropRect,
    width: u32,
    height: u32,
    fps: u32,
    duration_s: f64,
    out_mp4: &Path,
) -> Result<bool> {
    let args = vec![
        "ffmpeg".to_string(),
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-loop".to_string(),
        "1".to_string(),
        "-framerate".to_string(),
        fps.to_string(),
        "-i".to_string(),
        image.display().to_string(),
        "-t".to_string(),
        format!("{:.3}", duration_s),
        "-vf".to_string(),
        still_video_filter(crop, width, height),
        "-r".to_string(),
        fps.to_string(),
        "-an".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-crf".to_string(),
        "22".to_string(),
        out_mp4.display().to_string(),
    ];
    run_cmd(&args).await?;
    Ok(out_mp4.exists())
}

/// Attaches `audio` to `video` (video track re-encoded, audio as AAC).
pub async fn ffmpeg_mux_audio(video: &Path, audio: &Path, out_mp4: &Path) -> Result<bool> {
    let args = vec![
        "ffmpeg".to_string(),
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        video.display().to_string(),
        "-i".to_string(),
        audio.display().to_string(),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        "1:a:0".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-crf".to_string(),
        "22".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        out_mp4.display().to_string(),
    ];
    run_cmd(&args).await?;
    Ok(out_mp4.exists())
}

/// Decodes a video to rgb24 frames over ffmpeg's stdout.
pub struct FrameReader {
    child: Child,
    stdout: ChildStdout,
    frame_size: usize,
}

impl FrameReader {
    pub fn spawn(input: &Path, width: u32, height: u32) -> Result<Self> {
        let frame_size = frame_len(width, height)?;

        let mut child = Command::new("ffmpeg")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(input)
            .arg("-vf")
            .arg(format!("scale={}:{}", width, height))
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture ffmpeg stdout"))?;

        Ok(Self {
            child,
            stdout,
            frame_size,
        })
    }

    pub async fn finish(mut self) -> Result<()> {
        drop(self.stdout);
        let status = self
            .child
            .wait()
            .await
            .context("failed waiting for ffmpeg decoder")?;
        if !status.success() {
            bail!("ffmpeg decoder failed with status {status}");
        }
        Ok(())
    }
}

#[async_trait]
impl FrameSource for FrameReader {
    fn frame_size(&self) -> usize {
        self.frame_size
    }

    async fn next_frame(&mut self, buf: &mut [u8]) -> Result<bool> {
        if buf.len() != self.frame_size {
            bail!(
                "frame buffer size mismatch: expected {} bytes, got {}",
                self.frame_size,
                buf.len()
            );
        }

        let mut filled = 0;
        while filled < buf.len() {
            let n = self
                .stdout
                .read(&mut buf[filled..])
                .await
                .context("failed to read frame from ffmpeg stdout")?;
            if n == 0 {
                if filled == 0 {
                    return Ok(false);
                }
                bail!("truncated frame: got {} of {} bytes", filled, buf.len());
            }
            filled += n;
        }
        Ok(true)
    }
}

/// Encodes rgb24 frames written to ffmpeg's stdin into a silent H.264 video.
pub struct FrameWriter {
    child: Child,
    stdin: Option<ChildStdin>,
    frame_size: usize,
}

impl FrameWriter {
    pub fn spawn(output: &Path, width: u32, height: u32, fps: u32) -> Result<Self> {
        let frame_size = frame_len(width, height)?;

        let mut child = Command::new("ffmpeg")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-s:v")
            .arg(format!("{}x{}", width, height))
            .arg("-r")
            .arg(fps.to_string())
            .arg("-i")
            .arg("-")
            .arg("-an")
            .arg("-c:v")
            .arg("libx264")
            .arg("-preset")
            .arg("veryfast")
            .arg("-crf")
            .arg("18")
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to capture ffmpeg stdin"))?;

        Ok(Self {
            child,
            stdin: Some(stdin),
            frame_size,
        })
    }
}

#[async_trait]
impl FrameSink for FrameWriter {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        if frame.len() != self.frame_size {
            bail!(
                "frame size mismatch: expected {} bytes, got {}",
                self.frame_size,
                frame.len()
            );
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("ffmpeg encoder already finished"))?;
        stdin
            .write_all(frame)
            .await
            .context("failed to write frame to ffmpeg stdin")
    }

    async fn finish(&mut self) -> Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin
                .flush()
                .await
                .context("failed to flush ffmpeg stdin")?;
        }

        let status = self
            .child
            .wait()
            .await
            .context("failed waiting for ffmpeg encoder")?;
        if !status.success() {
            bail!("ffmpeg encoder failed with status {status}");
        }
        Ok(())
    }
}
