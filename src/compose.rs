use crate::config::Config;
use crate::ffmpeg;
use crate::{logi, logok};
use anyhow::{Result, bail};
use std::path::Path;

/// Source-pixel rectangle kept from the background image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Centered crop of a `src_w`x`src_h` image to the `target_w`:`target_h` aspect ratio.
///
/// Images wider than the target lose columns on both sides; narrower (or
/// equal) ones lose rows at top and bottom.
pub fn crop_for_aspect(src_w: u32, src_h: u32, target_w: u32, target_h: u32) -> CropRect {
    let (sw, sh) = (src_w as u64, src_h as u64);
    let (tw, th) = (target_w.max(1) as u64, target_h.max(1) as u64);

    if sw * th > sh * tw {
        let width = (sh * tw / th).clamp(1, sw);
        CropRect {
            x: ((sw - width) / 2) as u32,
            y: 0,
            width: width as u32,
            height: src_h,
        }
    } else {
        let height = (sw * th / tw).clamp(1, sh);
        CropRect {
            x: 0,
            y: ((sh - height) / 2) as u32,
            width: src_w,
            height: height as u32,
        }
    }
}

/// Writes the silent base video for `duration_s` seconds of narration to `out_path`.
pub async fn compose_silent_video(cfg: &Config, duration_s: f64, out_path: &Path) -> Result<()> {
    let background = &cfg.input_background_file;
    if !background.exists() {
        bail!("background image not found: {}", background.display());
    }

    let (w, h) = ffmpeg::ffprobe_video_dimensions(background).await?;
    let crop = crop_for_aspect(w, h, cfg.video_width, cfg.video_height);
    logi(format!(
        "Background {}x{} -> crop {}x{} at ({}, {}) -> {}x{} @ {} fps for {:.2}s",
        w,
        h,
        crop.width,
        crop.height,
        crop.x,
        crop.y,
        cfg.video_width,
        cfg.video_height,
        cfg.fps,
        duration_s
    ));

    if !ffmpeg::ffmpeg_still_video(
        background,
        &crop,
        cfg.video_width,
        cfg.video_height,
        cfg.fps,
        duration_s,
        out_path,
    )
    .await?
    {
        bail!("ffmpeg produced no file at {}", out_path.display());
    }

    logok(format!("Silent base video created: {}", out_path.display()));
    Ok(())
}
