use crate::config::Config;
use crate::ffmpeg::{self, FrameReader, FrameWriter};
use crate::timing::{ActiveWordCursor, WordTiming, frame_timestamp};
use crate::{logi, logok};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use fontdue::layout::{CoordinateSystem, Layout, LayoutSettings, TextStyle};
use fontdue::{Font, FontSettings};
use std::path::Path;

/// Supplies decoded rgb24 frames one at a time.
#[async_trait]
pub trait FrameSource: Send {
    fn frame_size(&self) -> usize;

    /// Fills `buf` with the next frame. `Ok(false)` at end of stream.
    async fn next_frame(&mut self, buf: &mut [u8]) -> Result<bool>;
}

/// Consumes rgb24 frames one at a time.
#[async_trait]
pub trait FrameSink: Send {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<()>;

    async fn finish(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubtitleStyle {
    pub font_size: f32,
    pub fill_color: [u8; 3],
    pub fill_thickness: u32,
    pub outline_color: [u8; 3],
    pub outline_thickness: u32,
}

impl SubtitleStyle {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            font_size: cfg.font_size,
            fill_color: cfg.font_color,
            fill_thickness: cfg.font_thickness,
            outline_color: cfg.outline_color,
            outline_thickness: cfg.outline_thickness,
        }
    }
}

/// 8-bit coverage of rendered text, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMask {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl TextMask {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0; width * height],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    fn max_at(&mut self, x: usize, y: usize, value: u8) {
        let px = &mut self.data[y * self.width + x];
        if value > *px {
            *px = value;
        }
    }

    /// Grows the coverage by a disk of `radius`, on a canvas padded by `pad` on every side.
    ///
    /// `pad` must be at least `radius`; pixel `(x, y)` of `self` lands at `(x + pad, y + pad)`.
    pub fn dilate(&self, radius: u32, pad: u32) -> TextMask {
        let r = radius.min(pad) as i64;
        let pad = pad as usize;
        let mut out = TextMask::new(self.width + 2 * pad, self.height + 2 * pad);

        let offsets: Vec<(i64, i64)> = (-r..=r)
            .flat_map(|dy| (-r..=r).map(move |dx| (dx, dy)))
            .filter(|(dx, dy)| dx * dx + dy * dy <= r * r)
            .collect();

        for y in 0..self.height {
            for x in 0..self.width {
                let v = self.get(x, y);
                if v == 0 {
                    continue;
                }
                let cx = (x + pad) as i64;
                let cy = (y + pad) as i64;
                for (dx, dy) in &offsets {
                    out.max_at((cx + dx) as usize, (cy + dy) as usize, v);
                }
            }
        }
        out
    }
}

/// Turns text into a tight coverage mask.
pub trait WordRasterizer {
    fn rasterize(&self, text: &str) -> TextMask;
}

pub struct TextPainter {
    font: Font,
    font_size: f32,
}

impl TextPainter {
    pub fn from_file(font_path: &Path, font_size: f32) -> Result<Self> {
        let font_bytes = std::fs::read(font_path)
            .with_context(|| format!("failed to read subtitle font {}", font_path.display()))?;
        Self::from_bytes(font_bytes, font_size)
            .with_context(|| format!("failed to load subtitle font {}", font_path.display()))
    }

    pub fn from_bytes(font_bytes: Vec<u8>, font_size: f32) -> Result<Self> {
        let font = Font::from_bytes(font_bytes, FontSettings::default())
            .map_err(|error| anyhow!("failed to parse font: {error}"))?;
        Ok(Self { font, font_size })
    }
}

impl WordRasterizer for TextPainter {
    fn rasterize(&self, text: &str) -> TextMask {
        let mut layout = Layout::new(CoordinateSystem::PositiveYDown);
        layout.reset(&LayoutSettings::default());
        layout.append(&[&self.font], &TextStyle::new(text, self.font_size, 0));

        let glyphs: Vec<_> = layout
            .glyphs()
            .iter()
            .filter(|g| g.width > 0 && g.height > 0)
            .collect();
        if glyphs.is_empty() {
            return TextMask::new(0, 0);
        }

        let min_x = glyphs.iter().map(|g| g.x.round() as i64).min().unwrap_or(0);
        let min_y = glyphs.iter().map(|g| g.y.round() as i64).min().unwrap_or(0);
        let max_x = glyphs
            .iter()
            .map(|g| g.x.round() as i64 + g.width as i64)
            .max()
            .unwrap_or(0);
        let max_y = glyphs
            .iter()
            .map(|g| g.y.round() as i64 + g.height as i64)
            .max()
            .unwrap_or(0);

        let mut mask = TextMask::new((max_x - min_x) as usize, (max_y - min_y) as usize);
        for glyph in glyphs {
            let (metrics, bitmap) = self.font.rasterize_config(glyph.key);
            let ox = (glyph.x.round() as i64 - min_x) as usize;
            let oy = (glyph.y.round() as i64 - min_y) as usize;
            for row in 0..metrics.height {
                for col in 0..metrics.width {
                    let (x, y) = (ox + col, oy + row);
                    if x < mask.width && y < mask.height {
                        mask.max_at(x, y, bitmap[row * metrics.width + col]);
                    }
                }
            }
        }
        mask
    }
}

/// Top-left position that centers a `box_w`x`box_h` box on the frame.
pub fn centered_origin(frame_w: u32, frame_h: u32, box_w: usize, box_h: usize) -> (i64, i64) {
    (
        (frame_w as i64 - box_w as i64).div_euclid(2),
        (frame_h as i64 - box_h as i64).div_euclid(2),
    )
}

/// Outline and fill masks of one word, positioned on the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordOverlay {
    pub x: i64,
    pub y: i64,
    pub outline: TextMask,
    pub fill: TextMask,
}

impl WordOverlay {
    pub fn build(
        mask: &TextMask,
        style: &SubtitleStyle,
        frame_w: u32,
        frame_h: u32,
    ) -> Option<Self> {
        if mask.is_empty() {
            return None;
        }
        let pad = style.outline_thickness.max(style.fill_thickness);
        let (tx, ty) = centered_origin(frame_w, frame_h, mask.width, mask.height);
        Some(Self {
            x: tx - pad as i64,
            y: ty - pad as i64,
            outline: mask.dilate(style.outline_thickness, pad),
            fill: mask.dilate(style.fill_thickness, pad),
        })
    }

    /// Outline pass, then fill pass, clipped to the frame.
    pub fn apply(&self, frame: &mut [u8], frame_w: u32, frame_h: u32, style: &SubtitleStyle) {
        blend_mask(frame, frame_w, frame_h, self.x, self.y, &self.outline, style.outline_color);
        blend_mask(frame, frame_w, frame_h, self.x, self.y, &self.fill, style.fill_color);
    }
}

fn blend_mask(
    frame: &mut [u8],
    frame_w: u32,
    frame_h: u32,
    x: i64,
    y: i64,
    mask: &TextMask,
    color: [u8; 3],
) {
    for row in 0..mask.height {
        let py = y + row as i64;
        if py < 0 || py >= frame_h as i64 {
            continue;
        }
        for col in 0..mask.width {
            let px = x + col as i64;
            if px < 0 || px >= frame_w as i64 {
                continue;
            }
            let alpha = mask.get(col, row);
            if alpha == 0 {
                continue;
            }
            let idx = (py as usize * frame_w as usize + px as usize) * ffmpeg::BYTES_PER_PIXEL;
            blend_pixel(&mut frame[idx..idx + 3], color, alpha);
        }
    }
}

fn blend_pixel(dst: &mut [u8], src: [u8; 3], alpha: u8) {
    let a = u16::from(alpha);
    let inv = 255 - a;
    for channel in 0..3 {
        let d = u16::from(dst[channel]);
        let s = u16::from(src[channel]);
        dst[channel] = ((s * a + d * inv + 127) / 255) as u8;
    }
}

/// Draws the active word onto frames, reusing the overlay while the word stays active.
pub struct SubtitleRenderer<R> {
    rasterizer: R,
    style: SubtitleStyle,
    width: u32,
    height: u32,
    cached: Option<(usize, Option<WordOverlay>)>,
}

impl<R: WordRasterizer> SubtitleRenderer<R> {
    pub fn new(rasterizer: R, style: SubtitleStyle, width: u32, height: u32) -> Self {
        Self {
            rasterizer,
            style,
            width,
            height,
            cached: None,
        }
    }

    fn overlay_for(&mut self, index: usize, word: &str) -> Option<&WordOverlay> {
        let stale = !matches!(&self.cached, Some((i, _)) if *i == index);
        if stale {
            let mask = self.rasterizer.rasterize(word);
            let overlay = WordOverlay::build(&mask, &self.style, self.width, self.height);
            self.cached = Some((index, overlay));
        }
        self.cached.as_ref().and_then(|(_, o)| o.as_ref())
    }

    /// Returns whether anything was drawn.
    pub fn render_frame(&mut self, frame: &mut [u8], active: Option<(usize, &WordTiming)>) -> bool {
        let Some((index, timing)) = active else {
            return false;
        };
        let (width, height, style) = (self.width, self.height, self.style);
        match self.overlay_for(index, &timing.word) {
            Some(overlay) => {
                overlay.apply(frame, width, height, &style);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BurnStats {
    pub frames: u64,
    pub frames_with_text: u64,
}

/// Copies every frame from `source` to `sink`, drawing the word active at `i / fps` on frame `i`.
pub async fn burn_subtitles<S, K, R>(
    source: &mut S,
    sink: &mut K,
    renderer: &mut SubtitleRenderer<R>,
    words: &[WordTiming],
    fps: u32,
) -> Result<BurnStats>
where
    S: FrameSource + ?Sized,
    K: FrameSink + ?Sized,
    R: WordRasterizer,
{
    if fps == 0 {
        bail!("fps must be non-zero");
    }

    let mut cursor = ActiveWordCursor::new(words);
    let mut frame = vec![0u8; source.frame_size()];
    let mut stats = BurnStats::default();

    while source.next_frame(&mut frame).await? {
        let t = frame_timestamp(stats.frames, fps);
        if renderer.render_frame(&mut frame, cursor.active_at(t)) {
            stats.frames_with_text += 1;
        }
        sink.write_frame(&frame).await?;
        stats.frames += 1;
    }

    Ok(stats)
}

/// Reads `input`, burns `words` in, and writes the silent result to `output`.
pub async fn render_subtitled_video(
    cfg: &Config,
    words: &[WordTiming],
    input: &Path,
    output: &Path,
) -> Result<BurnStats> {
    let painter = TextPainter::from_file(&cfg.font_path, cfg.font_size)?;
    let mut renderer = SubtitleRenderer::new(
        painter,
        SubtitleStyle::from_config(cfg),
        cfg.video_width,
        cfg.video_height,
    );

    logi(format!(
        "Drawing {} words onto {} ({}x{} @ {} fps)",
        words.len(),
        input.display(),
        cfg.video_width,
        cfg.video_height,
        cfg.fps
    ));

    let mut reader = FrameReader::spawn(input, cfg.video_width, cfg.video_height)?;
    let mut writer = FrameWriter::spawn(output, cfg.video_width, cfg.video_height, cfg.fps)?;

    let stats = burn_subtitles(&mut reader, &mut writer, &mut renderer, words, cfg.fps).await?;
    writer.finish().await?;
    reader.finish().await?;

    logok(format!(
        "Subtitles drawn: {} frames, {} with text",
        stats.frames, stats.frames_with_text
    ));
    Ok(stats)
}
