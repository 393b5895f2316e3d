use serde::{Deserialize, Serialize};

/// One spoken word and the half-open interval `[start, end)` (seconds) it covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

impl WordTiming {
    /// Normalized record (trimmed, uppercase). `None` when nothing is left to draw.
    pub fn new(raw_word: &str, start: f64, end: f64) -> Option<Self> {
        let word = normalize_word(raw_word);
        if word.is_empty() {
            return None;
        }
        Some(Self { word, start, end })
    }

    pub fn contains(&self, t: f64) -> bool {
        self.start <= t && t < self.end
    }
}

pub fn normalize_word(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Presentation time of frame `index` at `fps`.
pub fn frame_timestamp(index: u64, fps: u32) -> f64 {
    index as f64 / fps as f64
}

/// Active-word lookup for non-decreasing timestamps.
///
/// Records that ended before the current timestamp are skipped for good, so a
/// full pass over a video costs O(frames + words). For start-ordered,
/// non-overlapping records this returns exactly what a first-match scan would.
#[derive(Debug, Clone)]
pub struct ActiveWordCursor<'a> {
    words: &'a [WordTiming],
    next: usize,
    last_t: f64,
}

impl<'a> ActiveWordCursor<'a> {
    pub fn new(words: &'a [WordTiming]) -> Self {
        Self {
            words,
            next: 0,
            last_t: f64::NEG_INFINITY,
        }
    }

    /// Index and record active at `t`, if any.
    pub fn active_at(&mut self, t: f64) -> Option<(usize, &'a WordTiming)> {
        if t < self.last_t {
            // Went backwards; restart rather than return a stale answer.
            self.next = 0;
        }
        self.last_t = t;

        while let Some(w) = self.words.get(self.next) {
            if w.end <= t {
                self.next += 1;
            } else {
                break;
            }
        }

        let idx = self.next;
        let w = self.words.get(idx)?;
        w.contains(t).then_some((idx, w))
    }
}
