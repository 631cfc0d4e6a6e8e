use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::MotionConfig;

use super::frame::Frame;

/// How footage should be handled, ordered from calmest to roughest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Behavior {
    Delicate,
    Normal,
    WithoutCare,
}

impl Behavior {
    pub fn as_str(self) -> &'static str {
        match self {
            Behavior::Delicate => "delicate",
            Behavior::Normal => "normal",
            Behavior::WithoutCare => "withoutcare",
        }
    }
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotionAccumulator {
    pub changed_pixels: u64,
    pub pairs: u64,
    pub skipped_pairs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MotionScore {
    pub changed_pixels: u64,
    pub pairs: u64,
    pub normalized: f64,
}

struct PreviousFrame {
    index: u64,
    width: u32,
    height: u32,
    luma: Vec<u8>,
}

/// Accumulates above-threshold pixel change over consecutive frames.
pub struct MotionScorer {
    noise_threshold: u8,
    scale: f64,
    previous: Option<PreviousFrame>,
    acc: MotionAccumulator,
}

impl MotionScorer {
    pub fn new(config: &MotionConfig) -> Self {
        Self {
            noise_threshold: config.noise_threshold,
            scale: config.scale,
            previous: None,
            acc: MotionAccumulator::default(),
        }
    }

    /// Feeds the next frame of the stream. The first frame only primes the
    /// scorer.
    pub fn observe(&mut self, frame: &Frame) {
        let luma = frame.luma().into_owned();

        if let Some(prev) = self.previous.take() {
            if (prev.width, prev.height) == (frame.width(), frame.height()) {
                self.accumulate(&prev.luma, &luma);
            } else {
                self.skip_pair(prev.index, frame);
            }
        }

        self.previous = Some(PreviousFrame {
            index: frame.index(),
            width: frame.width(),
            height: frame.height(),
            luma,
        });
    }

    /// Scores one explicit frame pair without touching the remembered frame.
    pub fn update(&mut self, prev: &Frame, curr: &Frame) {
        if (prev.width(), prev.height()) != (curr.width(), curr.height()) {
            self.skip_pair(prev.index(), curr);
            return;
        }
        self.accumulate(&prev.luma(), &curr.luma());
    }

    pub fn accumulator(&self) -> MotionAccumulator {
        self.acc
    }

    pub fn finalize(self) -> MotionScore {
        MotionScore {
            changed_pixels: self.acc.changed_pixels,
            pairs: self.acc.pairs,
            normalized: self.acc.changed_pixels as f64 / self.scale,
        }
    }

    fn accumulate(&mut self, prev: &[u8], curr: &[u8]) {
        let threshold = self.noise_threshold;
        let changed = prev
            .iter()
            .zip(curr)
            .filter(|&(&a, &b)| a.abs_diff(b) > threshold)
            .count() as u64;

        self.acc.changed_pixels += changed;
        self.acc.pairs += 1;
    }

    fn skip_pair(&mut self, prev_index: u64, curr: &Frame) {
        tracing::warn!(
            prev = prev_index,
            frame = curr.index(),
            width = curr.width(),
            height = curr.height(),
            "frame size changed mid-stream, skipping motion pair"
        );
        self.acc.skipped_pairs += 1;
    }
}

/// Maps a normalized motion score onto a [`Behavior`] with two breakpoints.
#[derive(Debug, Clone, Copy)]
pub struct BehaviorClassifier {
    low: f64,
    high: f64,
}

impl BehaviorClassifier {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn from_config(config: &MotionConfig) -> Self {
        Self::new(config.breakpoints.0, config.breakpoints.1)
    }

    pub fn classify(&self, score: f64) -> Behavior {
        if score < self.low {
            Behavior::Delicate
        } else if score < self.high {
            Behavior::Normal
        } else {
            Behavior::WithoutCare
        }
    }
}

impl Default for BehaviorClassifier {
    fn default() -> Self {
        Self::from_config(&MotionConfig::default())
    }
}
