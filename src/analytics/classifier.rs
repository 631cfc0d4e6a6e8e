use serde::Serialize;
use thiserror::Error;

use super::frame::Frame;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("inference failed: {0}")]
    Inference(Box<dyn std::error::Error + Send + Sync>),
}

/// A single label reported by a classifier for one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// Per-frame object classifier.
///
/// Calls are independent from the pipeline's point of view. Labels come back
/// already resolved to their names.
pub trait Classifier: Send {
    fn name(&self) -> &'static str;

    fn detect(
        &mut self,
        frame: &Frame,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, ClassifierError>;
}

/// Classifier that never detects anything, for motion-only runs.
pub struct NoopClassifier;

impl NoopClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NoopClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for NoopClassifier {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn detect(
        &mut self,
        _frame: &Frame,
        _confidence_threshold: f32,
    ) -> Result<Vec<Detection>, ClassifierError> {
        Ok(Vec::new())
    }
}
