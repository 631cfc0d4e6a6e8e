use std::collections::BTreeSet;
use std::num::NonZeroU64;

use super::classifier::{Classifier, Detection};
use super::frame::Frame;

pub enum SampleOutcome {
    /// Frame falls between detection strides.
    Skipped,
    Detections(Vec<Detection>),
    /// The classifier failed on this frame; treated as no detections.
    Failed,
}

/// Offers every `frame_step`-th frame to the classifier.
pub struct DetectionSampler {
    classifier: Box<dyn Classifier>,
    frame_step: NonZeroU64,
    confidence_threshold: f32,
}

impl DetectionSampler {
    pub fn new(classifier: Box<dyn Classifier>, frame_step: NonZeroU64, confidence_threshold: f32) -> Self {
        Self {
            classifier,
            frame_step,
            confidence_threshold,
        }
    }

    pub fn classifier_name(&self) -> &'static str {
        self.classifier.name()
    }

    pub fn is_sample_frame(&self, index: u64) -> bool {
        index % self.frame_step.get() == 0
    }

    pub fn sample(&mut self, frame: &Frame) -> SampleOutcome {
        if !self.is_sample_frame(frame.index()) {
            return SampleOutcome::Skipped;
        }

        match self.classifier.detect(frame, self.confidence_threshold) {
            Ok(mut detections) => {
                detections.retain(|d| d.confidence >= self.confidence_threshold);
                SampleOutcome::Detections(detections)
            }
            Err(e) => {
                tracing::warn!(frame = frame.index(), error = %e, "classifier failed, skipping frame");
                SampleOutcome::Failed
            }
        }
    }
}

/// Ordered, duplicate-free list of labels the caller cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSet {
    labels: Vec<String>,
}

impl TargetSet {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for label in labels {
            let label = label.into();
            if !out.contains(&label) {
                out.push(label);
            }
        }
        Self { labels: out }
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

pub struct TargetFilter {
    targets: TargetSet,
}

impl TargetFilter {
    pub fn new(targets: TargetSet) -> Self {
        Self { targets }
    }

    pub fn targets(&self) -> &TargetSet {
        &self.targets
    }

    /// Exact, case-sensitive match against the target set.
    pub fn filter(&self, detections: &[Detection]) -> BTreeSet<String> {
        detections
            .iter()
            .filter(|d| {
                let keep = self.targets.contains(&d.label);
                if !keep {
                    tracing::trace!(label = %d.label, confidence = d.confidence, "ignoring non-target label");
                }
                keep
            })
            .map(|d| d.label.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::classifier::ClassifierError;
    use crate::analytics::frame::PixelFormat;

    struct Fixed(Vec<Detection>);

    impl Classifier for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn detect(&mut self, _: &Frame, _: f32) -> Result<Vec<Detection>, ClassifierError> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    impl Classifier for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn detect(&mut self, _: &Frame, _: f32) -> Result<Vec<Detection>, ClassifierError> {
            Err(ClassifierError::InvalidFrame("corrupt".to_string()))
        }
    }

    fn step(n: u64) -> NonZeroU64 {
        NonZeroU64::new(n).unwrap()
    }

    fn frame(index: u64) -> Frame {
        Frame::new(index, 1, 1, PixelFormat::Gray, vec![0]).unwrap()
    }

    #[test]
    fn test_stride() {
        let sampler = DetectionSampler::new(Box::new(Fixed(Vec::new())), step(30), 0.5);
        assert!(sampler.is_sample_frame(0));
        assert!(!sampler.is_sample_frame(1));
        assert!(!sampler.is_sample_frame(29));
        assert!(sampler.is_sample_frame(30));
        assert!(sampler.is_sample_frame(60));

        let every = DetectionSampler::new(Box::new(Fixed(Vec::new())), step(1), 0.5);
        assert!((0..10).all(|i| every.is_sample_frame(i)));
    }

    #[test]
    fn test_sample_drops_low_confidence() {
        let mut sampler = DetectionSampler::new(
            Box::new(Fixed(vec![
                Detection::new("pen", 0.9),
                Detection::new("cup", 0.49),
                Detection::new("box", 0.5),
            ])),
            step(1),
            0.5,
        );
        let SampleOutcome::Detections(found) = sampler.sample(&frame(0)) else {
            panic!("expected detections");
        };
        let labels: Vec<&str> = found.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["pen", "box"]);
    }

    #[test]
    fn test_sample_skips_off_stride() {
        let mut sampler = DetectionSampler::new(Box::new(Fixed(vec![Detection::new("pen", 1.0)])), step(2), 0.5);
        assert!(matches!(sampler.sample(&frame(1)), SampleOutcome::Skipped));
        assert!(matches!(sampler.sample(&frame(2)), SampleOutcome::Detections(_)));
    }

    #[test]
    fn test_sample_swallows_classifier_error() {
        let mut sampler = DetectionSampler::new(Box::new(Broken), step(1), 0.5);
        assert!(matches!(sampler.sample(&frame(0)), SampleOutcome::Failed));
        assert_eq!(sampler.classifier_name(), "broken");
    }

    #[test]
    fn test_target_set_dedups_in_order() {
        let set = TargetSet::new(["pen", "cup", "pen"]);
        assert_eq!(set.labels(), &["pen".to_string(), "cup".to_string()]);
    }

    #[test]
    fn test_filter_exact_match() {
        let filter = TargetFilter::new(TargetSet::new(["pen", "cup"]));
        let matched = filter.filter(&[
            Detection::new("pen", 0.9),
            Detection::new("Pen", 0.99),
            Detection::new("person", 1.0),
            Detection::new("pen", 0.6),
            Detection::new("cup", 0.7),
        ]);
        let expected: BTreeSet<String> = ["cup", "pen"].iter().map(|s| s.to_string()).collect();
        assert_eq!(matched, expected);
    }

    #[test]
    fn test_empty_targets_match_nothing() {
        let filter = TargetFilter::new(TargetSet::default());
        assert!(filter.filter(&[Detection::new("pen", 1.0)]).is_empty());
    }
}
