use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use super::motion::{Behavior, MotionScore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamEnd {
    #[default]
    Completed,
    /// Decoding failed mid-stream; the report covers the frames before it.
    Truncated,
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub frames: u64,
    pub sampled_frames: u64,
    pub classifier_failures: u64,
    pub detections: u64,
    pub end: StreamEnd,
}

/// Final verdict for one video.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub items: BTreeSet<String>,
    pub behavior: Behavior,
    pub motion: MotionScore,
    pub stats: RunStats,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.items.is_empty() {
            write!(f, "Item: none")?;
        } else {
            let items: Vec<&str> = self.items.iter().map(String::as_str).collect();
            write!(f, "Item: {}", items.join(", "))?;
        }
        write!(f, " | Behavior: {}", self.behavior)
    }
}

/// Collects matched target labels across sampled frames.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    matched: BTreeSet<String>,
}

impl ResultAggregator {
    pub fn merge(&mut self, labels: BTreeSet<String>) {
        for label in labels {
            if !self.matched.contains(&label) {
                tracing::debug!(label = %label, "target matched");
                self.matched.insert(label);
            }
        }
    }

    pub fn matched(&self) -> &BTreeSet<String> {
        &self.matched
    }

    pub fn finish(self, motion: MotionScore, behavior: Behavior, stats: RunStats) -> Report {
        Report {
            items: self.matched,
            behavior,
            motion,
            stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn still() -> MotionScore {
        MotionScore {
            changed_pixels: 0,
            pairs: 0,
            normalized: 0.0,
        }
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut agg = ResultAggregator::default();
        for _ in 0..1000 {
            agg.merge(labels(&["pen"]));
        }
        assert_eq!(agg.matched(), &labels(&["pen"]));
    }

    #[test]
    fn test_merge_unions() {
        let mut agg = ResultAggregator::default();
        agg.merge(labels(&["pen"]));
        agg.merge(BTreeSet::new());
        agg.merge(labels(&["cup", "pen"]));
        let report = agg.finish(still(), Behavior::Delicate, RunStats::default());
        assert_eq!(report.items, labels(&["cup", "pen"]));
    }

    #[test]
    fn test_display() {
        let mut agg = ResultAggregator::default();
        agg.merge(labels(&["pen", "cup"]));
        let report = agg.finish(still(), Behavior::Normal, RunStats::default());
        assert_eq!(report.to_string(), "Item: cup, pen | Behavior: normal");

        let empty = ResultAggregator::default().finish(still(), Behavior::Delicate, RunStats::default());
        assert_eq!(empty.to_string(), "Item: none | Behavior: delicate");
    }

    #[test]
    fn test_json_shape() {
        let report = ResultAggregator::default().finish(
            still(),
            Behavior::WithoutCare,
            RunStats {
                end: StreamEnd::Truncated,
                ..RunStats::default()
            },
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["behavior"], "withoutcare");
        assert_eq!(json["items"], serde_json::json!([]));
        assert_eq!(json["stats"]["end"], "truncated");
        assert_eq!(json["motion"]["normalized"], 0.0);
    }
}
