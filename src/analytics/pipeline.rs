use std::num::NonZeroU64;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use thiserror::Error;

use crate::config::{Config, ConfigError};

use super::classifier::Classifier;
use super::decoder::{FfmpegSource, FrameDecodeError, FrameSource, OpenError};
use super::frame::Frame;
use super::motion::{BehaviorClassifier, MotionScorer};
use super::report::{Report, ResultAggregator, RunStats, StreamEnd};
use super::sampler::{DetectionSampler, SampleOutcome, TargetFilter, TargetSet};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to open video: {0}")]
    Open(#[from] OpenError),
}

enum Pull {
    Frame(Frame),
    End(StreamEnd),
}

/// Drives one pass over a video: every frame feeds motion scoring, every
/// `frame_step`-th frame is also offered to the classifier.
pub struct Pipeline {
    config: Config,
    sampler: DetectionSampler,
    filter: TargetFilter,
    behavior: BehaviorClassifier,
    shutdown: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(config: &Config, classifier: Box<dyn Classifier>) -> Result<Self, ConfigError> {
        config.validate()?;
        let frame_step = NonZeroU64::new(config.pipeline.frame_step)
            .ok_or(ConfigError::InvalidFrameStep(config.pipeline.frame_step))?;

        let targets = TargetSet::new(config.detector.target_labels.iter().cloned());
        if targets.is_empty() {
            tracing::warn!("no target labels configured, reports will list no items");
        }

        Ok(Self {
            sampler: DetectionSampler::new(
                classifier,
                frame_step,
                config.detector.confidence_threshold,
            ),
            filter: TargetFilter::new(targets),
            behavior: BehaviorClassifier::from_config(&config.motion),
            shutdown: Arc::new(AtomicBool::new(false)),
            config: config.clone(),
        })
    }

    /// Stops the run at the next frame boundary once `shutdown` is set. The
    /// partial run still produces a report.
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn analyze_file(&mut self, path: &Path) -> Result<Report, PipelineError> {
        let source = FfmpegSource::open(path, &self.config.decoder)?;
        let (width, height) = source.dimensions();
        tracing::info!(path = %path.display(), width, height, "video opened");
        Ok(self.analyze(source))
    }

    /// Runs the source to its end and closes it.
    pub fn analyze<S: FrameSource>(&mut self, mut source: S) -> Report {
        tracing::info!(
            classifier = self.sampler.classifier_name(),
            frame_step = self.config.pipeline.frame_step,
            concurrent = self.config.pipeline.concurrent,
            "analysis started"
        );

        let report = if self.config.pipeline.concurrent {
            self.run_concurrent(&mut source)
        } else {
            self.run_sequential(&mut source)
        };

        source.close();
        report
    }

    fn run_sequential<S: FrameSource>(&mut self, source: &mut S) -> Report {
        let mut motion = MotionScorer::new(&self.config.motion);
        let mut aggregator = ResultAggregator::default();
        let mut stats = RunStats::default();

        let end = loop {
            let frame = match pull_frame(source, stats.frames, &self.shutdown) {
                Pull::Frame(frame) => frame,
                Pull::End(end) => break end,
            };
            stats.frames += 1;

            motion.observe(&frame);
            detect_frame(&mut self.sampler, &self.filter, &frame, &mut aggregator, &mut stats);
        };
        stats.end = end;

        self.finalize(motion, aggregator, stats)
    }

    fn run_concurrent<S: FrameSource>(&mut self, source: &mut S) -> Report {
        let depth = self.config.pipeline.queue_depth;
        let (motion_tx, motion_rx) = mpsc::sync_channel::<Arc<Frame>>(depth);
        let (detect_tx, detect_rx) = mpsc::sync_channel::<Arc<Frame>>(depth);

        let motion_config = &self.config.motion;
        let sampler = &mut self.sampler;
        let filter = &self.filter;
        let shutdown = &self.shutdown;

        let (frames, end, motion, (aggregator, mut stats)) = thread::scope(|scope| {
            let motion_handle = scope.spawn(move || {
                let mut motion = MotionScorer::new(motion_config);
                for frame in motion_rx {
                    motion.observe(&frame);
                }
                motion
            });

            let detect_handle = scope.spawn(move || {
                let mut aggregator = ResultAggregator::default();
                let mut stats = RunStats::default();
                for frame in detect_rx {
                    detect_frame(sampler, filter, &frame, &mut aggregator, &mut stats);
                }
                (aggregator, stats)
            });

            let mut frames = 0u64;
            let end = loop {
                let frame = match pull_frame(source, frames, shutdown) {
                    Pull::Frame(frame) => Arc::new(frame),
                    Pull::End(end) => break end,
                };
                frames += 1;

                if motion_tx.send(Arc::clone(&frame)).is_err() || detect_tx.send(frame).is_err() {
                    tracing::error!(frame = frames - 1, "analysis worker exited early");
                    break StreamEnd::Truncated;
                }
            };

            // Hanging up lets both workers drain their queues and return.
            drop(motion_tx);
            drop(detect_tx);

            let motion = motion_handle
                .join()
                .unwrap_or_else(|e| std::panic::resume_unwind(e));
            let detected = detect_handle
                .join()
                .unwrap_or_else(|e| std::panic::resume_unwind(e));

            (frames, end, motion, detected)
        });

        stats.frames = frames;
        stats.end = end;
        self.finalize(motion, aggregator, stats)
    }

    fn finalize(&self, motion: MotionScorer, aggregator: ResultAggregator, stats: RunStats) -> Report {
        let skipped_pairs = motion.accumulator().skipped_pairs;
        let score = motion.finalize();
        let behavior = self.behavior.classify(score.normalized);

        tracing::info!(
            frames = stats.frames,
            sampled = stats.sampled_frames,
            classifier_failures = stats.classifier_failures,
            motion_pairs = score.pairs,
            skipped_pairs,
            changed_pixels = score.changed_pixels,
            score = format!("{:.4}", score.normalized),
            behavior = %behavior,
            items = aggregator.matched().len(),
            end = ?stats.end,
            "analysis finished"
        );

        aggregator.finish(score, behavior, stats)
    }
}

fn pull_frame<S: FrameSource>(source: &mut S, expected: u64, shutdown: &AtomicBool) -> Pull {
    if shutdown.load(Ordering::Relaxed) {
        tracing::info!(frame = expected, "analysis cancelled");
        return Pull::End(StreamEnd::Cancelled);
    }

    let err = match source.next_frame() {
        Ok(Some(frame)) if frame.index() == expected => return Pull::Frame(frame),
        Ok(Some(frame)) => FrameDecodeError::OutOfOrder {
            expected,
            got: frame.index(),
        },
        Ok(None) => return Pull::End(StreamEnd::Completed),
        Err(e) => e,
    };

    tracing::warn!(frame = expected, error = %err, "decoding stopped, finalizing with frames so far");
    Pull::End(StreamEnd::Truncated)
}

fn detect_frame(
    sampler: &mut DetectionSampler,
    filter: &TargetFilter,
    frame: &Frame,
    aggregator: &mut ResultAggregator,
    stats: &mut RunStats,
) {
    match sampler.sample(frame) {
        SampleOutcome::Skipped => {}
        SampleOutcome::Failed => {
            stats.sampled_frames += 1;
            stats.classifier_failures += 1;
        }
        SampleOutcome::Detections(detections) => {
            stats.sampled_frames += 1;
            stats.detections += detections.len() as u64;
            aggregator.merge(filter.filter(&detections));
        }
    }
}
