mod classifier;
mod decoder;
mod frame;
mod motion;
#[cfg(feature = "yolo")]
mod object;
mod pipeline;
mod report;
mod sampler;

pub use classifier::{Classifier, ClassifierError, Detection, NoopClassifier};
pub use decoder::{FfmpegSource, FrameDecodeError, FrameSource, MemorySource, OpenError};
pub use frame::{Frame, FrameError, PixelFormat};
pub use motion::{Behavior, BehaviorClassifier, MotionAccumulator, MotionScore, MotionScorer};
#[cfg(feature = "yolo")]
pub use object::YoloClassifier;
pub use pipeline::{Pipeline, PipelineError};
pub use report::{Report, ResultAggregator, RunStats, StreamEnd};
pub use sampler::{DetectionSampler, SampleOutcome, TargetFilter, TargetSet};
