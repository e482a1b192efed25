pub mod attempt;
pub mod bbox;
pub mod calibration;
pub mod classifier;
pub mod config;
pub mod detection;
pub mod error;
pub mod frame;
pub mod math;
pub mod overlay;
pub mod pipeline;
pub mod recorder;
pub mod roi;
pub mod segmentation;
pub mod source;
pub mod tracker;
pub mod trajectory;

mod circular_queue;
mod track;

pub use attempt::{Attempt, Resolution};
pub use classifier::Outcome;
pub use config::PipelineConfig;
pub use detection::{Detection, ObjectClass};
pub use error::Error;
pub use frame::{Frame, FrameRecord, VideoMetadata};
pub use pipeline::Pipeline;
pub use recorder::RunStats;
pub use track::{Track, TrackId, TrackTable};
pub use trajectory::TrajectoryFit;
