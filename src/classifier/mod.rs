//! Make/miss classification of a segmented attempt.
//!
//! Both strategies consume the same windowed ball features and answer with the
//! same `(Outcome, confidence)` pair, so the pipeline picks one from
//! configuration at run start and never looks at which one it holds.

pub mod features;
mod heuristic;
mod learned;

pub use features::WindowFeatures;
pub use heuristic::HeuristicClassifier;
pub use learned::LearnedClassifier;

use serde_derive::{Deserialize, Serialize};

use crate::config::{ClassifierConfig, ClassifierKind};
use crate::detection::Detection;
use crate::roi::RimRoi;
use crate::track::{TrackId, TrackTable};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Make,
    Miss,
    Unknown,
}

/// Ball evidence of one attempt, oldest sample first.
#[derive(Debug, Clone, Default)]
pub struct AttemptTracks {
    pub ball_track_id: TrackId,
    pub ball: Vec<Detection>,
}

impl AttemptTracks {
    pub fn collect(table: &TrackTable, ball_track_id: TrackId, from: u64, to: u64) -> Self {
        let ball = table
            .get(ball_track_id)
            .map(|t| t.detections_between(from, to).copied().collect())
            .unwrap_or_default();

        Self { ball_track_id, ball }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ball.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ball.is_empty()
    }
}

pub trait OutcomeClassifier {
    fn classify(&self, tracks: &AttemptTracks, roi: &RimRoi) -> (Outcome, f32);
}

/// The configured strategy.
#[derive(Debug, Clone)]
pub enum Classifier {
    Heuristic(HeuristicClassifier),
    Learned(LearnedClassifier),
}

impl Classifier {
    pub fn from_config(config: &ClassifierConfig) -> Self {
        match config.kind {
            ClassifierKind::Heuristic => Classifier::Heuristic(HeuristicClassifier::new(config)),
            ClassifierKind::Learned => Classifier::Learned(LearnedClassifier::new(config)),
        }
    }
}

impl OutcomeClassifier for Classifier {
    fn classify(&self, tracks: &AttemptTracks, roi: &RimRoi) -> (Outcome, f32) {
        match self {
            Classifier::Heuristic(c) => c.classify(tracks, roi),
            Classifier::Learned(c) => c.classify(tracks, roi),
        }
    }
}
