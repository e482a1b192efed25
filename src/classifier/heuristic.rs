use crate::config::ClassifierConfig;
use crate::roi::RimRoi;

use super::features::WindowFeatures;
use super::{AttemptTracks, Outcome, OutcomeClassifier};

const BESIDE_CONFIDENCE: f32 = 0.9;
const REBOUND_CONFIDENCE: f32 = 0.8;

/// Rule-based make/miss decision over the rim-band window.
#[derive(Debug, Clone)]
pub struct HeuristicClassifier {
    min_samples: usize,
    min_band_confidence: f32,
    through_threshold: f32,
    deceleration_threshold: f32,
    miss_through_max: f32,
    deflection_threshold: f32,
    min_decision_confidence: f32,
}

impl HeuristicClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            min_samples: config.min_samples,
            min_band_confidence: config.min_band_confidence,
            through_threshold: config.through_threshold,
            deceleration_threshold: config.deceleration_threshold,
            miss_through_max: config.miss_through_max,
            deflection_threshold: config.deflection_threshold,
            min_decision_confidence: config.min_decision_confidence,
        }
    }

    pub fn decide(&self, f: &WindowFeatures) -> (Outcome, f32) {
        if !f.is_sufficient(self.min_samples, self.min_band_confidence) {
            return (Outcome::Unknown, 0.0);
        }

        let (outcome, confidence) = if f.beside {
            (Outcome::Miss, BESIDE_CONFIDENCE)
        } else if f.rebound {
            (Outcome::Miss, REBOUND_CONFIDENCE)
        } else if f.through_ratio >= self.through_threshold
            && f.deceleration >= self.deceleration_threshold
        {
            (Outcome::Make, (f.through_ratio + f.deceleration) * 0.5)
        } else {
            let mut miss = 0.0f32;

            if f.through_ratio <= self.miss_through_max {
                miss = miss.max(1.0 - f.through_ratio);
            }
            if f.deflection >= self.deflection_threshold {
                let excess = (f.deflection - self.deflection_threshold) / self.deflection_threshold;
                miss = miss.max(0.5 + 0.5 * excess.min(1.0));
            }

            if miss > 0.0 {
                (Outcome::Miss, miss)
            } else {
                (Outcome::Unknown, 0.0)
            }
        };

        if outcome != Outcome::Unknown && confidence < self.min_decision_confidence {
            return (Outcome::Unknown, 0.0);
        }

        (outcome, confidence.clamp(0.0, 1.0))
    }
}

impl OutcomeClassifier for HeuristicClassifier {
    fn classify(&self, tracks: &AttemptTracks, roi: &RimRoi) -> (Outcome, f32) {
        self.decide(&WindowFeatures::extract(tracks, roi))
    }
}
