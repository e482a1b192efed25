use ndarray::Array1;

use crate::config::ClassifierConfig;
use crate::roi::RimRoi;

use super::features::{WindowFeatures, FEATURE_COUNT};
use super::{AttemptTracks, Outcome, OutcomeClassifier};

/// Logistic make-probability over the window feature vector.
#[derive(Debug, Clone)]
pub struct LearnedClassifier {
    weights: Array1<f32>,
    bias: f32,
    threshold: f32,
    min_samples: usize,
    min_band_confidence: f32,
}

impl LearnedClassifier {
    /// Expects validated configuration; missing weights are zero-padded.
    pub fn new(config: &ClassifierConfig) -> Self {
        let mut weights = Array1::zeros(FEATURE_COUNT);
        for (w, v) in weights.iter_mut().zip(config.learned.weights.iter()) {
            *w = *v;
        }

        Self {
            weights,
            bias: config.learned.bias,
            threshold: config.learned.decision_threshold,
            min_samples: config.min_samples,
            min_band_confidence: config.min_band_confidence,
        }
    }

    /// Probability that the window is a make.
    pub fn probability(&self, f: &WindowFeatures) -> f32 {
        let x = Array1::from(f.to_vector().to_vec());
        let z = self.weights.dot(&x) + self.bias;

        1.0 / (1.0 + (-z).exp())
    }

    pub fn decide(&self, f: &WindowFeatures) -> (Outcome, f32) {
        if !f.is_sufficient(self.min_samples, self.min_band_confidence) {
            return (Outcome::Unknown, 0.0);
        }

        let p = self.probability(f);

        if p >= self.threshold {
            (Outcome::Make, p)
        } else if p <= 1.0 - self.threshold {
            (Outcome::Miss, 1.0 - p)
        } else {
            (Outcome::Unknown, 0.0)
        }
    }
}

impl OutcomeClassifier for LearnedClassifier {
    fn classify(&self, tracks: &AttemptTracks, roi: &RimRoi) -> (Outcome, f32) {
        self.decide(&WindowFeatures::extract(tracks, roi))
    }
}
