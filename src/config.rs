use std::fs;
use std::path::{Path, PathBuf};

use serde_derive::{Deserialize, Serialize};

use crate::bbox::BBox;
use crate::classifier::features::FEATURE_COUNT;
use crate::error::{Error, Result};
use crate::frame::VideoMetadata;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub sampling: SamplingConfig,
    pub tracking: TrackingConfig,
    pub roi: RoiConfig,
    pub segmentation: SegmentationConfig,
    pub classifier: ClassifierConfig,
    pub trajectory: TrajectoryConfig,
    pub calibration: Option<CalibrationConfig>,
    pub output: OutputConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SamplingConfig {
    /// Seconds between sampled frames after bootstrap; overrides `frame_stride`.
    pub interval_seconds: Option<f64>,
    /// Take every n-th frame after bootstrap. Default 1.
    pub frame_stride: u32,
    /// Leading frames processed unconditionally to warm up tracks and the
    /// rim estimate. Default 30, must be at least 1.
    pub bootstrap_frames: u32,
    /// Frames with index >= this are never processed.
    pub max_frames: Option<u64>,
    /// Frames with timestamp > this are never processed.
    pub max_seconds: Option<f64>,
    /// Manual rim ROI `[x1, y1, x2, y2]` in pixels.
    pub rim_roi: Option<[f32; 4]>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: None,
            frame_stride: 1,
            bootstrap_frames: 30,
            max_frames: None,
            max_seconds: None,
            rim_roi: None,
        }
    }
}

impl SamplingConfig {
    /// Effective stride in frames after the bootstrap phase.
    pub fn stride(&self, fps: f64) -> u64 {
        match self.interval_seconds {
            Some(interval) => ((interval * fps).round() as u64).max(1),
            None => u64::from(self.frame_stride.max(1)),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrackingConfig {
    /// Detections below this confidence never reach association. Default 0.3.
    pub min_confidence: f32,
    /// Consecutive processed frames a track may go unmatched. Default 5.
    pub max_missed_frames: u32,
    /// Weight of IoU against normalized center distance in the match score. Default 0.5.
    pub iou_weight: f32,
    /// Lower bound of the gating distance in pixels. Default 40.
    pub min_gate_px: f32,
    /// Gate as a multiple of the track's box size. Default 3.
    pub box_gate_scale: f32,
    /// Gate widening per pixel-per-frame of speed and frame elapsed. Default 1.5.
    pub velocity_gate_scale: f32,
    /// Detections kept per track. Default 512.
    pub history_capacity: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
            max_missed_frames: 5,
            iou_weight: 0.5,
            min_gate_px: 40.0,
            box_gate_scale: 3.0,
            velocity_gate_scale: 1.5,
            history_capacity: 512,
        }
    }
}

/// Rim geometry, in multiples of the rim box dimensions.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RoiConfig {
    /// Vertical band extension above the rim box, in rim heights. Default 1.
    pub band_above: f32,
    /// Vertical band extension below the rim box, in rim heights. Default 1.
    pub band_below: f32,
    /// Horizontal slack of the through-rim test, as a fraction of rim width. Default 0.15.
    pub horizontal_tolerance: f32,
    /// Approach region reach to each side, in rim widths. Default 4.
    pub approach_side: f32,
    /// Approach region reach above the rim, in rim widths. Default 8.
    pub approach_above: f32,
    /// Approach region reach below the rim, in rim widths. Default 1.5.
    pub approach_below: f32,
}

impl Default for RoiConfig {
    fn default() -> Self {
        Self {
            band_above: 1.0,
            band_below: 1.0,
            horizontal_tolerance: 0.15,
            approach_side: 4.0,
            approach_above: 8.0,
            approach_below: 1.5,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Vertical motion below this many pixels per step counts as no motion. Default 2.
    pub motion_epsilon_px: f32,
    /// Consecutive non-ascending steps that confirm a release. Default 2.
    pub sustain_frames: u32,
    /// Longest Candidate phase before release falls back to the start frame. Default 4 s.
    pub max_dwell_seconds: f64,
    /// Longest InFlight phase before the attempt times out. Default 3 s.
    pub max_flight_seconds: f64,
    /// Samples after rim contact before the classifier is consulted. Default 3.
    pub decision_samples: u32,
    /// Resolving phase timeout after rim contact. Default 2 s.
    pub resolution_timeout_seconds: f64,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            motion_epsilon_px: 2.0,
            sustain_frames: 2,
            max_dwell_seconds: 4.0,
            max_flight_seconds: 3.0,
            decision_samples: 3,
            resolution_timeout_seconds: 2.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    Heuristic,
    Learned,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    pub kind: ClassifierKind,
    /// Fewer ball samples than this yields Unknown. Default 4.
    pub min_samples: usize,
    /// Mean detection confidence required inside the rim band. Default 0.3.
    pub min_band_confidence: f32,
    /// Through-rim ratio needed for a Make. Default 0.7.
    pub through_threshold: f32,
    /// Vertical deceleration ratio needed for a Make. Default 0.4.
    pub deceleration_threshold: f32,
    /// Through-rim ratio at or below which the ball counts as deflected. Default 0.3.
    pub miss_through_max: f32,
    /// Lateral deflection after rim contact, in rim widths, that signals a Miss. Default 1.
    pub deflection_threshold: f32,
    /// Decisions below this confidence are reported as Unknown. Default 0.5.
    pub min_decision_confidence: f32,
    pub learned: LearnedConfig,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            kind: ClassifierKind::Heuristic,
            min_samples: 4,
            min_band_confidence: 0.3,
            through_threshold: 0.7,
            deceleration_threshold: 0.4,
            miss_through_max: 0.3,
            deflection_threshold: 1.0,
            min_decision_confidence: 0.5,
            learned: LearnedConfig::default(),
        }
    }
}

/// Logistic scorer parameters, feature order as in `classifier::features`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LearnedConfig {
    pub weights: Vec<f32>,
    pub bias: f32,
    /// Make when p >= threshold, Miss when p <= 1 - threshold. Default 0.65.
    pub decision_threshold: f32,
}

impl Default for LearnedConfig {
    fn default() -> Self {
        Self {
            // through, deceleration, deflection, rebound, beside, band fraction
            weights: vec![4.0, 3.0, -2.5, -3.0, -6.0, 0.5],
            bias: -3.2,
            decision_threshold: 0.65,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrajectoryConfig {
    /// Savitzky–Golay window, odd. Default 5.
    pub smoothing_window: usize,
    /// Usable centers required for a fit. Default 5.
    pub min_points: usize,
    /// Horizontal extent required for a fit, in fit units. Default 0.02.
    pub min_horizontal_span: f64,
    /// Mean squared error ceiling, in squared fit units. Default 0.01.
    pub max_residual: f64,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            smoothing_window: 5,
            min_points: 5,
            min_horizontal_span: 0.02,
            max_residual: 0.01,
        }
    }
}

/// Image-to-court-plane correspondences. Plane `y` is height.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CalibrationConfig {
    pub image_points: Vec<[f64; 2]>,
    pub plane_points: Vec<[f64; 2]>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub path: Option<PathBuf>,
    pub overlay: Option<PathBuf>,
}

impl PipelineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&contents)?;

        Ok(config)
    }

    /// Checks every value that does not depend on the video.
    pub fn validate(&self) -> Result<()> {
        let s = &self.sampling;
        if s.bootstrap_frames < 1 {
            return Err(Error::config("sampling.bootstrap_frames", "must be >= 1"));
        }
        if s.frame_stride < 1 {
            return Err(Error::config("sampling.frame_stride", "must be >= 1"));
        }
        if let Some(interval) = s.interval_seconds {
            if !(interval.is_finite() && interval > 0.0) {
                return Err(Error::config("sampling.interval_seconds", "must be > 0"));
            }
        }
        if let Some(max_seconds) = s.max_seconds {
            if !(max_seconds.is_finite() && max_seconds > 0.0) {
                return Err(Error::config("sampling.max_seconds", "must be > 0"));
            }
        }
        if let Some(roi) = s.rim_roi {
            if !BBox::ltrb(roi[0], roi[1], roi[2], roi[3]).is_valid() {
                return Err(Error::InvalidRoi(roi));
            }
        }

        let t = &self.tracking;
        check_unit("tracking.min_confidence", t.min_confidence)?;
        check_unit("tracking.iou_weight", t.iou_weight)?;
        check_positive("tracking.min_gate_px", t.min_gate_px)?;
        check_non_negative("tracking.box_gate_scale", t.box_gate_scale)?;
        check_non_negative("tracking.velocity_gate_scale", t.velocity_gate_scale)?;
        if t.history_capacity < 2 {
            return Err(Error::config("tracking.history_capacity", "must be >= 2"));
        }

        let r = &self.roi;
        for (field, v) in [
            ("roi.band_above", r.band_above),
            ("roi.band_below", r.band_below),
            ("roi.horizontal_tolerance", r.horizontal_tolerance),
            ("roi.approach_side", r.approach_side),
            ("roi.approach_above", r.approach_above),
            ("roi.approach_below", r.approach_below),
        ] {
            check_non_negative(field, v)?;
        }

        let g = &self.segmentation;
        check_positive("segmentation.max_dwell_seconds", g.max_dwell_seconds as f32)?;
        check_positive("segmentation.max_flight_seconds", g.max_flight_seconds as f32)?;
        check_positive(
            "segmentation.resolution_timeout_seconds",
            g.resolution_timeout_seconds as f32,
        )?;
        if g.sustain_frames < 1 {
            return Err(Error::config("segmentation.sustain_frames", "must be >= 1"));
        }
        if g.decision_samples < 1 {
            return Err(Error::config("segmentation.decision_samples", "must be >= 1"));
        }

        let c = &self.classifier;
        check_unit("classifier.min_band_confidence", c.min_band_confidence)?;
        check_unit("classifier.through_threshold", c.through_threshold)?;
        check_unit("classifier.deceleration_threshold", c.deceleration_threshold)?;
        check_unit("classifier.miss_through_max", c.miss_through_max)?;
        check_unit("classifier.min_decision_confidence", c.min_decision_confidence)?;
        if c.miss_through_max >= c.through_threshold {
            return Err(Error::config(
                "classifier.miss_through_max",
                "must be below classifier.through_threshold",
            ));
        }
        if c.learned.weights.len() != FEATURE_COUNT {
            return Err(Error::config(
                "classifier.learned.weights",
                format!("expected {} weights, got {}", FEATURE_COUNT, c.learned.weights.len()),
            ));
        }
        if !(c.learned.decision_threshold > 0.5 && c.learned.decision_threshold <= 1.0) {
            return Err(Error::config(
                "classifier.learned.decision_threshold",
                "must be in (0.5, 1]",
            ));
        }

        let tr = &self.trajectory;
        if tr.smoothing_window < 3 || tr.smoothing_window % 2 == 0 {
            return Err(Error::config("trajectory.smoothing_window", "must be odd and >= 3"));
        }
        if tr.min_points < 3 {
            return Err(Error::config("trajectory.min_points", "must be >= 3"));
        }
        check_positive("trajectory.max_residual", tr.max_residual as f32)?;
        check_non_negative("trajectory.min_horizontal_span", tr.min_horizontal_span as f32)?;

        if let Some(cal) = &self.calibration {
            if cal.image_points.len() != cal.plane_points.len() {
                return Err(Error::InvalidCalibration(format!(
                    "{} image points but {} plane points",
                    cal.image_points.len(),
                    cal.plane_points.len()
                )));
            }
            if cal.image_points.len() < 4 {
                return Err(Error::InvalidCalibration(
                    "at least 4 point pairs are required".into(),
                ));
            }
            let finite = cal
                .image_points
                .iter()
                .chain(cal.plane_points.iter())
                .all(|p| p[0].is_finite() && p[1].is_finite());
            if !finite {
                return Err(Error::InvalidCalibration("non-finite point".into()));
            }
        }

        Ok(())
    }

    /// Checks values that depend on the video metadata.
    pub fn validate_for(&self, video: &VideoMetadata) -> Result<()> {
        if video.width == 0 || video.height == 0 {
            return Err(Error::config("video", "frame dimensions must be non-zero"));
        }
        if !(video.fps.is_finite() && video.fps > 0.0) {
            return Err(Error::config("video.fps", "must be > 0"));
        }

        if let Some(roi) = self.sampling.rim_roi {
            let inside = roi[0] >= 0.0
                && roi[1] >= 0.0
                && roi[2] <= video.width as f32
                && roi[3] <= video.height as f32;
            if !inside {
                return Err(Error::InvalidRoi(roi));
            }
        }

        Ok(())
    }
}

fn check_unit(field: &'static str, v: f32) -> Result<()> {
    if (0.0..=1.0).contains(&v) {
        Ok(())
    } else {
        Err(Error::config(field, "must be within [0, 1]"))
    }
}

fn check_positive(field: &'static str, v: f32) -> Result<()> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(Error::config(field, "must be > 0"))
    }
}

fn check_non_negative(field: &'static str, v: f32) -> Result<()> {
    if v.is_finite() && v >= 0.0 {
        Ok(())
    } else {
        Err(Error::config(field, "must be >= 0"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_zero_bootstrap_frames_rejected() {
        let mut config = PipelineConfig::default();
        config.sampling.bootstrap_frames = 0;

        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig {
                field: "sampling.bootstrap_frames",
                ..
            })
        ));
    }

    #[test]
    fn test_malformed_roi_rejected() {
        let mut config = PipelineConfig::default();
        config.sampling.rim_roi = Some([100.0, 50.0, 80.0, 70.0]);
        assert!(matches!(config.validate(), Err(Error::InvalidRoi(_))));

        config.sampling.rim_roi = Some([100.0, 50.0, 180.0, 70.0]);
        config.validate().unwrap();

        let video = VideoMetadata {
            width: 160,
            height: 120,
            fps: 30.0,
            frame_count: None,
        };
        assert!(matches!(config.validate_for(&video), Err(Error::InvalidRoi(_))));
    }

    #[test]
    fn test_negative_gate_scales_rejected() {
        let mut config = PipelineConfig::default();
        config.tracking.velocity_gate_scale = -1.5;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig {
                field: "tracking.velocity_gate_scale",
                ..
            })
        ));

        let mut config = PipelineConfig::default();
        config.tracking.box_gate_scale = f32::NAN;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig {
                field: "tracking.box_gate_scale",
                ..
            })
        ));

        let mut config = PipelineConfig::default();
        config.trajectory.min_horizontal_span = -0.1;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig {
                field: "trajectory.min_horizontal_span",
                ..
            })
        ));

        // zero scales leave the gate at min_gate_px
        let mut config = PipelineConfig::default();
        config.tracking.box_gate_scale = 0.0;
        config.tracking.velocity_gate_scale = 0.0;
        config.validate().unwrap();
    }

    #[test]
    fn test_calibration_needs_four_pairs() {
        let mut config = PipelineConfig::default();
        config.calibration = Some(CalibrationConfig {
            image_points: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]],
            plane_points: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]],
        });

        assert!(matches!(config.validate(), Err(Error::InvalidCalibration(_))));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "sampling:\n  interval_seconds: 0.2\n  rim_roi: [900, 300, 980, 330]\nclassifier:\n  kind: learned\n";
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.sampling.interval_seconds, Some(0.2));
        assert_eq!(config.sampling.bootstrap_frames, 30);
        assert_eq!(config.classifier.kind, ClassifierKind::Learned);
        assert_eq!(config.tracking, TrackingConfig::default());
        assert_eq!(config.sampling.stride(30.0), 6);
        config.validate().unwrap();
    }
}
