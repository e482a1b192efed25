use serde::Serializer;
use serde_derive::Serialize;

use crate::classifier::Outcome;
use crate::track::TrackId;
use crate::trajectory::{FitSpace, TrajectoryFit};

pub type AttemptId = u32;

/// Why an attempt was closed.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// The classifier answered while the ball was at the rim.
    Classified,
    /// Flight or resolution time ran out.
    Timeout,
    /// The ball track was terminated mid-flight.
    TrackLost,
    /// The run stopped with the attempt still open.
    Capped,
    /// The ball left the approach region before reaching the rim band.
    LeftRegion,
}

/// One segmented shot attempt.
///
/// `start_frame <= release_frame <= rim_contact_frame <= end_frame` holds
/// for every frame that is defined.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Attempt {
    pub attempt_id: AttemptId,
    pub ball_track_id: TrackId,
    pub rim_track_id: Option<TrackId>,
    pub start_frame: u64,
    pub release_frame: Option<u64>,
    pub rim_contact_frame: Option<u64>,
    pub end_frame: u64,
    pub outcome: Outcome,
    pub outcome_confidence: f32,
    pub resolution: Resolution,
    #[serde(serialize_with = "serialize_trajectory")]
    pub trajectory: Option<TrajectoryFit>,
}

impl Attempt {
    pub fn is_ordered(&self) -> bool {
        let frames = [
            Some(self.start_frame),
            self.release_frame,
            self.rim_contact_frame,
            Some(self.end_frame),
        ];

        frames
            .iter()
            .flatten()
            .zip(frames.iter().flatten().skip(1))
            .all(|(a, b)| a <= b)
    }

    #[inline]
    pub fn is_decided(&self) -> bool {
        self.outcome != Outcome::Unknown
    }
}

#[derive(Serialize)]
struct TrajectoryFields<'a> {
    coefficients: Option<&'a [f64; 3]>,
    apex_height: Option<f64>,
    entry_angle_degrees: Option<f64>,
    fit_residual: Option<f64>,
    num_points_used: Option<usize>,
    space: Option<FitSpace>,
}

// every trajectory field is written, explicitly null without a fit
fn serialize_trajectory<S: Serializer>(
    fit: &Option<TrajectoryFit>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let fields = TrajectoryFields {
        coefficients: fit.as_ref().map(|f| &f.coefficients),
        apex_height: fit.as_ref().map(|f| f.apex_height),
        entry_angle_degrees: fit.as_ref().map(|f| f.entry_angle_degrees),
        fit_residual: fit.as_ref().map(|f| f.fit_residual),
        num_points_used: fit.as_ref().map(|f| f.num_points_used),
        space: fit.as_ref().map(|f| f.space),
    };

    serde::Serialize::serialize(&fields, serializer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt() -> Attempt {
        Attempt {
            attempt_id: 1,
            ball_track_id: 4,
            rim_track_id: None,
            start_frame: 10,
            release_frame: Some(12),
            rim_contact_frame: None,
            end_frame: 20,
            outcome: Outcome::Unknown,
            outcome_confidence: 0.0,
            resolution: Resolution::Timeout,
            trajectory: None,
        }
    }

    #[test]
    fn test_ordering_skips_undefined_frames() {
        let mut a = attempt();
        assert!(a.is_ordered());

        a.rim_contact_frame = Some(11);
        assert!(!a.is_ordered());

        a.rim_contact_frame = Some(15);
        a.release_frame = None;
        assert!(a.is_ordered());
    }

    #[test]
    fn test_missing_trajectory_serializes_explicit_nulls() {
        let v = serde_json::to_value(attempt()).unwrap();
        let t = &v["trajectory"];

        assert!(t.is_object());
        for key in [
            "coefficients",
            "apex_height",
            "entry_angle_degrees",
            "fit_residual",
            "num_points_used",
            "space",
        ] {
            assert!(t.get(key).unwrap().is_null(), "{}", key);
        }
        assert!(v["rim_track_id"].is_null());
        assert!(v["rim_contact_frame"].is_null());
        assert_eq!(v["resolution"], "timeout");
        assert_eq!(v["outcome"], "unknown");
    }

    #[test]
    fn test_trajectory_fields_when_fitted() {
        let mut a = attempt();
        a.trajectory = Some(TrajectoryFit {
            coefficients: [-4.0, 4.0, -0.2],
            apex_height: 0.8,
            entry_angle_degrees: 58.0,
            fit_residual: 0.0,
            num_points_used: 9,
            space: FitSpace::Image,
        });

        let v = serde_json::to_value(a).unwrap();
        assert_eq!(v["trajectory"]["apex_height"], 0.8);
        assert_eq!(v["trajectory"]["num_points_used"], 9);
        assert_eq!(v["trajectory"]["space"], "image");
    }
}
