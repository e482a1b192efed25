//! Attempt segmentation.
//!
//! A single state machine walks the ball tracks frame by frame and cuts them
//! into shot attempts:
//!
//! ```text
//! Idle -> Candidate -> InFlight -> Resolving -> Resolved -> Idle
//! ```
//!
//! At most one attempt is open at any frame. The ball track of the open
//! attempt is pinned in the track table so that its history outlives the
//! associator giving up on it.

use nalgebra as na;
use serde_derive::Serialize;
use tracing::{debug, info};

use crate::attempt::{Attempt, AttemptId, Resolution};
use crate::classifier::{AttemptTracks, Classifier, Outcome, OutcomeClassifier};
use crate::config::SegmentationConfig;
use crate::detection::ObjectClass;
use crate::roi::RimRoi;
use crate::track::{TrackId, TrackTable};
use crate::trajectory::TrajectoryFitter;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Candidate,
    InFlight,
    Resolving,
    Resolved,
}

#[derive(Debug, Clone)]
struct OpenAttempt {
    phase: Phase,
    ball_track_id: TrackId,
    start_frame: u64,
    start_time: f64,

    release_frame: Option<u64>,
    flight_time: f64,

    rim_contact_frame: Option<u64>,
    contact_time: f64,
    contact_samples: u32,

    ascended: bool,
    non_ascending: u32,
    last_ascent_frame: u64,
    highest: (u64, f32),
    last_y: f32,
}

impl OpenAttempt {
    fn release(&mut self, frame_index: u64, timestamp: f64) {
        debug!(
            ball_track_id = self.ball_track_id,
            release_frame = frame_index,
            "candidate released"
        );

        self.phase = Phase::InFlight;
        self.release_frame = Some(frame_index);
        self.flight_time = timestamp;
    }

    fn contact(&mut self, frame_index: u64, timestamp: f64) {
        debug!(
            ball_track_id = self.ball_track_id,
            rim_contact_frame = frame_index,
            "ball entered rim band"
        );

        self.phase = Phase::Resolving;
        self.rim_contact_frame = Some(frame_index);
        self.contact_time = timestamp;
        self.contact_samples = 1;
    }

    /// Latest frame already recorded on the attempt.
    fn latest_frame(&self) -> u64 {
        self.rim_contact_frame
            .or(self.release_frame)
            .unwrap_or(self.start_frame)
    }
}

enum Transition {
    Stay,
    Cancel,
    Resolve {
        end_frame: u64,
        resolution: Resolution,
        decision: (Outcome, f32),
    },
}

pub struct AttemptSegmenter {
    config: SegmentationConfig,
    classifier: Classifier,
    fitter: TrajectoryFitter,
    open: Option<OpenAttempt>,
    next_attempt_id: AttemptId,
    // ball track of the last attempt, barred until it leaves the approach region
    cooldown: Option<TrackId>,
    resolved_at: Option<u64>,
}

impl AttemptSegmenter {
    pub fn new(config: SegmentationConfig, classifier: Classifier, fitter: TrajectoryFitter) -> Self {
        Self {
            config,
            classifier,
            fitter,
            open: None,
            next_attempt_id: 1,
            cooldown: None,
            resolved_at: None,
        }
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn phase(&self) -> Phase {
        match (&self.open, self.resolved_at) {
            (Some(open), _) => open.phase,
            (None, Some(_)) => Phase::Resolved,
            (None, None) => Phase::Idle,
        }
    }

    /// Ball track of the open attempt.
    pub fn open_ball_track(&self) -> Option<TrackId> {
        self.open.as_ref().map(|o| o.ball_track_id)
    }

    /// Advances the machine by one processed frame, after association.
    ///
    /// Without a rim ROI the machine stays idle.
    pub fn step(
        &mut self,
        frame_index: u64,
        timestamp: f64,
        table: &mut TrackTable,
        roi: Option<&RimRoi>,
    ) -> Option<Attempt> {
        self.resolved_at = None;
        let roi = roi?;

        self.update_cooldown(frame_index, table, roi);

        let mut open = match self.open.take() {
            Some(open) => open,
            None => {
                self.open = self.begin(frame_index, timestamp, table, roi);
                return None;
            }
        };

        match self.advance(&mut open, frame_index, timestamp, table, roi) {
            Transition::Stay => {
                self.open = Some(open);
                None
            }
            Transition::Cancel => {
                debug!(ball_track_id = open.ball_track_id, frame_index, "candidate cancelled");
                table.unpin(open.ball_track_id);
                None
            }
            Transition::Resolve {
                end_frame,
                resolution,
                decision,
            } => Some(self.emit(open, end_frame, resolution, decision, table, roi)),
        }
    }

    /// Closes the open attempt as Unknown when the run stops early.
    ///
    /// A candidate that was never released is not an attempt yet and is
    /// dropped.
    pub fn force_resolve(
        &mut self,
        frame_index: u64,
        table: &mut TrackTable,
        roi: Option<&RimRoi>,
    ) -> Option<Attempt> {
        let open = self.open.take()?;

        match (open.release_frame, roi) {
            (Some(_), Some(roi)) => {
                let end_frame = frame_index.max(open.latest_frame());
                Some(self.emit(
                    open,
                    end_frame,
                    Resolution::Capped,
                    (Outcome::Unknown, 0.0),
                    table,
                    roi,
                ))
            }
            _ => {
                table.unpin(open.ball_track_id);
                None
            }
        }
    }

    fn update_cooldown(&mut self, frame_index: u64, table: &TrackTable, roi: &RimRoi) {
        if let Some(id) = self.cooldown {
            let cleared = match table.get(id) {
                Some(t) if t.is_active() => {
                    t.last_seen_frame == frame_index
                        && !roi.in_approach(&t.last_detection().center())
                }
                _ => true,
            };

            if cleared {
                self.cooldown = None;
            }
        }
    }

    fn begin(
        &self,
        frame_index: u64,
        timestamp: f64,
        table: &mut TrackTable,
        roi: &RimRoi,
    ) -> Option<OpenAttempt> {
        let rim = roi.center();

        // closest to the rim wins, ties go to the lower id
        let (ball_track_id, pos) = table
            .active_of(ObjectClass::Ball)
            .filter(|t| t.last_seen_frame == frame_index && Some(t.track_id) != self.cooldown)
            .map(|t| (t.track_id, t.last_detection().center()))
            .filter(|(_, p)| roi.in_approach(p))
            .min_by(|a, b| na::distance(&a.1, &rim).total_cmp(&na::distance(&b.1, &rim)))?;

        table.pin(ball_track_id);
        debug!(ball_track_id, frame_index, "attempt candidate");

        Some(OpenAttempt {
            phase: Phase::Candidate,
            ball_track_id,
            start_frame: frame_index,
            start_time: timestamp,
            release_frame: None,
            flight_time: timestamp,
            rim_contact_frame: None,
            contact_time: timestamp,
            contact_samples: 0,
            ascended: false,
            non_ascending: 0,
            last_ascent_frame: frame_index,
            highest: (frame_index, pos.y),
            last_y: pos.y,
        })
    }

    fn advance(
        &self,
        open: &mut OpenAttempt,
        frame_index: u64,
        timestamp: f64,
        table: &TrackTable,
        roi: &RimRoi,
    ) -> Transition {
        let track = match table.get(open.ball_track_id) {
            Some(t) if t.is_active() => t,
            Some(t) => return lost(open, t.last_seen_frame),
            None => return lost(open, open.latest_frame()),
        };

        if track.last_seen_frame != frame_index {
            return self.timeouts(open, frame_index, timestamp);
        }

        let pos = track.last_detection().center();

        // image y grows downward
        let dy = pos.y - open.last_y;
        let rising = dy < -self.config.motion_epsilon_px;
        open.last_y = pos.y;

        if open.phase == Phase::Candidate {
            if rising {
                open.ascended = true;
                open.non_ascending = 0;
                open.last_ascent_frame = frame_index;
            } else if open.ascended {
                open.non_ascending += 1;
            }

            if pos.y < open.highest.1 {
                open.highest = (frame_index, pos.y);
            }

            if !open.ascended && !roi.in_approach(&pos) {
                return Transition::Cancel;
            }

            if open.ascended && open.non_ascending >= self.config.sustain_frames {
                let release = open.last_ascent_frame;
                open.release(release, timestamp);
            } else if !rising && roi.in_band(pos.y) {
                // first seen already descending: no ascent to anchor the release
                let release = if open.ascended {
                    open.highest.0
                } else {
                    open.start_frame
                };
                open.release(release, timestamp);
            } else if timestamp - open.start_time > self.config.max_dwell_seconds {
                let release = open.start_frame;
                open.release(release, timestamp);
            } else {
                return Transition::Stay;
            }
        }

        if open.phase == Phase::InFlight {
            if roi.in_band(pos.y) && !rising {
                open.contact(frame_index, timestamp);
            } else if !roi.in_approach(&pos) {
                return Transition::Resolve {
                    end_frame: frame_index,
                    resolution: Resolution::LeftRegion,
                    decision: self.classify(open, frame_index, table, roi),
                };
            } else if timestamp - open.flight_time > self.config.max_flight_seconds {
                return timeout(frame_index);
            } else {
                return Transition::Stay;
            }
        } else if open.rim_contact_frame != Some(frame_index) {
            open.contact_samples += 1;
        }

        // resolving
        if roi.below_band(pos.y) || !roi.in_approach(&pos) {
            return Transition::Resolve {
                end_frame: frame_index,
                resolution: Resolution::Classified,
                decision: self.classify(open, frame_index, table, roi),
            };
        }

        if open.contact_samples >= self.config.decision_samples {
            let decision = self.classify(open, frame_index, table, roi);
            if decision.0 != Outcome::Unknown {
                return Transition::Resolve {
                    end_frame: frame_index,
                    resolution: Resolution::Classified,
                    decision,
                };
            }
        }

        if timestamp - open.contact_time > self.config.resolution_timeout_seconds {
            return timeout(frame_index);
        }

        Transition::Stay
    }

    /// Time limits checked on frames where the ball was not observed.
    fn timeouts(&self, open: &mut OpenAttempt, frame_index: u64, timestamp: f64) -> Transition {
        match open.phase {
            Phase::Candidate if timestamp - open.start_time > self.config.max_dwell_seconds => {
                let release = open.start_frame;
                open.release(release, timestamp);
                Transition::Stay
            }
            Phase::InFlight if timestamp - open.flight_time > self.config.max_flight_seconds => {
                timeout(frame_index)
            }
            Phase::Resolving
                if timestamp - open.contact_time > self.config.resolution_timeout_seconds =>
            {
                timeout(frame_index)
            }
            _ => Transition::Stay,
        }
    }

    fn classify(
        &self,
        open: &OpenAttempt,
        frame_index: u64,
        table: &TrackTable,
        roi: &RimRoi,
    ) -> (Outcome, f32) {
        let from = open.release_frame.unwrap_or(open.start_frame);
        let tracks = AttemptTracks::collect(table, open.ball_track_id, from, frame_index);

        self.classifier.classify(&tracks, roi)
    }

    fn emit(
        &mut self,
        open: OpenAttempt,
        end_frame: u64,
        resolution: Resolution,
        (outcome, outcome_confidence): (Outcome, f32),
        table: &mut TrackTable,
        roi: &RimRoi,
    ) -> Attempt {
        let trajectory = open.release_frame.and_then(|release| {
            let tracks = AttemptTracks::collect(table, open.ball_track_id, release, end_frame);
            self.fitter.fit(&tracks.ball, open.rim_contact_frame)
        });

        table.unpin(open.ball_track_id);

        let attempt = Attempt {
            attempt_id: self.next_attempt_id,
            ball_track_id: open.ball_track_id,
            rim_track_id: roi.rim_track_id,
            start_frame: open.start_frame,
            release_frame: open.release_frame,
            rim_contact_frame: open.rim_contact_frame,
            end_frame,
            outcome,
            outcome_confidence,
            resolution,
            trajectory,
        };

        self.next_attempt_id += 1;
        self.cooldown = Some(open.ball_track_id);
        self.resolved_at = Some(end_frame);

        match resolution {
            Resolution::Classified | Resolution::LeftRegion => info!(
                attempt_id = attempt.attempt_id,
                ?outcome,
                outcome_confidence,
                start_frame = attempt.start_frame,
                end_frame,
                "attempt resolved"
            ),
            _ => info!(
                attempt_id = attempt.attempt_id,
                ?resolution,
                start_frame = attempt.start_frame,
                end_frame,
                "attempt force-resolved as unknown"
            ),
        }

        attempt
    }
}

fn lost(open: &OpenAttempt, last_seen_frame: u64) -> Transition {
    if open.release_frame.is_none() {
        return Transition::Cancel;
    }

    Transition::Resolve {
        end_frame: last_seen_frame.max(open.latest_frame()),
        resolution: Resolution::TrackLost,
        decision: (Outcome::Unknown, 0.0),
    }
}

fn timeout(frame_index: u64) -> Transition {
    Transition::Resolve {
        end_frame: frame_index,
        resolution: Resolution::Timeout,
        decision: (Outcome::Unknown, 0.0),
    }
}
