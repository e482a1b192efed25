use munkres::{solve_assignment, Position, WeightMatrix};
use tracing::{debug, trace, warn};

use crate::config::TrackingConfig;
use crate::detection::{Detection, ObjectClass};
use crate::track::{Track, TrackId, TrackTable};

const INFEASIBLE: f64 = 1.0e3;

// keeps rank bias well below any real score difference
const DETECTION_RANK_EPS: f64 = 1.0e-6;
const TRACK_RANK_EPS: f64 = 1.0e-9;

/// Turns per-frame detections into temporally continuous tracks.
pub struct TrackAssociator {
    config: TrackingConfig,
    table: TrackTable,
    next_id: TrackId,
}

impl TrackAssociator {
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            config,
            table: TrackTable::new(),
            next_id: 1,
        }
    }

    #[inline]
    pub fn table(&self) -> &TrackTable {
        &self.table
    }

    #[inline]
    pub fn table_mut(&mut self) -> &mut TrackTable {
        &mut self.table
    }

    #[inline]
    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.table.get(id)
    }

    /// Association score of a detection against a track, `None` when the
    /// detection falls outside the track's gate.
    pub fn score(&self, frame_index: u64, track: &Track, det: &Detection) -> Option<f32> {
        let last = track.last_detection();
        let elapsed = frame_index.saturating_sub(track.last_seen_frame).max(1) as f32;

        let gate = (self.config.box_gate_scale * last.size()).max(self.config.min_gate_px)
            + self.config.velocity_gate_scale * track.speed() * elapsed;

        let dist = (det.center() - last.center()).norm();
        if dist > gate {
            return None;
        }

        let w = self.config.iou_weight;

        Some(w * last.iou(det) + (1.0 - w) * (1.0 - dist / gate))
    }

    fn assignment(
        &self,
        frame_index: u64,
        tracks: &[TrackId],
        dets: &[&Detection],
    ) -> Vec<(usize, usize)> {
        if tracks.is_empty() || dets.is_empty() {
            return Vec::new();
        }

        let n = tracks.len().max(dets.len());
        let mut feasible = false;
        let mut data = Vec::with_capacity(n * n);

        for r in 0..n {
            for c in 0..n {
                let cost = match (tracks.get(r).and_then(|id| self.table.get(*id)), dets.get(c)) {
                    (Some(track), Some(det)) => match self.score(frame_index, track, det) {
                        Some(score) => {
                            feasible = true;
                            1.0 - f64::from(score)
                                + DETECTION_RANK_EPS * c as f64
                                + TRACK_RANK_EPS * r as f64
                        }
                        None => INFEASIBLE,
                    },
                    _ => INFEASIBLE,
                };

                data.push(cost);
            }
        }

        if !feasible {
            return Vec::new();
        }

        let costs = data.clone();
        let mut mat = WeightMatrix::from_row_vec(n, data);

        match solve_assignment(&mut mat) {
            Ok(positions) => positions
                .into_iter()
                .filter(|p: &Position| {
                    p.row < tracks.len()
                        && p.column < dets.len()
                        && costs[p.row * n + p.column] < INFEASIBLE
                })
                .map(|p| (p.row, p.column))
                .collect(),
            Err(_) => {
                warn!(frame_index, "assignment could not be solved");
                Vec::new()
            }
        }
    }

    /// Associates one frame of detections and returns the active tracks.
    pub fn update(&mut self, frame_index: u64, detections: &[Detection]) -> Vec<&Track> {
        let mut touched = Vec::new();

        for class in [ObjectClass::Ball, ObjectClass::Rim] {
            // highest confidence first so that rank bias favours it on ties
            let mut dets: Vec<&Detection> = detections
                .iter()
                .filter(|d| d.class == class)
                .filter(|d| d.confidence >= self.config.min_confidence && d.bbox.is_valid())
                .collect();
            dets.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

            let tracks = self.table.active_ids(class);
            let matches = self.assignment(frame_index, &tracks, &dets);

            let mut matched_dets = vec![false; dets.len()];
            for (r, c) in matches {
                matched_dets[c] = true;
                touched.push(tracks[r]);

                if let Some(track) = self.table.get_mut(tracks[r]) {
                    track.observe(*dets[c]);
                }
            }

            for (c, det) in dets.iter().enumerate() {
                if matched_dets[c] {
                    continue;
                }

                let id = self.next_id;
                self.next_id += 1;
                touched.push(id);

                debug!(track_id = id, ?class, frame_index, "track spawned");
                self.table.insert(Track::new(
                    id,
                    **det,
                    self.config.history_capacity,
                ));
            }
        }

        self.age(frame_index, &touched);

        self.table.active().collect()
    }

    /// Ages every active track by one processed frame without evidence.
    pub fn skip(&mut self, frame_index: u64) {
        self.age(frame_index, &[]);
    }

    fn age(&mut self, frame_index: u64, touched: &[TrackId]) {
        let mut expired = Vec::new();

        let active = self.table.active().map(|t| t.track_id).collect::<Vec<_>>();

        for id in active {
            if touched.contains(&id) {
                continue;
            }

            if let Some(track) = self.table.get_mut(id) {
                track.miss();
                trace!(track_id = id, missed = track.missed_frames, "track missed");

                if track.missed_frames > self.config.max_missed_frames {
                    expired.push(id);
                }
            }
        }

        for id in expired {
            debug!(track_id = id, frame_index, "track terminated");
            self.table.terminate(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BBox;

    fn det(frame: u64, class: ObjectClass, cx: f32, cy: f32, conf: f32) -> Detection {
        Detection::new(
            frame,
            frame as f64 / 30.0,
            class,
            BBox::ltrb(cx - 10.0, cy - 10.0, cx + 10.0, cy + 10.0),
            conf,
        )
    }

    fn associator() -> TrackAssociator {
        TrackAssociator::new(TrackingConfig::default())
    }

    #[test]
    fn test_low_confidence_never_creates_track() {
        let mut a = associator();
        let active = a.update(0, &[det(0, ObjectClass::Ball, 100.0, 100.0, 0.1)]);

        assert!(active.is_empty());
        assert!(a.table().is_empty());
    }

    #[test]
    fn test_continuous_motion_keeps_one_track() {
        let mut a = associator();

        for f in 0..10 {
            a.update(f, &[det(f, ObjectClass::Ball, 100.0 + 8.0 * f as f32, 200.0, 0.9)]);
        }

        let balls: Vec<_> = a.table().active_of(ObjectClass::Ball).collect();
        assert_eq!(balls.len(), 1);
        assert_eq!(balls[0].len(), 10);
        assert!((balls[0].velocity.x - 8.0).abs() < 1e-4);
    }

    #[test]
    fn test_classes_never_mix() {
        let mut a = associator();
        a.update(0, &[det(0, ObjectClass::Rim, 100.0, 100.0, 0.9)]);
        a.update(1, &[det(1, ObjectClass::Ball, 101.0, 100.0, 0.9)]);

        assert_eq!(a.table().active_of(ObjectClass::Rim).count(), 1);
        assert_eq!(a.table().active_of(ObjectClass::Ball).count(), 1);
    }

    #[test]
    fn test_far_detection_spawns_new_track() {
        let mut a = associator();
        a.update(0, &[det(0, ObjectClass::Ball, 100.0, 100.0, 0.9)]);
        a.update(1, &[det(1, ObjectClass::Ball, 900.0, 600.0, 0.9)]);

        let ids: Vec<_> = a.table().active_of(ObjectClass::Ball).map(|t| t.track_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_infeasible_pairs_are_not_matched() {
        let mut a = associator();
        a.update(
            0,
            &[
                det(0, ObjectClass::Ball, 100.0, 100.0, 0.9),
                det(0, ObjectClass::Ball, 600.0, 400.0, 0.9),
            ],
        );

        a.update(
            1,
            &[
                det(1, ObjectClass::Ball, 103.0, 100.0, 0.9),
                det(1, ObjectClass::Ball, 1200.0, 100.0, 0.9),
            ],
        );

        let t1 = a.get(1).unwrap();
        assert_eq!(t1.last_seen_frame, 1);
        assert_eq!(t1.len(), 2);

        // out of every gate: the second track ages, the far detection spawns
        let t2 = a.get(2).unwrap();
        assert_eq!(t2.last_seen_frame, 0);
        assert_eq!(t2.missed_frames, 1);

        let t3 = a.get(3).unwrap();
        assert_eq!(t3.last_seen_frame, 1);
        assert_eq!(t3.last_detection().center().x, 1200.0);
    }

    #[test]
    fn test_missed_budget_terminates_track() {
        let mut a = associator();
        a.update(0, &[det(0, ObjectClass::Ball, 100.0, 100.0, 0.9)]);

        for f in 1..=5 {
            a.skip(f);
            assert_eq!(a.table().active().count(), 1);
        }

        a.update(6, &[]);
        assert_eq!(a.table().active().count(), 0);
        assert!(a.get(1).is_none());
    }

    #[test]
    fn test_tie_prefers_higher_confidence_detection() {
        let mut a = associator();
        a.update(0, &[det(0, ObjectClass::Ball, 100.0, 100.0, 0.9)]);

        // mirror images around the track: identical scores
        a.update(
            1,
            &[
                det(1, ObjectClass::Ball, 90.0, 100.0, 0.6),
                det(1, ObjectClass::Ball, 110.0, 100.0, 0.8),
            ],
        );

        let track = a.get(1).unwrap();
        assert_eq!(track.last_detection().center().x, 110.0);
        assert_eq!(a.table().active_of(ObjectClass::Ball).count(), 2);
    }

    #[test]
    fn test_tie_prefers_lower_track_id() {
        let mut a = associator();
        a.update(
            0,
            &[
                det(0, ObjectClass::Ball, 90.0, 100.0, 0.9),
                det(0, ObjectClass::Ball, 110.0, 100.0, 0.8),
            ],
        );
        a.skip(1);
        a.skip(2);

        // equidistant from both tracks
        a.update(3, &[det(3, ObjectClass::Ball, 100.0, 100.0, 0.9)]);

        assert_eq!(a.get(1).unwrap().last_seen_frame, 3);
        assert_eq!(a.get(2).unwrap().last_seen_frame, 0);
    }

    #[test]
    fn test_velocity_widens_gate() {
        let mut a = associator();
        a.update(0, &[det(0, ObjectClass::Ball, 100.0, 100.0, 0.9)]);
        a.update(1, &[det(1, ObjectClass::Ball, 150.0, 100.0, 0.9)]);

        // 70 px jump is beyond the static 60 px gate but inside the widened one
        a.update(2, &[det(2, ObjectClass::Ball, 220.0, 100.0, 0.9)]);

        assert_eq!(a.table().active_of(ObjectClass::Ball).count(), 1);
    }
}
