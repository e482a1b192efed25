use std::collections::{BTreeMap, BTreeSet};

use nalgebra as na;
use serde_derive::Serialize;

use crate::circular_queue::CircularQueue;
use crate::detection::{Detection, ObjectClass};

pub type TrackId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    Active,
    Terminated,
}

#[derive(Debug, Clone)]
pub struct Track {
    pub track_id: TrackId,
    pub class: ObjectClass,
    pub state: TrackState,
    pub last_seen_frame: u64,
    pub missed_frames: u32,

    // px per frame index, finite difference of the two latest centers
    pub velocity: na::Vector2<f32>,

    detections: CircularQueue<Detection>,
}

impl Track {
    pub fn new(track_id: TrackId, det: Detection, capacity: usize) -> Self {
        let mut detections = CircularQueue::with_capacity(capacity);
        detections.push(det);

        Self {
            track_id,
            class: det.class,
            state: TrackState::Active,
            last_seen_frame: det.frame_index,
            missed_frames: 0,
            velocity: na::Vector2::zeros(),
            detections,
        }
    }

    pub(crate) fn observe(&mut self, det: Detection) {
        let prev = self.last_detection().center();
        let df = det.frame_index.saturating_sub(self.last_seen_frame).max(1) as f32;

        self.velocity = (det.center() - prev) / df;
        self.last_seen_frame = det.frame_index;
        self.missed_frames = 0;
        self.detections.push(det);
    }

    pub(crate) fn miss(&mut self) {
        self.missed_frames += 1;
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.state == TrackState::Active
    }

    #[inline]
    pub fn speed(&self) -> f32 {
        self.velocity.norm()
    }

    pub fn last_detection(&self) -> &Detection {
        // A track is never created without its first detection.
        self.detections
            .latest()
            .unwrap_or_else(|| unreachable!("track without detections"))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// Detections oldest to newest.
    pub fn detections(&self) -> impl Iterator<Item = &Detection> {
        self.detections.asc_iter()
    }

    /// Detections within `[from, to]` frame indices, oldest first.
    pub fn detections_between(&self, from: u64, to: u64) -> impl Iterator<Item = &Detection> {
        self.detections
            .asc_iter()
            .filter(move |d| d.frame_index >= from && d.frame_index <= to)
    }
}

/// Run-scoped arena of tracks keyed by id.
///
/// Terminated tracks stay addressable only while something pins them, so an
/// open attempt can still read its ball history after the associator has
/// given up on the track.
#[derive(Debug, Default)]
pub struct TrackTable {
    tracks: BTreeMap<TrackId, Track>,
    pinned: BTreeSet<TrackId>,
}

impl TrackTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.get_mut(&id)
    }

    pub(crate) fn insert(&mut self, track: Track) {
        self.tracks.insert(track.track_id, track);
    }

    /// Active tracks in id order.
    pub fn active(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values().filter(|t| t.is_active())
    }

    pub fn active_of(&self, class: ObjectClass) -> impl Iterator<Item = &Track> {
        self.active().filter(move |t| t.class == class)
    }

    pub(crate) fn active_ids(&self, class: ObjectClass) -> Vec<TrackId> {
        self.active_of(class).map(|t| t.track_id).collect()
    }

    pub(crate) fn terminate(&mut self, id: TrackId) {
        if self.pinned.contains(&id) {
            if let Some(t) = self.tracks.get_mut(&id) {
                t.state = TrackState::Terminated;
            }
        } else {
            self.tracks.remove(&id);
        }
    }

    pub fn pin(&mut self, id: TrackId) {
        if self.tracks.contains_key(&id) {
            self.pinned.insert(id);
        }
    }

    /// Releases a pin; a terminated track is dropped once nothing holds it.
    pub fn unpin(&mut self, id: TrackId) {
        self.pinned.remove(&id);

        if matches!(self.tracks.get(&id), Some(t) if !t.is_active()) {
            self.tracks.remove(&id);
        }
    }

    #[inline]
    pub fn is_pinned(&self, id: TrackId) -> bool {
        self.pinned.contains(&id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BBox;

    fn ball(frame: u64, cx: f32, cy: f32) -> Detection {
        Detection::new(
            frame,
            frame as f64 / 30.0,
            ObjectClass::Ball,
            BBox::ltrb(cx - 5.0, cy - 5.0, cx + 5.0, cy + 5.0),
            0.9,
        )
    }

    #[test]
    fn test_velocity_is_finite_difference_per_frame() {
        let mut t = Track::new(1, ball(0, 100.0, 100.0), 16);
        t.observe(ball(2, 110.0, 90.0));

        assert!((t.velocity.x - 5.0).abs() < 1e-6);
        assert!((t.velocity.y + 5.0).abs() < 1e-6);
        assert_eq!(t.last_seen_frame, 2);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_pinned_track_survives_termination() {
        let mut table = TrackTable::new();
        table.insert(Track::new(1, ball(0, 0.0, 0.0), 16));
        table.insert(Track::new(2, ball(0, 50.0, 0.0), 16));

        table.pin(1);
        table.terminate(1);
        table.terminate(2);

        assert!(table.get(1).is_some());
        assert!(!table.get(1).unwrap().is_active());
        assert!(table.get(2).is_none());
        assert_eq!(table.active().count(), 0);

        table.unpin(1);
        assert!(table.get(1).is_none());
    }

    #[test]
    fn test_detections_between_is_ordered() {
        let mut t = Track::new(1, ball(0, 0.0, 0.0), 16);
        for f in 1..6 {
            t.observe(ball(f, f as f32, 0.0));
        }

        let frames: Vec<u64> = t.detections_between(2, 4).map(|d| d.frame_index).collect();
        assert_eq!(frames, vec![2, 3, 4]);
    }
}
