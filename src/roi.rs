use nalgebra as na;
use serde_derive::Serialize;

use crate::bbox::{BBox, Ltrb};
use crate::config::RoiConfig;
use crate::detection::ObjectClass;
use crate::track::{TrackId, TrackTable};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoiSource {
    Manual,
    Estimated,
}

/// Rim region of interest and the regions derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct RimRoi {
    pub rim: BBox<Ltrb>,
    pub source: RoiSource,
    pub rim_track_id: Option<TrackId>,
    band: (f32, f32),
    extent: (f32, f32),
    approach: BBox<Ltrb>,
}

impl RimRoi {
    pub fn new(
        rim: BBox<Ltrb>,
        source: RoiSource,
        rim_track_id: Option<TrackId>,
        config: &RoiConfig,
    ) -> Self {
        let (w, h) = (rim.width(), rim.height());
        let slack = config.horizontal_tolerance * w;

        Self {
            rim,
            source,
            rim_track_id,
            band: (
                rim.top() - config.band_above * h,
                rim.bottom() + config.band_below * h,
            ),
            extent: (rim.left() - slack, rim.right() + slack),
            approach: rim.expand(
                config.approach_side * w,
                config.approach_above * w,
                config.approach_side * w,
                config.approach_below * w,
            ),
        }
    }

    #[inline]
    pub fn center(&self) -> na::Point2<f32> {
        self.rim.center()
    }

    /// Top and bottom of the rim vertical band, image y grows downward.
    #[inline]
    pub fn band(&self) -> (f32, f32) {
        self.band
    }

    #[inline]
    pub fn in_band(&self, y: f32) -> bool {
        y >= self.band.0 && y <= self.band.1
    }

    #[inline]
    pub fn above_band(&self, y: f32) -> bool {
        y < self.band.0
    }

    #[inline]
    pub fn below_band(&self, y: f32) -> bool {
        y > self.band.1
    }

    /// Horizontal rim extent including the through-rim tolerance.
    #[inline]
    pub fn within_extent(&self, x: f32) -> bool {
        x >= self.extent.0 && x <= self.extent.1
    }

    #[inline]
    pub fn in_approach(&self, p: &na::Point2<f32>) -> bool {
        self.approach.contains(p)
    }

    #[inline]
    pub fn approach(&self) -> &BBox<Ltrb> {
        &self.approach
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.rim.width()
    }
}

/// Estimates the rim box from rim tracks seen during the bootstrap frames.
#[derive(Debug, Default)]
pub struct RimLocator;

impl RimLocator {
    /// Median box of the longest-lived rim track, ties go to the lower id.
    pub fn estimate(tracks: &TrackTable) -> Option<(TrackId, BBox<Ltrb>)> {
        let best = tracks
            .active_of(ObjectClass::Rim)
            .max_by(|a, b| a.len().cmp(&b.len()).then(b.track_id.cmp(&a.track_id)))?;

        let mut coords: [Vec<f32>; 4] = Default::default();
        for det in best.detections() {
            for (k, v) in det.bbox.as_slice().iter().enumerate() {
                coords[k].push(*v);
            }
        }

        let [l, t, r, b] = coords.map(median);
        let rim = BBox::ltrb(l?, t?, r?, b?);

        if rim.is_valid() {
            Some((best.track_id, rim))
        } else {
            None
        }
    }
}

fn median(mut values: Vec<f32>) -> Option<f32> {
    if values.is_empty() {
        return None;
    }

    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;

    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) * 0.5)
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackingConfig;
    use crate::detection::Detection;
    use crate::tracker::TrackAssociator;

    fn roi() -> RimRoi {
        RimRoi::new(
            BBox::ltrb(100.0, 100.0, 160.0, 120.0),
            RoiSource::Manual,
            None,
            &RoiConfig::default(),
        )
    }

    #[test]
    fn test_band_and_extent() {
        let roi = roi();

        assert_eq!(roi.band(), (80.0, 140.0));
        assert!(roi.in_band(80.0));
        assert!(roi.above_band(79.0));
        assert!(roi.below_band(141.0));

        assert!(roi.within_extent(95.0));
        assert!(!roi.within_extent(90.0));
    }

    #[test]
    fn test_approach_region() {
        let roi = roi();

        assert!(roi.in_approach(&na::Point2::new(130.0, -300.0)));
        assert!(roi.in_approach(&na::Point2::new(-100.0, 110.0)));
        assert!(!roi.in_approach(&na::Point2::new(130.0, 250.0)));
        assert!(!roi.in_approach(&na::Point2::new(500.0, 110.0)));
    }

    #[test]
    fn test_locator_takes_median_of_longest_rim_track() {
        let mut tracker = TrackAssociator::new(TrackingConfig::default());

        for f in 0..5u64 {
            let jitter = if f % 2 == 0 { 1.0 } else { -1.0 };
            let rim = Detection::new(
                f,
                f as f64 / 30.0,
                ObjectClass::Rim,
                BBox::ltrb(100.0 + jitter, 100.0, 160.0 + jitter, 120.0),
                0.9,
            );
            tracker.update(f, &[rim]);
        }

        let (id, rim) = RimLocator::estimate(tracker.table()).unwrap();
        assert_eq!(id, 1);
        assert_eq!(rim, BBox::ltrb(101.0, 100.0, 161.0, 120.0));
    }
}
