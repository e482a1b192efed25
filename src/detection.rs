use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    Ball,
    Rim,
}

/// A single labeled box produced by the detector for one frame.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub frame_index: u64,
    pub timestamp: f64,
    pub class: ObjectClass,
    pub bbox: BBox<Ltrb>,
    pub confidence: f32,
}

impl Detection {
    pub fn new(
        frame_index: u64,
        timestamp: f64,
        class: ObjectClass,
        bbox: BBox<Ltrb>,
        confidence: f32,
    ) -> Self {
        Self {
            frame_index,
            timestamp,
            class,
            bbox,
            confidence,
        }
    }

    #[inline]
    pub fn iou(&self, other: &Detection) -> f32 {
        self.bbox.iou(&other.bbox)
    }

    #[inline(always)]
    pub fn center(&self) -> na::Point2<f32> {
        self.bbox.center()
    }

    /// Characteristic size used to scale distance gates.
    #[inline]
    pub fn size(&self) -> f32 {
        self.bbox.width().min(self.bbox.height())
    }
}
