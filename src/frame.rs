use serde_derive::{Deserialize, Serialize};

use crate::detection::Detection;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    #[serde(default)]
    pub frame_count: Option<u64>,
}

impl VideoMetadata {
    /// Duration in seconds when the frame count is known.
    pub fn duration(&self) -> Option<f64> {
        self.frame_count.map(|n| n as f64 / self.fps)
    }
}

pub struct Frame {
    pub index: u64,
    pub timestamp: f64, // in seconds
    pub detections: Vec<Detection>,
}

impl Frame {
    #[inline]
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

/// What the detection boundary delivers for one frame position.
pub enum FrameRecord {
    Decoded(Frame),
    Gap {
        index: u64,
        timestamp: Option<f64>,
        reason: String,
    },
}

impl FrameRecord {
    pub fn index(&self) -> u64 {
        match self {
            FrameRecord::Decoded(frame) => frame.index,
            FrameRecord::Gap { index, .. } => *index,
        }
    }

    pub fn timestamp(&self) -> Option<f64> {
        match self {
            FrameRecord::Decoded(frame) => Some(frame.timestamp),
            FrameRecord::Gap { timestamp, .. } => *timestamp,
        }
    }
}
