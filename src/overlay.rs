use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde_derive::Serialize;

use crate::bbox::{BBox, Ltrb};
use crate::detection::ObjectClass;
use crate::error::Result;
use crate::roi::RimRoi;
use crate::segmentation::{AttemptSegmenter, Phase};
use crate::track::{TrackId, TrackTable};

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct OverlayTrack {
    pub track_id: TrackId,
    pub class: ObjectClass,
    pub bbox: BBox<Ltrb>,
    pub velocity: [f32; 2],
    pub missed_frames: u32,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct OverlayRoi {
    pub rim: BBox<Ltrb>,
    pub approach: BBox<Ltrb>,
    pub band: [f32; 2],
}

/// Drawing state of one processed frame.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct OverlayFrame {
    pub frame_index: u64,
    pub timestamp: f64,
    pub phase: Phase,
    pub attempt_ball_track: Option<TrackId>,
    pub roi: Option<OverlayRoi>,
    pub tracks: Vec<OverlayTrack>,
}

impl OverlayFrame {
    pub fn capture(
        frame_index: u64,
        timestamp: f64,
        table: &TrackTable,
        segmenter: &AttemptSegmenter,
        roi: Option<&RimRoi>,
    ) -> Self {
        let tracks = table
            .active()
            .map(|t| OverlayTrack {
                track_id: t.track_id,
                class: t.class,
                bbox: t.last_detection().bbox,
                velocity: [t.velocity.x, t.velocity.y],
                missed_frames: t.missed_frames,
            })
            .collect();

        Self {
            frame_index,
            timestamp,
            phase: segmenter.phase(),
            attempt_ball_track: segmenter.open_ball_track(),
            roi: roi.map(|r| {
                let (top, bottom) = r.band();
                OverlayRoi {
                    rim: r.rim,
                    approach: *r.approach(),
                    band: [top, bottom],
                }
            }),
            tracks,
        }
    }
}

/// JSON-lines feed for an external renderer, one line per processed frame.
pub struct OverlayWriter {
    out: Box<dyn Write>,
    frames: u64,
}

impl OverlayWriter {
    pub fn new(out: Box<dyn Write>) -> Self {
        Self { out, frames: 0 }
    }

    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;

        Ok(Self::new(Box::new(BufWriter::new(file))))
    }

    pub fn write(&mut self, frame: &OverlayFrame) -> Result<()> {
        serde_json::to_writer(&mut self.out, frame)?;
        self.out.write_all(b"\n")?;
        self.frames += 1;

        Ok(())
    }

    #[inline]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}
