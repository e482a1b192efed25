use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use serde_derive::Deserialize;
use tracing::warn;

use crate::bbox::{BBox, Ltrb};
use crate::detection::{Detection, ObjectClass};
use crate::error::{Error, Result};
use crate::frame::{Frame, FrameRecord, VideoMetadata};

/// Boundary to the detector: video metadata plus one record per frame, in
/// stream order.
pub trait DetectionSource {
    fn metadata(&self) -> &VideoMetadata;

    fn next_frame(&mut self) -> Option<FrameRecord>;
}

#[derive(Deserialize)]
struct RawDetection {
    class: ObjectClass,
    bbox: BBox<Ltrb>,
    confidence: f32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFrame {
    Frame {
        frame_index: u64,
        timestamp: f64,
        detections: Vec<RawDetection>,
    },
    Gap {
        frame_index: u64,
        #[serde(default)]
        timestamp: Option<f64>,
        error: String,
    },
}

/// Reads a JSON-lines detection stream.
///
/// The first non-empty line holds the [`VideoMetadata`]; every following line
/// is a frame or a gap marker. A frame line that cannot be parsed becomes a
/// gap at the next expected index.
pub struct JsonLinesSource<R> {
    metadata: VideoMetadata,
    lines: io::Lines<R>,
    line_no: usize,
    next_index: u64,
}

impl JsonLinesSource<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;

        Self::from_reader(BufReader::new(file))
    }
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn from_reader(reader: R) -> Result<Self> {
        let mut lines = reader.lines();
        let mut line_no = 0;

        let header = loop {
            line_no += 1;
            match lines.next() {
                Some(line) => {
                    let line = line?;
                    if !line.trim().is_empty() {
                        break line;
                    }
                }
                None => return Err(Error::MissingHeader),
            }
        };

        let metadata: VideoMetadata = serde_json::from_str(&header)?;

        Ok(Self {
            metadata,
            lines,
            line_no,
            next_index: 0,
        })
    }

    fn parse(&self, line: &str) -> FrameRecord {
        match serde_json::from_str::<RawFrame>(line) {
            Ok(RawFrame::Frame {
                frame_index,
                timestamp,
                detections,
            }) => FrameRecord::Decoded(Frame {
                index: frame_index,
                timestamp,
                detections: detections
                    .into_iter()
                    .map(|d| Detection::new(frame_index, timestamp, d.class, d.bbox, d.confidence))
                    .collect(),
            }),

            Ok(RawFrame::Gap {
                frame_index,
                timestamp,
                error,
            }) => FrameRecord::Gap {
                index: frame_index,
                timestamp,
                reason: error,
            },

            Err(err) => {
                warn!(line = self.line_no, "unparseable frame line: {}", err);

                FrameRecord::Gap {
                    index: self.next_index,
                    timestamp: None,
                    reason: err.to_string(),
                }
            }
        }
    }
}

impl<R: BufRead> DetectionSource for JsonLinesSource<R> {
    #[inline]
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    fn next_frame(&mut self) -> Option<FrameRecord> {
        loop {
            self.line_no += 1;

            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => {
                    warn!(line = self.line_no, "detection stream read failed: {}", err);
                    return None;
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            let record = self.parse(&line);
            self.next_index = record.index().saturating_add(1).max(self.next_index);

            return Some(record);
        }
    }
}

/// In-memory source, mostly for driving the pipeline from tests.
pub struct VecSource {
    metadata: VideoMetadata,
    frames: VecDeque<FrameRecord>,
}

impl VecSource {
    pub fn new(metadata: VideoMetadata, frames: Vec<FrameRecord>) -> Self {
        Self {
            metadata,
            frames: frames.into(),
        }
    }
}

impl DetectionSource for VecSource {
    #[inline]
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    #[inline]
    fn next_frame(&mut self) -> Option<FrameRecord> {
        self.frames.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = r#"{"width": 1280, "height": 720, "fps": 30.0, "frame_count": 3}
{"frame_index": 0, "timestamp": 0.0, "detections": [{"class": "ball", "bbox": [10, 20, 30, 40], "confidence": 0.9}, {"class": "rim", "bbox": [600, 200, 680, 220], "confidence": 0.8}]}

{"frame_index": 1, "timestamp": 0.033, "error": "decode failed"}
{"frame_index": 2, "timestamp": 0.066, "detections": [{"class": "ball", "bbox": [10, 20]}]}
not json at all
"#;

    fn frames(src: &mut impl DetectionSource) -> Vec<FrameRecord> {
        std::iter::from_fn(|| src.next_frame()).collect()
    }

    #[test]
    fn test_reads_frames_and_gaps() {
        let mut src = JsonLinesSource::from_reader(STREAM.as_bytes()).unwrap();
        assert_eq!(src.metadata().width, 1280);
        assert_eq!(src.metadata().duration(), Some(0.1));

        let records = frames(&mut src);
        assert_eq!(records.len(), 4);

        match &records[0] {
            FrameRecord::Decoded(frame) => {
                assert_eq!(frame.len(), 2);
                assert_eq!(frame.detections[0].class, ObjectClass::Ball);
                assert_eq!(frame.detections[0].frame_index, 0);
                assert_eq!(frame.detections[1].bbox, BBox::ltrb(600.0, 200.0, 680.0, 220.0));
            }
            FrameRecord::Gap { .. } => panic!("expected a decoded frame"),
        }

        assert!(matches!(
            &records[1],
            FrameRecord::Gap { index: 1, reason, .. } if reason == "decode failed"
        ));

        // malformed detection and garbage lines become gaps at the expected index
        assert!(matches!(records[2], FrameRecord::Gap { index: 2, .. }));
        assert!(matches!(records[3], FrameRecord::Gap { index: 3, .. }));
    }

    #[test]
    fn test_missing_header() {
        assert!(matches!(
            JsonLinesSource::from_reader("\n\n".as_bytes()),
            Err(Error::MissingHeader)
        ));
        assert!(matches!(
            JsonLinesSource::from_reader("{\"width\": 1}\n".as_bytes()),
            Err(Error::Json(_))
        ));
    }
}
