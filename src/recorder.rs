use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_derive::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::attempt::Attempt;
use crate::bbox::{BBox, Ltrb};
use crate::classifier::Outcome;
use crate::config::{PipelineConfig, SamplingConfig};
use crate::error::Result;
use crate::frame::VideoMetadata;
use crate::roi::{RimRoi, RoiSource};

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct VideoSummary {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration: Option<f64>,
}

impl From<&VideoMetadata> for VideoSummary {
    fn from(v: &VideoMetadata) -> Self {
        Self {
            width: v.width,
            height: v.height,
            fps: v.fps,
            duration: v.duration(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SamplingSummary {
    pub interval_seconds: Option<f64>,
    pub frame_stride: u32,
    /// Effective stride in frames after bootstrap.
    pub stride: u64,
    pub bootstrap_frames: u32,
    pub max_frames: Option<u64>,
    pub max_seconds: Option<f64>,
    pub rim_roi: Option<BBox<Ltrb>>,
    pub roi_source: Option<RoiSource>,
}

impl SamplingSummary {
    pub fn new(config: &SamplingConfig, fps: f64) -> Self {
        Self {
            interval_seconds: config.interval_seconds,
            frame_stride: config.frame_stride,
            stride: config.stride(fps),
            bootstrap_frames: config.bootstrap_frames,
            max_frames: config.max_frames,
            max_seconds: config.max_seconds,
            rim_roi: None,
            roi_source: None,
        }
    }
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Counts {
    pub total: usize,
    pub make: usize,
    pub miss: usize,
    pub unknown: usize,
}

impl Counts {
    fn add(&mut self, outcome: Outcome) {
        self.total += 1;

        match outcome {
            Outcome::Make => self.make += 1,
            Outcome::Miss => self.miss += 1,
            Outcome::Unknown => self.unknown += 1,
        }
    }
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameCounts {
    pub decoded: u64,
    pub processed: u64,
    /// Indices of frames that failed to decode.
    pub gaps: Vec<u64>,
    /// Indices of frames rejected for arriving at or before an earlier index.
    pub out_of_order: Vec<u64>,
}

/// The single record a run produces.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RunStats {
    pub run_id: String,
    pub video: VideoSummary,
    pub sampling: SamplingSummary,
    pub attempts: Vec<Attempt>,
    pub counts: Counts,
    pub frames: FrameCounts,
}

/// Deterministic run id from the input location and the effective configuration.
pub fn derive_run_id(input: &Path, config: &PipelineConfig) -> Result<String> {
    let mut name = input.to_string_lossy().into_owned().into_bytes();
    name.push(0);
    name.extend(serde_json::to_vec(config)?);

    Ok(Uuid::new_v5(&Uuid::NAMESPACE_URL, &name).to_string())
}

/// Where the finished run record goes.
pub trait RecordSink {
    fn emit(&mut self, line: &str) -> Result<()>;
}

/// Appends one line per run, never truncating earlier runs.
#[derive(Debug, Clone)]
pub struct AppendFileSink {
    path: PathBuf,
}

impl AppendFileSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// A directory target resolves to `runs.jsonl` inside it.
    pub fn resolve<P: AsRef<Path>>(target: P) -> Self {
        let target = target.as_ref();

        if target.is_dir() {
            Self::new(target.join("runs.jsonl"))
        } else {
            Self::new(target)
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSink for AppendFileSink {
    fn emit(&mut self, line: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        // one write per record keeps concurrent appenders line-atomic
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        file.write_all(&buf)?;
        file.flush()?;

        Ok(())
    }
}

impl RecordSink for Vec<String> {
    fn emit(&mut self, line: &str) -> Result<()> {
        self.push(line.to_owned());
        Ok(())
    }
}

/// Accumulates attempts and frame accounting for one run.
#[derive(Debug)]
pub struct RunRecorder {
    stats: RunStats,
    line: Option<String>,
}

impl RunRecorder {
    pub fn new(run_id: String, video: &VideoMetadata, sampling: &SamplingConfig) -> Self {
        Self {
            stats: RunStats {
                run_id,
                video: VideoSummary::from(video),
                sampling: SamplingSummary::new(sampling, video.fps),
                attempts: Vec::new(),
                counts: Counts::default(),
                frames: FrameCounts::default(),
            },
            line: None,
        }
    }

    pub fn record(&mut self, attempt: Attempt) {
        self.stats.counts.add(attempt.outcome);
        self.stats.attempts.push(attempt);
        self.line = None;
    }

    pub fn set_roi(&mut self, roi: &RimRoi) {
        self.stats.sampling.rim_roi = Some(roi.rim);
        self.stats.sampling.roi_source = Some(roi.source);
        self.line = None;
    }

    pub fn frame_decoded(&mut self) {
        self.stats.frames.decoded += 1;
        self.line = None;
    }

    pub fn frame_processed(&mut self) {
        self.stats.frames.processed += 1;
        self.line = None;
    }

    pub fn frame_gap(&mut self, index: u64) {
        self.stats.frames.gaps.push(index);
        self.line = None;
    }

    pub fn frame_out_of_order(&mut self, index: u64) {
        self.stats.frames.out_of_order.push(index);
        self.line = None;
    }

    #[inline]
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Serialized run record; repeated calls without new input return the
    /// same bytes.
    pub fn finalize(&mut self) -> Result<&str> {
        if self.line.is_none() {
            self.line = Some(serde_json::to_string(&self.stats)?);
        }

        Ok(self.line.as_deref().unwrap_or_default())
    }

    /// Writes the record to `sink` and closes the run.
    pub fn finish(mut self, sink: &mut dyn RecordSink) -> Result<RunStats> {
        sink.emit(self.finalize()?)?;

        let c = &self.stats.counts;
        info!(
            run_id = %self.stats.run_id,
            attempts = c.total,
            make = c.make,
            miss = c.miss,
            unknown = c.unknown,
            processed = self.stats.frames.processed,
            gaps = self.stats.frames.gaps.len(),
            out_of_order = self.stats.frames.out_of_order.len(),
            "run recorded"
        );

        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attempt::Resolution;

    fn video() -> VideoMetadata {
        VideoMetadata {
            width: 1280,
            height: 720,
            fps: 30.0,
            frame_count: Some(360),
        }
    }

    fn attempt(id: u32, outcome: Outcome) -> Attempt {
        Attempt {
            attempt_id: id,
            ball_track_id: id,
            rim_track_id: Some(1),
            start_frame: 10 * id as u64,
            release_frame: None,
            rim_contact_frame: None,
            end_frame: 10 * id as u64 + 5,
            outcome,
            outcome_confidence: if outcome == Outcome::Unknown { 0.0 } else { 0.8 },
            resolution: Resolution::Classified,
            trajectory: None,
        }
    }

    fn recorder() -> RunRecorder {
        let mut r = RunRecorder::new("run-1".into(), &video(), &SamplingConfig::default());
        r.record(attempt(1, Outcome::Make));
        r.record(attempt(2, Outcome::Miss));
        r.record(attempt(3, Outcome::Unknown));
        r.record(attempt(4, Outcome::Make));
        r
    }

    #[test]
    fn test_counts() {
        let r = recorder();

        assert_eq!(
            r.stats().counts,
            Counts {
                total: 4,
                make: 2,
                miss: 1,
                unknown: 1
            }
        );
        assert_eq!(r.stats().video.duration, Some(12.0));
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let mut r = recorder();

        let first = r.finalize().unwrap().to_owned();
        let second = r.finalize().unwrap().to_owned();
        assert_eq!(first, second);

        let v: serde_json::Value = serde_json::from_str(&first).unwrap();
        assert_eq!(v["attempts"].as_array().unwrap().len(), 4);
        assert_eq!(v["counts"]["make"], 2);
        assert!(v["attempts"][0]["trajectory"]["apex_height"].is_null());
    }

    #[test]
    fn test_finish_emits_once() {
        let mut lines: Vec<String> = Vec::new();
        let stats = recorder().finish(&mut lines).unwrap();

        assert_eq!(lines.len(), 1);
        assert_eq!(stats.counts.total, 4);
        assert!(!lines[0].contains('\n'));
    }

    #[test]
    fn test_file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = AppendFileSink::resolve(dir.path());
        assert_eq!(sink.path(), dir.path().join("runs.jsonl"));

        recorder().finish(&mut sink).unwrap();
        recorder().finish(&mut sink).unwrap();

        let contents = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], lines[1]);
    }

    #[test]
    fn test_run_id_is_deterministic() {
        let config = PipelineConfig::default();
        let a = derive_run_id(Path::new("clip.jsonl"), &config).unwrap();
        let b = derive_run_id(Path::new("clip.jsonl"), &config).unwrap();
        assert_eq!(a, b);

        let mut other = config.clone();
        other.sampling.bootstrap_frames = 10;
        assert_ne!(a, derive_run_id(Path::new("clip.jsonl"), &other).unwrap());
        assert_ne!(a, derive_run_id(Path::new("other.jsonl"), &config).unwrap());
    }
}
