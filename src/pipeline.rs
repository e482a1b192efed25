//! Run driver: threads time-ordered frames through association, rim
//! localisation, segmentation and recording.

use tracing::{debug, info, warn};

use crate::bbox::BBox;
use crate::calibration::Homography;
use crate::classifier::Classifier;
use crate::config::{PipelineConfig, RoiConfig, SamplingConfig};
use crate::error::Result;
use crate::frame::{FrameRecord, VideoMetadata};
use crate::overlay::{OverlayFrame, OverlayWriter};
use crate::recorder::{RecordSink, RunRecorder, RunStats};
use crate::roi::{RimLocator, RimRoi, RoiSource};
use crate::segmentation::AttemptSegmenter;
use crate::source::DetectionSource;
use crate::tracker::TrackAssociator;
use crate::trajectory::TrajectoryFitter;

/// What happened to a frame handed to [`RunContext::feed`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Feed {
    Processed { frame_index: u64, timestamp: f64 },
    Skipped,
    /// A sampling cap was reached; no later frame will be processed.
    Stopped,
}

/// Everything one run owns: tracks, the open attempt, the rim ROI and the
/// recorder. Nothing is shared between runs.
pub struct RunContext {
    video: VideoMetadata,
    sampling: SamplingConfig,
    roi_config: RoiConfig,
    stride: u64,

    tracker: TrackAssociator,
    segmenter: AttemptSegmenter,
    roi: Option<RimRoi>,
    roi_estimated: bool,
    recorder: RunRecorder,

    first_index: Option<u64>,
    last_index: Option<u64>,
    last_processed: Option<u64>,
    stopped: bool,
}

impl RunContext {
    pub fn new(config: &PipelineConfig, video: VideoMetadata, run_id: String) -> Result<Self> {
        config.validate_for(&video)?;

        let calibration = config
            .calibration
            .as_ref()
            .map(Homography::from_config)
            .transpose()?;

        let fitter = TrajectoryFitter::new(config.trajectory.clone(), calibration, video.height);
        let segmenter = AttemptSegmenter::new(
            config.segmentation.clone(),
            Classifier::from_config(&config.classifier),
            fitter,
        );

        let mut recorder = RunRecorder::new(run_id, &video, &config.sampling);

        let roi = config.sampling.rim_roi.map(|r| {
            RimRoi::new(
                BBox::ltrb(r[0], r[1], r[2], r[3]),
                RoiSource::Manual,
                None,
                &config.roi,
            )
        });
        if let Some(roi) = &roi {
            recorder.set_roi(roi);
        }

        let stride = config.sampling.stride(video.fps);
        info!(
            run_id = %recorder.stats().run_id,
            width = video.width,
            height = video.height,
            fps = video.fps,
            stride,
            bootstrap_frames = config.sampling.bootstrap_frames,
            manual_roi = roi.is_some(),
            "run started"
        );

        Ok(Self {
            video,
            sampling: config.sampling.clone(),
            roi_config: config.roi.clone(),
            stride,
            tracker: TrackAssociator::new(config.tracking.clone()),
            segmenter,
            roi,
            roi_estimated: false,
            recorder,
            first_index: None,
            last_index: None,
            last_processed: None,
            stopped: false,
        })
    }

    #[inline]
    pub fn roi(&self) -> Option<&RimRoi> {
        self.roi.as_ref()
    }

    #[inline]
    pub fn stats(&self) -> &RunStats {
        self.recorder.stats()
    }

    #[inline]
    pub fn last_processed(&self) -> Option<u64> {
        self.last_processed
    }

    /// Takes the next frame record in stream order.
    pub fn feed(&mut self, record: FrameRecord) -> Feed {
        if self.stopped {
            return Feed::Stopped;
        }

        let frame_index = record.index();

        if let Some(last) = self.last_index {
            if frame_index <= last {
                warn!(frame_index, last, "frame out of order, rejected");
                self.recorder.frame_out_of_order(frame_index);
                return Feed::Skipped;
            }
        }
        self.last_index = Some(frame_index);

        let timestamp = record
            .timestamp()
            .filter(|t| t.is_finite())
            .unwrap_or(frame_index as f64 / self.video.fps);

        if self.is_capped(frame_index, timestamp) {
            info!(frame_index, timestamp, "sampling cap reached");
            self.stopped = true;
            return Feed::Stopped;
        }

        match &record {
            FrameRecord::Decoded(_) => self.recorder.frame_decoded(),
            FrameRecord::Gap { reason, .. } => {
                warn!(frame_index, %reason, "frame gap");
                self.recorder.frame_gap(frame_index);
            }
        }

        let first = *self.first_index.get_or_insert(frame_index);
        let offset = frame_index - first;
        let bootstrap = u64::from(self.sampling.bootstrap_frames);
        let in_bootstrap = offset < bootstrap;

        if !in_bootstrap && (offset - bootstrap) % self.stride != 0 {
            return Feed::Skipped;
        }

        match record {
            FrameRecord::Decoded(frame) => {
                self.tracker.update(frame_index, &frame.detections);
            }
            FrameRecord::Gap { .. } => self.tracker.skip(frame_index),
        }

        self.recorder.frame_processed();
        self.last_processed = Some(frame_index);

        if !in_bootstrap {
            if self.roi.is_none() && !self.roi_estimated {
                self.estimate_roi(frame_index);
            }

            let attempt = self.segmenter.step(
                frame_index,
                timestamp,
                self.tracker.table_mut(),
                self.roi.as_ref(),
            );

            if let Some(attempt) = attempt {
                self.recorder.record(attempt);
            }
        }

        Feed::Processed {
            frame_index,
            timestamp,
        }
    }

    pub fn overlay_frame(&self, frame_index: u64, timestamp: f64) -> OverlayFrame {
        OverlayFrame::capture(
            frame_index,
            timestamp,
            self.tracker.table(),
            &self.segmenter,
            self.roi.as_ref(),
        )
    }

    /// Force-resolves the open attempt at the last processed frame and emits
    /// the run record.
    pub fn finish(mut self, sink: &mut dyn RecordSink) -> Result<RunStats> {
        if let Some(frame_index) = self.last_processed {
            let attempt = self.segmenter.force_resolve(
                frame_index,
                self.tracker.table_mut(),
                self.roi.as_ref(),
            );

            if let Some(attempt) = attempt {
                self.recorder.record(attempt);
            }
        }

        self.recorder.finish(sink)
    }

    fn is_capped(&self, frame_index: u64, timestamp: f64) -> bool {
        let frames = self.sampling.max_frames.map_or(false, |m| frame_index >= m);
        let seconds = self.sampling.max_seconds.map_or(false, |s| timestamp > s);

        frames || seconds
    }

    fn estimate_roi(&mut self, frame_index: u64) {
        self.roi_estimated = true;

        match RimLocator::estimate(self.tracker.table()) {
            Some((rim_track_id, rim)) => {
                let roi = RimRoi::new(rim, RoiSource::Estimated, Some(rim_track_id), &self.roi_config);
                info!(frame_index, rim_track_id, rim = ?rim.as_slice(), "rim ROI estimated");

                self.recorder.set_roi(&roi);
                self.roi = Some(roi);
            }
            None => warn!(
                frame_index,
                "no rim track after bootstrap, attempts will not be segmented"
            ),
        }
    }
}

/// Validated configuration, ready to run over any number of sources.
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self { config })
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs one source to completion and emits exactly one record to `sink`.
    ///
    /// Overlay write failures disable the overlay and never fail the run.
    pub fn run(
        &self,
        source: &mut dyn DetectionSource,
        run_id: impl Into<String>,
        sink: &mut dyn RecordSink,
        mut overlay: Option<&mut OverlayWriter>,
    ) -> Result<RunStats> {
        let mut ctx = RunContext::new(&self.config, *source.metadata(), run_id.into())?;

        while let Some(record) = source.next_frame() {
            let (frame_index, timestamp) = match ctx.feed(record) {
                Feed::Processed {
                    frame_index,
                    timestamp,
                } => (frame_index, timestamp),
                Feed::Skipped => continue,
                Feed::Stopped => break,
            };

            let mut failed = false;
            if let Some(writer) = overlay.as_deref_mut() {
                if let Err(err) = writer.write(&ctx.overlay_frame(frame_index, timestamp)) {
                    warn!(frame_index, "overlay disabled: {}", err);
                    failed = true;
                }
            }
            if failed {
                overlay = None;
            }
        }

        if let Some(writer) = overlay {
            if let Err(err) = writer.flush() {
                warn!("overlay flush failed: {}", err);
            }
            debug!(frames = writer.frames(), "overlay written");
        }

        ctx.finish(sink)
    }
}
