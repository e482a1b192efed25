use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shottrack::config::PipelineConfig;
use shottrack::overlay::OverlayWriter;
use shottrack::pipeline::Pipeline;
use shottrack::recorder::{derive_run_id, AppendFileSink};
use shottrack::source::JsonLinesSource;

const DEFAULT_OUT: &str = "runs.jsonl";

#[derive(Parser, Debug)]
#[command(name = "shottrack", about = "Basketball shot attempts and outcomes from ball/rim detections")]
struct Args {
    /// JSON-lines detection stream: a metadata header, then one line per frame
    #[arg(long, visible_alias = "video", value_name = "FILE")]
    detections: PathBuf,

    /// Run record target; a directory gets `runs.jsonl` inside it
    #[arg(long, value_name = "FILE|DIR")]
    out: Option<PathBuf>,

    /// YAML pipeline configuration
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Per-frame JSON-lines feed for a renderer
    #[arg(long, value_name = "FILE")]
    overlay: Option<PathBuf>,

    #[arg(long, value_name = "N")]
    bootstrap_frames: Option<u32>,

    /// Seconds between sampled frames after bootstrap
    #[arg(long, value_name = "SECONDS")]
    interval: Option<f64>,

    /// Take every n-th frame after bootstrap, ignored with --interval
    #[arg(long, value_name = "N")]
    stride: Option<u32>,

    /// Manual rim box in pixels
    #[arg(long, value_name = "x1,y1,x2,y2", value_parser = parse_roi)]
    rim_roi: Option<[f32; 4]>,

    #[arg(long)]
    max_frames: Option<u64>,

    #[arg(long)]
    max_seconds: Option<f64>,

    /// Defaults to a UUID derived from the input path and configuration
    #[arg(long)]
    run_id: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut PipelineConfig) {
        let s = &mut config.sampling;

        if let Some(n) = self.bootstrap_frames {
            s.bootstrap_frames = n;
        }
        if let Some(interval) = self.interval {
            s.interval_seconds = Some(interval);
        }
        if let Some(stride) = self.stride {
            s.frame_stride = stride;
        }
        if let Some(roi) = self.rim_roi {
            s.rim_roi = Some(roi);
        }
        if let Some(n) = self.max_frames {
            s.max_frames = Some(n);
        }
        if let Some(secs) = self.max_seconds {
            s.max_seconds = Some(secs);
        }

        if let Some(out) = &self.out {
            config.output.path = Some(out.clone());
        }
        if let Some(overlay) = &self.overlay {
            config.output.overlay = Some(overlay.clone());
        }
    }
}

fn parse_roi(s: &str) -> std::result::Result<[f32; 4], String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f32>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid coordinate: {}", e))?;

    match values[..] {
        [x1, y1, x2, y2] => Ok([x1, y1, x2, y2]),
        _ => Err(format!("expected 4 coordinates, got {}", values.len())),
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shottrack=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let args = Args::parse();
    run(args)
}

fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    args.apply(&mut config);

    let pipeline = Pipeline::new(config).context("invalid configuration")?;
    let config = pipeline.config();

    let mut source = JsonLinesSource::open(&args.detections)
        .with_context(|| format!("failed to open detections {}", args.detections.display()))?;

    let run_id = match &args.run_id {
        Some(id) => id.clone(),
        None => derive_run_id(&args.detections, config)?,
    };

    let out = config
        .output
        .path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUT));
    let mut sink = AppendFileSink::resolve(&out);

    let mut overlay = match &config.output.overlay {
        Some(path) => Some(
            OverlayWriter::create(path)
                .with_context(|| format!("failed to create overlay {}", path.display()))?,
        ),
        None => None,
    };

    let stats = pipeline
        .run(&mut source, run_id, &mut sink, overlay.as_mut())
        .with_context(|| format!("run over {} failed", args.detections.display()))?;

    info!(
        attempts = stats.counts.total,
        make = stats.counts.make,
        miss = stats.counts.miss,
        unknown = stats.counts.unknown,
        out = %sink.path().display(),
        "done"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roi() {
        assert_eq!(parse_roi("900, 300,980,330").unwrap(), [900.0, 300.0, 980.0, 330.0]);
        assert!(parse_roi("1,2,3").is_err());
        assert!(parse_roi("a,b,c,d").is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "shottrack",
            "--video",
            "clip.jsonl",
            "--interval",
            "0.2",
            "--rim-roi",
            "900,300,980,330",
            "--max-frames",
            "360",
        ]);
        let mut config = PipelineConfig::default();
        args.apply(&mut config);

        assert_eq!(args.detections, PathBuf::from("clip.jsonl"));
        assert_eq!(config.sampling.interval_seconds, Some(0.2));
        assert_eq!(config.sampling.rim_roi, Some([900.0, 300.0, 980.0, 330.0]));
        assert_eq!(config.sampling.max_frames, Some(360));
        assert_eq!(config.sampling.bootstrap_frames, 30);
    }
}
