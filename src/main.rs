use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use yolocam::{AppConfig, CliOverrides, RunOptions};

/// Live YOLO object detection on a webcam
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// TOML configuration file; command line options override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the YOLO ONNX model
    #[arg(long)]
    model: Option<PathBuf>,

    /// Camera index
    #[arg(long)]
    camera: Option<i32>,

    /// Confidence threshold
    #[arg(long)]
    conf: Option<f32>,

    /// NMS IoU threshold
    #[arg(long)]
    iou: Option<f32>,

    /// Model input size in pixels
    #[arg(long)]
    imgsz: Option<u32>,

    /// Execution device: auto, cpu, cuda or coreml
    #[arg(long)]
    device: Option<String>,

    /// Show a normal window instead of fullscreen
    #[arg(long)]
    windowed: bool,

    /// Log a metrics line every N processed frames (0 = only at exit)
    #[arg(long, default_value_t = 300)]
    report_interval: usize,

    /// Print a JSON run summary to stdout on exit
    #[arg(long)]
    json_summary: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            model_path: self.model.clone(),
            device_index: self.camera,
            confidence_threshold: self.conf,
            iou_threshold: self.iou,
            image_size: self.imgsz,
            device: self.device.clone(),
            windowed: self.windowed,
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = match &args.config {
        Some(path) => AppConfig::from_toml_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => AppConfig::default(),
    };
    config.apply_overrides(args.overrides());
    config.validate().context("validating configuration")?;

    let options = RunOptions {
        report_interval: args.report_interval,
        json_summary: args.json_summary,
    };
    yolocam::run(&config, &options).context("detection loop failed")?;

    Ok(())
}
