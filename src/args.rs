//! Argument parsing for running from the command line

use std::path::PathBuf;

use adc_slurper::config::{DETECTION_THRESHOLD, TRANSFER_TIMEOUT_MS};
use clap::{Parser, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Classify every capture and print a status line
    Detect,
    /// Stream every normalized capture as a base64 line
    Stream,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureMode {
    /// Read one sample at a time, sleeping in between
    Polling,
    /// Free-running ADC drained by block transfers
    Block,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransformKind {
    /// Bring-up placeholder, samples laid out as the grid
    Reshape,
    /// STFT magnitudes pooled to the model's input shape
    Spectrogram,
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// What to do with each capture
    #[clap(short, long, value_enum, default_value = "detect")]
    pub mode: Mode,
    /// How to fill the sample buffer [default: polling to detect, block to stream]
    #[clap(short, long, value_enum)]
    pub capture: Option<CaptureMode>,
    /// Feature transform feeding the detector
    #[clap(short, long, value_enum, default_value = "reshape")]
    pub transform: TransformKind,
    /// Pause between cycles in milliseconds [default: 500 to detect, 0 to stream]
    #[clap(short, long)]
    pub delay_ms: Option<u64>,
    /// Give up on a block transfer after this many milliseconds (0 waits forever)
    #[clap(long, default_value_t = TRANSFER_TIMEOUT_MS)]
    pub timeout_ms: u64,
    /// Scores strictly above this are detections
    #[clap(long, default_value_t = DETECTION_THRESHOLD, value_parser = valid_threshold)]
    pub threshold: f32,
    /// Name printed when the detector fires
    #[clap(short, long, default_value = "keyword")]
    pub label: String,
    /// Skip cycles whose sample variance (squared codes) is below this
    #[clap(long)]
    pub signal_floor: Option<f32>,
    /// Stop after this many cycles instead of running forever
    #[clap(short = 'n', long)]
    pub cycles: Option<u64>,
    /// Load a model blob from disk instead of the bundled one
    #[clap(long)]
    pub model: Option<PathBuf>,
    /// Frequency of the simulated input tone
    #[clap(long, default_value_t = 440.0)]
    pub tone_hz: f32,
    /// Peak amplitude of the simulated tone, in ADC codes
    #[clap(long, default_value_t = 1200.0)]
    pub amplitude: f32,
    /// Peak uniform noise on the simulated input, in ADC codes
    #[clap(long, default_value_t = 40.0)]
    pub noise: f32,
    /// Seed for the simulated noise
    #[clap(long, default_value_t = 0)]
    pub seed: u64,
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}

fn valid_threshold(s: &str) -> Result<f32, String> {
    let t: f32 = s.parse().map_err(|_| "Invalid number".to_string())?;
    if (0.0..=1.0).contains(&t) {
        Ok(t)
    } else {
        Err("Threshold must be between 0 and 1".to_string())
    }
}
