use std::{
    borrow::Cow,
    fs, io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use adc_slurper::{
    adc::{Adc, AdcConfig, Synthetic},
    capture::{Acquisition, BlockCapture, PacedCapture},
    config::*,
    dma::BurstAdc,
    exfil::{Detector, Telemetry},
    features::{FeatureTransform, Reshape, Spectrogram, FRAME_LEN, FRAME_STEP},
    inference::{Arena, Interpreter},
    normalize::Normalizer,
    pipeline::Pipeline,
    DETECTOR_MODEL,
};
use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};

mod args;

use args::{convert_filter, Args, CaptureMode, Mode, TransformKind};

/// Midpoint of the 12-bit range, where the microphone bias sits
const BIAS_CODE: f32 = 2048.0;

/// Build the capture front end for a profile, validating the ADC before first use
fn acquisition<const N: usize>(
    args: &Args,
    config: AdcConfig,
    default: CaptureMode,
    polling_rate_hz: u32,
) -> anyhow::Result<Box<dyn Acquisition<N>>> {
    let mode = args.capture.unwrap_or(default);
    let rate_hz = match mode {
        CaptureMode::Polling => polling_rate_hz as f32,
        CaptureMode::Block => config.sample_rate_hz(),
    };
    let mut source = Synthetic::new(
        rate_hz,
        args.tone_hz,
        BIAS_CODE,
        args.amplitude,
        args.noise,
        args.seed,
    );
    if args.mode == Mode::Detect {
        // Tone for one capture's worth of samples out of every three
        source = source.with_bursts(3 * N as u64, N as u64);
    }
    let adc = Adc::init(config, source).context("ADC pre-check failed")?;
    Ok(match mode {
        CaptureMode::Polling => Box::new(PacedCapture::new(adc, polling_rate_hz)),
        CaptureMode::Block => {
            let engine = BurstAdc::<N>::start(adc, TELEMETRY_DMA)?;
            let timeout = (args.timeout_ms > 0).then(|| Duration::from_millis(args.timeout_ms));
            Box::new(
                BlockCapture::new(engine, timeout).with_activity(|on| {
                    debug!(pin = ACTIVITY_LED_PIN, on, "capture LED");
                }),
            )
        }
    })
}

fn detect(args: &Args, stop: &AtomicBool) -> anyhow::Result<()> {
    let blob: Cow<[u8]> = match &args.model {
        Some(path) => Cow::Owned(
            fs::read(path).with_context(|| format!("reading model {}", path.display()))?,
        ),
        None => Cow::Borrowed(DETECTOR_MODEL),
    };
    // Schema or shape problems end the program here, before any capture
    let interpreter = Interpreter::<FEATURE_ROWS, FEATURE_COLS>::load(
        &blob,
        Arena::with_bytes(ARENA_BYTES),
    )
    .context("model cannot run on this runtime, halting")?;

    let scale = 1.0 / KEYWORD_REFERENCE.full_scale;
    let transform: Box<dyn FeatureTransform<KEYWORD_SAMPLES, FEATURE_ROWS, FEATURE_COLS>> =
        match args.transform {
            TransformKind::Reshape => Box::new(Reshape { scale }),
            TransformKind::Spectrogram => Box::new(Spectrogram::<
                KEYWORD_SAMPLES,
                FEATURE_ROWS,
                FEATURE_COLS,
            >::new(FRAME_LEN, FRAME_STEP, scale)?),
        };
    let detector = Detector::new(transform, interpreter, args.threshold, args.label.clone());
    let acquisition = acquisition::<KEYWORD_SAMPLES>(
        args,
        KEYWORD_ADC,
        CaptureMode::Polling,
        KEYWORD_SAMPLE_RATE_HZ,
    )?;

    let mut pipeline = Pipeline::new(
        acquisition,
        Normalizer::ReferenceOffset(KEYWORD_REFERENCE),
        detector,
        io::stdout(),
    )
    .with_signal_floor(args.signal_floor);

    info!(
        samples = KEYWORD_SAMPLES,
        label = args.label.as_str(),
        threshold = args.threshold,
        "detecting"
    );
    let delay = Duration::from_millis(args.delay_ms.unwrap_or(CYCLE_DELAY_MS));
    pipeline.run(delay, stop, args.cycles)?;
    Ok(())
}

fn stream(args: &Args, stop: &AtomicBool) -> anyhow::Result<()> {
    let acquisition = acquisition::<TELEMETRY_SAMPLES>(
        args,
        TELEMETRY_ADC,
        CaptureMode::Block,
        TELEMETRY_ADC.sample_rate_hz() as u32,
    )?;
    let mut pipeline = Pipeline::new(
        acquisition,
        Normalizer::MinMax,
        Telemetry::<TELEMETRY_SAMPLES>::new(),
        io::stdout(),
    )
    .with_signal_floor(args.signal_floor);

    info!(samples = TELEMETRY_SAMPLES, "streaming");
    let delay = Duration::from_millis(args.delay_ms.unwrap_or(0));
    pipeline.run(delay, stop, args.cycles)?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr, stdout is the serial stream
    tracing_subscriber::fmt()
        .with_max_level(convert_filter(args.verbose.log_level_filter()))
        .with_writer(io::stderr)
        .init();

    // Only ever checked between cycles
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::Release))
            .context("installing Ctrl-C handler")?;
    }

    match args.mode {
        Mode::Detect => detect(&args, &stop),
        Mode::Stream => stream(&args, &stop),
    }
}
