//! The capture cycle and the context object that owns every buffer it touches

use std::{
    io::Write,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use tracing::{error, info, warn};

use crate::{
    boxed_array,
    capture::{Acquisition, SampleBuffer},
    error::{Error, Result},
    exfil::{Consumer, Outcome},
    monitoring::Monitor,
    normalize::{variance, Normalizer},
};

pub struct Pipeline<'a, W, const N: usize> {
    acquisition: Box<dyn Acquisition<N> + 'a>,
    samples: SampleBuffer<N>,
    normalizer: Normalizer,
    normalized: Box<[f32; N]>,
    consumer: Box<dyn Consumer<N> + 'a>,
    output: W,
    signal_floor: Option<f32>,
    monitor: Monitor,
}

impl<'a, W: Write, const N: usize> Pipeline<'a, W, N> {
    pub fn new(
        acquisition: impl Acquisition<N> + 'a,
        normalizer: Normalizer,
        consumer: impl Consumer<N> + 'a,
        output: W,
    ) -> Self {
        if consumer.is_placeholder() {
            warn!("feature transform is a placeholder, detections are not meaningful");
        }
        Self {
            monitor: Monitor::new(acquisition.nominal_rate_hz()),
            acquisition: Box::new(acquisition),
            samples: SampleBuffer::new(),
            normalizer,
            normalized: boxed_array(0.0),
            consumer: Box::new(consumer),
            output,
            signal_floor: None,
        }
    }

    /// Skip the consumer when a capture's variance (in squared codes) is below `floor`
    pub fn with_signal_floor(mut self, floor: Option<f32>) -> Self {
        self.signal_floor = floor;
        self
    }

    /// Capture, check for signal, normalize, consume
    pub fn run_cycle(&mut self) -> Result<Outcome> {
        let start = Instant::now();
        self.acquisition.acquire(&mut self.samples)?;
        self.monitor.record_capture(N, start.elapsed());
        let raw = self.samples.filled().ok_or(Error::PartialCapture)?;
        if let Some(floor) = self.signal_floor {
            let variance = variance(raw);
            if variance < floor {
                return Ok(Outcome::Silent { variance });
            }
        }
        self.normalizer.normalize(raw, &mut self.normalized[..]);
        self.consumer.consume(&self.normalized, &mut self.output)
    }

    /// One cycle with reporting
    pub fn step(&mut self) -> Result<Outcome> {
        let result = self.run_cycle();
        self.monitor.record(&result);
        match &result {
            Ok(Outcome::Silent { variance }) => {
                warn!(variance, "no signal above the floor, cycle skipped")
            }
            Err(e) if e.is_fatal() => error!("{e}"),
            Err(e) => warn!("cycle skipped: {e}"),
            Ok(_) => {}
        }
        result
    }

    /// Cycle until `stop` is raised or `max_cycles` have run, pausing `delay`
    /// in between. Only a fatal error ends the loop early.
    pub fn run(&mut self, delay: Duration, stop: &AtomicBool, max_cycles: Option<u64>) -> Result<()> {
        // Bad scaling parameters would poison every cycle, so refuse before capturing
        self.normalizer.validate()?;
        let mut cycles = 0u64;
        loop {
            if stop.load(Ordering::Acquire) {
                info!(cycles, "stop requested");
                break;
            }
            match self.step() {
                Err(e) if e.is_fatal() => return Err(e),
                _ => {}
            }
            cycles += 1;
            if max_cycles.map_or(false, |max| cycles >= max) {
                break;
            }
            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }
        Ok(())
    }

    pub fn normalized(&self) -> &[f32; N] {
        &self.normalized
    }

    pub fn samples(&self) -> &SampleBuffer<N> {
        &self.samples
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    pub fn output(&self) -> &W {
        &self.output
    }
}
