//! Sample source driver: one conversion per call.
//!
//! The converter itself sits behind [`SampleSource`], so the same driver runs
//! against real hardware or one of the simulated sources below. [`Adc::init`]
//! is the pre-check the hardware doesn't do for us: a mis-wired channel still
//! happily returns codes, so the configuration is validated before first use.

use std::f32::consts::TAU;

use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::debug;

use crate::error::{Error, Result};

/// ADC clock on the RP2040
pub const ADC_CLOCK_HZ: f32 = 48_000_000.0;
/// A conversion takes 96 ADC clock cycles, so dividers below this run back to back
pub const CYCLES_PER_CONVERSION: u32 = 96;
/// First GPIO wired to the ADC mux (channel 0)
pub const FIRST_ADC_PIN: u8 = 26;
/// The on-die temperature sensor, not wired to any pin
pub const TEMPERATURE_CHANNEL: u8 = 4;

/// Produce one raw conversion code per call
pub trait SampleSource {
    fn read_sample(&mut self) -> u16;
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn read_sample(&mut self) -> u16 {
        (**self).read_sample()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdcConfig {
    /// Input mux channel
    pub channel: u8,
    /// GPIO the signal is wired to (`None` for the temperature sensor)
    pub pin: Option<u8>,
    /// Sample rate divider for free-running (burst) captures
    pub clock_div: u32,
    pub resolution_bits: u8,
    /// Reference voltage in volts
    pub vref: f32,
}

impl AdcConfig {
    pub fn validate(&self) -> Result<()> {
        if self.channel > TEMPERATURE_CHANNEL {
            return Err(Error::AdcConfig(format!(
                "channel {} does not exist",
                self.channel
            )));
        }
        let expected_pin = if self.channel == TEMPERATURE_CHANNEL {
            None
        } else {
            Some(FIRST_ADC_PIN + self.channel)
        };
        if self.pin != expected_pin {
            return Err(Error::AdcConfig(format!(
                "channel {} is wired to {:?}, not {:?}",
                self.channel, expected_pin, self.pin
            )));
        }
        if !(1..=16).contains(&self.resolution_bits) {
            return Err(Error::AdcConfig(format!(
                "{}-bit conversions are not supported",
                self.resolution_bits
            )));
        }
        if !(self.vref > 0.0) {
            return Err(Error::AdcConfig(format!(
                "reference voltage must be positive, got {}",
                self.vref
            )));
        }
        Ok(())
    }

    /// Largest code a conversion can produce
    pub fn max_code(&self) -> u16 {
        ((1u32 << self.resolution_bits) - 1) as u16
    }

    /// Free-running sample rate set by the clock divider
    pub fn sample_rate_hz(&self) -> f32 {
        if self.clock_div < CYCLES_PER_CONVERSION {
            ADC_CLOCK_HZ / CYCLES_PER_CONVERSION as f32
        } else {
            ADC_CLOCK_HZ / (self.clock_div as f32 + 1.0)
        }
    }
}

/// A validated converter. Codes are masked to the configured resolution.
pub struct Adc<S> {
    config: AdcConfig,
    source: S,
}

impl<S: SampleSource> Adc<S> {
    pub fn init(config: AdcConfig, mut source: S) -> Result<Self> {
        config.validate()?;
        // Convert once up front so a source wider than the configured resolution is caught now
        let first = source.read_sample();
        if first > config.max_code() {
            return Err(Error::AdcConfig(format!(
                "first conversion returned {first}, above the {}-bit maximum of {}",
                config.resolution_bits,
                config.max_code()
            )));
        }
        debug!(
            channel = config.channel,
            pin = ?config.pin,
            rate_hz = config.sample_rate_hz(),
            "ADC initialized"
        );
        Ok(Self { config, source })
    }

    pub fn config(&self) -> &AdcConfig {
        &self.config
    }
}

impl<S: SampleSource> SampleSource for Adc<S> {
    fn read_sample(&mut self) -> u16 {
        self.source.read_sample() & self.config.max_code()
    }
}

/// Pure DC input
#[derive(Debug, Clone, Copy)]
pub struct Constant(pub u16);

impl SampleSource for Constant {
    fn read_sample(&mut self) -> u16 {
        self.0
    }
}

/// Wrap a closure as a source
pub struct FromFn<F>(pub F);

impl<F: FnMut() -> u16> SampleSource for FromFn<F> {
    fn read_sample(&mut self) -> u16 {
        (self.0)()
    }
}

/// A biased tone with uniform noise, optionally gated into bursts
pub struct Synthetic {
    rng: StdRng,
    max_code: f32,
    bias: f32,
    amplitude: f32,
    noise: f32,
    step: f32,
    phase: f32,
    burst: Option<(u64, u64)>,
    n: u64,
}

impl Synthetic {
    /// `bias`, `amplitude` and `noise` are in codes
    pub fn new(
        sample_rate_hz: f32,
        tone_hz: f32,
        bias: f32,
        amplitude: f32,
        noise: f32,
        seed: u64,
    ) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            max_code: 4095.0,
            bias,
            amplitude,
            noise: noise.abs(),
            step: TAU * tone_hz / sample_rate_hz,
            phase: 0.0,
            burst: None,
            n: 0,
        }
    }

    /// Only play the tone for the first `on` samples of every `period`
    pub fn with_bursts(mut self, period: u64, on: u64) -> Self {
        if period > 0 {
            self.burst = Some((period, on.min(period)));
        }
        self
    }
}

impl SampleSource for Synthetic {
    fn read_sample(&mut self) -> u16 {
        let gate = match self.burst {
            Some((period, on)) => self.n % period < on,
            None => true,
        };
        self.n = self.n.wrapping_add(1);
        self.phase = (self.phase + self.step) % TAU;
        let mut v = self.bias;
        if gate {
            v += self.amplitude * self.phase.sin();
        }
        if self.noise > 0.0 {
            v += self.rng.gen_range(-self.noise..=self.noise);
        }
        v.round().clamp(0.0, self.max_code) as u16
    }
}
