//! This module contains all the capture logic

// There is exactly one sample buffer. It's either sitting here waiting to be
// filled or read, or it's out with the transfer engine. Readers only ever see
// it after a complete fill.

use std::{thread, time::Duration};

use tracing::{debug, trace, warn};

use crate::{
    adc::SampleSource,
    boxed_array,
    dma::{BurstAdc, Transfer},
    error::{Error, Result},
};

pub struct SampleBuffer<const N: usize> {
    data: Option<Box<[u16; N]>>,
    in_flight: Option<Transfer<N>>,
    filled: bool,
}

impl<const N: usize> SampleBuffer<N> {
    pub fn new() -> Self {
        Self {
            data: Some(boxed_array(0)),
            in_flight: None,
            filled: false,
        }
    }

    /// The captured codes, only once every one of the N slots has been written
    pub fn filled(&self) -> Option<&[u16; N]> {
        if self.filled {
            self.data.as_deref()
        } else {
            None
        }
    }

    /// Whether a timed out transfer still holds the storage
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    fn invalidate(&mut self) {
        self.filled = false;
    }
}

impl<const N: usize> Default for SampleBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// A fill policy for the sample buffer
pub trait Acquisition<const N: usize> {
    /// Overwrite all N samples. On error the buffer is left unreadable.
    fn acquire(&mut self, buffer: &mut SampleBuffer<N>) -> Result<()>;

    /// The rate the samples are supposed to arrive at
    fn nominal_rate_hz(&self) -> f32;
}

impl<A: Acquisition<N> + ?Sized, const N: usize> Acquisition<N> for Box<A> {
    fn acquire(&mut self, buffer: &mut SampleBuffer<N>) -> Result<()> {
        (**self).acquire(buffer)
    }

    fn nominal_rate_hz(&self) -> f32 {
        (**self).nominal_rate_hz()
    }
}

/// Software-paced polling: read, sleep, repeat.
/// Scheduling jitter accumulates uncorrected.
pub struct PacedCapture<S> {
    source: S,
    rate_hz: f32,
    period: Duration,
}

impl<S: SampleSource> PacedCapture<S> {
    pub fn new(source: S, rate_hz: u32) -> Self {
        Self {
            source,
            rate_hz: rate_hz as f32,
            period: Duration::from_secs(1) / rate_hz.max(1),
        }
    }
}

impl<S: SampleSource, const N: usize> Acquisition<N> for PacedCapture<S> {
    fn acquire(&mut self, buffer: &mut SampleBuffer<N>) -> Result<()> {
        buffer.invalidate();
        let data = buffer.data.as_deref_mut().ok_or(Error::TransferBusy)?;
        for slot in data.iter_mut() {
            *slot = self.source.read_sample();
            thread::sleep(self.period);
        }
        buffer.filled = true;
        Ok(())
    }

    fn nominal_rate_hz(&self) -> f32 {
        self.rate_hz
    }
}

/// Hardware-paced burst transfers with a bounded wait
pub struct BlockCapture<const N: usize> {
    engine: BurstAdc<N>,
    timeout: Option<Duration>,
    overruns: u64,
    activity: Option<Box<dyn FnMut(bool)>>,
}

impl<const N: usize> BlockCapture<N> {
    /// `None` waits forever on a stalled transfer
    pub fn new(engine: BurstAdc<N>, timeout: Option<Duration>) -> Self {
        Self {
            engine,
            timeout,
            overruns: 0,
            activity: None,
        }
    }

    /// Called with `true` when a transfer starts and `false` once the wait is over,
    /// whether or not the transfer made it. Drives the capture LED.
    pub fn with_activity(mut self, indicator: impl FnMut(bool) + 'static) -> Self {
        self.activity = Some(Box::new(indicator));
        self
    }

    fn indicate(&mut self, active: bool) {
        trace!(active, "capture activity");
        if let Some(indicator) = self.activity.as_mut() {
            indicator(active);
        }
    }
}

impl<const N: usize> Acquisition<N> for BlockCapture<N> {
    fn acquire(&mut self, buffer: &mut SampleBuffer<N>) -> Result<()> {
        buffer.invalidate();
        // Try to get the storage back from a transfer that timed out earlier
        if let Some(transfer) = buffer.in_flight.take() {
            match transfer.poll()? {
                Some(stale) => {
                    debug!("reclaimed buffer from a late transfer, discarding its contents");
                    buffer.data = Some(stale);
                }
                None => {
                    buffer.in_flight = Some(transfer);
                    return Err(Error::TransferBusy);
                }
            }
        }
        let storage = buffer.data.take().ok_or(Error::TransferBusy)?;
        let transfer = self.engine.start_block_capture(storage)?;
        self.indicate(true);
        let waited = transfer.wait(self.timeout);
        self.indicate(false);
        match waited {
            Ok(data) => {
                buffer.data = Some(data);
                buffer.filled = true;
            }
            Err(Error::CaptureTimeout(t)) => {
                buffer.in_flight = Some(transfer);
                return Err(Error::CaptureTimeout(t));
            }
            Err(e) => return Err(e),
        }
        let overruns = self.engine.overruns();
        if overruns > self.overruns {
            warn!(
                lost = overruns - self.overruns,
                "conversion FIFO overran during capture"
            );
            self.overruns = overruns;
        }
        Ok(())
    }

    fn nominal_rate_hz(&self) -> f32 {
        self.engine.sample_rate_hz()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::RefCell, rc::Rc};

    use crate::{
        adc::{Adc, AdcConfig, Constant, FromFn},
        config::TELEMETRY_ADC,
        dma::DmaConfig,
    };

    const FAST: AdcConfig = AdcConfig {
        clock_div: 0,
        ..TELEMETRY_ADC
    };

    #[test]
    fn test_unfilled_buffer_is_unreadable() {
        let buffer = SampleBuffer::<16>::new();
        assert!(buffer.filled().is_none());
    }

    #[test]
    fn test_polling_fills_n() {
        let mut n = 0u16;
        let mut capture = PacedCapture::new(
            FromFn(move || {
                n += 1;
                n
            }),
            100_000,
        );
        let mut buffer = SampleBuffer::<100>::new();
        capture.acquire(&mut buffer).unwrap();
        let data = buffer.filled().unwrap();
        assert_eq!(data.len(), 100);
        assert_eq!(data[0], 1);
        assert_eq!(data[99], 100);
    }

    #[test]
    fn test_polling_overwrites_previous_cycle() {
        let mut capture = PacedCapture::new(Constant(7), 100_000);
        let mut buffer = SampleBuffer::<32>::new();
        capture.acquire(&mut buffer).unwrap();
        let mut capture = PacedCapture::new(Constant(9), 100_000);
        capture.acquire(&mut buffer).unwrap();
        assert!(buffer.filled().unwrap().iter().all(|&c| c == 9));
    }

    #[test]
    fn test_block_fills_n() {
        let adc = Adc::init(FAST, Constant(3000)).unwrap();
        let engine = BurstAdc::<128>::start(adc, DmaConfig::ADC_FIFO).unwrap();
        let mut capture = BlockCapture::new(engine, Some(Duration::from_secs(5)));
        let mut buffer = SampleBuffer::<128>::new();
        for _ in 0..2 {
            capture.acquire(&mut buffer).unwrap();
            let data = buffer.filled().unwrap();
            assert_eq!(data.len(), 128);
            assert!(data.iter().all(|&c| c == 3000));
        }
    }

    #[test]
    fn test_block_reports_busy_until_transfer_lands() {
        let source = FromFn(|| {
            thread::sleep(Duration::from_millis(2));
            100
        });
        let adc = Adc::init(FAST, source).unwrap();
        let engine = BurstAdc::<32>::start(adc, DmaConfig::ADC_FIFO).unwrap();
        let mut capture = BlockCapture::new(engine, Some(Duration::from_micros(100)));
        let mut buffer = SampleBuffer::<32>::new();

        assert!(matches!(
            capture.acquire(&mut buffer),
            Err(Error::CaptureTimeout(_))
        ));
        // 32 samples at 2 ms each are nowhere near done yet
        assert!(matches!(
            capture.acquire(&mut buffer),
            Err(Error::TransferBusy)
        ));
        assert!(buffer.is_in_flight());
        assert!(buffer.filled().is_none());
    }

    #[test]
    fn test_activity_brackets_every_transfer() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let adc = Adc::init(FAST, Constant(42)).unwrap();
        let engine = BurstAdc::<16>::start(adc, DmaConfig::ADC_FIFO).unwrap();
        let mut capture = {
            let events = events.clone();
            BlockCapture::new(engine, Some(Duration::from_secs(5)))
                .with_activity(move |on| events.borrow_mut().push(on))
        };
        let mut buffer = SampleBuffer::<16>::new();
        capture.acquire(&mut buffer).unwrap();
        capture.acquire(&mut buffer).unwrap();
        assert_eq!(*events.borrow(), [true, false, true, false]);
    }

    #[test]
    fn test_activity_cleared_on_timeout() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let source = FromFn(|| {
            thread::sleep(Duration::from_millis(2));
            7
        });
        let adc = Adc::init(FAST, source).unwrap();
        let engine = BurstAdc::<32>::start(adc, DmaConfig::ADC_FIFO).unwrap();
        let mut capture = {
            let events = events.clone();
            BlockCapture::new(engine, Some(Duration::from_micros(100)))
                .with_activity(move |on| events.borrow_mut().push(on))
        };
        let mut buffer = SampleBuffer::<32>::new();
        assert!(capture.acquire(&mut buffer).is_err());
        assert_eq!(*events.borrow(), [true, false]);
    }

    #[test]
    fn test_block_timeout_parks_then_reclaims() {
        let source = FromFn(|| {
            thread::sleep(Duration::from_millis(1));
            100
        });
        let adc = Adc::init(FAST, source).unwrap();
        let engine = BurstAdc::<32>::start(adc, DmaConfig::ADC_FIFO).unwrap();
        let mut capture = BlockCapture::new(engine, Some(Duration::from_micros(100)));
        let mut buffer = SampleBuffer::<32>::new();

        assert!(matches!(
            capture.acquire(&mut buffer),
            Err(Error::CaptureTimeout(_))
        ));
        assert!(buffer.filled().is_none());
        assert!(buffer.is_in_flight());

        // Let the late transfer land, then capture again with a generous timeout
        thread::sleep(Duration::from_millis(500));
        capture.timeout = Some(Duration::from_secs(5));
        capture.acquire(&mut buffer).unwrap();
        assert!(!buffer.is_in_flight());
        assert_eq!(buffer.filled().unwrap().len(), 32);
    }
}
