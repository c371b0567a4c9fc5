//! Block transfers from the free-running ADC.
//!
//! Two threads stand in for the hardware. The converter runs at the rate set
//! by the clock divider and pushes every code into an `rtrb` FIFO, counting
//! overruns when the FIFO is full. The transfer engine copies exactly N codes
//! out of the FIFO into the caller's buffer and hands the buffer back over a
//! channel once the last one lands. From the pipeline's side a transfer is one
//! long synchronous call, but with a bounded wait.

use std::{
    mem,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use rtrb::RingBuffer;
use tracing::{debug, trace};

use crate::{
    adc::{Adc, SampleSource},
    error::{Error, Result},
};

/// How long the idle converter sleeps between checks of the run flag
const IDLE_POLL: Duration = Duration::from_micros(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferWidth {
    Byte,
    HalfWord,
    Word,
}

impl TransferWidth {
    pub const fn bytes(self) -> usize {
        match self {
            TransferWidth::Byte => 1,
            TransferWidth::HalfWord => 2,
            TransferWidth::Word => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaConfig {
    pub width: TransferWidth,
    /// Reads always come from the same FIFO register
    pub read_increment: bool,
    pub write_increment: bool,
    /// Depth of the conversion FIFO
    pub fifo_capacity: usize,
}

impl DmaConfig {
    /// Paced by the ADC data request, one half-word code per transfer.
    /// The FIFO is much deeper than the real one (4 entries) because host
    /// scheduling jitter is far worse than DMA latency.
    pub const ADC_FIFO: DmaConfig = DmaConfig {
        width: TransferWidth::HalfWord,
        read_increment: false,
        write_increment: true,
        fifo_capacity: 256,
    };

    pub fn validate(&self) -> Result<()> {
        if self.width.bytes() != mem::size_of::<u16>() {
            return Err(Error::DmaConfig(format!(
                "{:?} transfers do not match 16-bit sample codes",
                self.width
            )));
        }
        if self.read_increment {
            return Err(Error::DmaConfig(
                "read address must stay on the FIFO register".to_owned(),
            ));
        }
        if !self.write_increment {
            return Err(Error::DmaConfig(
                "write address must advance through the buffer".to_owned(),
            ));
        }
        if self.fifo_capacity == 0 {
            return Err(Error::DmaConfig("FIFO needs at least one entry".to_owned()));
        }
        Ok(())
    }
}

struct Request<const N: usize> {
    buffer: Box<[u16; N]>,
    done: Sender<Box<[u16; N]>>,
}

/// Handle on an in-flight transfer. The buffer comes back through it.
pub struct Transfer<const N: usize> {
    done: Receiver<Box<[u16; N]>>,
}

impl<const N: usize> Transfer<N> {
    /// Block until the transfer completes, or give up after `timeout`.
    /// A timed out transfer is still in flight and can be waited on again.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<Box<[u16; N]>> {
        match timeout {
            Some(timeout) => self.done.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => Error::CaptureTimeout(timeout),
                RecvTimeoutError::Disconnected => Error::EngineGone,
            }),
            None => self.done.recv().map_err(|_| Error::EngineGone),
        }
    }

    /// Reclaim the buffer if the transfer has finished
    pub fn poll(&self) -> Result<Option<Box<[u16; N]>>> {
        match self.done.try_recv() {
            Ok(buffer) => Ok(Some(buffer)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::EngineGone),
        }
    }
}

/// Free-running ADC with a transfer engine draining its FIFO
pub struct BurstAdc<const N: usize> {
    requests: Sender<Request<N>>,
    shutdown: Arc<AtomicBool>,
    overruns: Arc<AtomicU64>,
    sample_rate_hz: f32,
}

impl<const N: usize> BurstAdc<N> {
    pub fn start<S>(adc: Adc<S>, dma: DmaConfig) -> Result<Self>
    where
        S: SampleSource + Send + 'static,
    {
        dma.validate()?;
        let sample_rate_hz = adc.config().sample_rate_hz();
        let period = Duration::from_secs_f32(1.0 / sample_rate_hz);

        let (mut producer, mut consumer) = RingBuffer::<u16>::new(dma.fifo_capacity);
        let (requests, request_rx) = unbounded::<Request<N>>();
        let running = Arc::new(AtomicBool::new(false));
        // Set by the converter once it has seen `running` drop
        let idle = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(AtomicBool::new(false));
        let overruns = Arc::new(AtomicU64::new(0));

        // Converter
        {
            let running = running.clone();
            let idle = idle.clone();
            let shutdown = shutdown.clone();
            let overruns = overruns.clone();
            let mut adc = adc;
            thread::Builder::new()
                .name("adc-converter".to_owned())
                .spawn(move || {
                    let mut next = Instant::now();
                    while !shutdown.load(Ordering::Acquire) {
                        if !running.load(Ordering::Acquire) {
                            // Every push from the last transfer happened before this
                            idle.store(true, Ordering::Release);
                            thread::sleep(IDLE_POLL);
                            next = Instant::now();
                            continue;
                        }
                        idle.store(false, Ordering::Release);
                        let code = adc.read_sample();
                        if running.load(Ordering::Acquire) && producer.push(code).is_err() {
                            overruns.fetch_add(1, Ordering::Relaxed);
                        }
                        // Pace against absolute deadlines so the clock never drifts
                        next += period;
                        let now = Instant::now();
                        if next > now {
                            thread::sleep(next - now);
                        }
                    }
                })?;
        }

        // Transfer engine
        {
            let shutdown = shutdown.clone();
            thread::Builder::new()
                .name("dma-engine".to_owned())
                .spawn(move || {
                    for Request { mut buffer, done } in request_rx {
                        // A conversion in progress when the last transfer ended can
                        // still be pushed, so drain only once the converter is idle
                        while !idle.load(Ordering::Acquire) {
                            if shutdown.load(Ordering::Acquire) {
                                return;
                            }
                            thread::yield_now();
                        }
                        while consumer.pop().is_ok() {}
                        running.store(true, Ordering::Release);
                        for slot in buffer.iter_mut() {
                            loop {
                                if let Ok(code) = consumer.pop() {
                                    *slot = code;
                                    break;
                                }
                                if shutdown.load(Ordering::Acquire) {
                                    return;
                                }
                                thread::yield_now();
                            }
                        }
                        running.store(false, Ordering::Release);
                        trace!(samples = N, "block transfer complete");
                        // Nobody waiting means the handle was dropped; the buffer goes with it
                        let _ = done.send(buffer);
                    }
                })?;
        }

        debug!(samples = N, rate_hz = sample_rate_hz, "burst capture engine started");
        Ok(Self {
            requests,
            shutdown,
            overruns,
            sample_rate_hz,
        })
    }

    /// Hand `buffer` to the engine for one transfer of N samples
    pub fn start_block_capture(&self, buffer: Box<[u16; N]>) -> Result<Transfer<N>> {
        let (done, done_rx) = bounded(1);
        self.requests
            .send(Request { buffer, done })
            .map_err(|_| Error::EngineGone)?;
        Ok(Transfer { done: done_rx })
    }

    pub fn sample_rate_hz(&self) -> f32 {
        self.sample_rate_hz
    }

    /// Codes lost because the FIFO was full
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}

impl<const N: usize> Drop for BurstAdc<N> {
    fn drop(&mut self) {
        // Threads notice on their own; a stalled converter is never joined
        self.shutdown.store(true, Ordering::Release);
    }
}
