//! A fixed-rate ADC capture pipeline.
//!
//! Every cycle fills one sample buffer (paced polling or a hardware-paced
//! block transfer), normalizes it, and hands it either to a keyword detector
//! (feature transform + model forward pass + threshold) or to a telemetry
//! stream (base64 over the serial line). All buffers are allocated once and
//! owned by the [`pipeline::Pipeline`] context.

pub mod adc;
pub mod capture;
pub mod codec;
pub mod config;
pub mod dma;
pub mod error;
pub mod exfil;
pub mod features;
pub mod inference;
pub mod model;
pub mod monitoring;
pub mod normalize;
pub mod pipeline;

pub use error::{Error, Result};

/// The compiled detector shipped with the firmware (40x40 dense + sigmoid)
pub static DETECTOR_MODEL: &[u8] = include_bytes!("../models/detector.bin");

/// Heap-allocate a fixed-size array without building it on the stack first
pub(crate) fn boxed_array<T: Clone, const N: usize>(fill: T) -> Box<[T; N]> {
    let slice = vec![fill; N].into_boxed_slice();
    // The length is N by construction
    slice.try_into().unwrap_or_else(|_| unreachable!())
}
