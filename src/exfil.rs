//! This module is responsible for getting results off the device.
//!
//! Both consumers write plain text to whatever stream stands in for the
//! serial port: a status line per decision, or one base64 line per capture.
//! There is no framing and no acknowledgment, so readers resynchronize on
//! newlines.

use std::io::Write;

use byte_slice_cast::AsByteSlice;
use tracing::debug;

use crate::{
    codec,
    error::Result,
    features::{FeatureTensor, FeatureTransform},
    inference::{Decision, Interpreter},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    Decision(Decision),
    /// Characters written, newline excluded
    Streamed { chars: usize },
    /// Input below the signal floor, consumer not run
    Silent { variance: f32 },
}

/// Last stage of the pipeline
pub trait Consumer<const N: usize> {
    fn consume(&mut self, normalized: &[f32; N], out: &mut dyn Write) -> Result<Outcome>;

    /// Whether this consumer runs on bring-up stand-ins
    fn is_placeholder(&self) -> bool {
        false
    }
}

pub const NOISE_LABEL: &str = "noise";

/// Feature transform, forward pass and threshold
pub struct Detector<'m, T, const R: usize, const C: usize> {
    transform: T,
    features: FeatureTensor<R, C>,
    interpreter: Interpreter<'m, R, C>,
    threshold: f32,
    label: String,
}

impl<'m, T, const R: usize, const C: usize> Detector<'m, T, R, C> {
    pub fn new(
        transform: T,
        interpreter: Interpreter<'m, R, C>,
        threshold: f32,
        label: impl Into<String>,
    ) -> Self {
        Self {
            transform,
            features: FeatureTensor::new(),
            interpreter,
            threshold,
            label: label.into(),
        }
    }

    /// Features from the most recent cycle
    pub fn features(&self) -> &FeatureTensor<R, C> {
        &self.features
    }
}

impl<'m, T, const N: usize, const R: usize, const C: usize> Consumer<N> for Detector<'m, T, R, C>
where
    T: FeatureTransform<N, R, C>,
{
    fn consume(&mut self, normalized: &[f32; N], out: &mut dyn Write) -> Result<Outcome> {
        self.transform
            .transform(normalized, self.features.grid_mut());
        let score = self.interpreter.invoke(&self.features)?;
        let decision = Decision::new(score, self.threshold);
        debug!(score, detected = decision.detected, "forward pass");
        let label = if decision.detected {
            self.label.as_str()
        } else {
            NOISE_LABEL
        };
        writeln!(out, "{label} detected")?;
        out.flush()?;
        Ok(Outcome::Decision(decision))
    }

    fn is_placeholder(&self) -> bool {
        self.transform.is_placeholder()
    }
}

/// Streams the normalized buffer's bytes as one base64 line
pub struct Telemetry<const N: usize> {
    line: Box<[u8]>,
}

impl<const N: usize> Telemetry<N> {
    pub fn new() -> Self {
        // One spare byte for the line terminator
        let len = codec::encoded_len(N * std::mem::size_of::<f32>()) + 1;
        Self {
            line: vec![0u8; len].into_boxed_slice(),
        }
    }
}

impl<const N: usize> Default for Telemetry<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Consumer<N> for Telemetry<N> {
    fn consume(&mut self, normalized: &[f32; N], out: &mut dyn Write) -> Result<Outcome> {
        let chars = codec::encode(normalized.as_byte_slice(), &mut self.line)?;
        self.line[chars] = b'\n';
        // A single write so the line never interleaves with anything else
        out.write_all(&self.line[..=chars])?;
        out.flush()?;
        Ok(Outcome::Streamed { chars })
    }
}
