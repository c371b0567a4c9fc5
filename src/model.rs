//! Compiled model blobs.
//!
//! Layout, all little endian:
//!
//! | offset | field |
//! |---|---|
//! | 0 | magic `ADCM` |
//! | 4 | schema version, `u32` |
//! | 8 | input rows, `u16` |
//! | 10 | input cols, `u16` |
//! | 12 | outputs, `u16` |
//! | 14 | op, `u16` |
//! | 16 | weights, `f32 x outputs x rows x cols` (one row-major block per output) |
//! | .. | biases, `f32 x outputs` |

use tracing::info;

use crate::error::{Error, Result};

pub const MAGIC: [u8; 4] = *b"ADCM";
/// The only schema this runtime executes
pub const SCHEMA_VERSION: u32 = 3;
pub const HEADER_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Op {
    /// Fully connected layer followed by a logistic sigmoid
    DenseSigmoid = 1,
}

impl Op {
    fn from_u16(v: u16) -> Option<Self> {
        match v {
            1 => Some(Op::DenseSigmoid),
            _ => None,
        }
    }
}

/// Read-only view over a model blob that passed validation
#[derive(Debug, Clone, Copy)]
pub struct ModelHandle<'a> {
    version: u32,
    rows: usize,
    cols: usize,
    outputs: usize,
    op: Op,
    weights: &'a [u8],
    biases: &'a [u8],
}

fn u16_at(blob: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([blob[offset], blob[offset + 1]])
}

fn u32_at(blob: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        blob[offset],
        blob[offset + 1],
        blob[offset + 2],
        blob[offset + 3],
    ])
}

impl<'a> ModelHandle<'a> {
    /// Validate a blob. The schema version is checked before anything past it is trusted.
    pub fn parse(blob: &'a [u8]) -> Result<Self> {
        if blob.len() < HEADER_LEN {
            return Err(Error::MalformedModel(format!(
                "{} bytes is shorter than the {HEADER_LEN}-byte header",
                blob.len()
            )));
        }
        if blob[..4] != MAGIC {
            return Err(Error::MalformedModel("bad magic".to_owned()));
        }
        let version = u32_at(blob, 4);
        if version != SCHEMA_VERSION {
            return Err(Error::SchemaMismatch {
                found: version,
                supported: SCHEMA_VERSION,
            });
        }
        let rows = u16_at(blob, 8) as usize;
        let cols = u16_at(blob, 10) as usize;
        let outputs = u16_at(blob, 12) as usize;
        let op = u16_at(blob, 14);
        let op = Op::from_u16(op)
            .ok_or_else(|| Error::MalformedModel(format!("unknown op {op}")))?;
        let weight_bytes = outputs * rows * cols * 4;
        let expected = HEADER_LEN + weight_bytes + outputs * 4;
        if blob.len() != expected {
            return Err(Error::MalformedModel(format!(
                "{} bytes of payload, expected {expected} for {outputs} x {rows}x{cols}",
                blob.len()
            )));
        }
        let (weights, biases) = blob[HEADER_LEN..].split_at(weight_bytes);
        info!(version, rows, cols, outputs, ?op, "model loaded");
        Ok(Self {
            version,
            rows,
            cols,
            outputs,
            op,
            weights,
            biases,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn input_shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn outputs(&self) -> usize {
        self.outputs
    }

    pub fn op(&self) -> Op {
        self.op
    }

    /// Weights feeding output `o`, in input order
    pub fn weights(&self, o: usize) -> impl Iterator<Item = f32> + 'a {
        let len = self.rows * self.cols * 4;
        let weights: &'a [u8] = self.weights;
        weights[o * len..(o + 1) * len]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn bias(&self, o: usize) -> f32 {
        f32::from_le_bytes([
            self.biases[o * 4],
            self.biases[o * 4 + 1],
            self.biases[o * 4 + 2],
            self.biases[o * 4 + 3],
        ])
    }
}

/// Produce blobs, for tests and for regenerating the bundled model
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    version: u32,
    rows: u16,
    cols: u16,
    weights: Vec<Vec<f32>>,
    biases: Vec<f32>,
}

impl ModelBuilder {
    pub fn dense(rows: u16, cols: u16) -> Self {
        Self {
            version: SCHEMA_VERSION,
            rows,
            cols,
            weights: Vec::new(),
            biases: Vec::new(),
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Add an output. `weights` is zero-padded or truncated to `rows * cols`.
    pub fn output(mut self, mut weights: Vec<f32>, bias: f32) -> Self {
        weights.resize(self.rows as usize * self.cols as usize, 0.0);
        self.weights.push(weights);
        self.biases.push(bias);
        self
    }

    /// Add an output with the same weight on every input
    pub fn uniform_output(self, weight: f32, bias: f32) -> Self {
        let n = self.rows as usize * self.cols as usize;
        self.output(vec![weight; n], bias)
    }

    pub fn build(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(
            HEADER_LEN + (self.biases.len() * (self.rows as usize * self.cols as usize + 1)) * 4,
        );
        blob.extend_from_slice(&MAGIC);
        blob.extend_from_slice(&self.version.to_le_bytes());
        blob.extend_from_slice(&self.rows.to_le_bytes());
        blob.extend_from_slice(&self.cols.to_le_bytes());
        blob.extend_from_slice(&(self.biases.len() as u16).to_le_bytes());
        blob.extend_from_slice(&(Op::DenseSigmoid as u16).to_le_bytes());
        for w in self.weights.iter().flatten() {
            blob.extend_from_slice(&w.to_le_bytes());
        }
        for b in &self.biases {
            blob.extend_from_slice(&b.to_le_bytes());
        }
        blob
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_built_blob() {
        let blob = ModelBuilder::dense(2, 3)
            .output(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], -0.5)
            .build();
        let model = ModelHandle::parse(&blob).unwrap();
        assert_eq!(model.version(), SCHEMA_VERSION);
        assert_eq!(model.input_shape(), (2, 3));
        assert_eq!(model.outputs(), 1);
        assert_eq!(model.op(), Op::DenseSigmoid);
        assert_eq!(
            model.weights(0).collect::<Vec<_>>(),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
        );
        assert_eq!(model.bias(0), -0.5);
    }

    #[test]
    fn test_schema_mismatch() {
        let blob = ModelBuilder::dense(2, 2)
            .version(SCHEMA_VERSION + 1)
            .uniform_output(0.0, 0.0)
            .build();
        assert!(matches!(
            ModelHandle::parse(&blob),
            Err(Error::SchemaMismatch { found: 4, supported: 3 })
        ));
    }

    #[test]
    fn test_schema_checked_before_payload() {
        // A truncated payload still reports the version problem first
        let mut blob = ModelBuilder::dense(2, 2)
            .version(1)
            .uniform_output(0.0, 0.0)
            .build();
        blob.truncate(HEADER_LEN);
        assert!(matches!(
            ModelHandle::parse(&blob),
            Err(Error::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(
            ModelHandle::parse(b"ADCM"),
            Err(Error::MalformedModel(_))
        ));
        let mut blob = ModelBuilder::dense(2, 2).uniform_output(0.0, 0.0).build();
        blob[0] = b'X';
        assert!(matches!(
            ModelHandle::parse(&blob),
            Err(Error::MalformedModel(_))
        ));
        let mut blob = ModelBuilder::dense(2, 2).uniform_output(0.0, 0.0).build();
        blob.pop();
        assert!(matches!(
            ModelHandle::parse(&blob),
            Err(Error::MalformedModel(_))
        ));
        let mut blob = ModelBuilder::dense(2, 2).uniform_output(0.0, 0.0).build();
        blob[14] = 9;
        assert!(matches!(
            ModelHandle::parse(&blob),
            Err(Error::MalformedModel(_))
        ));
    }

    #[test]
    fn test_bundled_model_parses() {
        let model = ModelHandle::parse(crate::DETECTOR_MODEL).unwrap();
        assert_eq!(
            model.input_shape(),
            (crate::config::FEATURE_ROWS, crate::config::FEATURE_COLS)
        );
        assert!(model.outputs() >= 1);
    }
}
