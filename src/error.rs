//! Error types for the capture pipeline

use std::{io, time::Duration};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid ADC configuration: {0}")]
    AdcConfig(String),

    #[error("invalid DMA configuration: {0}")]
    DmaConfig(String),

    #[error("block transfer did not complete within {0:?}")]
    CaptureTimeout(Duration),

    #[error("a block transfer from an earlier cycle is still in flight")]
    TransferBusy,

    #[error("sample buffer was read before it was completely filled")]
    PartialCapture,

    #[error("invalid normalizer: {0}")]
    NormalizerConfig(String),

    #[error("invalid feature transform: {0}")]
    FeatureConfig(String),

    #[error("capture engine is no longer running")]
    EngineGone,

    #[error("model blob is malformed: {0}")]
    MalformedModel(String),

    #[error("model schema version {found} does not match supported version {supported}")]
    SchemaMismatch { found: u32, supported: u32 },

    #[error("model expects a {model_rows}x{model_cols} input but features are {rows}x{cols}")]
    InputShape {
        model_rows: usize,
        model_cols: usize,
        rows: usize,
        cols: usize,
    },

    #[error("model declares no output tensor to read a score from")]
    OutputShape,

    #[error("tensor arena of {available} bytes cannot hold {required} bytes of tensors")]
    ArenaExhausted { available: usize, required: usize },

    #[error("forward pass failed: {0}")]
    Invoke(String),

    #[error("output buffer of {available} bytes is too small, {required} needed")]
    OutputTooSmall { available: usize, required: usize },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Fatal errors break the pipeline contract; everything else only spoils one cycle.
    /// A closed output stream never comes back, so a broken pipe is fatal too.
    pub fn is_fatal(&self) -> bool {
        if let Error::Io(e) = self {
            return e.kind() == io::ErrorKind::BrokenPipe;
        }
        matches!(
            self,
            Error::AdcConfig(_)
                | Error::DmaConfig(_)
                | Error::NormalizerConfig(_)
                | Error::FeatureConfig(_)
                | Error::EngineGone
                | Error::MalformedModel(_)
                | Error::SchemaMismatch { .. }
                | Error::InputShape { .. }
                | Error::OutputShape
                | Error::ArenaExhausted { .. }
        )
    }
}
