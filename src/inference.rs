//! The inference engine: a model bound to a fixed arena.
//!
//! Loading goes `ModelHandle::parse` (schema checked) then
//! [`Interpreter::allocate`] (shapes and arena checked, tensors bound). After
//! that every cycle is one [`Interpreter::invoke`], and nothing is allocated.

use std::{mem, ops::Range};

use tracing::debug;

use crate::{
    error::{Error, Result},
    features::FeatureTensor,
    model::{ModelHandle, Op},
};

/// Scratch memory for every tensor the interpreter touches, sized once
pub struct Arena {
    words: Box<[f32]>,
}

impl Arena {
    pub fn with_bytes(bytes: usize) -> Self {
        Self {
            words: vec![0f32; bytes / mem::size_of::<f32>()].into_boxed_slice(),
        }
    }

    pub fn bytes(&self) -> usize {
        self.words.len() * mem::size_of::<f32>()
    }
}

/// Binary outcome of one forward pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub score: f32,
    pub detected: bool,
}

impl Decision {
    /// Strictly above the threshold counts as detected
    pub fn new(score: f32, threshold: f32) -> Self {
        Self {
            score,
            detected: score > threshold,
        }
    }
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

pub struct Interpreter<'m, const R: usize, const C: usize> {
    model: ModelHandle<'m>,
    arena: Arena,
    input: Range<usize>,
    output: Range<usize>,
}

impl<'m, const R: usize, const C: usize> Interpreter<'m, R, C> {
    /// Parse and allocate in one go
    pub fn load(blob: &'m [u8], arena: Arena) -> Result<Self> {
        Self::allocate(ModelHandle::parse(blob)?, arena)
    }

    /// Bind the model's tensors inside `arena`. Every shape problem surfaces here,
    /// never during `invoke`.
    pub fn allocate(model: ModelHandle<'m>, arena: Arena) -> Result<Self> {
        let (model_rows, model_cols) = model.input_shape();
        if (model_rows, model_cols) != (R, C) {
            return Err(Error::InputShape {
                model_rows,
                model_cols,
                rows: R,
                cols: C,
            });
        }
        if model.outputs() == 0 {
            return Err(Error::OutputShape);
        }
        let inputs = R * C;
        let required = (inputs + model.outputs()) * mem::size_of::<f32>();
        if required > arena.bytes() {
            return Err(Error::ArenaExhausted {
                available: arena.bytes(),
                required,
            });
        }
        debug!(
            arena_bytes = arena.bytes(),
            used = required,
            "tensors bound"
        );
        Ok(Self {
            input: 0..inputs,
            output: inputs..inputs + model.outputs(),
            model,
            arena,
        })
    }

    pub fn model(&self) -> &ModelHandle<'m> {
        &self.model
    }

    /// Run one forward pass and return the first output
    pub fn invoke(&mut self, features: &FeatureTensor<R, C>) -> Result<f32> {
        let (input, output) = self.arena.words.split_at_mut(self.output.start);
        let input = &mut input[self.input.clone()];
        let output = &mut output[..self.output.len()];
        input.copy_from_slice(features.as_flat());
        match self.model.op() {
            Op::DenseSigmoid => {
                for (o, out) in output.iter_mut().enumerate() {
                    let acc = self
                        .model
                        .weights(o)
                        .zip(input.iter())
                        .fold(self.model.bias(o), |acc, (w, x)| acc + w * x);
                    *out = sigmoid(acc);
                }
            }
        }
        let score = output[0];
        if !score.is_finite() {
            return Err(Error::Invoke(format!("output tensor holds {score}")));
        }
        Ok(score)
    }
}
