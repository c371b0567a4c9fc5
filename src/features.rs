//! Turn a normalized sample buffer into the fixed-shape grid the model reads.
//!
//! The transform is a strategy: anything implementing [`FeatureTransform`] for
//! the right `N`, `R` and `C` can be dropped into the detector. The shape lives
//! in the type, so a transform producing the wrong number of values does not
//! compile.

use std::{f32::consts::TAU, sync::Arc};

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::{
    boxed_array,
    error::{Error, Result},
};

/// Frame length the detector model was trained with
pub const FRAME_LEN: usize = 256;
/// Hop between frames
pub const FRAME_STEP: usize = 128;

pub struct FeatureTensor<const R: usize, const C: usize> {
    grid: Box<[[f32; C]; R]>,
}

impl<const R: usize, const C: usize> FeatureTensor<R, C> {
    pub const ROWS: usize = R;
    pub const COLS: usize = C;

    pub fn new() -> Self {
        Self {
            grid: boxed_array([0.0; C]),
        }
    }

    pub fn grid(&self) -> &[[f32; C]; R] {
        &self.grid
    }

    pub fn grid_mut(&mut self) -> &mut [[f32; C]; R] {
        &mut self.grid
    }

    /// Row-major view, exactly `R * C` values
    pub fn as_flat(&self) -> &[f32] {
        self.grid.as_flattened()
    }
}

impl<const R: usize, const C: usize> Default for FeatureTensor<R, C> {
    fn default() -> Self {
        Self::new()
    }
}

pub trait FeatureTransform<const N: usize, const R: usize, const C: usize> {
    /// Overwrite every cell of `output` from the full input buffer
    fn transform(&mut self, input: &[f32; N], output: &mut [[f32; C]; R]);

    /// Bring-up stand-ins that produce the right shape but meaningless features
    fn is_placeholder(&self) -> bool {
        false
    }
}

impl<T, const N: usize, const R: usize, const C: usize> FeatureTransform<N, R, C> for Box<T>
where
    T: FeatureTransform<N, R, C> + ?Sized,
{
    fn transform(&mut self, input: &[f32; N], output: &mut [[f32; C]; R]) {
        (**self).transform(input, output)
    }

    fn is_placeholder(&self) -> bool {
        (**self).is_placeholder()
    }
}

/// Placeholder: lay the samples out row by row (wrapping around if the buffer
/// is shorter than the grid) and scale them. Not usable for real detection.
#[derive(Debug, Clone, Copy)]
pub struct Reshape {
    pub scale: f32,
}

impl<const N: usize, const R: usize, const C: usize> FeatureTransform<N, R, C> for Reshape {
    fn transform(&mut self, input: &[f32; N], output: &mut [[f32; C]; R]) {
        if N == 0 {
            output.iter_mut().for_each(|row| row.fill(0.0));
            return;
        }
        for (i, cell) in output.as_flattened_mut().iter_mut().enumerate() {
            *cell = input[i % N] * self.scale;
        }
    }

    fn is_placeholder(&self) -> bool {
        true
    }
}

/// STFT magnitudes (periodic Hann window), average-pooled down to `R x C`.
/// Rows are time, columns are frequency. Everything the transform touches per
/// cycle is allocated here, once.
pub struct Spectrogram<const N: usize, const R: usize, const C: usize> {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    frame: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    hop: usize,
    frames: usize,
    bins: usize,
    row_hits: Vec<u32>,
    col_hits: Vec<u32>,
}

impl<const N: usize, const R: usize, const C: usize> Spectrogram<N, R, C> {
    /// `scale` is applied to the input first, so that full scale maps to 1.
    /// Magnitudes are normalized by the window sum and stay within `[0, 1]` for
    /// inputs within `[-1, 1]` after scaling.
    pub fn new(frame_len: usize, hop: usize, scale: f32) -> Result<Self> {
        if frame_len < 2 || hop == 0 {
            return Err(Error::FeatureConfig(format!(
                "frame length {frame_len} with hop {hop}"
            )));
        }
        if N < frame_len {
            return Err(Error::FeatureConfig(format!(
                "{N} samples cannot fill a {frame_len}-sample frame"
            )));
        }
        if R == 0 || C == 0 {
            return Err(Error::FeatureConfig(format!("empty {R}x{C} grid")));
        }
        let fft = FftPlanner::new().plan_fft_forward(frame_len);
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];
        let mut window: Vec<f32> = (0..frame_len)
            .map(|i| 0.5 - 0.5 * (TAU * i as f32 / frame_len as f32).cos())
            .collect();
        let gain = scale / window.iter().sum::<f32>();
        window.iter_mut().for_each(|w| *w *= gain);

        let frames = (N - frame_len) / hop + 1;
        let bins = frame_len / 2 + 1;
        let mut row_hits = vec![0u32; R];
        for f in 0..frames {
            row_hits[f * R / frames] += 1;
        }
        let mut col_hits = vec![0u32; C];
        for b in 0..bins {
            col_hits[b * C / bins] += 1;
        }
        Ok(Self {
            fft,
            window,
            frame: vec![Complex::default(); frame_len],
            scratch,
            hop,
            frames,
            bins,
            row_hits,
            col_hits,
        })
    }
}

impl<const N: usize, const R: usize, const C: usize> FeatureTransform<N, R, C>
    for Spectrogram<N, R, C>
{
    fn transform(&mut self, input: &[f32; N], output: &mut [[f32; C]; R]) {
        output.iter_mut().for_each(|row| row.fill(0.0));
        for f in 0..self.frames {
            let start = f * self.hop;
            let samples = &input[start..start + self.window.len()];
            for ((slot, &x), &w) in self.frame.iter_mut().zip(samples).zip(&self.window) {
                *slot = Complex::new(x * w, 0.0);
            }
            self.fft
                .process_with_scratch(&mut self.frame, &mut self.scratch);
            let row = &mut output[f * R / self.frames];
            for (b, bin) in self.frame[..self.bins].iter().enumerate() {
                row[b * C / self.bins] += bin.norm();
            }
        }
        for (row, &rh) in output.iter_mut().zip(&self.row_hits) {
            for (cell, &ch) in row.iter_mut().zip(&self.col_hits) {
                let hits = rh * ch;
                if hits > 0 {
                    *cell /= hits as f32;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FEATURE_COLS, FEATURE_ROWS, KEYWORD_SAMPLES};

    fn uniform<const R: usize, const C: usize>(grid: &[[f32; C]; R]) -> bool {
        let first = grid[0][0];
        grid.as_flattened().iter().all(|&x| x == first)
    }

    #[test]
    fn test_tensor_shape() {
        let tensor = FeatureTensor::<FEATURE_ROWS, FEATURE_COLS>::new();
        assert_eq!(tensor.as_flat().len(), 1600);
    }

    #[test]
    fn test_reshape_wraps_and_scales() {
        let input = [1.0f32, 2.0, 3.0];
        let mut out = [[0f32; 2]; 2];
        Reshape { scale: 0.5 }.transform(&input, &mut out);
        assert_eq!(out, [[0.5, 1.0], [1.5, 0.5]]);
    }

    #[test]
    fn test_reshape_is_placeholder() {
        let t = Reshape { scale: 1.0 };
        assert!(FeatureTransform::<4, 2, 2>::is_placeholder(&t));
    }

    #[test]
    fn test_keyword_shape_from_full_buffer() {
        let input = vec![0.25f32; KEYWORD_SAMPLES];
        let input: &[f32; KEYWORD_SAMPLES] = input.as_slice().try_into().unwrap();
        let mut tensor = FeatureTensor::<FEATURE_ROWS, FEATURE_COLS>::new();
        Reshape { scale: 1.0 }.transform(input, tensor.grid_mut());
        assert_eq!(tensor.as_flat().len(), FEATURE_ROWS * FEATURE_COLS);
        assert!(uniform(tensor.grid()));
    }

    #[test]
    fn test_spectrogram_silence_is_uniform_zero() {
        let mut spectrogram = Spectrogram::<1024, 4, 8>::new(FRAME_LEN, FRAME_STEP, 1.0).unwrap();
        let input = [0f32; 1024];
        let mut out = [[1f32; 8]; 4];
        spectrogram.transform(&input, &mut out);
        assert!(uniform(&out));
        assert_eq!(out[0][0], 0.0);
    }

    #[test]
    fn test_spectrogram_finds_tone() {
        const N: usize = 2048;
        let mut spectrogram = Spectrogram::<N, 4, 8>::new(FRAME_LEN, FRAME_STEP, 1.0).unwrap();
        // Bin 32 of 129 lands in column 32 * 8 / 129 = 1
        let input: Vec<f32> = (0..N)
            .map(|i| (TAU * 32.0 * i as f32 / FRAME_LEN as f32).sin())
            .collect();
        let input: &[f32; N] = input.as_slice().try_into().unwrap();
        let mut out = [[0f32; 8]; 4];
        spectrogram.transform(input, &mut out);
        for row in &out {
            let peak = row
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap();
            assert_eq!(peak, 1);
            assert!(row.iter().all(|&x| (0.0..=1.0).contains(&x)));
        }
    }

    #[test]
    fn test_spectrogram_rejects_short_buffer() {
        assert!(Spectrogram::<100, 4, 4>::new(FRAME_LEN, FRAME_STEP, 1.0).is_err());
        assert!(Spectrogram::<1024, 4, 4>::new(FRAME_LEN, 0, 1.0).is_err());
    }
}
