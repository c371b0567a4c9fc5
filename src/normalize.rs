//! Rescale raw codes into floats.
//!
//! Both strategies are total over the whole buffer. Min/max never emits NaN or
//! Inf; reference-offset only holds to that once its parameters pass
//! [`ReferenceOffset::validate`].

use num_traits::AsPrimitive;

use crate::error::{Error, Result};

/// Convert codes to volts, remove the bias level, and scale to 16-bit full scale:
/// `(code * (vref / max_code) - offset) * full_scale / offset`.
///
/// The final division is by `offset`, not by the full-scale range. The two only
/// agree when the bias sits at exactly half the reference; the formula is kept
/// as-is because the deployed model was trained against it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceOffset {
    pub vref: f32,
    pub max_code: f32,
    pub offset: f32,
    pub full_scale: f32,
}

impl ReferenceOffset {
    /// Reject parameters that would turn every sample into NaN or Inf
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("vref", self.vref),
            ("max_code", self.max_code),
            ("offset", self.offset),
            ("full_scale", self.full_scale),
        ];
        if let Some((name, v)) = fields.iter().find(|(_, v)| !v.is_finite()) {
            return Err(Error::NormalizerConfig(format!("{name} is {v}")));
        }
        if self.max_code <= 0.0 {
            return Err(Error::NormalizerConfig(format!(
                "max_code must be positive, got {}",
                self.max_code
            )));
        }
        if self.offset == 0.0 {
            return Err(Error::NormalizerConfig("offset cannot be zero".to_owned()));
        }
        Ok(())
    }

    #[inline]
    pub fn apply(&self, code: f32) -> f32 {
        (code * (self.vref / self.max_code) - self.offset) * self.full_scale / self.offset
    }
}

pub fn reference_offset<T: AsPrimitive<f32>>(raw: &[T], out: &mut [f32], params: &ReferenceOffset) {
    assert_eq!(raw.len(), out.len());
    for (o, r) in out.iter_mut().zip(raw) {
        *o = params.apply(r.as_());
    }
}

/// Map the block's minimum to -1 and its maximum to 1.
/// A flat block comes out as silence (all zeros). Returns the (min, max) found.
pub fn min_max<T>(raw: &[T], out: &mut [f32]) -> Option<(T, T)>
where
    T: Copy + PartialOrd + AsPrimitive<f32>,
{
    assert_eq!(raw.len(), out.len());
    let (&first, rest) = raw.split_first()?;
    let (min, max) = rest.iter().fold((first, first), |(lo, hi), &x| {
        (if x < lo { x } else { lo }, if x > hi { x } else { hi })
    });
    if min == max {
        out.fill(0.0);
        return Some((min, max));
    }
    let lo: f32 = min.as_();
    let span = max.as_() - lo;
    for (o, r) in out.iter_mut().zip(raw) {
        *o = (r.as_() - lo) / span * 2.0 - 1.0;
    }
    Some((min, max))
}

/// Population variance of the block, in squared codes
pub fn variance<T: AsPrimitive<f64>>(raw: &[T]) -> f32 {
    if raw.is_empty() {
        return 0.0;
    }
    let n = raw.len() as f64;
    let mean = raw.iter().map(|x| x.as_()).sum::<f64>() / n;
    (raw.iter()
        .map(|x| {
            let d = x.as_() - mean;
            d * d
        })
        .sum::<f64>()
        / n) as f32
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Normalizer {
    ReferenceOffset(ReferenceOffset),
    MinMax,
}

impl Normalizer {
    pub fn validate(&self) -> Result<()> {
        match self {
            Normalizer::ReferenceOffset(params) => params.validate(),
            Normalizer::MinMax => Ok(()),
        }
    }

    pub fn normalize<T>(&self, raw: &[T], out: &mut [f32])
    where
        T: Copy + PartialOrd + AsPrimitive<f32>,
    {
        match self {
            Normalizer::ReferenceOffset(params) => reference_offset(raw, out, params),
            Normalizer::MinMax => {
                min_max(raw, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KEYWORD_REFERENCE;
    use rand::prelude::*;

    #[test]
    fn test_min_max_hits_bounds() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..20 {
            let raw: Vec<u16> = (0..500).map(|_| rng.gen_range(0..4096)).collect();
            let mut out = vec![0f32; raw.len()];
            let (lo, hi) = min_max(&raw, &mut out).unwrap();
            if lo == hi {
                continue;
            }
            let min = out.iter().cloned().fold(f32::INFINITY, f32::min);
            let max = out.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            assert!((min + 1.0).abs() < 1e-6);
            assert!((max - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_min_max_flat_is_silence() {
        let raw = [2048u16; 64];
        let mut out = [f32::NAN; 64];
        assert_eq!(min_max(&raw, &mut out), Some((2048, 2048)));
        assert!(out.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_min_max_empty() {
        let mut out: [f32; 0] = [];
        assert_eq!(min_max::<u16>(&[], &mut out), None);
    }

    #[test]
    fn test_min_max_linear() {
        let raw = [10u16, 20, 30];
        let mut out = [0f32; 3];
        min_max(&raw, &mut out);
        assert_eq!(out, [-1.0, 0.0, 1.0]);
    }

    // Pins the formula as deployed, including its division by the offset
    #[test]
    fn test_reference_offset_literal() {
        let raw = [0u16, 2048, 4095];
        let mut out = [0f32; 3];
        reference_offset(&raw, &mut out, &KEYWORD_REFERENCE);
        assert!((out[0] + 32768.0).abs() < 0.05);
        assert!((out[1] - 32768.0 / 4095.0).abs() < 0.05);
        assert!((out[2] - 32768.0).abs() < 0.05);
    }

    #[test]
    fn test_reference_offset_divides_by_offset() {
        // With the bias off-centre, full scale is no longer reached at the rails
        let params = ReferenceOffset {
            offset: 1.0,
            ..KEYWORD_REFERENCE
        };
        assert!((params.apply(4095.0) - 2.3 * 32768.0).abs() < 0.5);
        assert!((params.apply(0.0) + 32768.0).abs() < 0.05);
    }

    #[test]
    fn test_reference_offset_validation() {
        KEYWORD_REFERENCE.validate().unwrap();
        let zero_offset = ReferenceOffset {
            offset: 0.0,
            ..KEYWORD_REFERENCE
        };
        assert!(matches!(
            zero_offset.validate(),
            Err(Error::NormalizerConfig(_))
        ));
        // Which is exactly what would otherwise leak out
        let mut out = [0f32; 2];
        reference_offset(&[0u16, 2048], &mut out, &zero_offset);
        assert!(out.iter().all(|x| !x.is_finite()));

        for bad in [
            ReferenceOffset {
                max_code: 0.0,
                ..KEYWORD_REFERENCE
            },
            ReferenceOffset {
                max_code: -4095.0,
                ..KEYWORD_REFERENCE
            },
            ReferenceOffset {
                vref: f32::NAN,
                ..KEYWORD_REFERENCE
            },
            ReferenceOffset {
                full_scale: f32::INFINITY,
                ..KEYWORD_REFERENCE
            },
        ] {
            assert!(bad.validate().is_err(), "{bad:?}");
            assert!(Normalizer::ReferenceOffset(bad).validate().is_err());
        }
        Normalizer::MinMax.validate().unwrap();
    }

    #[test]
    fn test_variance() {
        assert_eq!(variance(&[5u16; 10]), 0.0);
        assert!((variance(&[0u16, 2, 0, 2]) - 1.0).abs() < 1e-6);
        assert_eq!(variance::<u16>(&[]), 0.0);
    }

    #[test]
    fn test_normalizer_dispatch() {
        let raw = [100u16, 200];
        let mut out = [0f32; 2];
        Normalizer::MinMax.normalize(&raw, &mut out);
        assert_eq!(out, [-1.0, 1.0]);
        Normalizer::ReferenceOffset(KEYWORD_REFERENCE).normalize(&raw, &mut out);
        assert!(out[0] < out[1]);
        assert!(out[0] < 0.0);
    }
}
