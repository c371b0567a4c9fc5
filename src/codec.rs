//! Standard base64 (`A-Z a-z 0-9 + /`, `=` padding) for the telemetry stream

use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

use crate::error::{Error, Result};

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
const PAD: u8 = b'=';

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error(transparent)]
    Base64(#[from] base64::DecodeError),
    #[error("{0} decoded bytes do not split into 32-bit samples")]
    Misaligned(usize),
}

/// Characters needed for `len` input bytes, padding included
pub const fn encoded_len(len: usize) -> usize {
    (len + 2) / 3 * 4
}

/// Encode `input` into the front of `output`, returning the number of characters written
pub fn encode(input: &[u8], output: &mut [u8]) -> Result<usize> {
    let required = encoded_len(input.len());
    if output.len() < required {
        return Err(Error::OutputTooSmall {
            available: output.len(),
            required,
        });
    }
    for (chunk, quad) in input.chunks(3).zip(output.chunks_exact_mut(4)) {
        let a = chunk[0] as u32;
        let b = chunk.get(1).copied().unwrap_or(0) as u32;
        let c = chunk.get(2).copied().unwrap_or(0) as u32;
        let triple = (a << 16) | (b << 8) | c;
        quad[0] = ALPHABET[(triple >> 18 & 0x3F) as usize];
        quad[1] = ALPHABET[(triple >> 12 & 0x3F) as usize];
        quad[2] = if chunk.len() > 1 {
            ALPHABET[(triple >> 6 & 0x3F) as usize]
        } else {
            PAD
        };
        quad[3] = if chunk.len() > 2 {
            ALPHABET[(triple & 0x3F) as usize]
        } else {
            PAD
        };
    }
    Ok(required)
}

pub fn encode_to_string(input: &[u8]) -> String {
    let mut out = vec![0u8; encoded_len(input.len())];
    // Sized exactly, and every byte written is ASCII
    let n = encode(input, &mut out).unwrap_or(0);
    out.truncate(n);
    String::from_utf8(out).unwrap_or_default()
}

/// Strict standard-alphabet decoding, padding required
pub fn decode(text: &[u8]) -> std::result::Result<Vec<u8>, DecodeError> {
    Ok(STANDARD.decode(text)?)
}

/// Turn a decoded telemetry payload back into the little-endian floats it was made from
pub fn decode_samples(text: &[u8]) -> std::result::Result<Vec<f32>, DecodeError> {
    let bytes = decode(text)?;
    if bytes.len() % 4 != 0 {
        return Err(DecodeError::Misaligned(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
