//! The Haar signature value type and its wire codecs
//!
//! A signature is the DC luminance triple of the decomposed YIQ planes
//! plus the 40 largest-magnitude AC coefficient positions per channel,
//! with signs. Signatures are immutable once built; the coefficient
//! arrays are always sorted ascending per channel.

use crate::error::{Error, Result};
use crate::haar::{
    self, NUM_CHANNELS, NUM_COEFS, NUM_PIXELS_SQUARED,
};

/// Raw byte length of the coefficient blob: 3 channels x 40 positions x
/// 2 bytes, little-endian, channel-major.
pub const SIG_BLOB_LEN: usize = NUM_CHANNELS * NUM_COEFS * 2;

/// Hex hash length: three 16-char doubles plus 120 4-char coefficients.
pub const HASH_LEN: usize = NUM_CHANNELS * 16 + NUM_CHANNELS * NUM_COEFS * 4;

/// Chrominance below this is treated as no chrominance at all.
const GRAYSCALE_THRESHOLD: f64 = 6.0 / 1000.0;

/// Perceptual fingerprint of one image.
#[derive(Debug, Clone, PartialEq)]
pub struct HaarSignature {
    /// YIQ DC coefficients (position `[0, 0]` of each decomposed plane).
    pub avglf: [f64; NUM_CHANNELS],
    /// Signed positions of the top-magnitude AC coefficients, sorted
    /// ascending per channel. Never zero; magnitudes are raster indices
    /// below `NUM_PIXELS_SQUARED`.
    pub sig: [[i16; NUM_COEFS]; NUM_CHANNELS],
}

impl HaarSignature {
    /// Build a signature from raw 128x128 RGB channel planes, row-major,
    /// one byte per pixel.
    pub fn from_channels(red: &[u8], green: &[u8], blue: &[u8]) -> Result<Self> {
        for (name, plane) in [("r", red), ("g", green), ("b", blue)] {
            if plane.len() != NUM_PIXELS_SQUARED {
                return Err(Error::Param(format!(
                    "channel `{name}` must have {NUM_PIXELS_SQUARED} entries, got {}",
                    plane.len()
                )));
            }
        }

        let (mut y, mut i, mut q) = haar::rgb_to_yiq(red, green, blue);
        haar::transform(&mut y, &mut i, &mut q);

        Ok(Self {
            avglf: [y[0], i[0], q[0]],
            sig: [
                haar::largest_coefficients(&y),
                haar::largest_coefficients(&i),
                haar::largest_coefficients(&q),
            ],
        })
    }

    /// Reassemble a signature from its persisted parts: the stored
    /// luminance triple and the 240-byte coefficient blob.
    pub fn from_parts(avglf: [f64; NUM_CHANNELS], blob: &[u8]) -> Result<Self> {
        if blob.len() != SIG_BLOB_LEN {
            return Err(Error::Fatal(format!(
                "signature blob has {} bytes, expected {SIG_BLOB_LEN}",
                blob.len()
            )));
        }

        let mut sig = [[0i16; NUM_COEFS]; NUM_CHANNELS];
        for (c, channel) in sig.iter_mut().enumerate() {
            for (i, slot) in channel.iter_mut().enumerate() {
                let at = (c * NUM_COEFS + i) * 2;
                *slot = i16::from_le_bytes([blob[at], blob[at + 1]]);
            }
            channel.sort_unstable();
        }

        Ok(Self { avglf, sig })
    }

    /// The coefficient arrays as the raw blob stored in the database.
    pub fn sig_blob(&self) -> [u8; SIG_BLOB_LEN] {
        let mut blob = [0u8; SIG_BLOB_LEN];
        for (c, channel) in self.sig.iter().enumerate() {
            for (i, &coef) in channel.iter().enumerate() {
                let at = (c * NUM_COEFS + i) * 2;
                blob[at..at + 2].copy_from_slice(&coef.to_le_bytes());
            }
        }
        blob
    }

    /// Hex serialization: the bit patterns of the three doubles as
    /// 16-hex-char words, then every coefficient as a 4-hex-char word.
    pub fn to_hash(&self) -> String {
        let mut hash = String::with_capacity(HASH_LEN);
        for &avg in &self.avglf {
            hash.push_str(&format!("{:016x}", avg.to_bits()));
        }
        for channel in &self.sig {
            for &coef in channel {
                hash.push_str(&format!("{:04x}", coef as u16));
            }
        }
        hash
    }

    /// Parse the serialization produced by [`to_hash`](Self::to_hash).
    pub fn from_hash(hash: &str) -> Result<Self> {
        if hash.len() != HASH_LEN || !hash.is_ascii() {
            return Err(Error::Param(format!(
                "hash must be {HASH_LEN} hex chars, got {}",
                hash.len()
            )));
        }

        let parse_err = |_| Error::Param("hash contains non-hex characters".into());

        let mut avglf = [0f64; NUM_CHANNELS];
        for (c, slot) in avglf.iter_mut().enumerate() {
            let word = &hash[c * 16..(c + 1) * 16];
            *slot = f64::from_bits(u64::from_str_radix(word, 16).map_err(parse_err)?);
        }

        let coefs = &hash[NUM_CHANNELS * 16..];
        let mut sig = [[0i16; NUM_COEFS]; NUM_CHANNELS];
        for (c, channel) in sig.iter_mut().enumerate() {
            for (i, slot) in channel.iter_mut().enumerate() {
                let at = (c * NUM_COEFS + i) * 4;
                let word = &coefs[at..at + 4];
                let coef = u16::from_str_radix(word, 16).map_err(parse_err)? as i16;
                if coef == 0 || coef.unsigned_abs() as usize >= NUM_PIXELS_SQUARED {
                    return Err(Error::Param(format!(
                        "hash coefficient `{word}` is out of range"
                    )));
                }
                *slot = coef;
            }
            channel.sort_unstable();
        }

        Ok(Self { avglf, sig })
    }

    /// Whether the chrominance channels carry no usable information.
    pub fn is_grayscale(&self) -> bool {
        self.avglf[1].abs() + self.avglf[2].abs() < GRAYSCALE_THRESHOLD
    }

    /// Number of channels that participate in indexing and scoring:
    /// 1 for grayscale signatures, 3 otherwise.
    pub fn num_colors(&self) -> usize {
        if self.is_grayscale() {
            1
        } else {
            NUM_CHANNELS
        }
    }
}
