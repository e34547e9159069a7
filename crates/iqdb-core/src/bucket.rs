//! Inverted coefficient index
//!
//! Maps every (channel, sign, coefficient magnitude) triple to the
//! posting list of internal image indices whose signatures contain that
//! coefficient. The `3 x 2 x 16384` bucket heads are allocated up front
//! and never resized; only the posting lists grow.

use crate::haar::{NUM_CHANNELS, NUM_PIXELS_SQUARED};
use crate::signature::HaarSignature;

/// Positive and negative coefficient signs.
const NUM_SIGNS: usize = 2;

/// One bucket per (channel, sign, magnitude).
const NUM_BUCKETS: usize = NUM_CHANNELS * NUM_SIGNS * NUM_PIXELS_SQUARED;

pub struct BucketIndex {
    buckets: Vec<Vec<u32>>,
}

impl BucketIndex {
    pub fn new() -> Self {
        Self {
            buckets: vec![Vec::new(); NUM_BUCKETS],
        }
    }

    fn slot(channel: usize, sign: usize, magnitude: usize) -> usize {
        (channel * NUM_SIGNS + sign) * NUM_PIXELS_SQUARED + magnitude
    }

    fn split(coef: i16) -> (usize, usize) {
        if coef < 0 {
            (1, (-coef) as usize)
        } else {
            (0, coef as usize)
        }
    }

    /// The posting list for a signed coefficient of a channel.
    pub fn bucket(&self, channel: usize, coef: i16) -> &[u32] {
        let (sign, magnitude) = Self::split(coef);
        &self.buckets[Self::slot(channel, sign, magnitude)]
    }

    /// Insert `index` into every bucket the signature touches.
    ///
    /// Grayscale signatures only touch channel 0.
    pub fn add(&mut self, sig: &HaarSignature, index: u32) {
        for c in 0..sig.num_colors() {
            for &coef in &sig.sig[c] {
                let (sign, magnitude) = Self::split(coef);
                self.buckets[Self::slot(c, sign, magnitude)].push(index);
            }
        }
    }

    /// Erase `index` from every bucket the signature touches. Posting
    /// list order is not preserved.
    pub fn remove(&mut self, sig: &HaarSignature, index: u32) {
        for c in 0..sig.num_colors() {
            for &coef in &sig.sig[c] {
                let (sign, magnitude) = Self::split(coef);
                let list = &mut self.buckets[Self::slot(c, sign, magnitude)];
                if let Some(at) = list.iter().position(|&entry| entry == index) {
                    list.swap_remove(at);
                }
            }
        }
    }

    /// Total number of postings across all buckets of one channel.
    pub(crate) fn channel_entries(&self, channel: usize) -> usize {
        let start = Self::slot(channel, 0, 0);
        self.buckets[start..start + NUM_SIGNS * NUM_PIXELS_SQUARED]
            .iter()
            .map(Vec::len)
            .sum()
    }
}

impl Default for BucketIndex {
    fn default() -> Self {
        Self::new()
    }
}
