//! Haar wavelet decomposition of YIQ image planes
//!
//! Implements the "fast multiresolution image querying" transform: each
//! 128x128 channel plane is decomposed in place down to a single DC
//! coefficient, and the 40 largest-magnitude AC coefficients per channel
//! are kept as the image's searchable fingerprint.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Side length of the raster every image is resampled to before hashing.
pub const NUM_PIXELS: usize = 128;

/// Number of coefficients in one raster plane.
pub const NUM_PIXELS_SQUARED: usize = NUM_PIXELS * NUM_PIXELS;

/// Number of top-magnitude AC coefficients retained per channel.
pub const NUM_COEFS: usize = 40;

/// Y, I, Q.
pub const NUM_CHANNELS: usize = 3;

/// Scoring weights per frequency band (rows) and YIQ channel (columns).
/// Band 0 is the DC weight, applied only to the luminance seed.
pub const WEIGHTS: [[f32; NUM_CHANNELS]; 6] = [
    [5.00, 19.21, 34.37],
    [0.83, 1.26, 0.36],
    [1.01, 0.44, 0.45],
    [0.52, 0.53, 0.14],
    [0.47, 0.28, 0.18],
    [0.30, 0.14, 0.27],
];

/// Frequency band of a raster position: `min(max(row, col), 5)`.
///
/// Replaces the precomputed 128x128 bin matrix with a const-evaluable
/// lookup; the classification is identical.
pub const fn band_of(index: usize) -> usize {
    let row = index / NUM_PIXELS;
    let col = index % NUM_PIXELS;
    let max = if row > col { row } else { col };
    if max > 5 {
        5
    } else {
        max
    }
}

/// Convert interleaved 8-bit RGB planes to floating-point YIQ planes.
///
/// All three outputs are produced in one pass over the raster.
pub fn rgb_to_yiq(
    red: &[u8],
    green: &[u8],
    blue: &[u8],
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    debug_assert_eq!(red.len(), NUM_PIXELS_SQUARED);
    debug_assert_eq!(green.len(), NUM_PIXELS_SQUARED);
    debug_assert_eq!(blue.len(), NUM_PIXELS_SQUARED);

    let mut y = Vec::with_capacity(NUM_PIXELS_SQUARED);
    let mut i = Vec::with_capacity(NUM_PIXELS_SQUARED);
    let mut q = Vec::with_capacity(NUM_PIXELS_SQUARED);

    for ((&r, &g), &b) in red.iter().zip(green).zip(blue) {
        let (r, g, b) = (f64::from(r), f64::from(g), f64::from(b));
        y.push(0.299 * r + 0.587 * g + 0.114 * b);
        i.push(0.596 * r - 0.275 * g - 0.321 * b);
        q.push(0.212 * r - 0.523 * g + 0.311 * b);
    }

    (y, i, q)
}

/// In-place 2-D Haar decomposition of one plane.
///
/// Row pass then column pass, halving the span each step. The running
/// factor deliberately uses the literal `0.7071` so that coefficients are
/// bit-compatible with databases built by earlier generations of this
/// scheme.
pub fn haar_2d(a: &mut [f64]) {
    debug_assert_eq!(a.len(), NUM_PIXELS_SQUARED);
    let mut t = [0f64; NUM_PIXELS / 2];

    // Decompose rows.
    for row in 0..NUM_PIXELS {
        let i = row * NUM_PIXELS;
        let mut c = 1.0;
        let mut h = NUM_PIXELS;
        while h > 1 {
            let h1 = h >> 1;
            c *= 0.7071;
            let mut j1 = i;
            let mut j2 = i;
            for slot in t.iter_mut().take(h1) {
                *slot = (a[j2] - a[j2 + 1]) * c;
                a[j1] = a[j2] + a[j2 + 1];
                j1 += 1;
                j2 += 2;
            }
            a[i + h1..i + h].copy_from_slice(&t[..h1]);
            h = h1;
        }
        // c is now 1/sqrt(NUM_PIXELS); fixes the first element of the row.
        a[i] *= c;
    }

    // Decompose columns.
    for col in 0..NUM_PIXELS {
        let mut c = 1.0;
        let mut h = NUM_PIXELS;
        while h > 1 {
            let h1 = h >> 1;
            c *= 0.7071;
            let mut j1 = col;
            let mut j2 = col;
            for slot in t.iter_mut().take(h1) {
                *slot = (a[j2] - a[j2 + NUM_PIXELS]) * c;
                a[j1] = a[j2] + a[j2 + NUM_PIXELS];
                j1 += NUM_PIXELS;
                j2 += 2 * NUM_PIXELS;
            }
            let mut j1 = col + h1 * NUM_PIXELS;
            for &v in &t[..h1] {
                a[j1] = v;
                j1 += NUM_PIXELS;
            }
            h = h1;
        }
        a[col] *= c;
    }
}

/// Decompose all three YIQ planes and rescale the DC coefficients into
/// the `avglf` range.
pub fn transform(y: &mut [f64], i: &mut [f64], q: &mut [f64]) {
    haar_2d(y);
    haar_2d(i);
    haar_2d(q);

    y[0] /= 256.0 * 128.0;
    i[0] /= 256.0 * 128.0;
    q[0] /= 256.0 * 128.0;
}

/// Min-heap entry for the bounded top-coefficient selection.
///
/// The heap top is the entry to evict next: the smallest magnitude, with
/// ties resolved so that the higher raster index goes first (lower
/// indices win ties).
#[derive(Clone, Copy)]
struct Coefficient {
    magnitude: f64,
    index: usize,
}

impl PartialEq for Coefficient {
    fn eq(&self, other: &Self) -> bool {
        self.magnitude == other.magnitude && self.index == other.index
    }
}

impl Eq for Coefficient {}

impl Ord for Coefficient {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .magnitude
            .partial_cmp(&self.magnitude)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.index.cmp(&other.index))
    }
}

impl PartialOrd for Coefficient {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Select the `NUM_COEFS` largest-magnitude AC coefficients of a
/// decomposed plane.
///
/// Position 0 (the DC coefficient) is excluded. Each retained position
/// `i` is encoded as `i` when the coefficient is positive and `-i` when
/// it is negative or zero; the encoding is never 0. The result is sorted
/// ascending.
pub fn largest_coefficients(plane: &[f64]) -> [i16; NUM_COEFS] {
    let mut heap: BinaryHeap<Coefficient> = (1..=NUM_COEFS)
        .map(|index| Coefficient {
            magnitude: plane[index].abs(),
            index,
        })
        .collect();

    for (index, &value) in plane.iter().enumerate().skip(NUM_COEFS + 1) {
        let magnitude = value.abs();
        if magnitude > heap.peek().map_or(0.0, |c| c.magnitude) {
            heap.pop();
            heap.push(Coefficient { magnitude, index });
        }
    }

    let mut sig = [0i16; NUM_COEFS];
    for slot in sig.iter_mut() {
        let c = heap.pop().expect("heap holds exactly NUM_COEFS entries");
        *slot = if plane[c.index] > 0.0 {
            c.index as i16
        } else {
            -(c.index as i16)
        };
    }
    sig.sort_unstable();
    sig
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_plane(value: f64) -> Vec<f64> {
        vec![value; NUM_PIXELS_SQUARED]
    }

    #[test]
    fn band_classification() {
        assert_eq!(band_of(0), 0);
        assert_eq!(band_of(1), 1);
        assert_eq!(band_of(NUM_PIXELS), 1);
        assert_eq!(band_of(2 * NUM_PIXELS + 1), 2);
        assert_eq!(band_of(5), 5);
        assert_eq!(band_of(NUM_PIXELS_SQUARED - 1), 5);
    }

    #[test]
    fn flat_plane_has_no_ac_energy() {
        let mut plane = flat_plane(128.0);
        haar_2d(&mut plane);

        for &c in &plane[1..] {
            assert!(c.abs() < 1e-9, "AC coefficient {c} on a flat plane");
        }
        // DC approximates pixel_value * 128 (the 0.7071 factor is not an
        // exact 1/sqrt(2), so allow a small tolerance).
        assert!((plane[0] - 128.0 * 128.0).abs() < 10.0);
    }

    #[test]
    fn gray_pixels_have_zero_chrominance() {
        let v = vec![77u8; NUM_PIXELS_SQUARED];
        let (_, i, q) = rgb_to_yiq(&v, &v, &v);
        assert!(i.iter().all(|&x| x.abs() < 1e-9));
        assert!(q.iter().all(|&x| x.abs() < 1e-9));
    }

    #[test]
    fn yiq_luminance_weights_sum_to_identity() {
        let r = vec![200u8; NUM_PIXELS_SQUARED];
        let (y, _, _) = rgb_to_yiq(&r, &r, &r);
        assert!((y[0] - 200.0).abs() < 1e-9);
    }

    #[test]
    fn largest_coefficients_picks_top_magnitudes() {
        let mut plane = flat_plane(0.0);
        // Plant 40 dominant coefficients plus noise everywhere else.
        for k in 0..NUM_COEFS {
            let index = 100 + k * 97;
            plane[index] = if k % 2 == 0 { 1000.0 + k as f64 } else { -(1000.0 + k as f64) };
        }
        for (i, slot) in plane.iter_mut().enumerate() {
            if slot.abs() < 1.0 && i > 0 {
                *slot = 0.25;
            }
        }

        let sig = largest_coefficients(&plane);
        for k in 0..NUM_COEFS {
            let index = (100 + k * 97) as i16;
            let expected = if k % 2 == 0 { index } else { -index };
            assert!(sig.contains(&expected), "missing coefficient {expected}");
        }
        let mut sorted = sig;
        sorted.sort_unstable();
        assert_eq!(sig, sorted);
    }

    #[test]
    fn largest_coefficients_never_encode_zero() {
        let plane = flat_plane(0.0);
        let sig = largest_coefficients(&plane);
        assert!(sig.iter().all(|&v| v != 0));
        // With no AC energy, the lowest indices win and zeros encode
        // as negative positions.
        assert!(sig.iter().all(|&v| v < 0 && v >= -(NUM_COEFS as i16)));
    }

    #[test]
    fn ties_prefer_lower_raster_index() {
        let mut plane = flat_plane(0.0);
        for slot in plane.iter_mut() {
            *slot = 5.0;
        }
        let sig = largest_coefficients(&plane);
        let expected: Vec<i16> = (1..=NUM_COEFS as i16).collect();
        assert_eq!(sig.to_vec(), expected);
    }
}
