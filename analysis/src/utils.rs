//! Small numeric helpers shared across the analysis stages.

use rustfft::{FftPlanner, num_complex::Complex};

/// A Hann window of `size` samples.
#[must_use]
pub fn hann_window(size: usize) -> Vec<f32> {
    if size <= 1 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|n| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * n as f32 / (size as f32 - 1.0)).cos())
        .collect()
}

#[must_use]
pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

#[must_use]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Hann-windows `samples`, zero-pads to the next power of two, and returns
/// the magnitude spectrum of the forward FFT (bins `0..=n/2`).
#[must_use]
pub fn magnitude_spectrum(samples: &[f32]) -> Vec<f32> {
    let window = hann_window(samples.len());
    let padded_len = samples.len().next_power_of_two().max(1);

    let mut buffer: Vec<Complex<f32>> = samples
        .iter()
        .zip(window.iter())
        .map(|(s, w)| Complex::new(s * w, 0.0))
        .collect();
    buffer.resize(padded_len, Complex::new(0.0, 0.0));

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(padded_len);
    fft.process(&mut buffer);

    buffer[..=padded_len / 2]
        .iter()
        .map(Complex::norm)
        .collect()
}

/// Cosine similarity of two equal-length vectors; `0.0` if either is all-zero.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Finds zero-crossings within `samples[lo..hi]` via linear interpolation
/// between bracketing samples of opposite sign, returning frame offsets
/// relative to the start of `samples`.
#[must_use]
pub fn zero_crossings_in_range(samples: &[f32], lo: usize, hi: usize) -> Vec<f64> {
    let hi = hi.min(samples.len().saturating_sub(1));
    let mut out = Vec::new();
    let mut i = lo;
    while i < hi {
        let a = samples[i];
        let b = samples[i + 1];
        if (a <= 0.0 && b > 0.0) || (a >= 0.0 && b < 0.0) {
            let denom = f64::from(b - a);
            let frac = if denom.abs() > f64::EPSILON {
                (-f64::from(a) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };
            out.push(i as f64 + frac);
        }
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hann_window_endpoints_are_zero() {
        let window = hann_window(8);
        assert!(window[0] < 1e-6);
        assert!(window[7] < 1e-6);
        assert!(window[4] > 0.9);
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms(&[0.0; 64]), 0.0);
    }

    #[test]
    fn rms_of_a_constant_signal_equals_its_magnitude() {
        assert!((rms(&[0.5; 100]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn mean_of_empty_slice_is_zero() {
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_orthogonal_vectors_is_zero() {
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn magnitude_spectrum_of_silence_is_all_zero() {
        let spectrum = magnitude_spectrum(&[0.0; 256]);
        assert!(spectrum.iter().all(|m| *m < 1e-4));
    }

    #[test]
    fn zero_crossing_found_between_opposite_signs() {
        let samples = [-1.0, 1.0, 1.0, -1.0];
        let crossings = zero_crossings_in_range(&samples, 0, 3);
        assert_eq!(crossings.len(), 2);
        assert!((crossings[0] - 0.5).abs() < 0.01);
        assert!((crossings[1] - 2.5).abs() < 0.01);
    }

    #[test]
    fn zero_crossings_respects_the_requested_range() {
        let samples = [-1.0, 1.0, 1.0, -1.0, -1.0, 1.0];
        let crossings = zero_crossings_in_range(&samples, 2, 4);
        assert_eq!(crossings.len(), 1);
    }
}
