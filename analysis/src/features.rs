//! Windowed feature extraction over channel 0 (C2).

use crate::errors::AnalysisResult;
use crate::track::Track;
use crate::utils::{magnitude_spectrum, mean, rms};

/// Frames per analysis window.
pub const WINDOW_SIZE: usize = 8192;
/// Frames advanced between consecutive windows (50% overlap).
pub const HOP_SIZE: usize = 4096;

/// Yield a cancellation/progress checkpoint after this many windows.
const YIELD_EVERY: usize = 10;

/// Per-window features, in strict time order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFeatures {
    /// Start frame of the window within the track.
    pub start_frame: usize,
    pub rms: f32,
    pub spectral_centroid: f32,
    pub spectral_flux: f32,
    pub zero_crossing_rate: f32,
}

/// Extracts windowed [`AudioFeatures`] from `track`'s channel 0.
///
/// `should_cancel` is polled roughly every [`YIELD_EVERY`] windows; when it
/// returns `true` extraction stops early with
/// [`crate::errors::AnalysisError::ErrCancelled`].
///
/// # Errors
///
/// Returns [`crate::errors::AnalysisError::ErrEmpty`] if the track is
/// shorter than one window, or `ErrCancelled` if cancelled.
pub fn extract_features(
    track: &Track,
    mut should_cancel: impl FnMut() -> bool,
) -> AnalysisResult<Vec<AudioFeatures>> {
    let samples = track.mono();
    if samples.len() < WINDOW_SIZE {
        return Err(crate::errors::AnalysisError::ErrEmpty);
    }

    let window_count = (samples.len() - WINDOW_SIZE) / HOP_SIZE + 1;
    let mut out = Vec::with_capacity(window_count);
    let mut prev_spectrum: Option<Vec<f32>> = None;

    for k in 0..window_count {
        if k % YIELD_EVERY == 0 && should_cancel() {
            return Err(crate::errors::AnalysisError::ErrCancelled);
        }

        let start = k * HOP_SIZE;
        let window = &samples[start..start + WINDOW_SIZE];

        let spectrum = magnitude_spectrum(window);
        let centroid = spectral_centroid(&spectrum, track.sample_rate, WINDOW_SIZE);
        let flux = prev_spectrum
            .as_deref()
            .map_or(0.0, |prev| spectral_flux(prev, &spectrum));
        prev_spectrum = Some(spectrum);

        out.push(AudioFeatures {
            start_frame: start,
            rms: rms(window),
            spectral_centroid: centroid,
            spectral_flux: flux,
            zero_crossing_rate: zero_crossing_rate(window),
        });
    }

    Ok(out)
}

/// FFT bin frequency, in Hz, for bin `b` of an `padded_len`-point FFT.
fn bin_frequency(b: usize, sample_rate: u32, padded_len: usize) -> f32 {
    b as f32 * sample_rate as f32 / padded_len as f32
}

fn spectral_centroid(spectrum: &[f32], sample_rate: u32, window_size: usize) -> f32 {
    let padded_len = window_size.next_power_of_two().max(1);
    let mut weighted = 0.0_f32;
    let mut total = 0.0_f32;
    for (b, &mag) in spectrum.iter().enumerate() {
        weighted += bin_frequency(b, sample_rate, padded_len) * mag;
        total += mag;
    }
    if total <= f32::EPSILON {
        0.0
    } else {
        weighted / total
    }
}

fn spectral_flux(prev: &[f32], cur: &[f32]) -> f32 {
    prev.iter()
        .zip(cur.iter())
        .map(|(p, c)| (c - p).max(0.0))
        .sum()
}

fn zero_crossing_rate(window: &[f32]) -> f32 {
    let crossings = window
        .windows(2)
        .filter(|pair| (pair[0] <= 0.0 && pair[1] > 0.0) || (pair[0] >= 0.0 && pair[1] < 0.0))
        .count();
    crossings as f32 / window.len() as f32
}

/// Mean RMS and spectral flux over `features[lo..=hi]`, used by the section
/// detector's half-window change-point test.
#[must_use]
pub fn mean_rms_flux(features: &[AudioFeatures], lo: usize, hi: usize) -> (f32, f32) {
    if lo > hi || features.is_empty() {
        return (0.0, 0.0);
    }
    let hi = hi.min(features.len() - 1);
    let slice = &features[lo..=hi];
    let rms_vals: Vec<f32> = slice.iter().map(|f| f.rms).collect();
    let flux_vals: Vec<f32> = slice.iter().map(|f| f.spectral_flux).collect();
    (mean(&rms_vals), mean(&flux_vals))
}
