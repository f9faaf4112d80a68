//! Guards against looping back into a fade-out tail (C7).

use crate::features::{AudioFeatures, HOP_SIZE};
use crate::utils::mean;

const LAST_FRACTION_TRIGGER: f64 = 0.15;
const TRAILING_FRACTION: f32 = 0.30;
const SPLIT_FRACTION: f32 = 0.75;
const DROP_RATIO: f32 = 0.9;
const RECOVERY_RATIO: f32 = 1.5;
const FALLBACK_FRACTION: f64 = 0.8;

/// Returns an adjusted loop end time, pulling it earlier than a detected
/// fade-out tail.
///
/// Only active when `proposed_end` falls in the last 15% of `duration`;
/// otherwise `proposed_end` is returned unchanged.
#[must_use]
pub fn apply_fade_guard(
    features: &[AudioFeatures],
    sample_rate: u32,
    proposed_end: f64,
    duration: f64,
) -> f64 {
    if proposed_end < (1.0 - LAST_FRACTION_TRIGGER) * duration || features.is_empty() {
        return proposed_end;
    }

    let tail_len = ((features.len() as f32) * TRAILING_FRACTION).ceil() as usize;
    let tail_len = tail_len.max(1).min(features.len());
    let tail_start = features.len() - tail_len;
    let tail = &features[tail_start..];

    let split = ((tail.len() as f32) * SPLIT_FRACTION).round() as usize;
    let split = split.clamp(0, tail.len());

    let first_rms: Vec<f32> = tail[..split].iter().map(|f| f.rms).collect();
    let last_rms: Vec<f32> = tail[split..].iter().map(|f| f.rms).collect();
    let mu1 = mean(&first_rms);
    let mu2 = mean(&last_rms);

    if mu2 >= DROP_RATIO * mu1 {
        return proposed_end;
    }

    let recovery_threshold = RECOVERY_RATIO * mu2;
    for feature in tail.iter().rev() {
        if feature.rms > recovery_threshold {
            return feature.start_frame as f64 / f64::from(sample_rate);
        }
    }

    FALLBACK_FRACTION * duration
}
