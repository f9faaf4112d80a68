//! Transition quality scoring for a candidate loop boundary (s, e) (C5).

use serde::{Deserialize, Serialize};

use crate::utils::{cosine_similarity, magnitude_spectrum, rms};

/// Sample window size used to probe either side of a candidate boundary.
pub const TRANSITION_WINDOW: usize = 4096;
/// Sub-envelope window size for envelope continuity.
const ENVELOPE_SUB_WINDOW: usize = 128;
const ENVELOPE_SUB_WINDOWS: usize = 3;
const ZERO_THRESHOLD: f32 = 0.01;
const EPS: f32 = 1e-6;

const VOLUME_WEIGHT: f32 = 0.15;
const PHASE_WEIGHT: f32 = 0.20;
const SPECTRAL_WEIGHT: f32 = 0.25;
const HARMONIC_WEIGHT: f32 = 0.25;
const ENVELOPE_WEIGHT: f32 = 0.15;
const ZERO_CROSSING_BONUS: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct TransitionMetrics {
    pub volume_change_pct: f32,
    pub phase_jump: f32,
    pub zero_start: bool,
    pub zero_end: bool,
    pub spectral_difference: f32,
    pub harmonic_continuity: f32,
    pub envelope_continuity: f32,
    pub quality: f32,
}

/// Scores the transition quality of looping from end-of-body frame `e` back
/// to start-of-body frame `s`, given the track's channel-0 samples.
///
/// Returns `None` if there are fewer than [`TRANSITION_WINDOW`] samples
/// available before `e` or after `s`.
#[must_use]
pub fn score_transition(samples: &[f32], s: usize, e: usize) -> Option<TransitionMetrics> {
    if e < TRANSITION_WINDOW || s + TRANSITION_WINDOW > samples.len() {
        return None;
    }

    let pre = &samples[e - TRANSITION_WINDOW..e];
    let post = &samples[s..s + TRANSITION_WINDOW];

    let rms_pre = rms(pre);
    let rms_post = rms(post);
    let volume_change_pct =
        (rms_pre - rms_post).abs() / (rms_pre.max(rms_post)).max(EPS) * 100.0;

    let phase_jump = (pre[TRANSITION_WINDOW - 1] - post[0]).abs();
    let zero_end = pre[TRANSITION_WINDOW - 1].abs() < ZERO_THRESHOLD;
    let zero_start = post[0].abs() < ZERO_THRESHOLD;

    let spectrum_pre = magnitude_spectrum(pre);
    let spectrum_post = magnitude_spectrum(post);
    let spectral_difference = spectral_difference(&spectrum_pre, &spectrum_post);
    let harmonic_continuity = harmonic_continuity(&spectrum_pre, &spectrum_post);
    let envelope_continuity = envelope_continuity(pre, post);

    let volume_score = 10.0 * (1.0 - (volume_change_pct / 100.0).min(1.0));
    let phase_score = 10.0 * (1.0 - (phase_jump * 5.0).min(1.0));
    let spectral_score = 10.0 * (1.0 - (spectral_difference * 2.0).min(1.0));
    let harmonic_score = 10.0 * harmonic_continuity;
    let envelope_score = 10.0 * envelope_continuity;

    let mut quality = VOLUME_WEIGHT * volume_score
        + PHASE_WEIGHT * phase_score
        + SPECTRAL_WEIGHT * spectral_score
        + HARMONIC_WEIGHT * harmonic_score
        + ENVELOPE_WEIGHT * envelope_score;

    if zero_start && zero_end {
        quality = (quality + ZERO_CROSSING_BONUS).min(10.0);
    }

    Some(TransitionMetrics {
        volume_change_pct,
        phase_jump,
        zero_start,
        zero_end,
        spectral_difference,
        harmonic_continuity,
        envelope_continuity,
        quality,
    })
}

fn spectral_difference(pre: &[f32], post: &[f32]) -> f32 {
    let mut num = 0.0;
    let mut denom = 0.0;
    for (a, b) in pre.iter().zip(post.iter()) {
        num += (a - b).abs();
        denom += a.max(*b);
    }
    if denom <= EPS {
        0.0
    } else {
        num / denom
    }
}

fn harmonic_continuity(pre: &[f32], post: &[f32]) -> f32 {
    let quarter = pre.len() / 4;
    cosine_similarity(&pre[..quarter], &post[..quarter])
}

fn envelope_continuity(pre: &[f32], post: &[f32]) -> f32 {
    let pre_tail = last_sub_envelopes(pre);
    let post_head = first_sub_envelopes(post);

    let mut num = 0.0;
    let mut denom = 0.0;
    for (a, b) in pre_tail.iter().zip(post_head.iter()) {
        num += (a - b).abs();
        denom += a.max(*b);
    }
    if denom <= EPS {
        1.0
    } else {
        1.0 - num / denom
    }
}

fn last_sub_envelopes(samples: &[f32]) -> Vec<f32> {
    let n = samples.len();
    (0..ENVELOPE_SUB_WINDOWS)
        .rev()
        .map(|i| {
            let end = n - i * ENVELOPE_SUB_WINDOW;
            let start = end.saturating_sub(ENVELOPE_SUB_WINDOW);
            rms(&samples[start..end])
        })
        .collect()
}

fn first_sub_envelopes(samples: &[f32]) -> Vec<f32> {
    (0..ENVELOPE_SUB_WINDOWS)
        .map(|i| {
            let start = i * ENVELOPE_SUB_WINDOW;
            let end = (start + ENVELOPE_SUB_WINDOW).min(samples.len());
            rms(&samples[start..end])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, n: usize, sample_rate: u32) -> Vec<f32> {
        (0..n)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                (2.0 * std::f32::consts::PI * freq * t).sin()
            })
            .collect()
    }

    #[test]
    fn looping_a_periodic_signal_at_its_period_scores_highly() {
        let sample_rate = 44100;
        let total = TRANSITION_WINDOW * 4;
        let samples = sine(440.0, total, sample_rate);
        let s = TRANSITION_WINDOW;
        let e = total - TRANSITION_WINDOW;
        let metrics = score_transition(&samples, s, e).unwrap();
        assert!(metrics.quality > 5.0);
    }

    #[test]
    fn insufficient_samples_returns_none() {
        let samples = vec![0.0; 100];
        assert!(score_transition(&samples, 0, 50).is_none());
    }

    #[test]
    fn quality_is_clamped_to_ten() {
        let samples = vec![0.0; TRANSITION_WINDOW * 2];
        let metrics = score_transition(&samples, 0, TRANSITION_WINDOW).unwrap();
        assert!(metrics.quality <= 10.0);
        assert!(metrics.zero_start && metrics.zero_end);
    }

    #[test]
    fn abrupt_volume_jump_lowers_quality() {
        let sample_rate = 44100;
        let mut samples = sine(440.0, TRANSITION_WINDOW, sample_rate);
        samples.extend(vec![0.9_f32; TRANSITION_WINDOW]);
        let quiet_to_loud = score_transition(&samples, TRANSITION_WINDOW, TRANSITION_WINDOW).unwrap();
        assert!(quiet_to_loud.volume_change_pct > 0.0);
    }
}
