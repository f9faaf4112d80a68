//! Loop candidate enumeration, scoring and re-ranking (C6).

use serde::{Deserialize, Serialize};

use crate::fade::apply_fade_guard;
use crate::features::AudioFeatures;
use crate::sections::{raw_change_points, Section, MIN_SECTION_DURATION_SECS};
use crate::transition::{score_transition, TransitionMetrics};
use crate::utils::zero_crossings_in_range;

/// Upper bound on the number of (start, end) pairs considered before
/// stride-sampling down to this cap.
pub const MAX_CANDIDATE_PAIRS: usize = 1000;
const QUALITY_FLOOR: f32 = 3.0;
const TOP_N: usize = 10;

const PHRASE_FLUX_THRESHOLD: f32 = 0.3;
const PHRASE_RMS_THRESHOLD: f32 = 0.3;
const ZERO_CROSSING_SEARCH_SECS: f64 = 0.1;

const SECTION_BOUNDARY_TOLERANCE_SECS: f64 = 0.1;
const SECTION_START_BONUS: f32 = 1.0;
const SECTION_END_BONUS: f32 = 1.0;
const LONG_CANDIDATE_PENALTY_THRESHOLD: f64 = 0.7;
const LONG_CANDIDATE_PENALTY: f32 = 2.0;
const LENGTH_BONUS_WEIGHT: f32 = 2.0;
const LENGTH_BONUS_LOW: f64 = 0.2;
const LENGTH_BONUS_SPAN: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct LoopCandidate {
    pub start_time: f64,
    pub end_time: f64,
    pub quality: f32,
    pub rank_score: f32,
    pub metrics: TransitionMetrics,
}

/// Generates deduplicated, sorted seed time-points for candidate starts and
/// ends: section boundaries (excluding the first/last second), nearby
/// zero-crossings, and phrase boundaries (§4.4's test at looser thresholds).
#[must_use]
pub fn seed_times(
    features: &[AudioFeatures],
    sections: &[Section],
    mono: &[f32],
    sample_rate: u32,
    duration: f64,
) -> Vec<f64> {
    let mut seeds = Vec::new();

    for section in sections {
        for t in [section.start_time, section.end_time] {
            if t > 1.0 && t < duration - 1.0 {
                seeds.push(t);
            }
        }
    }

    let phrase_points = raw_change_points(features, PHRASE_FLUX_THRESHOLD, PHRASE_RMS_THRESHOLD);
    for idx in phrase_points {
        if let Some(feature) = features.get(idx) {
            let t = feature.start_frame as f64 / f64::from(sample_rate);
            if t > 1.0 && t < duration - 1.0 {
                seeds.push(t);
            }
        }
    }

    let mut with_crossings = seeds.clone();
    for &t in &seeds {
        let center = (t * f64::from(sample_rate)) as usize;
        let span = (ZERO_CROSSING_SEARCH_SECS * f64::from(sample_rate)) as usize;
        let lo = center.saturating_sub(span);
        let hi = (center + span).min(mono.len().saturating_sub(1));
        for frame in zero_crossings_in_range(mono, lo, hi) {
            with_crossings.push(frame / f64::from(sample_rate));
        }
    }

    with_crossings.sort_by(|a, b| a.partial_cmp(b).unwrap());
    with_crossings.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
    with_crossings
}

/// Enumerates valid (start, end) pairs from `seeds`, stride-sampling down to
/// [`MAX_CANDIDATE_PAIRS`] when the Cartesian product exceeds it.
#[must_use]
pub fn enumerate_pairs(seeds: &[f64], duration: f64) -> Vec<(f64, f64)> {
    let mut pairs = Vec::new();
    for &s in seeds {
        for &e in seeds {
            if e <= s {
                continue;
            }
            let len = e - s;
            if len >= MIN_SECTION_DURATION_SECS && len <= 0.8 * duration {
                pairs.push((s, e));
            }
        }
    }

    if pairs.len() <= MAX_CANDIDATE_PAIRS {
        return pairs;
    }

    let stride = (pairs.len() as f64 / MAX_CANDIDATE_PAIRS as f64).ceil() as usize;
    pairs.into_iter().step_by(stride.max(1)).collect()
}

/// Runs the full candidate search pipeline, returning the top-ranked
/// candidates sorted best-first. Falls back to section-derived suggestions
/// (passed through the fade-out guard) when no candidate survives scoring.
#[must_use]
pub fn find_candidates(
    features: &[AudioFeatures],
    sections: &[Section],
    mono: &[f32],
    sample_rate: u32,
    duration: f64,
) -> Vec<LoopCandidate> {
    let seeds = seed_times(features, sections, mono, sample_rate, duration);
    let pairs = enumerate_pairs(&seeds, duration);

    let mut scored: Vec<LoopCandidate> = pairs
        .into_iter()
        .filter_map(|(s, e)| {
            let s_frame = (s * f64::from(sample_rate)).round() as usize;
            let e_frame = (e * f64::from(sample_rate)).round() as usize;
            let metrics = score_transition(mono, s_frame, e_frame)?;
            if metrics.quality <= QUALITY_FLOOR {
                return None;
            }
            let rank_score = structural_rerank(metrics.quality, s, e, sections, duration);
            Some(LoopCandidate {
                start_time: s,
                end_time: e,
                quality: metrics.quality,
                rank_score,
                metrics,
            })
        })
        .collect();

    scored.sort_by(|a, b| b.rank_score.partial_cmp(&a.rank_score).unwrap());
    scored.truncate(TOP_N);

    if scored.is_empty() {
        return fallback_candidate(features, sections, mono, sample_rate, duration)
            .into_iter()
            .collect();
    }

    scored
}

fn structural_rerank(
    quality: f32,
    s: f64,
    e: f64,
    sections: &[Section],
    duration: f64,
) -> f32 {
    let mut bonus = 0.0;
    if sections
        .iter()
        .any(|sec| (sec.start_time - s).abs() < SECTION_BOUNDARY_TOLERANCE_SECS)
    {
        bonus += SECTION_START_BONUS;
    }
    if sections
        .iter()
        .any(|sec| (sec.end_time - e).abs() < SECTION_BOUNDARY_TOLERANCE_SECS)
    {
        bonus += SECTION_END_BONUS;
    }

    let fraction = (e - s) / duration;
    let r = ((fraction - LENGTH_BONUS_LOW) / LENGTH_BONUS_SPAN).clamp(0.0, 1.0);
    bonus += LENGTH_BONUS_WEIGHT * r as f32;

    if fraction > LONG_CANDIDATE_PENALTY_THRESHOLD {
        bonus -= LONG_CANDIDATE_PENALTY;
    }

    quality + bonus
}

/// Produces a fallback (start, end) suggestion when no candidate scores
/// above the quality floor, per the section-count ladder in §4.6, then
/// passes the end through the fade-out guard.
fn fallback_candidate(
    features: &[AudioFeatures],
    sections: &[Section],
    mono: &[f32],
    sample_rate: u32,
    duration: f64,
) -> Option<LoopCandidate> {
    let (start, end) = match sections.len() {
        0 => (duration / 3.0, duration),
        1 => {
            let sec = &sections[0];
            (
                sec.start_time + (sec.end_time - sec.start_time) / 3.0,
                sec.end_time,
            )
        }
        _ => (
            sections.first()?.end_time,
            sections.last()?.end_time,
        ),
    };

    let guarded_end = apply_fade_guard(features, sample_rate, end, duration);
    let s_frame = (start * f64::from(sample_rate)).round() as usize;
    let e_frame = (guarded_end * f64::from(sample_rate)).round() as usize;
    let metrics = score_transition(mono, s_frame, e_frame).unwrap_or(TransitionMetrics {
        volume_change_pct: 0.0,
        phase_jump: 0.0,
        zero_start: false,
        zero_end: false,
        spectral_difference: 0.0,
        harmonic_continuity: 0.0,
        envelope_continuity: 0.0,
        quality: 0.0,
    });

    Some(LoopCandidate {
        start_time: start,
        end_time: guarded_end,
        quality: metrics.quality,
        rank_score: metrics.quality,
        metrics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sections::SectionType;

    fn section(start: f64, end: f64, section_type: SectionType) -> Section {
        Section {
            start_time: start,
            end_time: end,
            section_type,
            confidence: 0.7,
        }
    }

    #[test]
    fn enumerate_pairs_respects_min_and_max_length() {
        let seeds = vec![0.0, 1.0, 3.0, 50.0];
        let pairs = enumerate_pairs(&seeds, 100.0);
        for (s, e) in &pairs {
            assert!(e - s >= MIN_SECTION_DURATION_SECS);
            assert!(e - s <= 0.8 * 100.0);
        }
    }

    #[test]
    fn enumerate_pairs_caps_at_stride_sampled_limit() {
        let seeds: Vec<f64> = (0..200).map(|i| i as f64 * 0.5).collect();
        let pairs = enumerate_pairs(&seeds, 1000.0);
        assert!(pairs.len() <= MAX_CANDIDATE_PAIRS);
    }

    #[test]
    fn fallback_with_zero_sections_splits_duration() {
        let mono = vec![0.0_f32; 44100 * 10];
        let candidate = fallback_candidate(&[], &[], &mono, 44100, 10.0).unwrap();
        assert!((candidate.start_time - 10.0 / 3.0).abs() < 1e-9);
        assert!((candidate.end_time - 10.0).abs() < 1e-6);
    }

    #[test]
    fn fallback_with_one_section_uses_third_point() {
        let mono = vec![0.0_f32; 44100 * 10];
        let sections = vec![section(0.0, 10.0, SectionType::Intro)];
        let candidate = fallback_candidate(&[], &sections, &mono, 44100, 10.0).unwrap();
        assert!((candidate.start_time - (10.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn structural_rerank_penalizes_overlong_candidates() {
        let sections = Vec::new();
        let short_score = structural_rerank(5.0, 0.0, 20.0, &sections, 100.0);
        let long_score = structural_rerank(5.0, 0.0, 80.0, &sections, 100.0);
        assert!(long_score < short_score);
    }
}
