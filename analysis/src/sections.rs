//! Change-point based section detection over [`AudioFeatures`] (C4).

use serde::{Deserialize, Serialize};

use crate::features::{mean_rms_flux, AudioFeatures, HOP_SIZE};

/// Minimum allowed section length, in seconds.
pub const MIN_SECTION_DURATION_SECS: f64 = 2.0;
/// Half-window, in analysis frames, used for the change-point test.
const HALF_WINDOW: usize = 4;
const FLUX_THRESHOLD: f32 = 0.5;
const RMS_THRESHOLD: f32 = 0.4;
const DEFAULT_CONFIDENCE: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum SectionType {
    Intro,
    Loop,
    Transition,
    Outro,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Section {
    pub start_time: f64,
    pub end_time: f64,
    pub section_type: SectionType,
    pub confidence: f32,
}

/// Detects raw change points using the half-window relative-delta test,
/// threshold parameters configurable so the candidate search (§4.6) can
/// reuse the same test with looser phrase-boundary thresholds.
#[must_use]
pub fn raw_change_points(
    features: &[AudioFeatures],
    flux_threshold: f32,
    rms_threshold: f32,
) -> Vec<usize> {
    let n = features.len();
    if n <= 2 * HALF_WINDOW {
        return Vec::new();
    }

    let mut points = Vec::new();
    for i in HALF_WINDOW..(n - HALF_WINDOW) {
        let (rms_before, flux_before) = mean_rms_flux(features, i - HALF_WINDOW, i - 1);
        let (rms_after, flux_after) = mean_rms_flux(features, i + 1, i + HALF_WINDOW);

        let delta_flux = relative_delta(flux_before, flux_after);
        let delta_rms = relative_delta(rms_before, rms_after);

        if delta_flux > flux_threshold || delta_rms > rms_threshold {
            points.push(i);
        }
    }
    points
}

fn relative_delta(before: f32, after: f32) -> f32 {
    let denom = ((before + after) / 2.0).max(f32::EPSILON);
    (after - before).abs() / denom
}

fn collapse_close_points(points: &[usize], min_gap_windows: usize) -> Vec<usize> {
    let mut out: Vec<usize> = Vec::new();
    for &p in points {
        if out.last().is_none_or(|&last| p - last >= min_gap_windows) {
            out.push(p);
        }
    }
    out
}

/// Builds the full section timeline for a track.
///
/// `frame_count` and `sample_rate` come from the decoded [`crate::track::Track`];
/// `features` are its [`AudioFeatures`] at [`crate::features::HOP_SIZE`] spacing.
#[must_use]
pub fn detect_sections(
    features: &[AudioFeatures],
    frame_count: usize,
    sample_rate: u32,
) -> Vec<Section> {
    let duration = frame_count as f64 / f64::from(sample_rate);

    let min_gap_windows =
        ((MIN_SECTION_DURATION_SECS * f64::from(sample_rate)) / HOP_SIZE as f64).round() as usize;

    let raw = raw_change_points(features, FLUX_THRESHOLD, RMS_THRESHOLD);
    let mut change_points = collapse_close_points(&raw, min_gap_windows.max(1));

    if change_points.len() < 2 && features.len() > 20 {
        change_points = vec![features.len() / 3, 2 * features.len() / 3];
    }

    let mut boundaries: Vec<f64> = Vec::with_capacity(change_points.len() + 2);
    boundaries.push(0.0);
    for &cp in &change_points {
        boundaries.push(window_start_time(features, cp, sample_rate));
    }
    boundaries.push(duration);
    boundaries.dedup_by(|a, b| (*a - *b).abs() < f64::EPSILON);

    let segments = merge_short_segments(&boundaries);

    let last_idx = segments.len().saturating_sub(1);
    segments
        .into_iter()
        .enumerate()
        .map(|(idx, (start, end))| {
            let section_type = if idx == 0 {
                SectionType::Intro
            } else if idx == last_idx {
                SectionType::Outro
            } else {
                SectionType::Loop
            };
            Section {
                start_time: start,
                end_time: end,
                section_type,
                confidence: DEFAULT_CONFIDENCE,
            }
        })
        .collect()
}

/// Turns `boundaries` (a sorted list of cut points including `0.0` and
/// `duration`) into contiguous `(start, end)` segments, merging any segment
/// shorter than [`MIN_SECTION_DURATION_SECS`] into a neighbor rather than
/// dropping it, so the result still covers `(0, duration)` with no gap.
fn merge_short_segments(boundaries: &[f64]) -> Vec<(f64, f64)> {
    let mut segments: Vec<(f64, f64)> = Vec::new();
    for pair in boundaries.windows(2) {
        let (start, end) = (pair[0], pair[1]);
        if let Some(last) = segments.last_mut() {
            if end - start < MIN_SECTION_DURATION_SECS {
                last.1 = end;
                continue;
            }
        }
        segments.push((start, end));
    }

    // The forward pass above merges a too-short segment backward into its
    // predecessor; a too-short *first* segment has no predecessor, so merge
    // it forward into the next one instead.
    if segments.len() > 1 {
        let (first_start, first_end) = segments[0];
        if first_end - first_start < MIN_SECTION_DURATION_SECS {
            segments[1].0 = first_start;
            segments.remove(0);
        }
    }

    segments
}

fn window_start_time(features: &[AudioFeatures], index: usize, sample_rate: u32) -> f64 {
    features
        .get(index)
        .map_or(0.0, |f| f.start_frame as f64 / f64::from(sample_rate))
}
