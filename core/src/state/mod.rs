//! Playback and analysis data model: [`LoopRegion`], [`PlaybackState`],
//! [`LoopPolicy`], and the read-only snapshots published to observers.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use loopsmith_analysis::candidates::LoopCandidate;
use loopsmith_analysis::sections::Section;

use crate::errors::LooperError;

/// A `[startTime, endTime)` loop region, in seconds.
///
/// Invariant: `0 <= start_time <= end_time <= duration`.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct LoopRegion {
    pub start_time: f64,
    pub end_time: f64,
}

impl LoopRegion {
    /// Clamps `start`/`end` to `[0, duration]`, swapping them if necessary
    /// so `start <= end`, per the loop clamp law (§8 invariant 1).
    #[must_use]
    pub fn clamped(start: f64, end: f64, duration: f64) -> Self {
        let start = start.clamp(0.0, duration);
        let end = end.clamp(0.0, duration);
        if start <= end {
            Self {
                start_time: start,
                end_time: end,
            }
        } else {
            Self {
                start_time: end,
                end_time: start,
            }
        }
    }

    /// A non-trivial loop has a positive, well-ordered span.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.start_time < self.end_time
    }

    #[must_use]
    pub fn start_frame(&self, sample_rate: u32) -> u64 {
        (self.start_time * f64::from(sample_rate)).round() as u64
    }

    #[must_use]
    pub fn end_frame(&self, sample_rate: u32) -> u64 {
        (self.end_time * f64::from(sample_rate)).round() as u64
    }
}

/// Integer loop count; `0` encodes "infinite" (§3 `LoopPolicy`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoopPolicy {
    pub max_iterations: u32,
}

impl LoopPolicy {
    #[must_use]
    pub const fn infinite() -> Self {
        Self { max_iterations: 0 }
    }

    #[must_use]
    pub const fn is_infinite(&self) -> bool {
        self.max_iterations == 0
    }

    /// Whether `iteration` has reached the policy's limit.
    #[must_use]
    pub const fn is_exhausted(&self, iteration: u32) -> bool {
        !self.is_infinite() && iteration >= self.max_iterations
    }
}

impl Default for LoopPolicy {
    fn default() -> Self {
        Self::infinite()
    }
}

/// The playback engine's macro-state (§4.8's state machine).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

impl Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::Playing => write!(f, "Playing"),
            Self::Paused => write!(f, "Paused"),
        }
    }
}

/// Read-only snapshot of the playback engine's observable state (§6).
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PlaybackSnapshot {
    pub is_playing: bool,
    pub current_time: f64,
    pub duration: f64,
    pub loop_start: f64,
    pub loop_end: f64,
    pub loop_policy_max: u32,
    pub current_iteration: u32,
    pub last_error: Option<LooperError>,
}

impl Default for PlaybackSnapshot {
    fn default() -> Self {
        Self {
            is_playing: false,
            current_time: 0.0,
            duration: 0.0,
            loop_start: 0.0,
            loop_end: 0.0,
            loop_policy_max: 0,
            current_iteration: 0,
            last_error: None,
        }
    }
}

/// Read-only snapshot of the analysis pipeline's observable state (§6).
#[derive(Clone, Debug, PartialEq, Default, Deserialize, Serialize)]
pub struct AnalysisSnapshot {
    pub analysis_progress: f32,
    pub suggested_loop_start: Option<f64>,
    pub suggested_loop_end: Option<f64>,
    pub sections: Vec<Section>,
    pub loop_candidates: Vec<LoopCandidate>,
    pub last_error: Option<LooperError>,
}
