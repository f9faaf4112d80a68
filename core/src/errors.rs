//! Error taxonomy for the playback engine, event bus, and application wiring.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Covers every failure mode named in §7's error taxonomy, shared across the
/// playback and analysis halves of the engine so it can ride in published
/// snapshots as `lastError`.
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum LooperError {
    #[error("failed to open file: {0}")]
    ErrFile(String),
    #[error("failed to decode audio: {0}")]
    ErrDecode(String),
    #[error("unsupported audio format: {0}")]
    ErrFormat(String),
    #[error("track has zero frames")]
    ErrEmpty,
    #[error("failed to allocate sample buffer: {0}")]
    ErrAlloc(String),
    #[error("failed to start the output device: {0}")]
    ErrEngine(String),
    #[error("analysis cancelled")]
    ErrCancelled,
    #[error("internal error: {0}")]
    ErrInternal(String),
}

impl From<std::io::Error> for LooperError {
    fn from(e: std::io::Error) -> Self {
        Self::ErrFile(e.to_string())
    }
}

#[cfg(feature = "playback")]
impl From<rodio::decoder::DecoderError> for LooperError {
    fn from(e: rodio::decoder::DecoderError) -> Self {
        Self::ErrDecode(e.to_string())
    }
}

#[cfg(feature = "playback")]
impl From<rodio::StreamError> for LooperError {
    fn from(e: rodio::StreamError) -> Self {
        Self::ErrEngine(e.to_string())
    }
}

impl From<loopsmith_analysis::errors::AnalysisError> for LooperError {
    fn from(e: loopsmith_analysis::errors::AnalysisError) -> Self {
        use loopsmith_analysis::errors::AnalysisError as A;
        match e {
            A::ErrFile(s) => Self::ErrFile(s),
            A::ErrDecode(s) => Self::ErrDecode(s),
            A::ErrFormat(s) => Self::ErrFormat(s),
            A::ErrEmpty => Self::ErrEmpty,
            A::ErrAlloc(s) => Self::ErrAlloc(s),
            A::ErrCancelled => Self::ErrCancelled,
            A::ErrInternal(s) => Self::ErrInternal(s),
        }
    }
}

/// Errors locating the application's data or config directories.
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum DirectoryError {
    #[error("could not determine the data directory")]
    Data,
    #[error("could not determine the config directory")]
    Config,
}

pub type LooperResult<T> = Result<T, LooperError>;
