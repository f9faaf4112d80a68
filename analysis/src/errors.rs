use thiserror::Error;

/// Error taxonomy for the analysis pipeline (C1 decode through C7 fade guard).
#[derive(Error, Debug, Clone)]
pub enum AnalysisError {
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
    #[error("analysis cancelled")]
    ErrCancelled,
    #[error("internal analysis error: {0}")]
    ErrInternal(String),
}

impl From<std::io::Error> for AnalysisError {
    fn from(e: std::io::Error) -> Self {
        Self::ErrFile(e.to_string())
    }
}

impl From<rodio::decoder::DecoderError> for AnalysisError {
    fn from(e: rodio::decoder::DecoderError) -> Self {
        Self::ErrDecode(e.to_string())
    }
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
