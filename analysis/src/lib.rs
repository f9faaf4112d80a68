//! Feature extraction, section detection, and loop-candidate scoring.
//!
//! The pipeline runs in stages over a fully decoded [`track::Track`]:
//! windowed feature extraction (§[`features`]), pairwise similarity
//! (§[`similarity`]), section detection (§[`sections`]), transition quality
//! scoring (§[`transition`]), candidate search (§[`candidates`]), and a
//! fade-out guard (§[`fade`]) that keeps suggested loop ends out of a
//! track's fade tail.

pub mod candidates;
pub mod errors;
pub mod fade;
pub mod features;
pub mod sections;
pub mod similarity;
pub mod track;
pub mod transition;
pub mod utils;

use candidates::LoopCandidate;
use errors::AnalysisResult;
use features::AudioFeatures;
use sections::Section;
use similarity::SimilarityMatrix;
use track::{Decoder, RodioDecoder, Track};

/// The full result of analyzing a track: its section timeline, pairwise
/// similarity matrix, and ranked loop candidates.
#[derive(Debug, Clone)]
pub struct AnalysisResultSet {
    pub features: Vec<AudioFeatures>,
    pub similarity: SimilarityMatrix,
    pub sections: Vec<Section>,
    pub candidates: Vec<LoopCandidate>,
}

/// Runs the complete analysis pipeline on `path`: decode, extract features,
/// build the similarity matrix, detect sections, and search loop candidates.
///
/// `should_cancel` is polled periodically during feature extraction (see
/// [`features::extract_features`]) and returns
/// [`errors::AnalysisError::ErrCancelled`] if it ever returns `true`.
///
/// # Errors
///
/// Propagates decode errors from [`track::Decoder`] and extraction errors
/// from [`features::extract_features`].
pub fn analyze_path(
    path: &std::path::Path,
    mut should_cancel: impl FnMut() -> bool,
) -> AnalysisResult<AnalysisResultSet> {
    let track = RodioDecoder::decode(path)?;
    analyze_track(&track, &mut should_cancel)
}

/// Runs the analysis pipeline on an already-decoded [`Track`].
///
/// # Errors
///
/// Propagates [`features::extract_features`] errors (empty or cancelled).
pub fn analyze_track(
    track: &Track,
    should_cancel: impl FnMut() -> bool,
) -> AnalysisResult<AnalysisResultSet> {
    let features = features::extract_features(track, should_cancel)?;
    let similarity = similarity::build_similarity_matrix(&features);
    let sections = sections::detect_sections(&features, track.frame_count(), track.sample_rate);
    let candidates = candidates::find_candidates(
        &features,
        &sections,
        track.mono(),
        track.sample_rate,
        track.duration(),
    );

    Ok(AnalysisResultSet {
        features,
        similarity,
        sections,
        candidates,
    })
}
