//! Wires the feature-extraction/section-detection/candidate-search pipeline
//! to a background thread, publishing progress and results the same way the
//! playback engine publishes [`crate::state::PlaybackSnapshot`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use log::error;
use tokio::sync::watch;

use loopsmith_analysis::track::{Decoder, RodioDecoder, Track};
use loopsmith_analysis::{candidates, sections};

use crate::errors::{LooperError, LooperResult};
use crate::events::{Event, EventBus};
use crate::state::AnalysisSnapshot;

/// Runs feature extraction through candidate search on an already-decoded
/// track, invoking `progress` after each stage completes.
///
/// Kept separate from [`analyze_in_background`] so the pipeline wiring can
/// be tested directly against an in-memory [`Track`], with no file I/O or
/// background thread involved.
///
/// # Errors
///
/// Propagates [`loopsmith_analysis::features::extract_features`] errors
/// (an empty or cancelled track).
pub fn analyze_track_with_progress(
    track: &Track,
    mut should_cancel: impl FnMut() -> bool,
    mut progress: impl FnMut(f32),
) -> LooperResult<AnalysisSnapshot> {
    progress(0.05);
    let features =
        loopsmith_analysis::features::extract_features(track, &mut should_cancel)?;
    progress(0.6);

    let _similarity = loopsmith_analysis::similarity::build_similarity_matrix(&features);
    progress(0.7);

    let detected_sections =
        sections::detect_sections(&features, track.frame_count(), track.sample_rate);
    progress(0.85);

    let loop_candidates = candidates::find_candidates(
        &features,
        &detected_sections,
        track.mono(),
        track.sample_rate,
        track.duration(),
    );
    progress(1.0);

    let best = loop_candidates.first();
    Ok(AnalysisSnapshot {
        analysis_progress: 1.0,
        suggested_loop_start: best.map(|c| c.start_time),
        suggested_loop_end: best.map(|c| c.end_time),
        sections: detected_sections,
        loop_candidates,
        last_error: None,
    })
}

/// A handle to a background analysis run: lets the caller request
/// cancellation and observe the published [`AnalysisSnapshot`].
#[derive(Clone)]
pub struct AnalysisHandle {
    cancel: Arc<AtomicBool>,
    snapshot_rx: watch::Receiver<AnalysisSnapshot>,
}

impl AnalysisHandle {
    /// Requests cancellation. Takes effect the next time feature extraction
    /// polls its cancellation flag (at least once every ten windows).
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Returns a cloned watch receiver for the published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> watch::Receiver<AnalysisSnapshot> {
        self.snapshot_rx.clone()
    }
}

/// Decodes and analyzes `path` on a dedicated background thread, publishing
/// progress and results to the returned [`AnalysisHandle`] and emitting
/// [`Event::AudioError`] on the bus if the run fails.
///
/// Per §7, a failed analysis sets `last_error` but leaves any
/// previously-published suggestions in place rather than clearing them.
///
/// # Panics
///
/// Panics if the background thread cannot be spawned.
#[must_use]
pub fn analyze_in_background(path: PathBuf, event_bus: Arc<EventBus>) -> AnalysisHandle {
    let (snapshot_tx, snapshot_rx) = watch::channel(AnalysisSnapshot::default());
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_clone = cancel.clone();

    thread::Builder::new()
        .name(String::from("Analysis"))
        .spawn(move || run(&path, &cancel_clone, &snapshot_tx, &event_bus))
        .expect("failed to spawn the analysis thread");

    AnalysisHandle {
        cancel,
        snapshot_rx,
    }
}

fn run(
    path: &Path,
    cancel: &Arc<AtomicBool>,
    snapshot_tx: &watch::Sender<AnalysisSnapshot>,
    event_bus: &Arc<EventBus>,
) {
    snapshot_tx.send_modify(|s| s.analysis_progress = 0.0);

    let outcome = decode_and_analyze(path, cancel, snapshot_tx);

    match outcome {
        Ok(snapshot) => {
            let _ = snapshot_tx.send(snapshot);
        }
        Err(e) => {
            error!("Analysis failed for {}: {e}", path.display());
            event_bus.publish(Event::audio_error(&e));
            snapshot_tx.send_modify(|s| s.last_error = Some(e));
        }
    }
}

fn decode_and_analyze(
    path: &Path,
    cancel: &Arc<AtomicBool>,
    snapshot_tx: &watch::Sender<AnalysisSnapshot>,
) -> LooperResult<AnalysisSnapshot> {
    let track = RodioDecoder::decode(path)?;
    analyze_track_with_progress(
        &track,
        || cancel.load(Ordering::Relaxed),
        |p| snapshot_tx.send_modify(|s| s.analysis_progress = p),
    )
}
