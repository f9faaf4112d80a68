//! The sample-accurate loop [`rodio::Source`] (C8).
//!
//! Generalizes the re-seek-on-exhaustion idea behind rodio's own
//! `LoopedDecoder` to an arbitrary `[start, end)` region over an in-memory,
//! already-decoded buffer, instead of re-decoding a file from the start.
//! Control-thread edits (new bounds, a new policy) land in [`LoopDescriptor`]'s
//! atomics and are picked up the next time the audio thread wraps; the
//! segment already queued up to play out is never interrupted mid-flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use rodio::Source;

/// Shared, lock-free control surface between the control thread (which owns
/// a [`PlaybackEngine`](super::PlaybackEngine)) and the audio thread (which
/// owns the [`LoopingSource`] pulling samples for rodio's mixer).
///
/// All fields use `Relaxed` ordering: each is independently meaningful and
/// there is no cross-field invariant that needs a stronger fence, since a
/// torn read of "old bounds, new policy" just means the wrap that is
/// currently in flight uses the policy that is in flight too, and the next
/// wrap picks up fully-settled values.
pub struct LoopDescriptor {
    loop_start_frame: AtomicU64,
    loop_end_frame: AtomicU64,
    /// End frame of the segment currently scheduled to play. Differs from
    /// `loop_end_frame` only for the very first segment when playback began
    /// outside the loop region (see [`LoopingSource::new`]).
    current_end_frame: AtomicU64,
    max_iterations: AtomicU32,
    /// Number of wraps executed so far.
    iteration: AtomicU32,
    /// Whether looping is enabled at all; a non-looping stream plays through
    /// to `frame_count` once and ends.
    active: AtomicBool,
    /// Current read position, in frames, updated once per sample frame.
    /// This is the source of truth `PlaybackEngine::snapshot` reads for
    /// `current_time`.
    position_frame: AtomicU64,
    /// Set by the audio thread when the scheduled audio has fully drained
    /// (loop policy exhausted, or a non-looping stream reached its end).
    finished: AtomicBool,
}

impl LoopDescriptor {
    #[must_use]
    pub fn new(
        position_frame: u64,
        loop_start_frame: u64,
        loop_end_frame: u64,
        current_end_frame: u64,
        max_iterations: u32,
        active: bool,
    ) -> Self {
        Self {
            loop_start_frame: AtomicU64::new(loop_start_frame),
            loop_end_frame: AtomicU64::new(loop_end_frame),
            current_end_frame: AtomicU64::new(current_end_frame),
            max_iterations: AtomicU32::new(max_iterations),
            iteration: AtomicU32::new(0),
            active: AtomicBool::new(active),
            position_frame: AtomicU64::new(position_frame),
            finished: AtomicBool::new(false),
        }
    }

    /// Updates the loop bounds. Takes effect on the next wrap; the segment
    /// already scheduled plays out to its existing end first.
    pub fn set_bounds(&self, start_frame: u64, end_frame: u64) {
        self.loop_start_frame.store(start_frame, Ordering::Relaxed);
        self.loop_end_frame.store(end_frame, Ordering::Relaxed);
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    pub fn set_max_iterations(&self, max_iterations: u32) {
        self.max_iterations
            .store(max_iterations, Ordering::Relaxed);
    }

    #[must_use]
    pub fn position_frame(&self) -> u64 {
        self.position_frame.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn iteration(&self) -> u32 {
        self.iteration.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }
}

/// A [`rodio::Source`] over an interleaved, already-decoded PCM buffer that
/// wraps `[loop_start, loop_end)` instead of stopping at the end of the
/// buffer, with no resampling or crossfade at the seam.
pub struct LoopingSource {
    samples: Arc<Vec<f32>>,
    channels: u16,
    sample_rate: u32,
    frame_count: u64,
    sample_in_frame: u16,
    descriptor: Arc<LoopDescriptor>,
}

impl LoopingSource {
    /// Builds a source starting at `start_frame`, per the scheduling
    /// algorithm: the first segment ends at `loop_end_frame` if looping is
    /// active and `start_frame` already lies inside `[loop_start, loop_end)`;
    /// otherwise it plays straight through to `frame_count`, and the loop
    /// (if active) takes over only once that first pass drains.
    #[must_use]
    pub fn new(
        samples: Arc<Vec<f32>>,
        channels: u16,
        sample_rate: u32,
        frame_count: u64,
        start_frame: u64,
        loop_start_frame: u64,
        loop_end_frame: u64,
        max_iterations: u32,
        active: bool,
    ) -> (Self, Arc<LoopDescriptor>) {
        let current_end_frame = if active && start_frame >= loop_start_frame {
            loop_end_frame
        } else {
            frame_count
        };

        let descriptor = Arc::new(LoopDescriptor::new(
            start_frame,
            loop_start_frame,
            loop_end_frame,
            current_end_frame,
            max_iterations,
            active,
        ));

        let source = Self {
            samples,
            channels,
            sample_rate,
            frame_count,
            sample_in_frame: 0,
            descriptor: descriptor.clone(),
        };

        (source, descriptor)
    }

    fn frame_index(&self, frame: u64) -> usize {
        frame as usize * self.channels as usize + self.sample_in_frame as usize
    }
}

impl Iterator for LoopingSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        let position = self.descriptor.position_frame.load(Ordering::Relaxed);
        if position >= self.frame_count {
            return None;
        }

        let idx = self.frame_index(position);
        let sample = self.samples.get(idx).copied().unwrap_or(0.0);

        self.sample_in_frame += 1;
        if self.sample_in_frame < self.channels {
            return Some(sample);
        }
        self.sample_in_frame = 0;

        let next_position = position + 1;
        let current_end = self.descriptor.current_end_frame.load(Ordering::Relaxed);

        if next_position >= current_end {
            if self.descriptor.active.load(Ordering::Relaxed) {
                let max_iterations = self.descriptor.max_iterations.load(Ordering::Relaxed);
                let iteration = self.descriptor.iteration.fetch_add(1, Ordering::AcqRel) + 1;
                if max_iterations == 0 || iteration < max_iterations {
                    let loop_start = self.descriptor.loop_start_frame.load(Ordering::Relaxed);
                    let loop_end = self.descriptor.loop_end_frame.load(Ordering::Relaxed);
                    self.descriptor
                        .current_end_frame
                        .store(loop_end, Ordering::Relaxed);
                    self.descriptor
                        .position_frame
                        .store(loop_start, Ordering::Relaxed);
                    return Some(sample);
                }
                self.descriptor.finished.store(true, Ordering::Relaxed);
                self.descriptor
                    .position_frame
                    .store(self.frame_count, Ordering::Relaxed);
                return Some(sample);
            }
            self.descriptor.finished.store(true, Ordering::Relaxed);
            self.descriptor
                .position_frame
                .store(self.frame_count, Ordering::Relaxed);
            return Some(sample);
        }

        self.descriptor
            .position_frame
            .store(next_position, Ordering::Relaxed);
        Some(sample)
    }
}

impl Source for LoopingSource {
    fn current_span_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ramp(frame_count: u64) -> Arc<Vec<f32>> {
        Arc::new((0..frame_count).map(|f| f as f32).collect())
    }

    #[test]
    fn non_looping_source_plays_through_once_and_ends() {
        let samples = ramp(5);
        let (source, descriptor) =
            LoopingSource::new(samples, 1, 1000, 5, 0, 0, 0, 0, false);
        let played: Vec<f32> = source.collect();
        assert_eq!(played, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert!(descriptor.is_finished());
    }

    #[test]
    fn bounded_loop_wraps_exactly_max_iterations_times() {
        let samples = ramp(10);
        // start (0) < loop_start (2), so the first pass plays through the
        // whole buffer [0, 10); only then does looping over [2, 5) begin.
        let (source, descriptor) =
            LoopingSource::new(samples, 1, 1000, 10, 0, 2, 5, 3, true);
        let played: Vec<f32> = source.collect();
        assert_eq!(&played[0..10], &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        assert_eq!(&played[10..13], &[2.0, 3.0, 4.0]);
        assert_eq!(&played[13..16], &[2.0, 3.0, 4.0]);
        assert_eq!(&played[16..19], &[2.0, 3.0, 4.0]);
        assert_eq!(played.len(), 10 + 3 + 3 + 3);
        assert!(descriptor.is_finished());
        assert_eq!(descriptor.iteration(), 3);
    }

    #[test]
    fn infinite_loop_never_finishes_within_a_bounded_sample_window() {
        let samples = ramp(4);
        let (source, descriptor) = LoopingSource::new(samples, 1, 1000, 4, 0, 0, 4, 0, true);
        let played: Vec<f32> = source.take(17).collect();
        assert_eq!(played.len(), 17);
        assert!(!descriptor.is_finished());
    }

    #[test]
    fn starting_inside_the_loop_region_schedules_loop_end_immediately() {
        let samples = ramp(10);
        let (_source, descriptor) =
            LoopingSource::new(samples, 1, 1000, 10, 3, 2, 5, 0, true);
        assert_eq!(descriptor.current_end_frame.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn bounds_updated_mid_flight_take_effect_on_the_next_wrap_only() {
        let samples = ramp(10);
        let (mut source, descriptor) =
            LoopingSource::new(samples, 1, 1000, 10, 2, 2, 5, 0, true);
        // consume two samples of the currently scheduled [2, 5) segment
        source.next();
        source.next();
        descriptor.set_bounds(6, 9);
        // the remaining sample of the in-flight segment still plays out
        let third = source.next();
        assert_eq!(third, Some(4.0));
        // now the wrap happens, and the new bounds take over
        let fourth = source.next();
        assert_eq!(fourth, Some(6.0));
    }
}
