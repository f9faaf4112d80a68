//! The seamless loop playback engine (C8).
//!
//! Mirrors the audio-kernel-in-a-dedicated-thread shape used elsewhere in
//! this crate: callers only ever see [`PlaybackHandle`], a cheap `Clone`
//! wrapper around a command sender. The engine itself runs on its own OS
//! thread and owns the rodio output stream and sink exclusively.

pub mod source;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use log::error;
use tokio::sync::watch;
use tracing::instrument;

use crate::errors::{LooperError, LooperResult};
use crate::events::{Event, EventBus};
use crate::state::{LoopPolicy, LoopRegion, PlaybackSnapshot, PlaybackState};
use loopsmith_analysis::track::{Decoder, RodioDecoder};
use source::{LoopDescriptor, LoopingSource};

/// Commands accepted by the playback engine (§4.8, §6).
#[derive(Debug)]
pub enum PlaybackCommand {
    OpenFile(PathBuf),
    Play,
    Pause,
    TogglePlayback,
    Stop,
    /// Absolute seek, in seconds from the start of the track.
    Seek(f64),
    SetLoopRegion(LoopRegion),
    SetLoopPolicy(LoopPolicy),
    Exit,
}

/// A cheap, `Clone`-able handle to the playback engine's command channel.
///
/// Dropping the last handle sends [`PlaybackCommand::Exit`], so the engine
/// thread is never leaked.
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    tx: Sender<(PlaybackCommand, tracing::Span)>,
    snapshot_rx: watch::Receiver<PlaybackSnapshot>,
}

impl PlaybackHandle {
    /// Starts the playback engine on a dedicated thread and returns a handle
    /// to it. `position_update_interval` bounds how often the published
    /// snapshot's `current_time` advances while playing (§4.8).
    ///
    /// # Panics
    ///
    /// Panics if the engine thread cannot be spawned.
    #[must_use]
    pub fn start(position_update_interval: Duration, event_bus: Arc<EventBus>) -> Self {
        let (command_tx, command_rx) = std::sync::mpsc::channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(PlaybackSnapshot::default());
        let tx_clone = command_tx.clone();
        let snapshot_tx_for_failure = snapshot_tx.clone();

        std::thread::Builder::new()
            .name(String::from("Playback Engine"))
            .spawn(move || {
                match PlaybackEngine::new(tx_clone, event_bus, snapshot_tx, position_update_interval)
                {
                    Ok(engine) => engine.run(command_rx),
                    Err(e) => {
                        error!("Failed to start the playback engine: {e}");
                        run_after_start_failure(command_rx, &snapshot_tx_for_failure, e);
                    }
                }
            })
            .expect("failed to spawn the playback engine thread");

        Self {
            tx: command_tx,
            snapshot_rx,
        }
    }

    /// Sends a command to the playback engine.
    ///
    /// # Panics
    ///
    /// Panics if the engine thread is not running (or the channel is
    /// otherwise closed). Use [`Self::try_send`] when that should not panic.
    #[instrument(skip(self))]
    pub fn send(&self, command: PlaybackCommand) {
        let ctx =
            tracing::info_span!("Sending Playback Command", command = ?command).or_current();
        if let Err(e) = self.tx.send((command, ctx)) {
            error!("Failed to send command to the playback engine: {e}");
            panic!("Failed to send command to the playback engine: {e}");
        }
    }

    /// Non-panicking variant of [`Self::send`].
    ///
    /// # Errors
    ///
    /// Returns an error if the playback engine thread is not running.
    #[instrument(skip(self))]
    pub fn try_send(
        &self,
        command: PlaybackCommand,
    ) -> Result<(), std::sync::mpsc::SendError<(PlaybackCommand, tracing::Span)>> {
        let ctx =
            tracing::info_span!("Sending Playback Command", command = ?command).or_current();
        self.tx.send((command, ctx))
    }

    /// Returns a cloned watch receiver for the engine's published snapshot.
    /// Cloning is cheap; each clone observes the same underlying state.
    #[must_use]
    pub fn snapshot(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.snapshot_rx.clone()
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        let _ = self.try_send(PlaybackCommand::Exit);
    }
}

/// Runs in place of [`PlaybackEngine::run`] when [`PlaybackEngine::new`]
/// failed (no output device, unsupported format, etc). Publishes `error` as
/// the snapshot's `last_error` and keeps draining `command_rx` until the
/// handle is dropped, so callers keep a live channel to send into instead of
/// panicking on a closed one; every command is a no-op since there is no
/// engine to run them against.
fn run_after_start_failure(
    command_rx: Receiver<(PlaybackCommand, tracing::Span)>,
    snapshot_tx: &watch::Sender<PlaybackSnapshot>,
    error: LooperError,
) {
    let _ = snapshot_tx.send(PlaybackSnapshot {
        last_error: Some(error),
        ..PlaybackSnapshot::default()
    });

    for (command, ctx) in &command_rx {
        let _guard = ctx.enter();
        if matches!(command, PlaybackCommand::Exit) {
            break;
        }
    }
}

/// A decoded track held in memory as an interleaved `f32` buffer, ready to
/// be handed to a [`LoopingSource`] with no further allocation.
struct LoadedTrack {
    samples: Arc<Vec<f32>>,
    channels: u16,
    sample_rate: u32,
    frame_count: u64,
    duration: f64,
}

fn load_track(path: &std::path::Path) -> LooperResult<LoadedTrack> {
    let track = RodioDecoder::load(path)?;
    let channels = u16::try_from(track.channel_count()).unwrap_or(u16::MAX);
    let frame_count = track.frame_count() as u64;
    let duration = track.duration();
    let sample_rate = track.sample_rate;

    let mut interleaved = Vec::with_capacity(track.channels.len() * track.frame_count());
    for frame in 0..track.frame_count() {
        for channel in &track.channels {
            interleaved.push(channel[frame]);
        }
    }

    Ok(LoadedTrack {
        samples: Arc::new(interleaved),
        channels,
        sample_rate,
        frame_count,
        duration,
    })
}

/// The engine's private state, owned exclusively by its dedicated thread.
struct PlaybackEngine {
    #[cfg(not(feature = "mock_playback"))]
    _stream: rodio::OutputStream,
    player: rodio::Sink,
    #[allow(dead_code)]
    command_tx: Sender<(PlaybackCommand, tracing::Span)>,
    event_bus: Arc<EventBus>,
    snapshot_tx: watch::Sender<PlaybackSnapshot>,
    position_update_interval: Duration,

    track: Option<LoadedTrack>,
    descriptor: Option<Arc<LoopDescriptor>>,
    loop_region: LoopRegion,
    loop_policy: LoopPolicy,
    state: PlaybackState,
    /// Frame the next `Play` (from `Stopped`) or rebuilt source should
    /// resume at; tracked separately from `descriptor` since the latter is
    /// torn down on `Pause`/`Stop`.
    resume_frame: u64,
    /// Iteration count carried over once `descriptor` is torn down after a
    /// bounded loop policy exhausts, since the descriptor that counted it is
    /// gone by the time the next snapshot is published.
    last_iteration: u32,
    last_error: Option<LooperError>,
}

impl PlaybackEngine {
    fn new(
        command_tx: Sender<(PlaybackCommand, tracing::Span)>,
        event_bus: Arc<EventBus>,
        snapshot_tx: watch::Sender<PlaybackSnapshot>,
        position_update_interval: Duration,
    ) -> LooperResult<Self> {
        let stream = rodio::OutputStreamBuilder::open_default_stream()
            .map_err(|e| LooperError::ErrEngine(e.to_string()))?;
        let player = rodio::Sink::connect_new(stream.mixer());
        player.pause();

        Ok(Self {
            #[cfg(not(feature = "mock_playback"))]
            _stream: stream,
            player,
            command_tx,
            event_bus,
            snapshot_tx,
            position_update_interval,
            track: None,
            descriptor: None,
            loop_region: LoopRegion {
                start_time: 0.0,
                end_time: 0.0,
            },
            loop_policy: LoopPolicy::default(),
            state: PlaybackState::Stopped,
            resume_frame: 0,
            last_iteration: 0,
            last_error: None,
        })
    }

    fn run(mut self, command_rx: Receiver<(PlaybackCommand, tracing::Span)>) {
        loop {
            match command_rx.recv_timeout(self.position_update_interval) {
                Ok((command, ctx)) => {
                    let _guard = ctx.enter();
                    if matches!(command, PlaybackCommand::Exit) {
                        break;
                    }
                    self.handle(command);
                    self.publish_snapshot();
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.state == PlaybackState::Playing {
                        self.publish_snapshot();
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    #[instrument(skip(self))]
    fn handle(&mut self, command: PlaybackCommand) {
        match command {
            PlaybackCommand::OpenFile(path) => self.open_file(&path),
            PlaybackCommand::Play => self.play(),
            PlaybackCommand::Pause => self.pause(),
            PlaybackCommand::TogglePlayback => {
                if self.state == PlaybackState::Playing {
                    self.pause();
                } else {
                    self.play();
                }
            }
            PlaybackCommand::Stop => self.stop(),
            PlaybackCommand::Seek(time) => self.seek(time),
            PlaybackCommand::SetLoopRegion(region) => self.set_loop_region(region),
            PlaybackCommand::SetLoopPolicy(policy) => self.set_loop_policy(policy),
            PlaybackCommand::Exit => {}
        }
    }

    fn open_file(&mut self, path: &std::path::Path) {
        match load_track(path) {
            Ok(track) => {
                self.player.clear();
                self.loop_region = LoopRegion {
                    start_time: 0.0,
                    end_time: track.duration,
                };
                self.loop_policy = LoopPolicy::default();
                self.resume_frame = 0;
                self.last_iteration = 0;
                self.descriptor = None;
                self.state = PlaybackState::Stopped;
                self.last_error = None;
                self.track = Some(track);
                self.event_bus.publish(Event::OpenFile);
            }
            Err(e) => self.fail(e),
        }
    }

    fn fail(&mut self, error: LooperError) {
        error!("Playback error: {error}");
        self.event_bus.publish(Event::audio_error(&error));
        self.last_error = Some(error);
    }

    fn schedule(&mut self, start_frame: u64) {
        let Some(track) = &self.track else { return };

        let (source, descriptor) = LoopingSource::new(
            track.samples.clone(),
            track.channels,
            track.sample_rate,
            track.frame_count,
            start_frame,
            self.loop_region.start_frame(track.sample_rate),
            self.loop_region.end_frame(track.sample_rate),
            self.loop_policy.max_iterations,
            self.loop_region.is_active(),
        );

        self.player.clear();
        self.player.append(source);
        self.descriptor = Some(descriptor);
    }

    fn play(&mut self) {
        if self.track.is_none() {
            return;
        }
        if self.descriptor.is_none() {
            let start_frame = self.entry_start_frame();
            self.schedule(start_frame);
        }
        self.player.play();
        self.state = PlaybackState::Playing;
    }

    /// Picks the frame to start (or resume) playback from on entering
    /// `Playing`: `loopStart` when the loop is non-trivial (`0 < loopStart <
    /// loopEnd`), otherwise `currentTime` (§4.8 step 1).
    fn entry_start_frame(&self) -> u64 {
        let Some(track) = &self.track else {
            return self.resume_frame;
        };
        let region = self.loop_region;
        if region.start_time > 0.0 && region.start_time < region.end_time {
            region.start_frame(track.sample_rate)
        } else {
            self.resume_frame
        }
    }

    fn pause(&mut self) {
        if self.track.is_none() {
            return;
        }
        self.resume_frame = self.current_frame();
        self.player.pause();
        self.state = PlaybackState::Paused;
    }

    fn stop(&mut self) {
        self.player.clear();
        self.descriptor = None;
        self.resume_frame = 0;
        self.last_iteration = 0;
        self.state = PlaybackState::Stopped;
    }

    fn seek(&mut self, time: f64) {
        let Some(track) = &self.track else { return };
        let clamped = time.clamp(0.0, track.duration);
        let frame = (clamped * f64::from(track.sample_rate)).round() as u64;
        self.resume_frame = frame;

        if self.state == PlaybackState::Stopped {
            self.descriptor = None;
            return;
        }

        self.schedule(frame);
        if self.state == PlaybackState::Playing {
            self.player.play();
        } else {
            self.player.pause();
        }
        self.event_bus.publish(Event::SeekToTime(clamped));
    }

    fn set_loop_region(&mut self, region: LoopRegion) {
        let duration = self.track.as_ref().map_or(region.end_time, |t| t.duration);
        let clamped = LoopRegion::clamped(region.start_time, region.end_time, duration);
        self.loop_region = clamped;

        if let (Some(descriptor), Some(track)) = (&self.descriptor, &self.track) {
            descriptor.set_bounds(
                clamped.start_frame(track.sample_rate),
                clamped.end_frame(track.sample_rate),
            );
            descriptor.set_active(clamped.is_active());
        }

        // Not Playing and the loop is active: move currentTime to s (§4.8).
        if self.state != PlaybackState::Playing && clamped.is_active()
            && let Some(track) = &self.track
        {
            self.resume_frame = clamped.start_frame(track.sample_rate);
        }

        self.event_bus.publish(Event::LoopPointsChanged);
    }

    fn set_loop_policy(&mut self, policy: LoopPolicy) {
        self.loop_policy = policy;
        if let Some(descriptor) = &self.descriptor {
            descriptor.set_max_iterations(policy.max_iterations);
        }
    }

    fn current_frame(&self) -> u64 {
        self.descriptor
            .as_ref()
            .map_or(self.resume_frame, |d| d.position_frame())
    }

    fn publish_snapshot(&mut self) {
        if let Some(descriptor) = &self.descriptor
            && descriptor.is_finished()
        {
            self.last_iteration = descriptor.iteration();
            self.resume_frame = match &self.track {
                Some(track) if self.loop_region.is_active() => {
                    self.loop_region.start_frame(track.sample_rate)
                }
                Some(track) => track.frame_count,
                None => 0,
            };
            self.descriptor = None;
            self.state = PlaybackState::Stopped;
        }

        let Some(track) = &self.track else {
            let _ = self.snapshot_tx.send(PlaybackSnapshot {
                last_error: self.last_error.clone(),
                ..PlaybackSnapshot::default()
            });
            return;
        };

        let current_time = self.current_frame() as f64 / f64::from(track.sample_rate);
        let snapshot = PlaybackSnapshot {
            is_playing: self.state == PlaybackState::Playing,
            current_time,
            duration: track.duration,
            loop_start: self.loop_region.start_time,
            loop_end: self.loop_region.end_time,
            loop_policy_max: self.loop_policy.max_iterations,
            current_iteration: self
                .descriptor
                .as_ref()
                .map_or(self.last_iteration, |d| d.iteration()),
            last_error: self.last_error.clone(),
        };
        let _ = self.snapshot_tx.send(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn silent_track(frame_count: u64, sample_rate: u32) -> LoadedTrack {
        LoadedTrack {
            samples: Arc::new(vec![0.0; frame_count as usize]),
            channels: 1,
            sample_rate,
            frame_count,
            duration: frame_count as f64 / f64::from(sample_rate),
        }
    }

    /// Builds an engine against a real (but never played) output stream, for
    /// exercising the state machine without asserting on actual audio.
    fn bare_engine() -> PlaybackEngine {
        let (command_tx, _command_rx) = std::sync::mpsc::channel();
        let (snapshot_tx, _snapshot_rx) = watch::channel(PlaybackSnapshot::default());
        let stream = rodio::OutputStreamBuilder::open_default_stream()
            .expect("no audio device available in this sandbox");
        let player = rodio::Sink::connect_new(stream.mixer());

        PlaybackEngine {
            #[cfg(not(feature = "mock_playback"))]
            _stream: stream,
            player,
            command_tx,
            event_bus: Arc::new(EventBus::new()),
            snapshot_tx,
            position_update_interval: Duration::from_millis(10),
            track: None,
            descriptor: None,
            loop_region: LoopRegion {
                start_time: 0.0,
                end_time: 0.0,
            },
            loop_policy: LoopPolicy::default(),
            state: PlaybackState::Stopped,
            resume_frame: 0,
            last_iteration: 0,
            last_error: None,
        }
    }

    #[test]
    fn set_loop_region_clamps_to_track_duration() {
        let mut engine = bare_engine();
        engine.track = Some(silent_track(44_100, 44_100));
        engine.set_loop_region(LoopRegion {
            start_time: -1.0,
            end_time: 10.0,
        });
        assert_eq!(engine.loop_region.start_time, 0.0);
        assert_eq!(engine.loop_region.end_time, 1.0);
    }

    #[test]
    fn stop_resets_resume_frame_to_zero() {
        let mut engine = bare_engine();
        engine.track = Some(silent_track(44_100, 44_100));
        engine.resume_frame = 20_000;
        engine.stop();
        assert_eq!(engine.resume_frame, 0);
        assert_eq!(engine.state, PlaybackState::Stopped);
    }

    #[test]
    fn seek_while_stopped_only_updates_resume_frame() {
        let mut engine = bare_engine();
        engine.track = Some(silent_track(44_100, 44_100));
        engine.seek(0.5);
        assert_eq!(engine.resume_frame, 22_050);
        assert_eq!(engine.state, PlaybackState::Stopped);
        assert!(engine.descriptor.is_none());
    }

    #[test]
    fn set_loop_policy_without_a_live_descriptor_just_updates_the_field() {
        let mut engine = bare_engine();
        engine.set_loop_policy(LoopPolicy { max_iterations: 4 });
        assert_eq!(engine.loop_policy.max_iterations, 4);
    }

    /// Real wall-clock playback scenarios, driven against a live (but
    /// silent) output device rather than mocked state. Kept in their own
    /// module, like the rest of this crate's real-playback tests, so they
    /// can be skipped in environments with no audio device.
    mod playback_tests {
        use std::thread::sleep;

        use rstest::rstest;

        use super::*;

        /// Builds an engine with a `seconds`-long silent track already
        /// scheduled and playing against `region` under the given policy.
        fn playing_engine(
            seconds: f64,
            sample_rate: u32,
            region: LoopRegion,
            max_iterations: u32,
        ) -> PlaybackEngine {
            let mut engine = bare_engine();
            let frame_count = (seconds * f64::from(sample_rate)).round() as u64;
            engine.track = Some(silent_track(frame_count, sample_rate));
            engine.set_loop_region(region);
            engine.set_loop_policy(LoopPolicy { max_iterations });
            engine.play();
            engine
        }

        fn iteration_of(engine: &PlaybackEngine) -> u32 {
            engine
                .descriptor
                .as_ref()
                .map_or(engine.last_iteration, |d| d.iteration())
        }

        #[rstest]
        #[timeout(Duration::from_secs(15))]
        fn s1_gapless_short_loop_completes_four_iterations() {
            let mut engine = playing_engine(
                2.0,
                44_100,
                LoopRegion {
                    start_time: 0.5,
                    end_time: 1.5,
                },
                0,
            );
            sleep(Duration::from_millis(4_300));
            engine.publish_snapshot();

            assert_eq!(iteration_of(&engine), 4);
            let current_time = engine.current_frame() as f64 / 44_100.0;
            assert!(
                (0.5..=1.5).contains(&current_time),
                "current_time {current_time} left the loop region"
            );
        }

        #[rstest]
        #[timeout(Duration::from_secs(15))]
        fn s2_infinite_policy_keeps_playing_past_several_iterations() {
            let mut engine = playing_engine(
                3.0,
                44_100,
                LoopRegion {
                    start_time: 1.0,
                    end_time: 2.0,
                },
                0,
            );
            sleep(Duration::from_secs(10));
            engine.publish_snapshot();

            assert_eq!(engine.state, PlaybackState::Playing);
            // Output device startup latency means a little less than a full
            // 10 wraps may have landed by the time this reads the snapshot.
            let iteration = iteration_of(&engine);
            assert!(
                (8..=10).contains(&iteration),
                "iteration {iteration} outside the expected window"
            );
        }

        #[rstest]
        #[timeout(Duration::from_secs(15))]
        fn s3_bounded_policy_stops_after_three_iterations() {
            let mut engine = playing_engine(
                3.0,
                44_100,
                LoopRegion {
                    start_time: 1.0,
                    end_time: 2.0,
                },
                3,
            );
            sleep(Duration::from_millis(3_300));
            engine.publish_snapshot();

            assert_eq!(engine.state, PlaybackState::Stopped);
            assert_eq!(iteration_of(&engine), 3);
            let current_time = engine.current_frame() as f64 / 44_100.0;
            assert!(
                (current_time - 1.0).abs() < 1e-3,
                "current_time {current_time} was not loopStart"
            );
        }

        #[rstest]
        #[timeout(Duration::from_secs(15))]
        fn s4_seek_inside_loop_stays_within_the_loop_region() {
            let mut engine = playing_engine(
                2.0,
                44_100,
                LoopRegion {
                    start_time: 0.5,
                    end_time: 1.5,
                },
                0,
            );
            engine.seek(1.2);
            engine.publish_snapshot();
            let seeked_time = engine.current_frame() as f64 / 44_100.0;
            assert!(
                (seeked_time - 1.2).abs() < 1e-3,
                "current_time {seeked_time} did not land on the seek target"
            );

            // Sleeping past the loop's remaining span (1.5 - 1.2 = 0.3s)
            // forces a wrap back to loopStart; the engine must still be
            // playing and stay inside the loop region afterwards.
            sleep(Duration::from_millis(400));
            engine.publish_snapshot();
            assert_eq!(engine.state, PlaybackState::Playing);
            let current_time = engine.current_frame() as f64 / 44_100.0;
            assert!(
                (0.5..=1.5).contains(&current_time),
                "current_time {current_time} left the loop region after wrapping"
            );
        }
    }
}
