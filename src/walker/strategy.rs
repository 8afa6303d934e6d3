//! How a walk treats commands, presets and waits.
//!
//! The scheduler interprets the program the same way for every run; a
//! [`Strategy`] decides what a command does (nothing, render into a buffer,
//! or play live) and how long the walker sleeps between waits.

use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::{AudioClock, AudioDestination, DestinationRef, LiveOutput, OfflineOutput};
use crate::preset::{Handler, HandlerFlow, HandlerRef, Preset, PresetConfig, SongContext};

use super::error::WalkerError;
use super::state::{FieldRef, TrackField, TrackState, Value};

/// Longest single sleep before the stop flag is checked again.
const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// Result of advancing a track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitOutcome {
    /// The track reached its `trackDuration`.
    pub finished: bool,
    /// Song time at which the track continues.
    pub resume_at: f64,
}

pub trait Strategy {
    fn name(&self) -> &'static str;

    fn song_context(&self) -> SongContext;

    /// Destination of the root track; children inherit it.
    fn root_destination(&self) -> Option<DestinationRef> {
        None
    }

    /// Run `command` on `track` with the command's overrides.
    fn execute(
        &mut self,
        track: &TrackState,
        command: &str,
        overrides: &[(TrackField, Value)],
    ) -> Result<(), WalkerError>;

    /// Turn a resolved preset into a handler.
    fn load_preset(
        &mut self,
        preset: &Preset,
        config: &PresetConfig,
    ) -> Result<HandlerRef, WalkerError>;

    fn wait(&mut self, track: &mut TrackState, beats: f64) -> Result<WaitOutcome, WalkerError> {
        let finished = track.advance(beats)?;
        Ok(WaitOutcome {
            finished,
            resume_at: track.current_time,
        })
    }

    /// Called before the walker resumes a track at `resume_at`. Returns false
    /// if the walk should stop.
    fn pace(&mut self, _resume_at: f64) -> bool {
        !self.is_stopped()
    }

    fn is_stopped(&self) -> bool {
        false
    }

    /// Called once after the last track finished walking.
    fn finish(&mut self, _end_time: f64) -> Result<(), WalkerError> {
        Ok(())
    }

    /// Commands skipped because they were already late.
    fn dropped(&self) -> usize {
        0
    }
}

/// Effects in registration order, then the instrument, on a copy of the
/// track with the command overrides applied.
pub fn dispatch(
    track: &TrackState,
    command: &str,
    overrides: &[(TrackField, Value)],
) -> Result<(), WalkerError> {
    let mut effective = track.clone();
    for (field, value) in overrides {
        effective.merge(&FieldRef::Field(*field), value.clone())?;
    }
    let instrument = effective
        .instrument
        .clone()
        .ok_or_else(|| WalkerError::NoInstrument(command.to_string()))?;
    for effect in &track.effects {
        if effect.handle(&mut effective, command)? == HandlerFlow::Veto {
            log::debug!("'{command}' vetoed by {}", effect.name());
            return Ok(());
        }
    }
    instrument.handle(&mut effective, command)?;
    Ok(())
}

/// Cancels a walk. Cheap to clone and safe to trigger from another thread.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent; may be called before the walk starts.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a stop so the next walk runs.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Placeholder handler returned by [`AnalysisStrategy`] so scores can still
/// assign instruments and effects.
struct Silent(String);

impl Handler for Silent {
    fn name(&self) -> &str {
        &self.0
    }

    fn handle(&self, _track: &mut TrackState, _command: &str) -> Result<HandlerFlow, WalkerError> {
        Ok(HandlerFlow::Continue)
    }
}

/// Headless walk: only time bookkeeping.
#[derive(Debug, Default)]
pub struct AnalysisStrategy {
    sample_rate: u32,
}

impl AnalysisStrategy {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

impl Strategy for AnalysisStrategy {
    fn name(&self) -> &'static str {
        "analysis"
    }

    fn song_context(&self) -> SongContext {
        SongContext {
            sample_rate: self.sample_rate,
        }
    }

    fn execute(
        &mut self,
        _track: &TrackState,
        _command: &str,
        _overrides: &[(TrackField, Value)],
    ) -> Result<(), WalkerError> {
        Ok(())
    }

    fn load_preset(
        &mut self,
        preset: &Preset,
        _config: &PresetConfig,
    ) -> Result<HandlerRef, WalkerError> {
        Ok(Rc::new(Silent(preset.title.clone())))
    }
}

/// Offline render into a fixed-length buffer.
pub struct RenderStrategy {
    output: Rc<OfflineOutput>,
}

impl RenderStrategy {
    pub fn new(output: Rc<OfflineOutput>) -> Self {
        Self { output }
    }
}

impl Strategy for RenderStrategy {
    fn name(&self) -> &'static str {
        "render"
    }

    fn song_context(&self) -> SongContext {
        SongContext {
            sample_rate: self.output.sample_rate(),
        }
    }

    fn root_destination(&self) -> Option<DestinationRef> {
        Some(Rc::clone(&self.output) as DestinationRef)
    }

    fn execute(
        &mut self,
        track: &TrackState,
        command: &str,
        overrides: &[(TrackField, Value)],
    ) -> Result<(), WalkerError> {
        dispatch(track, command, overrides)
    }

    fn load_preset(
        &mut self,
        preset: &Preset,
        config: &PresetConfig,
    ) -> Result<HandlerRef, WalkerError> {
        preset.instantiate(&self.song_context(), config)
    }
}

/// Live playback: render against the output, staying `lookahead` seconds
/// ahead of its clock.
pub struct PlaybackStrategy<O: LiveOutput> {
    output: Rc<O>,
    lookahead: f64,
    stop: StopHandle,
    resumed: bool,
    dropped: usize,
}

impl<O: LiveOutput + 'static> PlaybackStrategy<O> {
    pub fn new(output: Rc<O>, lookahead: f64, stop: StopHandle) -> Self {
        Self {
            output,
            lookahead,
            stop,
            resumed: false,
            dropped: 0,
        }
    }

    /// Sleep up to `seconds`, waking early if stopped.
    fn sleep(&self, seconds: f64) -> bool {
        if seconds <= 0.0 || !seconds.is_finite() {
            return !self.stop.is_stopped();
        }
        let deadline = Instant::now() + Duration::from_secs_f64(seconds);
        loop {
            if self.stop.is_stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

impl<O: LiveOutput + 'static> Strategy for PlaybackStrategy<O> {
    fn name(&self) -> &'static str {
        "playback"
    }

    fn song_context(&self) -> SongContext {
        SongContext {
            sample_rate: self.output.sample_rate(),
        }
    }

    fn root_destination(&self) -> Option<DestinationRef> {
        Some(Rc::clone(&self.output) as DestinationRef)
    }

    fn execute(
        &mut self,
        track: &TrackState,
        command: &str,
        overrides: &[(TrackField, Value)],
    ) -> Result<(), WalkerError> {
        if self.stop.is_stopped() {
            return Ok(());
        }
        let now = self.output.current_time();
        if track.current_time < now {
            log::warn!(
                "skipping '{command}' scheduled in the past ({:.3}s < {now:.3}s)",
                track.current_time
            );
            self.dropped += 1;
            return Ok(());
        }
        dispatch(track, command, overrides)?;
        if !self.resumed && self.output.is_suspended() {
            self.resumed = true;
            self.output.resume()?;
            log::info!("audio output resumed at {:.3}s", self.output.current_time());
        }
        Ok(())
    }

    fn load_preset(
        &mut self,
        preset: &Preset,
        config: &PresetConfig,
    ) -> Result<HandlerRef, WalkerError> {
        preset.instantiate(&self.song_context(), config)
    }

    fn pace(&mut self, resume_at: f64) -> bool {
        // The clock does not move while the output is suspended, so the
        // sleep is computed once rather than polled against the clock.
        let ahead = resume_at - self.output.current_time() - self.lookahead;
        self.sleep(ahead)
    }

    fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    fn finish(&mut self, end_time: f64) -> Result<(), WalkerError> {
        if !self.stop.is_stopped() && self.resumed {
            let remaining = end_time - self.output.current_time();
            log::debug!("waiting {remaining:.3}s for playback to finish");
            self.sleep(remaining);
        }
        if self.stop.is_stopped() {
            self.output.halt()?;
            log::info!("playback stopped");
        }
        Ok(())
    }

    fn dropped(&self) -> usize {
        self.dropped
    }
}
