//! Track-walking runtime: runs a compiled [`Song`] against a strategy.
//!
//! `analyze` only keeps time, `render` mixes into an offline buffer sized by a
//! prior analysis, and `play` drives a live output in real time.

pub mod error;
pub mod scheduler;
pub mod state;
pub mod strategy;

use std::path::Path;
use std::rc::Rc;

pub use error::{ErrorClass, WalkerError};
pub use scheduler::{Limits, RunReport, Scheduler};
pub use state::{FieldRef, TrackContext, TrackField, TrackState, Value};
pub use strategy::{
    AnalysisStrategy, PlaybackStrategy, RenderStrategy, StopHandle, Strategy, WaitOutcome,
};

use crate::audio::offline::write_wav;
use crate::audio::{AudioError, LiveOutput, OfflineOutput};
use crate::config::WalkerConfig;
use crate::dsl::Song;
use crate::preset::PresetCatalog;

/// Result of an offline render.
#[derive(Debug, Clone)]
pub struct RenderedSong {
    /// Interleaved stereo samples.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub report: RunReport,
}

impl RenderedSong {
    pub fn seconds(&self) -> f64 {
        self.samples.len() as f64 / crate::audio::VOICE_CHANNELS as f64 / self.sample_rate as f64
    }

    pub fn write_wav(&self, path: &Path) -> Result<(), AudioError> {
        write_wav(path, &self.samples, self.sample_rate)
    }
}

/// Walks songs against a preset catalog. One walker can run many songs; each
/// run gets a fresh root track and scheduler.
pub struct SongWalker<'c> {
    catalog: &'c PresetCatalog,
    config: WalkerConfig,
    root_overrides: Vec<(FieldRef, Value)>,
    limits: Limits,
    stop: StopHandle,
}

impl<'c> SongWalker<'c> {
    pub fn new(catalog: &'c PresetCatalog, config: WalkerConfig) -> Self {
        Self {
            catalog,
            config,
            root_overrides: Vec::new(),
            limits: Limits::default(),
            stop: StopHandle::new(),
        }
    }

    /// Fields applied to the root track before a run.
    pub fn with_root_overrides(
        mut self,
        overrides: impl IntoIterator<Item = (FieldRef, Value)>,
    ) -> Self {
        self.root_overrides.extend(overrides);
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Handle that cancels `play`. Shared by every run of this walker; a stop
    /// ends the current (or next) run and is then cleared.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn config(&self) -> &WalkerConfig {
        &self.config
    }

    fn root_state<S: Strategy>(&self, strategy: &S) -> Result<TrackState, WalkerError> {
        let mut root = TrackState::new(self.config.beats_per_minute);
        for (field, value) in &self.root_overrides {
            root.merge(field, value.clone())?;
        }
        root.destination = strategy.root_destination();
        Ok(root)
    }

    /// Walk `song` with any strategy.
    pub fn run<S: Strategy>(&self, song: &Song, strategy: &mut S) -> Result<RunReport, WalkerError> {
        let root = self.root_state(strategy)?;
        log::info!(
            "{} walk: {} tracks defined, {} BPM",
            strategy.name(),
            song.program.procedures.len() - 1,
            root.beats_per_minute
        );
        Scheduler::new(&song.program, self.catalog, strategy)
            .with_limits(self.limits)
            .run(root)
    }

    /// Headless walk reporting the song's length.
    pub fn analyze(&self, song: &Song) -> Result<RunReport, WalkerError> {
        let mut strategy = AnalysisStrategy::new(self.config.sample_rate);
        self.run(song, &mut strategy)
    }

    /// Render the whole song, plus the configured tail, into memory.
    pub fn render(&self, song: &Song) -> Result<RenderedSong, WalkerError> {
        let analysis = self.analyze(song)?;
        let seconds = analysis.duration + self.config.render_tail_seconds;
        let output = Rc::new(OfflineOutput::new(self.config.sample_rate, seconds));
        let mut strategy = RenderStrategy::new(Rc::clone(&output));
        let report = self.run(song, &mut strategy)?;
        log::info!(
            "rendered {:.3}s ({} frames)",
            seconds,
            output.frames()
        );
        Ok(RenderedSong {
            samples: output.take_samples(),
            sample_rate: self.config.sample_rate,
            report,
        })
    }

    /// Play the song on a live output. Returns once playback has finished or
    /// the stop handle was triggered.
    pub fn play<O: LiveOutput + 'static>(
        &self,
        song: &Song,
        output: Rc<O>,
    ) -> Result<RunReport, WalkerError> {
        let mut strategy =
            PlaybackStrategy::new(output, self.config.lookahead_seconds, self.stop.clone());
        let result = self.run(song, &mut strategy);
        self.stop.reset();
        let report = result?;
        if report.dropped > 0 {
            log::warn!("{} late commands were skipped", report.dropped);
        }
        Ok(report)
    }
}
