//! Walker integration tests: compiled songs analyzed, rendered and played
//! without audio hardware.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use assert_approx_eq::assert_approx_eq;

use songwalker::audio::{AudioClock, AudioDestination, AudioError, LiveOutput, Voice};
use songwalker::config::WalkerConfig;
use songwalker::dsl::Compiler;
use songwalker::loader::compile_file;
use songwalker::preset::PresetCatalog;
use songwalker::walker::{ErrorClass, SongWalker, WalkerError};

fn config() -> WalkerConfig {
    WalkerConfig {
        sample_rate: 2_000,
        render_tail_seconds: 0.0,
        ..WalkerConfig::default()
    }
}

/// Peak absolute sample within `[from, to)` seconds.
fn peak(samples: &[f32], sample_rate: u32, from: f64, to: f64) -> f32 {
    let start = (from * sample_rate as f64) as usize * 2;
    let end = ((to * sample_rate as f64) as usize * 2).min(samples.len());
    samples[start..end].iter().fold(0.0, |m, s| m.max(s.abs()))
}

#[test]
fn two_track_song_at_60_bpm_lasts_two_seconds() {
    let catalog = PresetCatalog::with_builtin();
    let walker = SongWalker::new(&catalog, config());
    let song = Compiler::compile(
        "loadPreset('Oscillator');\n\
         track drums() { C2 1/2 C2 1/2 C2 1/2 C2 1/2 }\n\
         track pad() { E4 2 }\n\
         drums();\n\
         pad();",
    )
    .unwrap();
    let report = walker.analyze(&song).unwrap();
    assert_approx_eq!(report.duration, 2.0);
    assert_eq!(report.tracks, 3);
    assert_eq!(report.commands, 5);
}

#[test]
fn track_duration_cuts_a_track_short() {
    let catalog = PresetCatalog::with_builtin();
    let walker = SongWalker::new(&catalog, config());
    let song = Compiler::compile("track riff() { C4 1 D4 1 E4 1 }\nriff@2();").unwrap();
    let report = walker.analyze(&song).unwrap();
    assert_eq!(report.commands, 2);
    assert_approx_eq!(report.duration, 2.0);
}

#[test]
fn unknown_preset_is_a_resolution_error() {
    let catalog = PresetCatalog::with_builtin();
    let walker = SongWalker::new(&catalog, config());
    let song = Compiler::compile("loadPreset('Theremin');\nC4 1").unwrap();
    let err = walker.analyze(&song).unwrap_err();
    assert_eq!(err, WalkerError::PresetNotFound("Theremin".into()));
    assert_eq!(err.class(), ErrorClass::Resolution);
}

#[test]
fn render_places_notes_in_time() {
    let catalog = PresetCatalog::with_builtin();
    let walker = SongWalker::new(&catalog, config());
    let song = Compiler::compile("loadPreset('Sine');\nC4@1/2 1 E4@1/2 1").unwrap();
    let rendered = walker.render(&song).unwrap();
    assert_approx_eq!(rendered.seconds(), 2.0);
    assert!(peak(&rendered.samples, 2_000, 0.0, 0.5) > 0.5);
    assert!(peak(&rendered.samples, 2_000, 0.5, 1.0) < 1e-6);
    assert!(peak(&rendered.samples, 2_000, 1.0, 1.5) > 0.5);
}

#[test]
fn delay_effect_echoes_into_the_tail() {
    let catalog = PresetCatalog::with_builtin();
    let walker = SongWalker::new(
        &catalog,
        WalkerConfig {
            render_tail_seconds: 2.0,
            ..config()
        },
    );
    let dry = Compiler::compile("loadPreset('Sine');\nC4@1/4 1").unwrap();
    let wet = Compiler::compile(
        "loadPreset('Sine');\ntrack.effects = [loadPreset('Delay')];\nC4@1/4 1",
    )
    .unwrap();

    let dry = walker.render(&dry).unwrap();
    let wet = walker.render(&wet).unwrap();
    assert!(peak(&dry.samples, 2_000, 1.0, 1.25) < 1e-6);
    let echo = peak(&wet.samples, 2_000, 1.0, 1.25);
    assert!(echo > 0.1 && echo < 0.5, "echo peak {echo}");
}

#[test]
fn rendered_file_is_a_stereo_wav() {
    let dir = tempfile::tempdir().unwrap();
    let score = dir.path().join("song.sw");
    std::fs::write(&score, "loadPreset('Triangle');\nA4 1/4 /4\n").unwrap();

    let loaded = compile_file(&score).unwrap();
    let catalog = PresetCatalog::with_builtin();
    let walker = SongWalker::new(&catalog, config());
    let rendered = walker.render(&loaded.song).unwrap();
    let wav = dir.path().join("song.wav");
    rendered.write_wav(&wav).unwrap();

    let reader = hound::WavReader::open(&wav).unwrap();
    assert_eq!(reader.spec().channels, 2);
    assert_eq!(reader.spec().sample_rate, 2_000);
    assert_eq!(reader.len() as usize, rendered.samples.len());
}

/// A live output whose clock never moves.
struct StillOutput {
    suspended: Cell<bool>,
    voices: RefCell<Vec<Voice>>,
    halted: Cell<bool>,
}

impl StillOutput {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            suspended: Cell::new(true),
            voices: RefCell::new(Vec::new()),
            halted: Cell::new(false),
        })
    }
}

impl AudioClock for StillOutput {
    fn current_time(&self) -> f64 {
        0.0
    }

    fn is_suspended(&self) -> bool {
        self.suspended.get()
    }

    fn resume(&self) -> Result<(), AudioError> {
        self.suspended.set(false);
        Ok(())
    }
}

impl AudioDestination for StillOutput {
    fn label(&self) -> &str {
        "still"
    }

    fn sample_rate(&self) -> u32 {
        1_000
    }

    fn schedule(&self, voice: Voice) -> Result<(), AudioError> {
        self.voices.borrow_mut().push(voice);
        Ok(())
    }
}

impl LiveOutput for StillOutput {
    fn halt(&self) -> Result<(), AudioError> {
        self.halted.set(true);
        Ok(())
    }
}

#[test]
fn playback_schedules_every_note() {
    let catalog = PresetCatalog::with_builtin();
    let walker = SongWalker::new(
        &catalog,
        WalkerConfig {
            beats_per_minute: 600.0,
            lookahead_seconds: 10.0,
            ..config()
        },
    );
    let song = Compiler::compile("loadPreset('Oscillator');\nC4 1 D4 1 E4 1").unwrap();
    let output = StillOutput::new();
    let report = walker.play(&song, Rc::clone(&output)).unwrap();

    assert!(!report.stopped);
    assert!(!output.is_suspended());
    assert!(!output.halted.get());
    let starts: Vec<f64> = output.voices.borrow().iter().map(|v| v.start_time).collect();
    assert_eq!(starts.len(), 3);
    assert_approx_eq!(starts[1], 0.1);
    assert_approx_eq!(starts[2], 0.2);
}

#[test]
fn stopped_playback_halts_the_output() {
    let catalog = PresetCatalog::with_builtin();
    let walker = SongWalker::new(&catalog, config());
    walker.stop_handle().stop();
    let song = Compiler::compile("loadPreset('Oscillator');\nC4 1 D4 1").unwrap();
    let output = StillOutput::new();
    let report = walker.play(&song, Rc::clone(&output)).unwrap();
    assert!(report.stopped);
    assert!(output.halted.get());
    assert!(output.voices.borrow().is_empty());
}

#[test]
fn stop_ends_only_the_current_run() {
    let catalog = PresetCatalog::with_builtin();
    let walker = SongWalker::new(
        &catalog,
        WalkerConfig {
            beats_per_minute: 600.0,
            lookahead_seconds: 10.0,
            ..config()
        },
    );
    let song = Compiler::compile("loadPreset('Oscillator');\nC4 1 D4 1").unwrap();
    walker.stop_handle().stop();
    let first = walker.play(&song, StillOutput::new()).unwrap();
    assert!(first.stopped);
    assert!(!walker.stop_handle().is_stopped());

    let output = StillOutput::new();
    let second = walker.play(&song, Rc::clone(&output)).unwrap();
    assert!(!second.stopped);
    assert!(!output.halted.get());
    assert_eq!(output.voices.borrow().len(), 2);
}

#[test]
fn stop_from_another_thread_interrupts_a_wait() {
    let catalog = PresetCatalog::with_builtin();
    let walker = SongWalker::new(
        &catalog,
        WalkerConfig {
            lookahead_seconds: 0.0,
            ..config()
        },
    );
    let song = Compiler::compile("loadPreset('Oscillator');\nC4 10 D4 1").unwrap();
    let output = StillOutput::new();
    let stop = walker.stop_handle();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(150));
        stop.stop();
    });

    let started = Instant::now();
    let report = walker.play(&song, Rc::clone(&output)).unwrap();
    let elapsed = started.elapsed();
    stopper.join().unwrap();

    assert!(report.stopped);
    assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
    assert!(output.halted.get());
    assert_eq!(output.voices.borrow().len(), 1);
}
