//! Oscillator instrument: one waveform voice per note command.
//!
//! Besides note names the instrument understands three configuration
//! commands that read the current track state: `attack` and `release` take
//! the track's note duration, `detune` takes its velocity (in cents).

use std::cell::Cell;
use std::f64::consts::PI;
use std::rc::Rc;

use crate::audio::{Voice, VOICE_CHANNELS};
use crate::dsl::note::parse_note;
use crate::preset::{Handler, HandlerFlow, HandlerRef, InstrumentLoader, PresetConfig, SongContext};
use crate::walker::error::WalkerError;
use crate::walker::state::TrackState;

use super::envelope::Envelope;
use super::{config_number, config_text};

/// Note length in beats when the track sets none.
const DEFAULT_NOTE_BEATS: f64 = 1.0;
const DEFAULT_VELOCITY: f64 = 128.0;
const DEFAULT_VELOCITY_DIVISOR: f64 = 128.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl Waveform {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sine" => Some(Waveform::Sine),
            "square" => Some(Waveform::Square),
            "sawtooth" => Some(Waveform::Sawtooth),
            "triangle" => Some(Waveform::Triangle),
            _ => None,
        }
    }
}

/// One sample of `waveform` at `phase` in `[0, 1)`, in `[-1, 1]`.
pub fn oscillator(waveform: Waveform, phase: f64) -> f64 {
    match waveform {
        Waveform::Sine => (phase * 2.0 * PI).sin(),
        Waveform::Sawtooth => 2.0 * phase - 1.0,
        Waveform::Square => {
            if phase < 0.5 {
                1.0
            } else {
                -1.0
            }
        }
        Waveform::Triangle => {
            if phase < 0.25 {
                4.0 * phase
            } else if phase < 0.75 {
                2.0 - 4.0 * phase
            } else {
                4.0 * phase - 4.0
            }
        }
    }
}

/// Left/right gains for a pan position in `[-1, 1]`. Centre leaves both
/// channels untouched.
pub fn pan_gains(pan: f64) -> (f64, f64) {
    if pan == 0.0 {
        return (1.0, 1.0);
    }
    let x = (pan.clamp(-1.0, 1.0) + 1.0) / 2.0;
    ((x * PI / 2.0).cos(), (x * PI / 2.0).sin())
}

pub struct OscillatorInstrument {
    waveform: Waveform,
    mixer: f64,
    pan: f64,
    /// Notes outside this frequency range are skipped.
    key_range: (f64, f64),
    sample_rate: u32,
    attack: Cell<f64>,
    release: Cell<f64>,
    detune: Cell<f64>,
}

impl OscillatorInstrument {
    pub fn from_config(song: &SongContext, config: &PresetConfig) -> Result<Self, WalkerError> {
        let waveform = match config_text(config, "type")? {
            None => Waveform::Square,
            Some(name) => Waveform::from_name(&name).ok_or_else(|| {
                WalkerError::invalid("type", format!("unknown oscillator type '{name}'"))
            })?,
        };
        Ok(Self {
            waveform,
            mixer: config_number(config, "mixer", 1.0)?,
            pan: config_number(config, "pan", 0.0)?,
            key_range: (
                key_frequency(config, "keyRangeLow", 0.0)?,
                key_frequency(config, "keyRangeHigh", f64::INFINITY)?,
            ),
            sample_rate: song.sample_rate,
            attack: Cell::new(config_number(config, "attack", 0.0)?),
            release: Cell::new(config_number(config, "release", 0.0)?),
            detune: Cell::new(config_number(config, "detune", 0.0)?),
        })
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    pub fn envelope(&self) -> Envelope {
        Envelope::new(self.attack.get(), self.release.get())
    }

    /// Stereo samples of one note.
    pub fn render(&self, frequency: f64, seconds: f64, amplitude: f64, pan: f64) -> Vec<f32> {
        let envelope = self.envelope();
        let sample_rate = self.sample_rate as f64;
        let frames = (envelope.total_duration(seconds) * sample_rate).ceil() as usize;
        let frequency = frequency * 2f64.powf(self.detune.get() / 1200.0);
        let (left, right) = pan_gains(pan);

        let mut samples = Vec::with_capacity(frames * VOICE_CHANNELS);
        let mut phase = 0.0_f64;
        for i in 0..frames {
            let t = i as f64 / sample_rate;
            let value = oscillator(self.waveform, phase) * envelope.amplitude(t, seconds) * amplitude;
            samples.push((value * left) as f32);
            samples.push((value * right) as f32);
            phase = (phase + frequency / sample_rate).fract();
        }
        samples
    }

    fn play(&self, track: &TrackState, frequency: f64) -> Result<(), WalkerError> {
        let Some(destination) = &track.destination else {
            log::trace!("no destination for oscillator note at {:.3}s", track.current_time);
            return Ok(());
        };
        let beats = track.duration.unwrap_or(DEFAULT_NOTE_BEATS);
        let seconds = beats * track.seconds_per_beat();
        let amplitude = self.mixer * track.velocity.unwrap_or(DEFAULT_VELOCITY)
            / track.velocity_divisor.unwrap_or(DEFAULT_VELOCITY_DIVISOR);
        let pan = track.pan.unwrap_or(self.pan);
        let samples = self.render(frequency, seconds, amplitude, pan);
        destination.schedule(Voice::new(track.current_time, samples))?;
        Ok(())
    }
}

impl Handler for OscillatorInstrument {
    fn name(&self) -> &str {
        "oscillator"
    }

    fn handle(&self, track: &mut TrackState, command: &str) -> Result<HandlerFlow, WalkerError> {
        let duration_seconds = || track.duration.unwrap_or(0.0) * track.seconds_per_beat();
        match command {
            "attack" => self.attack.set(duration_seconds()),
            "release" => self.release.set(duration_seconds()),
            "detune" => self.detune.set(track.velocity.unwrap_or(0.0)),
            _ => {
                let note = parse_note(command).ok_or_else(|| WalkerError::UnknownCommand {
                    handler: self.name().to_string(),
                    command: command.to_string(),
                })?;
                let (low, high) = self.key_range;
                if note.frequency < low || note.frequency > high {
                    return Ok(HandlerFlow::Continue);
                }
                self.play(track, note.frequency)?;
            }
        }
        Ok(HandlerFlow::Continue)
    }
}

/// Frequency of a note-name config entry such as `keyRangeLow: 'C3'`.
fn key_frequency(config: &PresetConfig, key: &str, default: f64) -> Result<f64, WalkerError> {
    match config_text(config, key)? {
        None => Ok(default),
        Some(name) => parse_note(&name)
            .map(|note| note.frequency)
            .ok_or_else(|| WalkerError::invalid(key, format!("'{name}' is not a note"))),
    }
}

pub struct OscillatorLoader;

impl InstrumentLoader for OscillatorLoader {
    fn load(&self, song: &SongContext, config: &PresetConfig) -> Result<HandlerRef, WalkerError> {
        Ok(Rc::new(OscillatorInstrument::from_config(song, config)?))
    }
}
