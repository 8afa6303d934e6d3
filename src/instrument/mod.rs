//! Built-in instruments and effects, and the bank that exposes them as
//! presets.

pub mod effects;
pub mod envelope;
pub mod oscillator;

pub use effects::{DelayEffect, DelayLoader, GainEffect, GainLoader};
pub use envelope::Envelope;
pub use oscillator::{OscillatorInstrument, OscillatorLoader, Waveform};

use std::rc::Rc;

use crate::preset::{InstrumentLoader, ListBank, Preset, PresetConfig};
use crate::walker::error::WalkerError;
use crate::walker::state::Value;

/// Numeric config entry, or `default` when absent.
pub fn config_number(config: &PresetConfig, key: &str, default: f64) -> Result<f64, WalkerError> {
    match config.get(key) {
        None | Some(Value::Undefined) => Ok(default),
        Some(value) => value.as_number(key),
    }
}

/// String config entry.
pub fn config_text(config: &PresetConfig, key: &str) -> Result<Option<String>, WalkerError> {
    match config.get(key) {
        None | Some(Value::Undefined) => Ok(None),
        Some(Value::Str(s)) => Ok(Some(s.clone())),
        Some(other) => Err(WalkerError::invalid(
            key,
            format!("expected a string, got {}", other.type_name()),
        )),
    }
}

/// The `builtin` bank: the oscillator under its own name and one preset per
/// waveform, plus the gain and delay effects.
pub fn builtin_bank() -> ListBank {
    let oscillator: Rc<dyn InstrumentLoader> = Rc::new(OscillatorLoader);
    ListBank::new(
        "builtin",
        vec![
            Preset::new("Oscillator", Rc::clone(&oscillator)),
            Preset::new("Sine", Rc::clone(&oscillator)).with_config("type", "sine"),
            Preset::new("Sawtooth", Rc::clone(&oscillator)).with_config("type", "sawtooth"),
            Preset::new("Triangle", oscillator).with_config("type", "triangle"),
            Preset::effect("Gain", Rc::new(GainLoader)),
            Preset::effect("Delay", Rc::new(DelayLoader)),
        ],
    )
}
