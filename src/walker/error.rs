//! Runtime errors raised while walking a song.

use thiserror::Error;

use crate::audio::AudioError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// A named resource could not be found.
    Resolution,
    Runtime,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WalkerError {
    #[error("preset not found: {0}")]
    PresetNotFound(String),

    #[error("no instrument loaded to handle '{0}'")]
    NoInstrument(String),

    #[error("{handler}: unrecognized command '{command}'")]
    UnknownCommand { handler: String, command: String },

    #[error("unknown track: {0}")]
    UnknownTrack(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("invalid value for {what}: {detail}")]
    InvalidValue { what: String, detail: String },

    #[error("{field} cannot move backwards ({from} -> {to})")]
    TimeReversal { field: &'static str, from: f64, to: f64 },

    #[error("track '{0}' ran too long without waiting")]
    RunawayTrack(String),

    #[error("too many live tracks (limit {0})")]
    TooManyTracks(usize),

    #[error("audio error: {0}")]
    Audio(String),
}

impl WalkerError {
    pub fn invalid(what: impl Into<String>, detail: impl Into<String>) -> Self {
        WalkerError::InvalidValue {
            what: what.into(),
            detail: detail.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            WalkerError::PresetNotFound(_) => ErrorClass::Resolution,
            _ => ErrorClass::Runtime,
        }
    }
}

impl From<AudioError> for WalkerError {
    fn from(err: AudioError) -> Self {
        WalkerError::Audio(err.to_string())
    }
}
