//! Effects: handlers that reroute a command's destination before the
//! instrument plays it.

use std::rc::Rc;

use crate::audio::{AudioDestination, AudioError, DestinationRef, Voice};
use crate::preset::{Handler, HandlerFlow, HandlerRef, InstrumentLoader, PresetConfig, SongContext};
use crate::walker::error::WalkerError;
use crate::walker::state::TrackState;

use super::config_number;

/// Echoes quieter than this are not scheduled.
const ECHO_FLOOR: f64 = 0.001;
const MAX_ECHOES: usize = 32;

/// Scales every voice before passing it on.
pub struct GainStage {
    inner: DestinationRef,
    gain: f32,
}

impl AudioDestination for GainStage {
    fn label(&self) -> &str {
        "gain"
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn schedule(&self, voice: Voice) -> Result<(), AudioError> {
        self.inner.schedule(voice.scaled(self.gain))
    }
}

/// Feedback delay: a dry copy plus echoes every `delay` seconds, each
/// `feedback` times quieter than the last.
pub struct DelayLine {
    inner: DestinationRef,
    delay: f64,
    feedback: f64,
    wet: f64,
    dry: f64,
}

impl DelayLine {
    /// `(offset seconds, gain)` of each echo.
    pub fn echoes(&self) -> Vec<(f64, f64)> {
        let mut echoes = Vec::new();
        if self.delay <= 0.0 {
            return echoes;
        }
        let mut gain = self.wet * self.feedback;
        for i in 1..=MAX_ECHOES {
            if gain.abs() < ECHO_FLOOR {
                break;
            }
            echoes.push((i as f64 * self.delay, gain));
            gain *= self.feedback;
        }
        echoes
    }
}

impl AudioDestination for DelayLine {
    fn label(&self) -> &str {
        "delay"
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn schedule(&self, voice: Voice) -> Result<(), AudioError> {
        for (offset, gain) in self.echoes() {
            self.inner
                .schedule(voice.delayed(offset).scaled(gain as f32))?;
        }
        if self.dry != 0.0 {
            self.inner.schedule(voice.scaled(self.dry as f32))?;
        }
        Ok(())
    }
}

pub struct GainEffect {
    gain: f64,
}

impl Handler for GainEffect {
    fn name(&self) -> &str {
        "gain"
    }

    fn handle(&self, track: &mut TrackState, _command: &str) -> Result<HandlerFlow, WalkerError> {
        if let Some(inner) = track.destination.take() {
            track.destination = Some(Rc::new(GainStage {
                inner,
                gain: self.gain as f32,
            }));
        }
        Ok(HandlerFlow::Continue)
    }
}

pub struct DelayEffect {
    /// Delay time in beats.
    duration: f64,
    feedback: f64,
    wet: f64,
    dry: f64,
}

impl Handler for DelayEffect {
    fn name(&self) -> &str {
        "delay"
    }

    fn handle(&self, track: &mut TrackState, _command: &str) -> Result<HandlerFlow, WalkerError> {
        if let Some(inner) = track.destination.take() {
            track.destination = Some(Rc::new(DelayLine {
                inner,
                delay: self.duration * track.seconds_per_beat(),
                feedback: self.feedback,
                wet: self.wet,
                dry: self.dry,
            }));
        }
        Ok(HandlerFlow::Continue)
    }
}

pub struct GainLoader;

impl InstrumentLoader for GainLoader {
    fn load(&self, _song: &SongContext, config: &PresetConfig) -> Result<HandlerRef, WalkerError> {
        Ok(Rc::new(GainEffect {
            gain: config_number(config, "gain", 1.0)?,
        }))
    }
}

pub struct DelayLoader;

impl InstrumentLoader for DelayLoader {
    fn load(&self, _song: &SongContext, config: &PresetConfig) -> Result<HandlerRef, WalkerError> {
        let feedback = config_number(config, "feedback", 0.5)?;
        if !(0.0..1.0).contains(&feedback) {
            return Err(WalkerError::invalid("feedback", format!("{feedback} is outside [0, 1)")));
        }
        Ok(Rc::new(DelayEffect {
            duration: config_number(config, "duration", 1.0)?,
            feedback,
            wet: config_number(config, "wet", 0.5)?,
            dry: config_number(config, "dry", 1.0)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::OfflineOutput;
    use crate::walker::state::Value;
    use assert_approx_eq::assert_approx_eq;

    fn song() -> SongContext {
        SongContext { sample_rate: 100 }
    }

    fn routed(effect: &HandlerRef, out: &Rc<OfflineOutput>) -> TrackState {
        let mut track = TrackState::new(60.0);
        track.destination = Some(out.clone());
        effect.handle(&mut track, "C4").unwrap();
        track
    }

    #[test]
    fn gain_scales_voices() {
        let mut config = PresetConfig::new();
        config.insert("gain".into(), Value::Number(0.5));
        let effect = GainLoader.load(&song(), &config).unwrap();
        let out = Rc::new(OfflineOutput::new(100, 1.0));
        let track = routed(&effect, &out);
        let destination = track.destination.unwrap();
        assert_eq!(destination.label(), "gain");
        destination.schedule(Voice::new(0.0, vec![0.4, 0.4])).unwrap();
        let samples = out.take_samples();
        assert!((samples[0] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn delay_echo_schedule() {
        let effect = DelayLoader.load(&song(), &PresetConfig::new()).unwrap();
        let out = Rc::new(OfflineOutput::new(100, 5.0));
        let track = routed(&effect, &out);
        let destination = track.destination.unwrap();
        destination.schedule(Voice::new(0.0, vec![0.5, 0.5])).unwrap();
        let samples = out.take_samples();
        // Dry at 0s, echoes at 1s, 2s, ... (one beat at 60 BPM).
        assert!((samples[0] - 0.5).abs() < 1e-6);
        assert!((samples[200] - 0.125).abs() < 1e-6);
        assert!((samples[400] - 0.0625).abs() < 1e-6);
        assert_eq!(samples[100], 0.0);
    }

    #[test]
    fn echoes_stop_below_floor() {
        let line = DelayLine {
            inner: Rc::new(OfflineOutput::new(100, 1.0)),
            delay: 0.25,
            feedback: 0.5,
            wet: 1.0,
            dry: 1.0,
        };
        let echoes = line.echoes();
        assert_eq!(echoes.len(), 9);
        assert_approx_eq!(echoes[0].0, 0.25);
        assert_approx_eq!(echoes[0].1, 0.5);
        assert!(echoes.last().unwrap().1 >= ECHO_FLOOR);
    }

    #[test]
    fn delay_time_follows_tempo() {
        let effect = DelayLoader.load(&song(), &PresetConfig::new()).unwrap();
        let out = Rc::new(OfflineOutput::new(100, 5.0));
        let mut track = TrackState::new(120.0);
        track.destination = Some(out.clone());
        effect.handle(&mut track, "C4").unwrap();
        track
            .destination
            .unwrap()
            .schedule(Voice::new(0.0, vec![0.5, 0.5]))
            .unwrap();
        let samples = out.take_samples();
        assert!((samples[100] - 0.125).abs() < 1e-6);
    }

    #[test]
    fn rejects_runaway_feedback() {
        let mut config = PresetConfig::new();
        config.insert("feedback".into(), Value::Number(1.0));
        assert!(DelayLoader.load(&song(), &config).is_err());
    }

    #[test]
    fn without_destination_nothing_changes() {
        let effect = DelayLoader.load(&song(), &PresetConfig::new()).unwrap();
        let mut track = TrackState::new(60.0);
        assert_eq!(effect.handle(&mut track, "C4").unwrap(), HandlerFlow::Continue);
        assert!(track.destination.is_none());
    }
}
