//! Audio outputs: the clock and destination seams the walker drives, an offline
//! render buffer, and the live cpal engine.
//!
//! Instruments render each note into a [`Voice`] (interleaved stereo samples
//! with an absolute start time) and hand it to the track's destination.
//! Effects wrap the destination. The live engine sends voices to the audio
//! thread through a lock-free ring buffer; the callback mixes them in at
//! their frame position.

pub mod callback;
pub mod command;
pub mod limiter;
pub mod offline;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::{
    traits::{Producer, Split},
    HeapRb,
};
use thiserror::Error;

pub use command::AudioCommand;
pub use limiter::Limiter;
pub use offline::OfflineOutput;

use callback::AudioCallback;

/// Ring buffer capacity (number of commands).
const RING_BUFFER_CAPACITY: usize = 4096;

/// Channels in a [`Voice`].
pub const VOICE_CHANNELS: usize = 2;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AudioError {
    #[error("no audio output device found")]
    NoOutputDevice,
    #[error("device config error: {0}")]
    DeviceConfig(String),
    #[error("stream build error: {0}")]
    StreamBuild(String),
    #[error("stream play error: {0}")]
    StreamPlay(String),
    /// The audio thread is not draining commands fast enough.
    #[error("audio command ring buffer is full")]
    BufferFull,
    #[error("wav error: {0}")]
    Wav(String),
}

impl From<hound::Error> for AudioError {
    fn from(err: hound::Error) -> Self {
        AudioError::Wav(err.to_string())
    }
}

/// A rendered note: interleaved stereo samples starting at `start_time`
/// seconds on the output's clock.
#[derive(Debug, Clone, PartialEq)]
pub struct Voice {
    pub start_time: f64,
    pub samples: Vec<f32>,
}

impl Voice {
    pub fn new(start_time: f64, samples: Vec<f32>) -> Self {
        Self {
            start_time,
            samples,
        }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / VOICE_CHANNELS
    }

    pub fn scaled(&self, gain: f32) -> Self {
        Self {
            start_time: self.start_time,
            samples: self.samples.iter().map(|s| s * gain).collect(),
        }
    }

    pub fn delayed(&self, seconds: f64) -> Self {
        Self {
            start_time: self.start_time + seconds,
            samples: self.samples.clone(),
        }
    }

    /// First frame of this voice at `sample_rate`, clamped at zero.
    pub fn start_frame(&self, sample_rate: u32) -> u64 {
        (self.start_time.max(0.0) * sample_rate as f64).round() as u64
    }
}

/// The time source of an output.
pub trait AudioClock {
    /// Seconds of audio the output has played.
    fn current_time(&self) -> f64;

    fn is_suspended(&self) -> bool;

    fn resume(&self) -> Result<(), AudioError>;
}

/// Something voices can be scheduled on.
pub trait AudioDestination {
    fn label(&self) -> &str;

    fn sample_rate(&self) -> u32;

    fn schedule(&self, voice: Voice) -> Result<(), AudioError>;
}

pub type DestinationRef = Rc<dyn AudioDestination>;

/// A live output the playback strategy can drive and silence.
pub trait LiveOutput: AudioClock + AudioDestination {
    /// Drop every voice already scheduled.
    fn halt(&self) -> Result<(), AudioError>;
}

/// The live audio engine. Owns the cpal stream and the ring buffer producer.
///
/// The stream is built paused; the first [`AudioClock::resume`] starts it.
/// The clock is the number of frames the callback has written.
pub struct AudioEngine {
    stream: cpal::Stream,
    producer: RefCell<ringbuf::HeapProd<AudioCommand>>,
    frames_played: Arc<AtomicU64>,
    suspended: Cell<bool>,
    sample_rate: u32,
}

impl AudioEngine {
    /// Create the engine on the default output device, suspended.
    pub fn new() -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioError::NoOutputDevice)?;

        let config = device
            .default_output_config()
            .map_err(|e| AudioError::DeviceConfig(e.to_string()))?;

        Self::build_with_device(&device, config.sample_rate().0, config.channels())
    }

    /// Create the engine with a specific sample rate and channel count.
    pub fn with_config(sample_rate: u32, channels: u16) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioError::NoOutputDevice)?;

        Self::build_with_device(&device, sample_rate, channels)
    }

    fn build_with_device(
        device: &cpal::Device,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self, AudioError> {
        let rb = HeapRb::<AudioCommand>::new(RING_BUFFER_CAPACITY);
        let (producer, consumer) = rb.split();

        let frames_played = Arc::new(AtomicU64::new(0));
        let mut audio_callback = AudioCallback::new(consumer, channels, Arc::clone(&frames_played));

        let stream_config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let err_fn = |err: cpal::StreamError| {
            log::error!("audio stream error: {err}");
        };

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    audio_callback.process(data);
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamBuild(e.to_string()))?;

        // Some hosts start streams on build.
        stream
            .pause()
            .map_err(|e| AudioError::StreamPlay(e.to_string()))?;

        log::info!("audio engine ready: {sample_rate} Hz, {channels} channels (suspended)");

        Ok(Self {
            stream,
            producer: RefCell::new(producer),
            frames_played,
            suspended: Cell::new(true),
            sample_rate,
        })
    }

    fn send(&self, command: AudioCommand) -> Result<(), AudioError> {
        self.producer
            .borrow_mut()
            .try_push(command)
            .map_err(|_| AudioError::BufferFull)
    }

    /// Set master volume (clamped to 0.0..=1.0 on the audio thread).
    pub fn set_volume(&self, volume: f32) -> Result<(), AudioError> {
        self.send(AudioCommand::SetVolume(volume))
    }
}

impl AudioClock for AudioEngine {
    fn current_time(&self) -> f64 {
        self.frames_played.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }

    fn is_suspended(&self) -> bool {
        self.suspended.get()
    }

    fn resume(&self) -> Result<(), AudioError> {
        self.stream
            .play()
            .map_err(|e| AudioError::StreamPlay(e.to_string()))?;
        self.suspended.set(false);
        Ok(())
    }
}

impl AudioDestination for AudioEngine {
    fn label(&self) -> &str {
        "output"
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn schedule(&self, voice: Voice) -> Result<(), AudioError> {
        let start_frame = voice.start_frame(self.sample_rate);
        self.send(AudioCommand::Schedule {
            start_frame,
            samples: voice.samples,
        })
    }
}

impl LiveOutput for AudioEngine {
    fn halt(&self) -> Result<(), AudioError> {
        self.send(AudioCommand::Stop)
    }
}
