//! Audio callback, run on the cpal audio thread.
//!
//! Drains commands from the ring buffer, mixes every scheduled voice that
//! overlaps the current block, applies volume and the master limiter, then
//! advances the shared frame clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ringbuf::traits::Consumer;
use ringbuf::HeapCons;

use super::command::AudioCommand;
use super::limiter::Limiter;
use super::VOICE_CHANNELS;

struct ScheduledVoice {
    start_frame: u64,
    samples: Vec<f32>,
}

impl ScheduledVoice {
    fn end_frame(&self) -> u64 {
        self.start_frame + (self.samples.len() / VOICE_CHANNELS) as u64
    }
}

/// State that lives on the audio thread. Accessed only from the cpal callback.
pub struct AudioCallback {
    consumer: HeapCons<AudioCommand>,
    voices: Vec<ScheduledVoice>,
    frames_played: Arc<AtomicU64>,
    volume: f32,
    limiter: Limiter,
    channels: u16,
}

impl AudioCallback {
    pub fn new(consumer: HeapCons<AudioCommand>, channels: u16, frames_played: Arc<AtomicU64>) -> Self {
        Self {
            consumer,
            voices: Vec::new(),
            frames_played,
            volume: 1.0,
            limiter: Limiter::default(),
            channels,
        }
    }

    /// Called by cpal for each output block. Fills `output` with samples.
    pub fn process(&mut self, output: &mut [f32]) {
        while let Some(cmd) = self.consumer.try_pop() {
            match cmd {
                AudioCommand::Schedule {
                    start_frame,
                    samples,
                } => self.voices.push(ScheduledVoice {
                    start_frame,
                    samples,
                }),
                AudioCommand::SetVolume(v) => {
                    self.volume = v.clamp(0.0, 1.0);
                }
                AudioCommand::Stop => {
                    self.voices.clear();
                }
            }
        }

        output.fill(0.0);
        let channels = self.channels.max(1) as usize;
        let block_frames = output.len() / channels;
        let block_start = self.frames_played.load(Ordering::Relaxed);
        let block_end = block_start + block_frames as u64;

        for voice in &self.voices {
            let from = voice.start_frame.max(block_start);
            let to = voice.end_frame().min(block_end);
            for frame in from..to {
                let src = (frame - voice.start_frame) as usize * VOICE_CHANNELS;
                let (left, right) = (voice.samples[src], voice.samples[src + 1]);
                let dst = (frame - block_start) as usize * channels;
                write_frame(&mut output[dst..dst + channels], left, right, self.volume);
            }
        }
        self.voices.retain(|v| v.end_frame() > block_end);

        self.limiter.process_block(output);
        self.frames_played.store(block_end, Ordering::Relaxed);
    }
}

/// Map a stereo frame onto the device's channel layout.
fn write_frame(out: &mut [f32], left: f32, right: f32, volume: f32) {
    match out.len() {
        1 => out[0] += (left + right) * 0.5 * volume,
        _ => {
            out[0] += left * volume;
            out[1] += right * volume;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::{
        traits::{Producer, Split},
        HeapRb,
    };

    fn setup(channels: u16) -> (ringbuf::HeapProd<AudioCommand>, AudioCallback, Arc<AtomicU64>) {
        let rb = HeapRb::<AudioCommand>::new(16);
        let (prod, cons) = rb.split();
        let clock = Arc::new(AtomicU64::new(0));
        let callback = AudioCallback::new(cons, channels, Arc::clone(&clock));
        (prod, callback, clock)
    }

    fn schedule(prod: &mut ringbuf::HeapProd<AudioCommand>, start_frame: u64, samples: Vec<f32>) {
        prod.try_push(AudioCommand::Schedule {
            start_frame,
            samples,
        })
        .unwrap();
    }

    #[test]
    fn test_silence_advances_clock() {
        let (_prod, mut callback, clock) = setup(2);
        let mut output = vec![999.0f32; 64];
        callback.process(&mut output);
        assert!(output.iter().all(|&s| s == 0.0));
        assert_eq!(clock.load(Ordering::Relaxed), 32);
    }

    #[test]
    fn test_voice_starts_at_its_frame() {
        let (mut prod, mut callback, _clock) = setup(2);
        schedule(&mut prod, 2, vec![0.1, 0.2, 0.3, 0.4]);

        let mut output = vec![0.0f32; 8];
        callback.process(&mut output);

        assert_eq!(&output[..4], &[0.0, 0.0, 0.0, 0.0]);
        assert!((output[4] - 0.1).abs() < 1e-6);
        assert!((output[7] - 0.4).abs() < 1e-6);
        assert_eq!(callback.voices.len(), 0);
    }

    #[test]
    fn test_voice_spans_blocks() {
        let (mut prod, mut callback, _clock) = setup(2);
        schedule(&mut prod, 1, vec![0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);

        let mut first = vec![0.0f32; 4];
        callback.process(&mut first);
        assert!((first[2] - 0.1).abs() < 1e-6);
        assert_eq!(callback.voices.len(), 1);

        let mut second = vec![0.0f32; 4];
        callback.process(&mut second);
        assert!((second[0] - 0.2).abs() < 1e-6);
        assert!((second[2] - 0.3).abs() < 1e-6);
        assert_eq!(callback.voices.len(), 0);
    }

    #[test]
    fn test_overlapping_voices_mix() {
        let (mut prod, mut callback, _clock) = setup(2);
        schedule(&mut prod, 0, vec![0.2, 0.2]);
        schedule(&mut prod, 0, vec![0.3, -0.3]);

        let mut output = vec![0.0f32; 2];
        callback.process(&mut output);
        assert!((output[0] - 0.5).abs() < 1e-6);
        assert!((output[1] + 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_volume_applies() {
        let (mut prod, mut callback, _clock) = setup(2);
        prod.try_push(AudioCommand::SetVolume(0.5)).unwrap();
        schedule(&mut prod, 0, vec![0.4, -0.4]);

        let mut output = vec![0.0f32; 2];
        callback.process(&mut output);
        assert!((output[0] - 0.2).abs() < 1e-6);
        assert!((output[1] + 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_stop_drops_voices() {
        let (mut prod, mut callback, _clock) = setup(2);
        schedule(&mut prod, 0, vec![0.5; 64]);
        prod.try_push(AudioCommand::Stop).unwrap();

        let mut output = vec![999.0f32; 32];
        callback.process(&mut output);
        assert!(output.iter().all(|&s| s == 0.0));
        assert_eq!(callback.voices.len(), 0);
    }

    #[test]
    fn test_mono_device_downmixes() {
        let (mut prod, mut callback, _clock) = setup(1);
        schedule(&mut prod, 0, vec![0.2, 0.4]);

        let mut output = vec![0.0f32; 2];
        callback.process(&mut output);
        assert!((output[0] - 0.3).abs() < 1e-6);
        assert_eq!(output[1], 0.0);
    }

    #[test]
    fn test_limiter_applied() {
        let (mut prod, mut callback, _clock) = setup(2);
        schedule(&mut prod, 0, vec![2.0, -2.0]);

        let mut output = vec![0.0f32; 2];
        callback.process(&mut output);
        assert!(output[0] <= 0.95 + 1e-6);
        assert!(output[1] >= -0.95 - 1e-6);
    }
}
