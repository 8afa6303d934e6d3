//! Fixed-length offline output. Voices are mixed straight into a buffer.

use std::cell::RefCell;
use std::path::Path;

use super::limiter::Limiter;
use super::{AudioClock, AudioDestination, AudioError, Voice, VOICE_CHANNELS};

pub struct OfflineOutput {
    sample_rate: u32,
    buffer: RefCell<Vec<f32>>,
}

impl OfflineOutput {
    /// A silent stereo buffer long enough for `seconds` of audio.
    pub fn new(sample_rate: u32, seconds: f64) -> Self {
        let frames = (seconds.max(0.0) * sample_rate as f64).ceil() as usize;
        Self {
            sample_rate,
            buffer: RefCell::new(vec![0.0; frames * VOICE_CHANNELS]),
        }
    }

    pub fn frames(&self) -> usize {
        self.buffer.borrow().len() / VOICE_CHANNELS
    }

    /// The rendered, limited, interleaved stereo samples.
    pub fn into_samples(self) -> Vec<f32> {
        self.take_samples()
    }

    /// Like [`OfflineOutput::into_samples`] for a shared output. Leaves the
    /// buffer empty.
    pub fn take_samples(&self) -> Vec<f32> {
        let mut samples = std::mem::take(&mut *self.buffer.borrow_mut());
        Limiter::default().process_block(&mut samples);
        samples
    }
}

impl AudioClock for OfflineOutput {
    fn current_time(&self) -> f64 {
        0.0
    }

    fn is_suspended(&self) -> bool {
        false
    }

    fn resume(&self) -> Result<(), AudioError> {
        Ok(())
    }
}

impl AudioDestination for OfflineOutput {
    fn label(&self) -> &str {
        "offline"
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Mix the voice in. Samples past the end of the buffer are cut.
    fn schedule(&self, voice: Voice) -> Result<(), AudioError> {
        let mut buffer = self.buffer.borrow_mut();
        let offset = voice.start_frame(self.sample_rate) as usize * VOICE_CHANNELS;
        if offset >= buffer.len() {
            return Ok(());
        }
        for (dst, src) in buffer[offset..].iter_mut().zip(&voice.samples) {
            *dst += *src;
        }
        Ok(())
    }
}

/// Write interleaved stereo samples as a 32-bit float WAV file.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), AudioError> {
    let spec = hound::WavSpec {
        channels: VOICE_CHANNELS as u16,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}
