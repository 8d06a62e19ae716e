//! Voice activity detection on demodulated PCM
//!
//! The scanner only needs a yes/no answer per capture, so detectors sit
//! behind [`VoiceDetector`]. [`EnergyVad`] is the built-in implementation:
//! it looks for runs of frames that are loud relative to the clip's own
//! noise floor and whose zero-crossing rate fits voiced speech.

use thiserror::Error;

/// Rate the energy detector analyses at
pub const VAD_SAMPLE_RATE: u32 = 16_000;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("invalid sample rate {0}")]
    InvalidSampleRate(u32),
}

/// Decides whether a PCM clip contains voice.
///
/// Callers treat an error as "no voice".
pub trait VoiceDetector: Send + Sync {
    fn detect(&self, pcm: &[i16], sample_rate: u32) -> Result<bool, DetectError>;
}

#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Shorter clips are never voice
    pub min_samples: usize,
    pub frame_ms: u32,
    /// Absolute RMS floor, full scale = 1.0
    pub rms_floor: f64,
    /// Speech frames must exceed the noise floor by this factor
    pub noise_ratio: f64,
    /// Percentile of frame RMS taken as the noise floor
    pub noise_percentile: f64,
    pub min_zcr: f64,
    pub max_zcr: f64,
    pub min_speech_frames: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            min_samples: 16_000,
            frame_ms: 30,
            rms_floor: 0.01,
            noise_ratio: 2.5,
            noise_percentile: 0.2,
            min_zcr: 0.005,
            max_zcr: 0.4,
            min_speech_frames: 6,
        }
    }
}

/// Energy + zero-crossing voice detector
#[derive(Debug, Clone, Default)]
pub struct EnergyVad {
    config: VadConfig,
}

#[derive(Debug, Clone, Copy)]
struct FrameFeatures {
    rms: f64,
    zcr: f64,
}

impl EnergyVad {
    pub fn new(config: VadConfig) -> Self {
        Self { config }
    }

    fn is_speech(&self, frame: &FrameFeatures, threshold: f64) -> bool {
        frame.rms > threshold
            && frame.zcr >= self.config.min_zcr
            && frame.zcr <= self.config.max_zcr
    }
}

impl VoiceDetector for EnergyVad {
    fn detect(&self, pcm: &[i16], sample_rate: u32) -> Result<bool, DetectError> {
        if sample_rate == 0 {
            return Err(DetectError::InvalidSampleRate(sample_rate));
        }
        if pcm.len() < self.config.min_samples {
            return Ok(false);
        }

        let samples: Vec<f64> = pcm.iter().map(|s| *s as f64 / 32768.0).collect();
        let audio = resample_linear(&samples, sample_rate, VAD_SAMPLE_RATE);

        let frame_len = (VAD_SAMPLE_RATE * self.config.frame_ms / 1000) as usize;
        let frames: Vec<FrameFeatures> = audio.chunks_exact(frame_len.max(2)).map(features).collect();
        if frames.is_empty() {
            return Ok(false);
        }

        let mut levels: Vec<f64> = frames.iter().map(|f| f.rms).collect();
        levels.sort_by(f64::total_cmp);
        let idx = ((levels.len() - 1) as f64 * self.config.noise_percentile) as usize;
        let threshold = self.config.rms_floor.max(levels[idx] * self.config.noise_ratio);

        let mut run = 0usize;
        for frame in &frames {
            if self.is_speech(frame, threshold) {
                run += 1;
                if run >= self.config.min_speech_frames {
                    return Ok(true);
                }
            } else {
                run = 0;
            }
        }
        Ok(false)
    }
}

fn features(frame: &[f64]) -> FrameFeatures {
    let mean = frame.iter().sum::<f64>() / frame.len() as f64;
    let energy = frame.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / frame.len() as f64;

    let crossings = frame
        .windows(2)
        .filter(|w| ((w[0] - mean) >= 0.0) != ((w[1] - mean) >= 0.0))
        .count();

    FrameFeatures {
        rms: energy.sqrt(),
        zcr: crossings as f64 / (frame.len() - 1) as f64,
    }
}

/// Linear-interpolation resampler
fn resample_linear(input: &[f64], from: u32, to: u32) -> Vec<f64> {
    if from == to || input.is_empty() {
        return input.to_vec();
    }
    let step = from as f64 / to as f64;
    let out_len = (input.len() as f64 / step).floor() as usize;
    let last = input.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = (pos as usize).min(last);
            let frac = pos - idx as f64;
            let next = input[(idx + 1).min(last)];
            input[idx] + (next - input[idx]) * frac
        })
        .collect()
}
