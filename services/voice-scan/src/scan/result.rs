//! Scan Result - the single outcome of one frequency in one cycle

use chrono::{DateTime, Utc};
use num_complex::Complex32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanOutcome {
    VoiceDetected,
    NoVoice,
    IncompleteCapture,
    Error,
}

impl ScanOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VoiceDetected => "voice_detected",
            Self::NoVoice => "no_voice",
            Self::IncompleteCapture => "incomplete_capture",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ScanOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the sink needs to persist one frequency's outcome.
///
/// PCM and IQ are only carried for detections.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub frequency_hz: f64,
    pub timestamp: DateTime<Utc>,
    pub outcome: ScanOutcome,
    pub pcm: Option<Vec<i16>>,
    pub iq: Option<Vec<Complex32>>,
    pub error: Option<String>,
}

impl ScanResult {
    fn new(frequency_hz: f64, outcome: ScanOutcome) -> Self {
        Self {
            frequency_hz,
            timestamp: Utc::now(),
            outcome,
            pcm: None,
            iq: None,
            error: None,
        }
    }

    pub fn voice(frequency_hz: f64, pcm: Vec<i16>, iq: Vec<Complex32>) -> Self {
        Self {
            pcm: Some(pcm),
            iq: Some(iq),
            ..Self::new(frequency_hz, ScanOutcome::VoiceDetected)
        }
    }

    pub fn no_voice(frequency_hz: f64) -> Self {
        Self::new(frequency_hz, ScanOutcome::NoVoice)
    }

    pub fn incomplete(frequency_hz: f64, received: usize, requested: usize) -> Self {
        Self {
            error: Some(format!("captured {}/{} samples", received, requested)),
            ..Self::new(frequency_hz, ScanOutcome::IncompleteCapture)
        }
    }

    pub fn error(frequency_hz: f64, detail: impl Into<String>) -> Self {
        Self {
            error: Some(detail.into()),
            ..Self::new(frequency_hz, ScanOutcome::Error)
        }
    }

    pub fn frequency_mhz(&self) -> f64 {
        self.frequency_hz / 1e6
    }
}
