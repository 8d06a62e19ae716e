//! Scan statistics

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::ScanOutcome;

/// Per-outcome result counters, shared by every worker
#[derive(Debug, Default)]
pub struct ScanStats {
    voice_detected: AtomicU64,
    no_voice: AtomicU64,
    incomplete: AtomicU64,
    errors: AtomicU64,
}

impl ScanStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: ScanOutcome) {
        let counter = match outcome {
            ScanOutcome::VoiceDetected => &self.voice_detected,
            ScanOutcome::NoVoice => &self.no_voice,
            ScanOutcome::IncompleteCapture => &self.incomplete,
            ScanOutcome::Error => &self.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            voice_detected: self.voice_detected.load(Ordering::Relaxed),
            no_voice: self.no_voice.load(Ordering::Relaxed),
            incomplete: self.incomplete.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ScanStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub voice_detected: u64,
    pub no_voice: u64,
    pub incomplete: u64,
    pub errors: u64,
}

impl StatsSnapshot {
    pub fn total(&self) -> u64 {
        self.voice_detected + self.no_voice + self.incomplete + self.errors
    }

    /// Counts accumulated since `earlier`
    pub fn since(&self, earlier: &StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            voice_detected: self.voice_detected.saturating_sub(earlier.voice_detected),
            no_voice: self.no_voice.saturating_sub(earlier.no_voice),
            incomplete: self.incomplete.saturating_sub(earlier.incomplete),
            errors: self.errors.saturating_sub(earlier.errors),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} voice, {} no voice, {} incomplete, {} errors",
            self.voice_detected, self.no_voice, self.incomplete, self.errors
        )
    }
}
