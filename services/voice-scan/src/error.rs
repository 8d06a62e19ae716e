//! Scan pipeline error kinds

use std::time::Duration;

use thiserror::Error;

use crate::driver::SdrError;

/// Failures of the per-frequency scan pipeline.
///
/// Only session-scope kinds (see [`ScanError::is_session_fatal`]) end a
/// batch early; everything else becomes an error result for one frequency.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("device init failed: {0}")]
    DeviceInit(#[source] SdrError),

    #[error("device lost: {0}")]
    DeviceLost(String),

    #[error("retune to {:.3} MHz failed: {reason}", .freq_hz / 1e6)]
    Tune { freq_hz: f64, reason: String },

    #[error("capture timed out after {timeout:?} ({received}/{requested} samples)")]
    CaptureTimeout {
        timeout: Duration,
        received: usize,
        requested: usize,
    },

    #[error("stream read failed with status {code}")]
    StreamRead { code: i32 },

    #[error("unsupported demodulation '{0}'")]
    UnsupportedDemodulation(String),
}

impl ScanError {
    /// Whether the failure invalidates the whole Device Session
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::DeviceInit(_) | Self::DeviceLost(_))
    }
}
