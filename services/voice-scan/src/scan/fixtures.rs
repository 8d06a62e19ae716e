//! Shared test scaffolding for the scan pipeline

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver};

use super::{stop_channel, BatchContext, ScanResult, ScanStats, StopHandle};
use crate::bands::BandConfig;
use crate::device::SessionSettings;
use crate::driver::DeviceFactory;
use crate::sdr::detect::DetectError;
use crate::sdr::{CaptureConfig, Modulation, VoiceDetector};

/// Scripted detector answers
#[derive(Debug, Clone, Copy)]
pub enum Detector {
    Always,
    Never,
    Failing,
    Panicking,
}

impl VoiceDetector for Detector {
    fn detect(&self, _pcm: &[i16], sample_rate: u32) -> Result<bool, DetectError> {
        match self {
            Self::Always => Ok(true),
            Self::Never => Ok(false),
            Self::Failing => Err(DetectError::InvalidSampleRate(sample_rate)),
            Self::Panicking => panic!("detector blew up"),
        }
    }
}

pub fn hf_band() -> Arc<BandConfig> {
    Arc::new(BandConfig {
        name: "hf".into(),
        frequencies: vec![3.7e6, 7.1e6, 14.2e6, 21.3e6],
        sample_rate: 48_000,
        modulation: Modulation::Am,
        output_dir: "recordings_hf".into(),
    })
}

pub fn session_settings(driver: Option<&str>) -> SessionSettings {
    SessionSettings {
        driver: driver.map(str::to_string),
        gain_db: 40.0,
        sample_rate: 48_000.0,
        settle: Duration::ZERO,
        open_attempts: 1,
        open_retry: Duration::ZERO,
    }
}

pub fn test_context(
    factory: Arc<dyn DeviceFactory>,
    band: Arc<BandConfig>,
    detector: Detector,
) -> (BatchContext, Receiver<ScanResult>, StopHandle) {
    let (tx, rx) = unbounded();
    let (stop, signal) = stop_channel();
    let ctx = BatchContext {
        factory,
        detector: Arc::new(detector),
        session: SessionSettings {
            sample_rate: band.sample_rate as f64,
            ..session_settings(None)
        },
        band,
        capture: CaptureConfig {
            duration_secs: 2.0,
            timeout: Duration::from_millis(200),
            read_timeout: Duration::from_millis(20),
            ..CaptureConfig::default()
        },
        results: tx,
        stats: Arc::new(ScanStats::new()),
        stop: signal,
    };
    (ctx, rx, stop)
}
