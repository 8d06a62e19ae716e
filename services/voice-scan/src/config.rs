//! Configuration loaded from environment variables

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::sdr::VadConfig;

/// Service tuning that is not on the command line
#[derive(Debug, Clone)]
pub struct Config {
    /// Audio captured per frequency
    pub capture_duration_secs: f64,

    /// Wall-clock bound on a single capture
    pub capture_timeout: Duration,

    /// Fraction of requested samples for a capture to count as complete
    pub capture_watermark: f64,

    /// Wait after each retune
    pub settle: Duration,

    pub cycle_timeout: Duration,
    pub cycle_pause: Duration,

    /// How long shutdown waits for device sessions to close
    pub shutdown_grace: Duration,

    /// Device acquisition attempts per batch
    pub open_attempts: u32,
    pub open_retry: Duration,

    /// rtl_tcp endpoints tried in order when no endpoint is named
    pub rtl_tcp_addrs: Vec<String>,
    pub rtl_tcp_connect_timeout: Duration,

    /// Root under which band output directories are created
    pub output_root: PathBuf,

    pub health_interval: Duration,
    pub min_disk_mb: u64,

    /// Voice detector tuning
    pub vad: VadConfig,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_addrs(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn vad_from_env() -> VadConfig {
    let defaults = VadConfig::default();
    VadConfig {
        rms_floor: env_or("VAD_RMS_FLOOR", defaults.rms_floor).max(0.0),
        noise_ratio: env_or("VAD_NOISE_RATIO", defaults.noise_ratio).max(0.0),
        min_speech_frames: env_or("VAD_MIN_SPEECH_FRAMES", defaults.min_speech_frames).max(1),
        ..defaults
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            capture_duration_secs: env_or("CAPTURE_DURATION_SECS", 2.0_f64).max(0.001),

            capture_timeout: Duration::from_secs_f64(env_or("CAPTURE_TIMEOUT_SECS", 5.0_f64).max(0.001)),

            capture_watermark: env_or("CAPTURE_WATERMARK", 0.8_f64).clamp(0.0, 1.0),

            settle: Duration::from_millis(env_or("SETTLE_MS", 100)),

            cycle_timeout: Duration::from_secs(env_or("CYCLE_TIMEOUT_SECS", 60)),

            cycle_pause: Duration::from_millis(env_or("CYCLE_PAUSE_MS", 1000)),

            shutdown_grace: Duration::from_secs(env_or("SHUTDOWN_GRACE_SECS", 10)),

            open_attempts: env_or("OPEN_ATTEMPTS", 3_u32).max(1),

            open_retry: Duration::from_millis(env_or("OPEN_RETRY_MS", 1000)),

            rtl_tcp_addrs: parse_addrs(
                &std::env::var("RTL_TCP_ADDRS").unwrap_or_else(|_| "127.0.0.1:1234".to_string()),
            ),

            rtl_tcp_connect_timeout: Duration::from_millis(env_or("RTL_TCP_CONNECT_TIMEOUT_MS", 2000)),

            output_root: std::env::var("OUTPUT_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),

            health_interval: Duration::from_secs(env_or("HEALTH_INTERVAL_SECS", 60).max(1)),

            min_disk_mb: env_or("MIN_DISK_MB", 100),

            vad: vad_from_env(),
        }
    }
}
