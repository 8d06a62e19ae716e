//! Timed IQ capture from an open Device Session
//!
//! Fills the session's reusable buffer with `round(rate × duration)` samples,
//! polling the stream until the block is full, the stream ends its burst, or
//! a fixed wall-clock timeout fires.

use std::thread;
use std::time::{Duration, Instant};

use num_complex::Complex32;
use tracing::{debug, trace};

use crate::device::DeviceSession;
use crate::driver::{ReadStatus, SdrError, STREAM_ERROR};
use crate::error::ScanError;

/// Wall-clock bound for one capture, independent of its duration
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Capture timing and completeness policy
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Audio length to capture per frequency
    pub duration_secs: f64,
    /// Give up after this long without a full block
    pub timeout: Duration,
    /// Fraction of requested samples needed for a complete capture
    pub watermark: f64,
    /// Longest single blocking read
    pub read_timeout: Duration,
    /// Pause after a read that returned nothing
    pub idle_backoff: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            duration_secs: 2.0,
            timeout: DEFAULT_CAPTURE_TIMEOUT,
            watermark: 0.8,
            read_timeout: Duration::from_millis(100),
            idle_backoff: Duration::from_millis(2),
        }
    }
}

/// Samples in a capture of `duration_secs` at `sample_rate`
pub fn sample_count(sample_rate: f64, duration_secs: f64) -> usize {
    (sample_rate * duration_secs).round().max(0.0) as usize
}

/// Whether `received` meets the watermark for a `requested`-sample capture
pub fn is_complete(received: usize, requested: usize, watermark: f64) -> bool {
    received >= (requested as f64 * watermark).floor() as usize
}

/// Capture one block into the session buffer.
///
/// Returns the samples actually received, which may be short if the stream
/// ended its burst; the caller judges completeness with [`is_complete`].
pub fn capture<'s>(
    session: &'s mut DeviceSession,
    duration_secs: f64,
    sample_rate: f64,
    config: &CaptureConfig,
) -> Result<&'s [Complex32], ScanError> {
    let requested = sample_count(sample_rate, duration_secs);
    let (device, buf) = session.capture_parts(requested)?;

    let start = Instant::now();
    let mut received = 0usize;
    let mut reads = 0u32;

    while received < requested {
        let elapsed = start.elapsed();
        if elapsed >= config.timeout {
            return Err(ScanError::CaptureTimeout {
                timeout: config.timeout,
                received,
                requested,
            });
        }
        let wait = config.read_timeout.min(config.timeout - elapsed);

        reads += 1;
        match device.read_stream(&mut buf[received..], wait) {
            Ok(ReadStatus::Samples(0)) | Ok(ReadStatus::Empty) => {
                trace!("No samples yet ({}/{})", received, requested);
                thread::sleep(config.idle_backoff);
            }
            Ok(ReadStatus::Samples(n)) => {
                received += n.min(requested - received);
            }
            Ok(ReadStatus::EndOfBurst) => {
                debug!("Stream ended burst at {}/{} samples", received, requested);
                break;
            }
            Err(SdrError::Disconnected(msg)) => return Err(ScanError::DeviceLost(msg)),
            Err(SdrError::Stream { code }) => return Err(ScanError::StreamRead { code }),
            Err(e) => {
                debug!("Stream read failed: {}", e);
                return Err(ScanError::StreamRead { code: STREAM_ERROR });
            }
        }
    }

    debug!(
        "Captured {}/{} samples in {} reads ({:?})",
        received,
        requested,
        reads,
        start.elapsed()
    );

    let buf: &'s [Complex32] = buf;
    Ok(&buf[..received])
}
