//! SDR driver backends
//!
//! A driver hands out exclusive device handles. Each handle exposes the
//! receive-channel controls the scanner needs:
//! 1. Sample rate / gain / frequency
//! 2. A single receive stream (activate, read, deactivate)
//!
//! Dropping a handle releases the physical device.

#[cfg(test)]
pub mod mock;
mod registry;
pub mod rtl_tcp;
pub mod sim;

use std::time::Duration;

use num_complex::Complex32;
use thiserror::Error;

pub use registry::DeviceRegistry;

/// Generic stream failure status (SoapySDR `SOAPY_SDR_STREAM_ERROR`)
pub const STREAM_ERROR: i32 = -2;

/// Stream read on an inactive stream (SoapySDR `SOAPY_SDR_NOT_SUPPORTED`)
pub const STREAM_NOT_ACTIVE: i32 = -5;

/// Errors reported by driver backends
#[derive(Debug, Error)]
pub enum SdrError {
    #[error("unknown driver '{0}'")]
    UnknownDriver(String),

    #[error("no device available: {0}")]
    NoDevice(String),

    #[error("device rejected setting: {0}")]
    Setting(String),

    #[error("stream read failed with status {code}")]
    Stream { code: i32 },

    #[error("device disconnected: {0}")]
    Disconnected(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Outcome of a single stream read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// `n` samples were written at the start of the buffer
    Samples(usize),
    /// Nothing available within the read timeout
    Empty,
    /// The stream signalled end of burst; no more samples for this capture
    EndOfBurst,
}

/// An exclusively owned SDR device with one receive channel
pub trait SdrDevice: Send {
    /// Human-readable identity for logs (driver + address/serial)
    fn label(&self) -> &str;

    fn set_sample_rate(&mut self, rate: f64) -> Result<(), SdrError>;

    fn set_gain(&mut self, gain_db: f64) -> Result<(), SdrError>;

    fn set_frequency(&mut self, freq_hz: f64) -> Result<(), SdrError>;

    /// Set up and activate the receive stream
    fn activate_stream(&mut self) -> Result<(), SdrError>;

    /// Read up to `buf.len()` samples, waiting at most `timeout`
    fn read_stream(&mut self, buf: &mut [Complex32], timeout: Duration)
        -> Result<ReadStatus, SdrError>;

    /// Drop anything buffered before the last retune
    fn flush_stream(&mut self) -> Result<(), SdrError> {
        Ok(())
    }

    /// Deactivate and close the receive stream
    fn deactivate_stream(&mut self) -> Result<(), SdrError>;
}

/// Source of device handles, selected by driver name
pub trait DeviceFactory: Send + Sync {
    /// Acquire a device matching `driver`, or the first available one
    fn make(&self, driver: Option<&str>) -> Result<Box<dyn SdrDevice>, SdrError>;
}
