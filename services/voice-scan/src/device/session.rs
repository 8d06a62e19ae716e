//! Device Session - exclusive ownership of one radio and its receive stream

use std::thread;
use std::time::Duration;

use num_complex::Complex32;
use tracing::{debug, info, warn};

use crate::driver::{DeviceFactory, SdrDevice, SdrError};
use crate::error::ScanError;

/// How a session acquires and configures its device
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Driver name, or `None` for the first available device
    pub driver: Option<String>,
    pub gain_db: f64,
    pub sample_rate: f64,
    /// Wait after each retune before capturing
    pub settle: Duration,
    pub open_attempts: u32,
    pub open_retry: Duration,
}

/// One device, one active stream, one capture buffer.
///
/// The session is closed exactly once: explicitly through [`close`] or,
/// failing that, when it is dropped (including during unwinding).
///
/// [`close`]: DeviceSession::close
pub struct DeviceSession {
    device: Option<Box<dyn SdrDevice>>,
    label: String,
    stream_active: bool,
    frequency: f64,
    settle: Duration,
    buffer: Vec<Complex32>,
}

fn acquire(
    factory: &dyn DeviceFactory,
    settings: &SessionSettings,
) -> Result<Box<dyn SdrDevice>, SdrError> {
    let attempts = settings.open_attempts.max(1);
    let mut attempt = 1;
    loop {
        match factory.make(settings.driver.as_deref()) {
            Ok(device) => return Ok(device),
            Err(e) if attempt < attempts => {
                warn!(
                    "SDR acquisition failed (attempt {}/{}): {}",
                    attempt, attempts, e
                );
                thread::sleep(settings.open_retry);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn configure(device: &mut dyn SdrDevice, freq: f64, settings: &SessionSettings) -> Result<(), SdrError> {
    device.set_sample_rate(settings.sample_rate)?;
    device.set_frequency(freq)?;
    device.set_gain(settings.gain_db)?;
    device.activate_stream()
}

fn tune_error(freq: f64, e: SdrError) -> ScanError {
    match e {
        SdrError::Disconnected(msg) => ScanError::DeviceLost(msg),
        other => ScanError::Tune {
            freq_hz: freq,
            reason: other.to_string(),
        },
    }
}

impl DeviceSession {
    /// Acquire a device, configure it and activate its stream tuned to `freq`.
    /// Returns once the tune has settled and stale samples are flushed.
    ///
    /// If configuration fails the device is released without a stream close.
    pub fn open(
        factory: &dyn DeviceFactory,
        freq: f64,
        settings: &SessionSettings,
    ) -> Result<Self, ScanError> {
        let mut device = acquire(factory, settings).map_err(ScanError::DeviceInit)?;
        let label = device.label().to_string();

        // Dropping `device` on error releases it
        configure(device.as_mut(), freq, settings).map_err(ScanError::DeviceInit)?;

        info!(
            "Opened {} at {:.3} MHz ({} S/s, gain {:.1} dB)",
            label,
            freq / 1e6,
            settings.sample_rate,
            settings.gain_db
        );

        let mut session = Self {
            device: Some(device),
            label,
            stream_active: true,
            frequency: freq,
            settle: settings.settle,
            buffer: Vec::new(),
        };
        // The initial tune settles like any retune; on error `session` drops and closes
        session.settle_and_flush(freq)?;
        Ok(session)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    #[cfg(test)]
    pub(crate) fn frequency(&self) -> f64 {
        self.frequency
    }

    #[cfg(test)]
    pub(crate) fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Retune the open stream, then let it settle and drop stale samples
    pub fn retune(&mut self, freq: f64) -> Result<(), ScanError> {
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| ScanError::DeviceLost(format!("{} is closed", self.label)))?;

        if (freq - self.frequency).abs() < 0.5 {
            return Ok(());
        }

        device.set_frequency(freq).map_err(|e| tune_error(freq, e))?;
        self.frequency = freq;
        self.settle_and_flush(freq)
    }

    /// Wait for the tuner, then drop samples from before the tune
    fn settle_and_flush(&mut self, freq: f64) -> Result<(), ScanError> {
        if !self.settle.is_zero() {
            thread::sleep(self.settle);
        }
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| ScanError::DeviceLost(format!("{} is closed", self.label)))?;
        device.flush_stream().map_err(|e| tune_error(freq, e))
    }

    /// Device and a capture buffer of exactly `len` samples.
    ///
    /// The buffer is owned by the session and reused between captures.
    pub(crate) fn capture_parts(
        &mut self,
        len: usize,
    ) -> Result<(&mut dyn SdrDevice, &mut [Complex32]), ScanError> {
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| ScanError::DeviceLost(format!("{} is closed", self.label)))?;
        self.buffer.resize(len, Complex32::new(0.0, 0.0));
        Ok((device.as_mut(), &mut self.buffer[..]))
    }

    #[cfg(test)]
    pub(crate) fn buffer_ptr(&self) -> *const Complex32 {
        self.buffer.as_ptr()
    }

    /// Deactivate and close the stream, then release the device. Idempotent.
    pub fn close(&mut self) {
        let Some(mut device) = self.device.take() else {
            return;
        };
        if self.stream_active {
            if let Err(e) = device.deactivate_stream() {
                warn!("{}: stream deactivation failed: {}", self.label, e);
            }
            self.stream_active = false;
        }
        drop(device);
        debug!("Closed {}", self.label);
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}
