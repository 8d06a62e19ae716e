//! Scripted devices for exercising failure paths in tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use num_complex::Complex32;

use super::{DeviceFactory, ReadStatus, SdrDevice, SdrError};

/// How the mock stream behaves while tuned to a frequency
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Behavior {
    /// Deliver samples in chunks, forever
    Full,
    /// Deliver this many samples after each retune, then end the burst
    Partial(usize),
    /// Never deliver anything
    Stall,
    /// Fail every read with this status
    ReadError(i32),
    /// Drop the connection on read
    Disconnect,
    /// Reject the retune
    TuneError,
}

/// Lifecycle calls observed across all devices of one factory
#[derive(Debug, Default, Clone)]
pub struct MockCounters {
    pub makes: usize,
    pub activations: usize,
    pub deactivations: usize,
    pub releases: usize,
    pub flushes: usize,
    pub tunes: Vec<f64>,
}

fn key(freq: f64) -> u64 {
    freq.round() as u64
}

pub struct MockFactory {
    counters: Arc<Mutex<MockCounters>>,
    behaviors: HashMap<u64, Behavior>,
    default: Behavior,
    fail_make: bool,
    fail_activate: bool,
    fail_flush: bool,
    sample: Complex32,
    chunk: usize,
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Mutex::new(MockCounters::default())),
            behaviors: HashMap::new(),
            default: Behavior::Full,
            fail_make: false,
            fail_activate: false,
            fail_flush: false,
            sample: Complex32::new(0.25, -0.25),
            chunk: 4_096,
        }
    }

    pub fn with_behavior(mut self, freq: f64, behavior: Behavior) -> Self {
        self.behaviors.insert(key(freq), behavior);
        self
    }

    pub fn default_behavior(mut self, behavior: Behavior) -> Self {
        self.default = behavior;
        self
    }

    /// No device can be acquired at all
    pub fn failing_make(mut self) -> Self {
        self.fail_make = true;
        self
    }

    /// Device is acquired but its stream cannot be set up
    pub fn failing_activate(mut self) -> Self {
        self.fail_activate = true;
        self
    }

    /// Stream comes up but cannot drop stale samples
    pub fn failing_flush(mut self) -> Self {
        self.fail_flush = true;
        self
    }

    pub fn counters(&self) -> MockCounters {
        self.counters.lock().unwrap().clone()
    }
}

impl DeviceFactory for MockFactory {
    fn make(&self, _driver: Option<&str>) -> Result<Box<dyn SdrDevice>, SdrError> {
        if self.fail_make {
            return Err(SdrError::NoDevice("mock: no device".to_string()));
        }
        self.counters.lock().unwrap().makes += 1;
        Ok(Box::new(MockDevice {
            counters: self.counters.clone(),
            behaviors: self.behaviors.clone(),
            default: self.default,
            fail_activate: self.fail_activate,
            fail_flush: self.fail_flush,
            sample: self.sample,
            chunk: self.chunk,
            current: Behavior::Full,
            delivered: 0,
            streaming: false,
        }))
    }
}

pub struct MockDevice {
    counters: Arc<Mutex<MockCounters>>,
    behaviors: HashMap<u64, Behavior>,
    default: Behavior,
    fail_activate: bool,
    fail_flush: bool,
    sample: Complex32,
    chunk: usize,
    current: Behavior,
    delivered: usize,
    streaming: bool,
}

impl SdrDevice for MockDevice {
    fn label(&self) -> &str {
        "mock"
    }

    fn set_sample_rate(&mut self, _rate: f64) -> Result<(), SdrError> {
        Ok(())
    }

    fn set_gain(&mut self, _gain_db: f64) -> Result<(), SdrError> {
        Ok(())
    }

    fn set_frequency(&mut self, freq_hz: f64) -> Result<(), SdrError> {
        let behavior = *self.behaviors.get(&key(freq_hz)).unwrap_or(&self.default);
        if behavior == Behavior::TuneError {
            return Err(SdrError::Setting(format!("mock: cannot tune {}", freq_hz)));
        }
        self.counters.lock().unwrap().tunes.push(freq_hz);
        self.current = behavior;
        self.delivered = 0;
        Ok(())
    }

    fn activate_stream(&mut self) -> Result<(), SdrError> {
        if self.fail_activate {
            return Err(SdrError::Setting("mock: stream setup failed".to_string()));
        }
        self.counters.lock().unwrap().activations += 1;
        self.streaming = true;
        Ok(())
    }

    fn read_stream(
        &mut self,
        buf: &mut [Complex32],
        timeout: Duration,
    ) -> Result<ReadStatus, SdrError> {
        assert!(self.streaming, "read on inactive mock stream");
        match self.current {
            Behavior::Full | Behavior::TuneError => {
                let n = buf.len().min(self.chunk);
                buf[..n].fill(self.sample);
                Ok(ReadStatus::Samples(n))
            }
            Behavior::Partial(total) => {
                let left = total.saturating_sub(self.delivered);
                if left == 0 {
                    return Ok(ReadStatus::EndOfBurst);
                }
                let n = buf.len().min(self.chunk).min(left);
                buf[..n].fill(self.sample);
                self.delivered += n;
                Ok(ReadStatus::Samples(n))
            }
            Behavior::Stall => {
                std::thread::sleep(timeout.min(Duration::from_millis(5)));
                Ok(ReadStatus::Empty)
            }
            Behavior::ReadError(code) => Err(SdrError::Stream { code }),
            Behavior::Disconnect => Err(SdrError::Disconnected("mock: cable pulled".to_string())),
        }
    }

    fn flush_stream(&mut self) -> Result<(), SdrError> {
        if self.fail_flush {
            return Err(SdrError::Stream { code: -4 });
        }
        self.counters.lock().unwrap().flushes += 1;
        Ok(())
    }

    fn deactivate_stream(&mut self) -> Result<(), SdrError> {
        self.counters.lock().unwrap().deactivations += 1;
        self.streaming = false;
        Ok(())
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        if let Ok(mut counters) = self.counters.lock() {
            counters.releases += 1;
        }
    }
}
