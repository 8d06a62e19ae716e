//! Simulated receiver for dry runs without hardware

use std::f64::consts::TAU;
use std::str::FromStr;
use std::time::Duration;

use num_complex::Complex32;

use super::{ReadStatus, SdrDevice, SdrError, STREAM_NOT_ACTIVE};

/// Carrier offset of the test tone from the tuned frequency
const TONE_OFFSET_HZ: f64 = 1_000.0;
/// Audio modulating the tone envelope
const TONE_AUDIO_HZ: f64 = 220.0;
/// Syllable on/off period
const SYLLABLE_SECS: f64 = 0.25;
/// Samples delivered after each retune by a bursty receiver
const BURST_SECS: f64 = 0.5;

/// What the simulated receiver hears
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimSignal {
    /// All-zero IQ
    Silence,
    /// AM tone keyed on and off at a syllabic rate
    Tone,
    /// The tone, but only a short burst after each retune
    Burst,
}

impl SimSignal {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Silence => "silence",
            Self::Tone => "tone",
            Self::Burst => "burst",
        }
    }
}

impl FromStr for SimSignal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "silence" => Ok(Self::Silence),
            "tone" => Ok(Self::Tone),
            "burst" => Ok(Self::Burst),
            other => Err(format!("unknown sim signal '{}'", other)),
        }
    }
}

pub struct SimDevice {
    label: String,
    signal: SimSignal,
    sample_rate: f64,
    streaming: bool,
    /// Running sample clock, keeps the tone phase-continuous across reads
    clock: u64,
    /// Samples left in the current burst
    burst_left: u64,
}

impl SimDevice {
    pub fn new(signal: SimSignal) -> Self {
        Self {
            label: format!("sim:{}", signal.as_str()),
            signal,
            sample_rate: 48_000.0,
            streaming: false,
            clock: 0,
            burst_left: 0,
        }
    }

    fn start_burst(&mut self) {
        self.burst_left = (BURST_SECS * self.sample_rate) as u64;
    }

    fn sample_at(&self, n: u64) -> Complex32 {
        match self.signal {
            SimSignal::Silence => Complex32::new(0.0, 0.0),
            SimSignal::Tone | SimSignal::Burst => {
                let t = n as f64 / self.sample_rate;
                let keyed = ((t / SYLLABLE_SECS) as u64) % 2 == 0;
                let envelope = if keyed {
                    0.5 * (1.0 + 0.8 * (TAU * TONE_AUDIO_HZ * t).sin())
                } else {
                    0.02
                };
                let phase = TAU * TONE_OFFSET_HZ * t;
                Complex32::new((envelope * phase.cos()) as f32, (envelope * phase.sin()) as f32)
            }
        }
    }
}

impl SdrDevice for SimDevice {
    fn label(&self) -> &str {
        &self.label
    }

    fn set_sample_rate(&mut self, rate: f64) -> Result<(), SdrError> {
        if rate <= 0.0 {
            return Err(SdrError::Setting(format!("sample rate {} must be positive", rate)));
        }
        self.sample_rate = rate;
        Ok(())
    }

    fn set_gain(&mut self, _gain_db: f64) -> Result<(), SdrError> {
        Ok(())
    }

    fn set_frequency(&mut self, freq_hz: f64) -> Result<(), SdrError> {
        if freq_hz <= 0.0 {
            return Err(SdrError::Setting(format!("frequency {} must be positive", freq_hz)));
        }
        self.start_burst();
        Ok(())
    }

    fn activate_stream(&mut self) -> Result<(), SdrError> {
        self.streaming = true;
        Ok(())
    }

    fn read_stream(
        &mut self,
        buf: &mut [Complex32],
        _timeout: Duration,
    ) -> Result<ReadStatus, SdrError> {
        if !self.streaming {
            return Err(SdrError::Stream { code: STREAM_NOT_ACTIVE });
        }
        let mut n = buf.len();
        if self.signal == SimSignal::Burst {
            if self.burst_left == 0 {
                return Ok(ReadStatus::EndOfBurst);
            }
            n = n.min(self.burst_left as usize);
            self.burst_left -= n as u64;
        }
        for (i, out) in buf[..n].iter_mut().enumerate() {
            *out = self.sample_at(self.clock + i as u64);
        }
        self.clock += n as u64;
        Ok(ReadStatus::Samples(n))
    }

    fn deactivate_stream(&mut self) -> Result<(), SdrError> {
        self.streaming = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_is_all_zero() {
        let mut dev = SimDevice::new(SimSignal::Silence);
        dev.activate_stream().unwrap();
        let mut buf = vec![Complex32::new(1.0, 1.0); 256];
        let status = dev.read_stream(&mut buf, Duration::from_millis(10)).unwrap();
        assert_eq!(status, ReadStatus::Samples(256));
        assert!(buf.iter().all(|s| s.norm() == 0.0));
    }

    #[test]
    fn test_tone_is_keyed() {
        let mut dev = SimDevice::new(SimSignal::Tone);
        dev.set_sample_rate(8_000.0).unwrap();
        dev.activate_stream().unwrap();
        let mut buf = vec![Complex32::new(0.0, 0.0); 4_000];
        dev.read_stream(&mut buf, Duration::from_millis(10)).unwrap();

        // First 250 ms keyed, next 250 ms near silent
        let on_peak = buf[..2_000].iter().map(|s| s.norm()).fold(0.0f32, f32::max);
        let off_peak = buf[2_000..].iter().map(|s| s.norm()).fold(0.0f32, f32::max);
        assert!(on_peak > 0.5);
        assert!(off_peak < 0.05);
    }

    #[test]
    fn test_burst_ends_until_retuned() {
        let mut dev = SimDevice::new(SimSignal::Burst);
        dev.set_sample_rate(8_000.0).unwrap();
        dev.set_frequency(7.1e6).unwrap();
        dev.activate_stream().unwrap();

        let mut buf = vec![Complex32::new(0.0, 0.0); 10_000];
        assert_eq!(
            dev.read_stream(&mut buf, Duration::from_millis(10)).unwrap(),
            ReadStatus::Samples(4_000)
        );
        assert_eq!(
            dev.read_stream(&mut buf, Duration::from_millis(10)).unwrap(),
            ReadStatus::EndOfBurst
        );

        dev.set_frequency(14.2e6).unwrap();
        assert_eq!(
            dev.read_stream(&mut buf[..100], Duration::from_millis(10)).unwrap(),
            ReadStatus::Samples(100)
        );
    }

    #[test]
    fn test_read_requires_active_stream() {
        let mut dev = SimDevice::new(SimSignal::Silence);
        let mut buf = vec![Complex32::new(0.0, 0.0); 8];
        assert!(matches!(
            dev.read_stream(&mut buf, Duration::from_millis(1)),
            Err(SdrError::Stream { code: STREAM_NOT_ACTIVE })
        ));
        assert!(dev.set_frequency(0.0).is_err());
    }

    #[test]
    fn test_signal_names() {
        assert_eq!("TONE".parse::<SimSignal>().unwrap(), SimSignal::Tone);
        assert_eq!("burst".parse::<SimSignal>().unwrap(), SimSignal::Burst);
        assert!("noise".parse::<SimSignal>().is_err());
    }
}
