//! AM/FM demodulation of IQ blocks to 16-bit PCM
//!
//! Both schemes normalise the block to its own peak, so output level is
//! independent of RF gain:
//! - AM: envelope |IQ| / (max + ε)
//! - FM: unwrapped phase difference × rate / 2π / (max + ε), zero-prefixed

use std::f64::consts::{PI, TAU};
use std::fmt;
use std::str::FromStr;

use num_complex::Complex32;
use serde::Deserialize;

use crate::error::ScanError;

/// Guards the normalisation against all-zero input
const EPSILON: f64 = 1e-6;

/// Demodulation scheme for a band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Modulation {
    Am,
    Fm,
}

impl FromStr for Modulation {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "am" => Ok(Self::Am),
            "fm" => Ok(Self::Fm),
            _ => Err(ScanError::UnsupportedDemodulation(s.to_string())),
        }
    }
}

impl TryFrom<String> for Modulation {
    type Error = ScanError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Modulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Am => write!(f, "am"),
            Self::Fm => write!(f, "fm"),
        }
    }
}

#[inline(always)]
fn to_pcm(x: f64) -> i16 {
    // Truncates toward zero
    (x * 32767.0) as i16
}

/// Demodulate `iq` into `out`, replacing its contents
pub fn demodulate_into(
    iq: &[Complex32],
    modulation: Modulation,
    sample_rate: f64,
    out: &mut Vec<i16>,
) {
    out.clear();
    if iq.is_empty() {
        return;
    }
    match modulation {
        Modulation::Am => am(iq, out),
        Modulation::Fm => fm(iq, sample_rate, out),
    }
}

fn am(iq: &[Complex32], out: &mut Vec<i16>) {
    let peak = iq.iter().map(|s| s.norm() as f64).fold(0.0, f64::max) + EPSILON;
    out.extend(iq.iter().map(|s| to_pcm(s.norm() as f64 / peak)));
}

fn fm(iq: &[Complex32], sample_rate: f64, out: &mut Vec<i16>) {
    let mut audio = Vec::with_capacity(iq.len());
    audio.push(0.0);

    let mut prev = iq[0].arg() as f64;
    for s in &iq[1..] {
        let phase = s.arg() as f64;
        audio.push(phase - prev);
        prev = phase;
    }
    unwrap_phase(&mut audio[1..]);

    let scale = sample_rate / TAU;
    for a in audio.iter_mut() {
        *a *= scale;
    }
    let peak = audio.iter().map(|a| a.abs()).fold(0.0, f64::max) + EPSILON;
    out.extend(audio.iter().map(|a| to_pcm(a / peak)));
}

/// Remove 2π discontinuities in place.
///
/// A step whose magnitude is at least π is replaced by its equivalent in
/// [-π, π]; the correction carries forward to every later element.
pub fn unwrap_phase(values: &mut [f64]) {
    let mut correction = 0.0;
    let mut prev_raw = match values.first() {
        Some(v) => *v,
        None => return,
    };

    for v in values.iter_mut().skip(1) {
        let raw = *v;
        let step = raw - prev_raw;
        prev_raw = raw;

        if step.abs() >= PI {
            let mut wrapped = (step + PI).rem_euclid(TAU) - PI;
            if wrapped == -PI && step > 0.0 {
                wrapped = PI;
            }
            correction += wrapped - step;
        }
        *v = raw + correction;
    }
}
