//! Signal path for one frequency
//!
//! 1. Capture a timed block of IQ samples from the open session
//! 2. Demodulate it (AM envelope / FM phase difference) to 16-bit PCM
//! 3. Ask a voice detector whether the PCM contains speech

pub mod capture;
pub mod demod;
pub mod detect;

pub use capture::{capture, is_complete, sample_count, CaptureConfig};
pub use demod::{demodulate_into, Modulation};
pub use detect::{EnergyVad, VadConfig, VoiceDetector};
