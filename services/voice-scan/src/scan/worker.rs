//! Batch worker - one device session, frequencies in order

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::{debug, error, info, warn};

use super::{ScanResult, ScanStats, StopSignal};
use crate::bands::BandConfig;
use crate::device::{DeviceSession, SessionSettings};
use crate::driver::DeviceFactory;
use crate::error::ScanError;
use crate::sdr::{capture, demodulate_into, is_complete, sample_count, CaptureConfig, VoiceDetector};

/// Everything a batch needs, shared read-only by all workers
pub struct BatchContext {
    pub factory: Arc<dyn DeviceFactory>,
    pub detector: Arc<dyn VoiceDetector>,
    pub band: Arc<BandConfig>,
    pub session: SessionSettings,
    pub capture: CaptureConfig,
    pub results: Sender<ScanResult>,
    pub stats: Arc<ScanStats>,
    pub stop: StopSignal,
}

impl BatchContext {
    /// Hand a result to the sink
    pub(crate) fn emit(&self, result: ScanResult) {
        self.stats.record(result.outcome);
        let freq = result.frequency_mhz();
        if self.results.send(result).is_err() {
            warn!("Result sink closed, dropping result for {:.3} MHz", freq);
        }
    }
}

/// Scan `batch` in order against a single device session.
///
/// Emits one result per frequency, except for frequencies left unscanned
/// after a stop request. Returns the number of results emitted. The session
/// is closed on every path out of this function, including unwinding.
pub fn run_batch(ctx: &BatchContext, batch: &[f64]) -> usize {
    let Some(&first) = batch.first() else {
        return 0;
    };
    if ctx.stop.is_stopped() {
        debug!("Stop requested, skipping batch at {:.3} MHz", first / 1e6);
        return 0;
    }

    let mut session = match DeviceSession::open(ctx.factory.as_ref(), first, &ctx.session) {
        Ok(session) => session,
        Err(e) => {
            error!(
                "Device open failed for batch {:.3}-{:.3} MHz: {}",
                first / 1e6,
                batch[batch.len() - 1] / 1e6,
                e
            );
            for &freq in batch {
                ctx.emit(ScanResult::error(freq, e.to_string()));
            }
            return batch.len();
        }
    };

    let mut pcm = Vec::new();
    let mut emitted = 0;

    for (i, &freq) in batch.iter().enumerate() {
        if ctx.stop.is_stopped() {
            info!(
                "Stop requested, {} frequencies left unscanned on {}",
                batch.len() - i,
                session.label()
            );
            break;
        }

        match scan_frequency(ctx, &mut session, freq, &mut pcm) {
            Ok(result) => ctx.emit(result),
            Err(e) if e.is_session_fatal() => {
                error!("{:.3} MHz: {}, aborting batch", freq / 1e6, e);
                ctx.emit(ScanResult::error(freq, e.to_string()));
                for &rest in &batch[i + 1..] {
                    ctx.emit(ScanResult::error(rest, format!("not scanned: {}", e)));
                }
                emitted = batch.len();
                break;
            }
            Err(e) => {
                warn!("{:.3} MHz: {}", freq / 1e6, e);
                ctx.emit(ScanResult::error(freq, e.to_string()));
            }
        }
        emitted = i + 1;
    }

    session.close();
    emitted
}

/// Retune, capture, demodulate and detect on one frequency
fn scan_frequency(
    ctx: &BatchContext,
    session: &mut DeviceSession,
    freq: f64,
    pcm: &mut Vec<i16>,
) -> Result<ScanResult, ScanError> {
    session.retune(freq)?;

    let band = &ctx.band;
    let rate = band.sample_rate as f64;
    let requested = sample_count(rate, ctx.capture.duration_secs);
    let iq = capture(session, ctx.capture.duration_secs, rate, &ctx.capture)?;

    if !is_complete(iq.len(), requested, ctx.capture.watermark) {
        warn!(
            "{:.3} MHz: incomplete capture ({}/{} samples)",
            freq / 1e6,
            iq.len(),
            requested
        );
        return Ok(ScanResult::incomplete(freq, iq.len(), requested));
    }

    demodulate_into(iq, band.modulation, rate, pcm);

    if detect_voice(ctx.detector.as_ref(), pcm, band.sample_rate, freq) {
        info!("{:.3} MHz: voice detected", freq / 1e6);
        Ok(ScanResult::voice(freq, pcm.clone(), iq.to_vec()))
    } else {
        debug!("{:.3} MHz: no voice", freq / 1e6);
        Ok(ScanResult::no_voice(freq))
    }
}

/// Run the detector; any failure, including a panic, counts as no voice
fn detect_voice(detector: &dyn VoiceDetector, pcm: &[i16], sample_rate: u32, freq: f64) -> bool {
    match catch_unwind(AssertUnwindSafe(|| detector.detect(pcm, sample_rate))) {
        Ok(Ok(voice)) => voice,
        Ok(Err(e)) => {
            warn!("{:.3} MHz: voice detection failed: {}", freq / 1e6, e);
            false
        }
        Err(_) => {
            warn!("{:.3} MHz: voice detector panicked", freq / 1e6);
            false
        }
    }
}
