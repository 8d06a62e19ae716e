//! Result sink - persists detections and logs every outcome
//!
//! Output directory layout:
//! - `<ts>_<khz>kHz.wav`  mono 16-bit PCM at the band sample rate
//! - `<ts>_<khz>kHz.iq`   interleaved little-endian f32 I/Q
//! - `contacts_log.csv`   one row per scan result

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use crossbeam_channel::Receiver;
use hound::{SampleFormat, WavSpec, WavWriter};
use num_complex::Complex32;
use tracing::{debug, error, info};

use crate::scan::{ScanOutcome, ScanResult};

pub const CONTACT_LOG: &str = "contacts_log.csv";

/// Timestamp used in artifact names, UTC with milliseconds
const FILE_TIMESTAMP: &str = "%Y%m%dT%H%M%S%3fZ";

/// Consumes scan results one at a time
pub trait ResultSink: Send {
    fn record(&mut self, result: &ScanResult) -> Result<()>;
}

/// Writes WAV/IQ artifacts and the contact log under one directory
pub struct FileRecorder {
    output_dir: PathBuf,
    sample_rate: u32,
}

impl FileRecorder {
    pub fn new(output_dir: impl Into<PathBuf>, sample_rate: u32) -> Result<Self> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir)
            .with_context(|| format!("Failed to create {}", output_dir.display()))?;
        Ok(Self {
            output_dir,
            sample_rate,
        })
    }

    pub fn log_path(&self) -> PathBuf {
        self.output_dir.join(CONTACT_LOG)
    }

    fn base_name(result: &ScanResult) -> String {
        format!(
            "{}_{}kHz",
            result.timestamp.format(FILE_TIMESTAMP),
            (result.frequency_hz / 1e3) as u64
        )
    }

    fn append_row(&self, fields: &[String]) -> Result<()> {
        let path = self.log_path();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let row: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
        writeln!(file, "{}", row.join(","))
            .with_context(|| format!("Failed to append to {}", path.display()))
    }
}

impl ResultSink for FileRecorder {
    fn record(&mut self, result: &ScanResult) -> Result<()> {
        let (wav, iq) = match (result.outcome, &result.pcm, &result.iq) {
            (ScanOutcome::VoiceDetected, Some(pcm), Some(iq)) => {
                let base = Self::base_name(result);
                let wav = self.output_dir.join(format!("{}.wav", base));
                let iq_path = self.output_dir.join(format!("{}.iq", base));
                write_wav(&wav, pcm, self.sample_rate)?;
                write_iq(&iq_path, iq)?;
                info!("Saved contact at {:.3} MHz: {}", result.frequency_mhz(), wav.display());
                (wav.display().to_string(), iq_path.display().to_string())
            }
            _ => ("-".to_string(), "-".to_string()),
        };

        self.append_row(&[
            format!("{}", result.frequency_hz),
            result.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            result.outcome.as_str().to_string(),
            wav,
            iq,
            result.error.clone().unwrap_or_else(|| "-".to_string()),
        ])
    }
}

pub fn write_wav(path: &Path, pcm: &[i16], sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for sample in pcm {
        writer.write_sample(*sample)?;
    }
    writer.finalize()?;
    Ok(())
}

pub fn write_iq(path: &Path, iq: &[Complex32]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for s in iq {
        out.write_all(&s.re.to_le_bytes())?;
        out.write_all(&s.im.to_le_bytes())?;
    }
    out.flush()?;
    Ok(())
}

/// Quote a CSV field if it contains a delimiter, quote or newline
fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Totals reported by the recorder thread when its channel closes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderSummary {
    pub recorded: u64,
    pub failed: u64,
}

/// Drain `rx` into `sink` on a dedicated thread until every sender is gone.
///
/// Sink failures are logged and never stop the scan.
pub fn spawn_recorder<S>(mut sink: S, rx: Receiver<ScanResult>) -> Result<JoinHandle<RecorderSummary>>
where
    S: ResultSink + 'static,
{
    thread::Builder::new()
        .name("recorder".to_string())
        .spawn(move || {
            let mut summary = RecorderSummary::default();
            for result in rx.iter() {
                match sink.record(&result) {
                    Ok(()) => summary.recorded += 1,
                    Err(e) => {
                        summary.failed += 1;
                        error!(
                            "Failed to record {} at {:.3} MHz: {:#}",
                            result.outcome,
                            result.frequency_mhz(),
                            e
                        );
                    }
                }
            }
            debug!("Recorder channel closed");
            summary
        })
        .context("Failed to spawn recorder thread")
}
