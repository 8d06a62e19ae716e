//! Voice Scan - multi-frequency SDR voice monitor
//!
//! Repeatedly sweeps one band with a pool of SDR devices, demodulates each
//! capture to audio, and records the frequencies where voice is heard.

mod bands;
mod config;
mod device;
mod driver;
mod error;
mod health;
mod recorder;
mod scan;
mod sdr;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::{task, time};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use bands::BandTable;
use config::Config;
use device::SessionSettings;
use driver::DeviceRegistry;
use health::HealthMonitor;
use recorder::{spawn_recorder, FileRecorder};
use scan::{BatchContext, ScanStats, Scheduler, SchedulerConfig};
use sdr::{CaptureConfig, EnergyVad};

/// Scan results buffered between workers and the recorder
const RESULT_QUEUE: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "voice-scan", version, about = "Scan a radio band and record voice contacts")]
struct Args {
    /// Band to scan (hf, vhf, uhf or a name from --bands-file)
    #[arg(long)]
    band: String,

    /// SDR driver: rtl_tcp, rtl_tcp=<host:port>, sim, sim=tone, sim=burst
    #[arg(long)]
    driver: Option<String>,

    /// Tuner gain in dB
    #[arg(long, default_value_t = 40.0)]
    gain: f64,

    /// Concurrent devices
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u32).range(1..))]
    workers: u32,

    /// Frequencies per device session
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u32).range(1..))]
    batch: u32,

    /// TOML band table replacing the built-in one
    #[arg(long)]
    bands_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("===========================================");
    info!("   Voice Scan - SDR voice monitor");
    info!("===========================================");

    if let Err(e) = run(args).await {
        error!("Fatal: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config = Config::from_env();

    let table = match &args.bands_file {
        Some(path) => BandTable::load(path)?,
        None => BandTable::builtin(),
    };
    let band = Arc::new(table.get(&args.band)?.clone());

    let output_dir = config.output_root.join(&band.output_dir);
    health::ensure_output_dir(&output_dir)?;

    let registry = Arc::new(DeviceRegistry::new(
        config.rtl_tcp_addrs.clone(),
        config.rtl_tcp_connect_timeout,
    ));
    registry
        .validate(args.driver.as_deref())
        .context("Invalid --driver")?;

    info!("Configuration:");
    info!("  Band: {} ({} frequencies, {} S/s, {})",
        band.name, band.frequencies.len(), band.sample_rate, band.modulation);
    info!("  Driver: {}", args.driver.as_deref().unwrap_or("rtl_tcp (first free)"));
    info!("  Gain: {} dB", args.gain);
    info!("  Workers: {}, batch size: {}", args.workers, args.batch);
    info!("  Capture: {} s, timeout {:?}, watermark {}",
        config.capture_duration_secs, config.capture_timeout, config.capture_watermark);
    info!("  VAD: noise ratio {}, floor {}, {} speech frames",
        config.vad.noise_ratio, config.vad.rms_floor, config.vad.min_speech_frames);
    info!("  Output: {}", output_dir.display());

    let (stop, stop_signal) = scan::stop_channel();
    let stats = Arc::new(ScanStats::new());

    let (result_tx, result_rx) = crossbeam_channel::bounded(RESULT_QUEUE);
    let recorder = FileRecorder::new(&output_dir, band.sample_rate)?;
    let recorder_handle = spawn_recorder(recorder, result_rx)?;

    let monitor = Arc::new(HealthMonitor::new(&output_dir, config.min_disk_mb));
    let health_handle = health::spawn(monitor.clone(), config.health_interval, stop.signal());

    let ctx = BatchContext {
        factory: registry,
        detector: Arc::new(EnergyVad::new(config.vad.clone())),
        band: band.clone(),
        session: SessionSettings {
            driver: args.driver.clone(),
            gain_db: args.gain,
            sample_rate: band.sample_rate as f64,
            settle: config.settle,
            open_attempts: config.open_attempts,
            open_retry: config.open_retry,
        },
        capture: CaptureConfig {
            duration_secs: config.capture_duration_secs,
            timeout: config.capture_timeout,
            watermark: config.capture_watermark,
            ..CaptureConfig::default()
        },
        results: result_tx,
        stats: stats.clone(),
        stop: stop_signal,
    };

    let scheduler = Scheduler::new(
        SchedulerConfig {
            workers: args.workers as usize,
            batch_size: args.batch as usize,
            cycle_timeout: config.cycle_timeout,
            cycle_pause: config.cycle_pause,
            shutdown_grace: config.shutdown_grace,
        },
        ctx,
    );
    info!("  Batches per cycle: {}", scheduler.batch_count());

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, finishing current frequencies...");
                stop.stop();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    info!("===========================================");
    info!("  Starting scan...");
    info!("  Press Ctrl+C to stop.");
    info!("===========================================");

    let cycles = scheduler.run().await;
    if !scheduler.shutdown().await {
        warn!("Some device sessions did not close within {:?}", config.shutdown_grace);
    }
    // Last handle on the result channel, unless a straggler still holds one
    drop(scheduler);

    let recorded = time::timeout(
        config.shutdown_grace,
        task::spawn_blocking(move || recorder_handle.join()),
    )
    .await;
    let summary = match recorded {
        Ok(Ok(Ok(summary))) => Some(summary),
        Ok(Ok(Err(_))) | Ok(Err(_)) => {
            error!("Recorder thread panicked");
            None
        }
        Err(_) => {
            warn!("Recorder still draining after {:?}", config.shutdown_grace);
            None
        }
    };

    if let Err(e) = health_handle.await {
        warn!("Health monitor task failed: {}", e);
    }

    let totals = stats.snapshot();
    info!("===========================================");
    info!("  Scan stopped after {} cycles", cycles);
    info!("  Results: {} ({})", totals.total(), totals);
    if let Some(summary) = summary {
        info!("  Recorded: {}, sink failures: {}", summary.recorded, summary.failed);
    }
    if let Some(ts) = monitor.last_heartbeat() {
        info!("  Last heartbeat: {}", ts.to_rfc3339());
    }
    info!("===========================================");

    Ok(())
}
