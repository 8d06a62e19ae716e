//! Health monitor - heartbeat file and low-disk warning

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::task::{self, JoinHandle};
use tokio::time;
use tracing::{debug, error, warn};

use crate::scan::StopSignal;

pub const HEARTBEAT_LOG: &str = "heartbeat.log";

/// Create `dir` if needed and prove it is writable
pub fn ensure_output_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    let probe = dir.join(".write_probe");
    fs::write(&probe, b"ok")
        .with_context(|| format!("Output directory {} is not writable", dir.display()))?;
    if let Err(e) = fs::remove_file(&probe) {
        debug!("Could not remove {}: {}", probe.display(), e);
    }
    Ok(())
}

/// Free space available to unprivileged users on the filesystem holding `path`
#[cfg(unix)]
pub fn free_disk_mb(path: &Path) -> io::Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: statvfs is plain old data and fully written on success
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    #[allow(clippy::unnecessary_cast)]
    let free = (stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64);
    Ok(free / (1024 * 1024))
}

#[cfg(not(unix))]
pub fn free_disk_mb(_path: &Path) -> io::Result<u64> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "disk space check needs statvfs",
    ))
}

pub struct HealthMonitor {
    output_dir: PathBuf,
    min_disk_mb: u64,
    last_heartbeat: Mutex<Option<DateTime<Utc>>>,
}

impl HealthMonitor {
    pub fn new(output_dir: impl Into<PathBuf>, min_disk_mb: u64) -> Self {
        Self {
            output_dir: output_dir.into(),
            min_disk_mb,
            last_heartbeat: Mutex::new(None),
        }
    }

    /// True unless free space is known to be below the minimum
    pub fn check_disk(&self) -> bool {
        match free_disk_mb(&self.output_dir) {
            Ok(free) if free < self.min_disk_mb => {
                error!(
                    "Low disk space: {} MB free in {} (minimum {} MB)",
                    free,
                    self.output_dir.display(),
                    self.min_disk_mb
                );
                false
            }
            Ok(free) => {
                debug!("Disk space OK: {} MB free", free);
                true
            }
            Err(e) => {
                warn!("Disk space check failed: {}", e);
                true
            }
        }
    }

    /// Append an `Alive` line to the heartbeat log
    pub fn heartbeat(&self) -> Result<DateTime<Utc>> {
        let now = Utc::now();
        let path = self.output_dir.join(HEARTBEAT_LOG);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        writeln!(file, "{} - Alive", now.format("%Y-%m-%dT%H:%M:%SZ"))
            .with_context(|| format!("Failed to write {}", path.display()))?;

        *self.last_heartbeat.lock().unwrap_or_else(|e| e.into_inner()) = Some(now);
        Ok(now)
    }

    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        *self.last_heartbeat.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// One monitoring pass
    pub fn check(&self) -> Result<()> {
        self.check_disk();
        self.heartbeat()?;
        Ok(())
    }
}

/// Run `monitor` every `interval` until stopped
pub fn spawn(monitor: Arc<HealthMonitor>, interval: Duration, mut stop: StopSignal) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let monitor = monitor.clone();
                    match task::spawn_blocking(move || monitor.check()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => error!("Health check failed: {:#}", e),
                        Err(e) => error!("Health check task failed: {}", e),
                    }
                }
                _ = stop.stopped() => break,
            }
        }
        debug!("Health monitor stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::stop_channel;

    #[test]
    fn test_ensure_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("recordings_hf");
        ensure_output_dir(&nested).unwrap();
        assert!(nested.is_dir());
        assert!(!nested.join(".write_probe").exists());

        let file = dir.path().join("plain-file");
        fs::write(&file, b"x").unwrap();
        assert!(ensure_output_dir(&file.join("sub")).is_err());
    }

    #[test]
    fn test_heartbeat_appends() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = HealthMonitor::new(dir.path(), 0);
        assert!(monitor.last_heartbeat().is_none());

        let first = monitor.heartbeat().unwrap();
        monitor.heartbeat().unwrap();
        assert!(monitor.last_heartbeat().unwrap() >= first);

        let log = fs::read_to_string(dir.path().join(HEARTBEAT_LOG)).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("Z - Alive"));
        assert_eq!(lines[0].len(), "2024-01-01T00:00:00Z - Alive".len());
    }

    #[cfg(unix)]
    #[test]
    fn test_disk_check() {
        let dir = tempfile::tempdir().unwrap();
        assert!(free_disk_mb(dir.path()).is_ok());
        assert!(HealthMonitor::new(dir.path(), 0).check_disk());
        assert!(!HealthMonitor::new(dir.path(), u64::MAX).check_disk());
        assert!(free_disk_mb(&dir.path().join("missing")).is_err());
    }

    #[tokio::test]
    async fn test_monitor_runs_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = Arc::new(HealthMonitor::new(dir.path(), 0));
        let (stop, signal) = stop_channel();

        let handle = spawn(monitor.clone(), Duration::from_millis(20), signal);
        time::sleep(Duration::from_millis(100)).await;
        stop.stop();
        time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();

        assert!(monitor.last_heartbeat().is_some());
        let log = fs::read_to_string(dir.path().join(HEARTBEAT_LOG)).unwrap();
        assert!(log.lines().count() >= 2);
    }
}
