//! Scan Scheduler - repeats the band forever over a bounded worker pool
//!
//! Every batch is a tokio task that waits for a pool permit and then runs
//! the batch on the blocking thread pool. A cycle waits for its batches up to
//! the cycle timeout; anything still running is left to finish on its own
//! and holds its permit until it does, which throttles the next cycle.
//! Batches that never got a worker are withdrawn, and the next cycle starts
//! with them so every frequency keeps being scanned.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task;
use tokio::time::{self, Instant};
use tracing::{error, info, warn};

use super::{run_batch, BatchContext, StatsSnapshot};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Concurrent batches (one device each)
    pub workers: usize,
    /// Frequencies per batch
    pub batch_size: usize,
    pub cycle_timeout: Duration,
    pub cycle_pause: Duration,
    /// How long shutdown waits for running batches
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 4,
            cycle_timeout: Duration::from_secs(60),
            cycle_pause: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// What happened in one cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    /// Index of the batch the cycle started from
    pub first_batch: usize,
    pub batches: usize,
    pub completed: usize,
    /// Started but still running when the cycle timed out
    pub stragglers: usize,
    /// Never got a worker before the timeout; first in line next cycle
    pub deferred: usize,
    /// Worker panicked or was cancelled
    pub failed: usize,
    /// Results recorded between the start and end of the cycle, which
    /// includes late results from earlier cycles' stragglers
    pub counts: StatsSnapshot,
    pub elapsed: Duration,
}

impl CycleReport {
    fn log(&self) {
        if self.stragglers > 0 || self.deferred > 0 || self.failed > 0 {
            warn!(
                "Cycle {} from batch {} done in {:.1?}: {} recorded ({}/{} batches, {} stragglers, {} deferred, {} failed)",
                self.cycle,
                self.first_batch,
                self.elapsed,
                self.counts,
                self.completed,
                self.batches,
                self.stragglers,
                self.deferred,
                self.failed
            );
        } else {
            info!(
                "Cycle {} done in {:.1?}: {} recorded",
                self.cycle, self.elapsed, self.counts
            );
        }
    }
}

/// Which of a cycle's batches got a worker before the cycle closed
struct CycleGate {
    closed: bool,
    started: Vec<bool>,
}

pub struct Scheduler {
    config: SchedulerConfig,
    ctx: Arc<BatchContext>,
    batches: Vec<Arc<[f64]>>,
    permits: Arc<Semaphore>,
    /// Batch the next cycle starts from
    next_batch: AtomicUsize,
}

impl Scheduler {
    pub fn new(mut config: SchedulerConfig, ctx: BatchContext) -> Self {
        config.workers = config.workers.clamp(1, Semaphore::MAX_PERMITS);
        config.batch_size = config.batch_size.max(1);

        let batches = ctx
            .band
            .frequencies
            .chunks(config.batch_size)
            .map(Arc::from)
            .collect();

        Self {
            permits: Arc::new(Semaphore::new(config.workers)),
            config,
            ctx: Arc::new(ctx),
            batches,
            next_batch: AtomicUsize::new(0),
        }
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Dispatch every batch once and wait for them up to the cycle timeout
    pub async fn run_cycle(&self, cycle: u64) -> CycleReport {
        let start = Instant::now();
        let deadline = start + self.config.cycle_timeout;
        let before = self.ctx.stats.snapshot();

        let count = self.batches.len();
        let first = if count == 0 {
            0
        } else {
            self.next_batch.load(Ordering::SeqCst) % count
        };
        let order: Vec<usize> = (0..count).map(|k| (first + k) % count).collect();
        let gate = Arc::new(Mutex::new(CycleGate {
            closed: false,
            started: vec![false; count],
        }));

        let mut handles: Vec<_> = order
            .iter()
            .enumerate()
            .map(|(pos, &index)| {
                let permits = self.permits.clone();
                let ctx = self.ctx.clone();
                let batch = self.batches[index].clone();
                let gate = gate.clone();
                tokio::spawn(async move {
                    let Ok(permit) = permits.acquire_owned().await else {
                        return Ok(0);
                    };
                    {
                        let mut gate = gate.lock().unwrap_or_else(|e| e.into_inner());
                        if gate.closed {
                            return Ok(0);
                        }
                        gate.started[pos] = true;
                    }
                    task::spawn_blocking(move || {
                        let _permit = permit;
                        run_batch(&ctx, &batch)
                    })
                    .await
                })
            })
            .collect();

        let mut report = CycleReport {
            cycle,
            first_batch: first,
            batches: count,
            completed: 0,
            stragglers: 0,
            deferred: 0,
            failed: 0,
            counts: StatsSnapshot::default(),
            elapsed: Duration::ZERO,
        };

        let mut unfinished = Vec::new();
        for (pos, handle) in handles.iter_mut().enumerate() {
            match time::timeout_at(deadline, &mut *handle).await {
                Ok(Ok(Ok(_))) => report.completed += 1,
                Ok(Ok(Err(e))) | Ok(Err(e)) => {
                    report.failed += 1;
                    error!("Cycle {}: batch worker failed: {}", cycle, e);
                }
                Err(_) => unfinished.push(pos),
            }
        }

        if !unfinished.is_empty() {
            let mut gate = gate.lock().unwrap_or_else(|e| e.into_inner());
            gate.closed = true;
            for &pos in &unfinished {
                if gate.started[pos] {
                    report.stragglers += 1;
                } else {
                    report.deferred += 1;
                    // Still waiting for a permit; running batches keep theirs
                    handles[pos].abort();
                }
            }
            if let Some(pos) = gate.started.iter().position(|started| !started) {
                self.next_batch.store(order[pos], Ordering::SeqCst);
            }
            drop(gate);

            warn!(
                "Cycle {}: {} batches unfinished after {:?}, moving on",
                cycle,
                unfinished.len(),
                self.config.cycle_timeout
            );
        }

        report.counts = self.ctx.stats.snapshot().since(&before);
        report.elapsed = start.elapsed();
        report
    }

    /// Run cycles until stopped. Returns the number of cycles started.
    pub async fn run(&self) -> u64 {
        info!(
            "Scanning {} frequencies of band {} in {} batches on {} workers",
            self.ctx.band.frequencies.len(),
            self.ctx.band.name,
            self.batches.len(),
            self.config.workers
        );

        let mut stop = self.ctx.stop.clone();
        let mut cycles = 0;
        while !stop.is_stopped() {
            cycles += 1;
            self.run_cycle(cycles).await.log();

            tokio::select! {
                _ = time::sleep(self.config.cycle_pause) => {}
                _ = stop.stopped() => {}
            }
        }

        info!("Scheduler stopped after {} cycles", cycles);
        cycles
    }

    /// Wait for every worker to return its permit, meaning every device
    /// session has closed. Returns false if the grace period ran out.
    pub async fn shutdown(&self) -> bool {
        let workers = self.config.workers as u32;
        match time::timeout(self.config.shutdown_grace, self.permits.acquire_many(workers)).await {
            Ok(Ok(_idle)) => {
                info!("All workers idle, device sessions closed");
                true
            }
            Ok(Err(_)) => {
                warn!("Worker pool closed during shutdown");
                false
            }
            Err(_) => {
                warn!(
                    "{} workers still busy after {:?}",
                    workers as usize - self.permits.available_permits().min(workers as usize),
                    self.config.shutdown_grace
                );
                false
            }
        }
    }
}
