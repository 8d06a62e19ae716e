//! Scan pipeline - batches of frequencies run against exclusive device sessions
//!
//! Per cycle:
//! 1. Split the band's frequency list into contiguous batches
//! 2. Run each batch on a pooled worker, sequentially, against one session
//! 3. Wait for the batches up to the cycle timeout, then pause and repeat

#[cfg(test)]
mod fixtures;
mod result;
mod scheduler;
mod stats;
mod worker;

use tokio::sync::watch;

pub use result::{ScanOutcome, ScanResult};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use stats::{ScanStats, StatsSnapshot};
pub use worker::{run_batch, BatchContext};

/// Creates a linked stop trigger and signal
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx }, StopSignal { rx })
}

/// Triggers a cooperative stop
#[derive(Debug)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observes the stop trigger, from async tasks or blocking workers
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once stop is triggered. Pends forever if the handle is gone.
    pub async fn stopped(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
