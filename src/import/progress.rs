use crate::import::scheduler::WorkOutcome;
use log::info;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Hooks invoked while an import runs. All methods default to no-ops.
pub trait ImportObserver: Send + Sync {
    fn on_start(&self, _index: &str, _estimate: Option<u64>) {}

    fn on_unit_finished(&self, _outcome: &WorkOutcome) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub processed: usize,
    pub total: Option<u64>,
    pub indexed: usize,
    pub deleted: usize,
    pub failed_batches: usize,
}

impl ProgressSnapshot {
    pub fn percent(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(100.0),
            Some(total) => Some((self.processed as f64 / total as f64 * 100.0).min(100.0)),
            None => None,
        }
    }
}

/// Observer that keeps running totals and logs progress against the estimate.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    total: AtomicU64,
    has_total: AtomicBool,
    processed: AtomicUsize,
    indexed: AtomicUsize,
    deleted: AtomicUsize,
    failed_batches: AtomicUsize,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let total = self
            .has_total
            .load(Ordering::Acquire)
            .then(|| self.total.load(Ordering::Relaxed));

        ProgressSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            total,
            indexed: self.indexed.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
        }
    }
}

impl ImportObserver for ProgressTracker {
    fn on_start(&self, index: &str, estimate: Option<u64>) {
        if let Some(total) = estimate {
            self.total.store(total, Ordering::Relaxed);
            self.has_total.store(true, Ordering::Release);
        }
        match estimate {
            Some(total) => info!("reindex: importing ~{} records into {}", total, index),
            None => info!("reindex: importing into {} (size unknown)", index),
        }
    }

    fn on_unit_finished(&self, outcome: &WorkOutcome) {
        self.processed.fetch_add(outcome.batch.size, Ordering::Relaxed);

        let applied = match &outcome.result {
            Ok(summary) => *summary,
            Err(err) => {
                self.failed_batches.fetch_add(1, Ordering::Relaxed);
                err.succeeded()
            }
        };
        self.indexed.fetch_add(applied.indexed, Ordering::Relaxed);
        self.deleted.fetch_add(applied.deleted, Ordering::Relaxed);

        let snapshot = self.snapshot();
        match snapshot.percent() {
            Some(percent) => info!(
                "reindex: progress {}/{} records ({:.1}%)",
                snapshot.processed,
                snapshot.total.unwrap_or_default(),
                percent
            ),
            None => info!("reindex: progress {} records", snapshot.processed),
        }
    }
}
