//! Bounded work-unit scheduler.
//!
//! Every admitted batch becomes one task that builds its bulk request and
//! submits it. At most `concurrency` tasks exist at any time; admitting one
//! more waits for a running task to finish.

use crate::bulk::{BulkExecutor, BulkOperationBuilder, BulkSummary};
use crate::error::WorkUnitError;
use crate::import::progress::ImportObserver;
use crate::import::stats::BatchRef;
use crate::source::{Batch, Record};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Terminal state of one work unit.
#[derive(Debug)]
pub struct WorkOutcome {
    pub batch: BatchRef,
    pub result: Result<BulkSummary, WorkUnitError>,
}

impl WorkOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn is_partial_failure(&self) -> bool {
        matches!(&self.result, Err(err) if err.is_partial())
    }
}

pub struct WorkScheduler<R> {
    builder: Arc<BulkOperationBuilder<R>>,
    executor: Arc<dyn BulkExecutor>,
    concurrency: usize,
    tasks: JoinSet<WorkOutcome>,
    pending: HashMap<Id, BatchRef>,
    completed: Vec<WorkOutcome>,
    submitted: usize,
    partial_failures: usize,
    observer: Option<Arc<dyn ImportObserver>>,
}

impl<R: Record> WorkScheduler<R> {
    pub fn new(
        builder: BulkOperationBuilder<R>,
        executor: Arc<dyn BulkExecutor>,
        concurrency: usize,
    ) -> Self {
        Self {
            builder: Arc::new(builder),
            executor,
            concurrency: concurrency.max(1),
            tasks: JoinSet::new(),
            pending: HashMap::new(),
            completed: Vec::new(),
            submitted: 0,
            partial_failures: 0,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ImportObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Admit a batch, waiting while the scheduler is at capacity.
    pub async fn submit(&mut self, batch: Batch<R>) {
        self.reap_finished();
        while self.tasks.len() >= self.concurrency {
            if let Some(joined) = self.tasks.join_next_with_id().await {
                self.collect(joined);
            }
        }
        self.spawn(batch);
    }

    /// Like [`submit`](Self::submit), but gives up if `token` fires while
    /// waiting for capacity. Returns whether the batch was admitted.
    pub async fn submit_or_cancel(&mut self, batch: Batch<R>, token: &CancellationToken) -> bool {
        self.reap_finished();
        while self.tasks.len() >= self.concurrency {
            tokio::select! {
                biased;
                _ = token.cancelled() => return false,
                joined = self.tasks.join_next_with_id() => {
                    if let Some(joined) = joined {
                        self.collect(joined);
                    }
                }
            }
        }

        if token.is_cancelled() {
            return false;
        }
        self.spawn(batch);
        true
    }

    /// Block until every admitted unit is terminal and hand back all outcomes.
    pub async fn wait_all(mut self) -> Vec<WorkOutcome> {
        while let Some(joined) = self.tasks.join_next_with_id().await {
            self.collect(joined);
        }
        self.completed
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// Units collected so far that the engine partially rejected.
    pub fn partial_failures(&self) -> usize {
        self.partial_failures
    }

    /// Outcomes collected so far; units still running are not included.
    pub fn completed(&self) -> &[WorkOutcome] {
        &self.completed
    }

    fn spawn(&mut self, batch: Batch<R>) {
        let batch_ref = BatchRef::of(&batch);
        let unit_ref = batch_ref.clone();
        let builder = Arc::clone(&self.builder);
        let executor = Arc::clone(&self.executor);

        debug!("reindex: admitting {}", batch_ref);

        let handle = self.tasks.spawn(async move {
            let request = builder.build(&batch);
            drop(batch);
            let result = executor
                .execute(request)
                .await
                .map_err(WorkUnitError::from);
            WorkOutcome {
                batch: unit_ref,
                result,
            }
        });

        self.pending.insert(handle.id(), batch_ref);
        self.submitted += 1;
    }

    fn reap_finished(&mut self) {
        while let Some(joined) = self.tasks.try_join_next_with_id() {
            self.collect(joined);
        }
    }

    fn collect(&mut self, joined: Result<(Id, WorkOutcome), JoinError>) {
        let outcome = match joined {
            Ok((id, outcome)) => {
                self.pending.remove(&id);
                outcome
            }
            Err(err) => {
                let batch = self.pending.remove(&err.id()).unwrap_or_default();
                let reason = if err.is_panic() {
                    "work unit panicked"
                } else {
                    "work unit was cancelled"
                };
                WorkOutcome {
                    batch,
                    result: Err(WorkUnitError::Aborted(reason.to_string())),
                }
            }
        };

        if outcome.is_partial_failure() {
            self.partial_failures += 1;
        }

        match &outcome.result {
            Ok(summary) => debug!(
                "reindex: {} done ({} indexed, {} deleted)",
                outcome.batch, summary.indexed, summary.deleted
            ),
            Err(err) => warn!("reindex: {} failed: {}", outcome.batch, err),
        }

        if let Some(observer) = &self.observer {
            observer.on_unit_finished(&outcome);
        }
        self.completed.push(outcome);
    }
}
