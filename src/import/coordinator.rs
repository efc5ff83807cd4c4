use crate::bulk::{BulkExecutor, BulkOperationBuilder, IndexTarget};
use crate::config::{ImportOptions, PartialFailurePolicy};
use crate::error::{ImportAggregateError, ImportError};
use crate::import::progress::ImportObserver;
use crate::import::scheduler::WorkScheduler;
use crate::import::stats::ImportReport;
use crate::source::{Batch, Record, RecordSource};
use log::{error, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Drives one import run: pulls batches from a source, fans them out to the
/// scheduler and folds every outcome into an [`ImportReport`].
///
/// The coordinator never retries. A failed batch is listed in the report with
/// enough information to re-run just that id range.
pub struct ImportCoordinator<R> {
    builder: BulkOperationBuilder<R>,
    executor: Arc<dyn BulkExecutor>,
    options: ImportOptions,
    observer: Option<Arc<dyn ImportObserver>>,
}

impl<R: Record> ImportCoordinator<R> {
    pub fn new(
        target: IndexTarget<R>,
        executor: Arc<dyn BulkExecutor>,
        options: ImportOptions,
    ) -> Self {
        Self {
            builder: BulkOperationBuilder::new(target),
            executor,
            options,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ImportObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn index(&self) -> &str {
        self.builder.index()
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    /// Import every record of `source` into the target index.
    pub async fn import<S>(&self, source: &mut S) -> Result<ImportReport, ImportError>
    where
        S: RecordSource<Record = R>,
    {
        self.import_with_cancel(source, &CancellationToken::new()).await
    }

    /// Import with cooperative cancellation. Once `token` fires no new batch
    /// is admitted; units already in flight run to completion and are counted.
    pub async fn import_with_cancel<S>(
        &self,
        source: &mut S,
        token: &CancellationToken,
    ) -> Result<ImportReport, ImportError>
    where
        S: RecordSource<Record = R>,
    {
        let mut report = ImportReport::new(self.index());

        let estimate = match source.estimate().await {
            Ok(estimate) => estimate,
            Err(err) => {
                warn!("reindex: could not estimate size of {}: {}", self.index(), err);
                None
            }
        };
        info!(
            "reindex: run {} started for index {} (batch size {}, concurrency {}, estimate {})",
            report.run_id,
            self.index(),
            self.options.batch_size,
            self.options.concurrency,
            estimate.map_or_else(|| "unknown".to_string(), |n| n.to_string())
        );
        if let Some(observer) = &self.observer {
            observer.on_start(self.index(), estimate);
        }

        let mut scheduler = WorkScheduler::new(
            self.builder.clone(),
            Arc::clone(&self.executor),
            self.options.concurrency,
        );
        if let Some(observer) = &self.observer {
            scheduler = scheduler.with_observer(Arc::clone(observer));
        }

        let batch_size = self.options.batch_size.max(1);
        let fail_fast = self.options.partial_failure == PartialFailurePolicy::Abort;
        let mut sequence = 0;
        let mut source_error = None;
        let mut last_admitted: Option<String> = None;

        loop {
            if token.is_cancelled() {
                report.interrupted = true;
                break;
            }

            if fail_fast && scheduler.partial_failures() > 0 {
                warn!("reindex: partial failure with fail-fast set; no further batches admitted");
                break;
            }

            let records = match source.next_batch(batch_size).await {
                Ok(Some(records)) if !records.is_empty() => records,
                Ok(_) => {
                    report.source_exhausted = true;
                    break;
                }
                Err(err) => {
                    error!("reindex: record source failed after {} batches: {}", sequence, err);
                    source_error = Some(err);
                    break;
                }
            };

            let batch = Batch::new(sequence, records);
            let last_id = batch.records.last().map(Record::id);
            if !scheduler.submit_or_cancel(batch, token).await {
                warn!("reindex: batch #{} was pulled but not admitted", sequence);
                report.interrupted = true;
                break;
            }
            last_admitted = last_id;
            sequence += 1;
        }

        if !report.source_exhausted {
            report.resume_after = last_admitted;
        }
        if scheduler.in_flight() > 0 {
            info!("reindex: waiting for {} in-flight units", scheduler.in_flight());
        }
        for outcome in scheduler.wait_all().await {
            report.record(outcome);
        }
        report.finish();

        info!(
            "reindex: run {} finished for index {}: {} batches, {} indexed, {} deleted, {} failed batches in {}ms",
            report.run_id,
            report.index,
            report.batches,
            report.total_indexed,
            report.total_deleted,
            report.failed_batches.len(),
            report.elapsed_ms().unwrap_or_default()
        );

        if let Some(error) = source_error {
            return Err(ImportError::Source { error, report });
        }
        if report.interrupted {
            warn!(
                "reindex: run {} interrupted before the source was exhausted",
                report.run_id
            );
            return Err(ImportError::Interrupted { report });
        }
        if !report.failed_batches.is_empty() {
            for failed in &report.failed_batches {
                warn!("reindex: {} needs a re-run: {}", failed.batch, failed.error);
            }
            return Err(ImportAggregateError { report }.into());
        }

        Ok(report)
    }
}
