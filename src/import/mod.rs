//! Import pipeline: batch fan-out, bounded work units and result aggregation.
//!
//! - **`coordinator`**: drives a run from source to report
//! - **`scheduler`**: bounded set of in-flight work units
//! - **`stats`**: report types and outcome folding
//! - **`progress`**: observer hooks and a progress tracker
//! - **`cleanup`**: sweeps index documents that no longer have a live record

pub mod cleanup;
pub mod coordinator;
pub mod progress;
pub mod scheduler;
pub mod stats;

pub use cleanup::{CleanupReport, IdPage, IndexScanner, StaleDocumentSweeper};
pub use coordinator::ImportCoordinator;
pub use progress::{ImportObserver, ProgressSnapshot, ProgressTracker};
pub use scheduler::{WorkOutcome, WorkScheduler};
pub use stats::{BatchRef, FailedBatch, ImportReport};

use crate::bulk::{BulkExecutor, IndexTarget};
use crate::config::ImportOptions;
use crate::error::ImportError;
use crate::source::{JsonRecord, PgRecordSource, PgSourceQuery};
use sqlx::PgPool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Rebuild `target` from the rows `query` selects.
///
/// An invalid query fails before anything is sent, with an empty report.
pub async fn reindex_table(
    pool: PgPool,
    query: PgSourceQuery,
    target: IndexTarget<JsonRecord>,
    executor: Arc<dyn BulkExecutor>,
    options: ImportOptions,
    observer: Option<Arc<dyn ImportObserver>>,
    token: &CancellationToken,
) -> Result<ImportReport, ImportError> {
    let index = target.name().to_string();
    let mut source = match PgRecordSource::new(pool, query) {
        Ok(source) => source,
        Err(error) => {
            let mut report = ImportReport::new(index);
            report.finish();
            return Err(ImportError::Source { error, report });
        }
    };

    let mut coordinator = ImportCoordinator::new(target, executor, options);
    if let Some(observer) = observer {
        coordinator = coordinator.with_observer(observer);
    }
    coordinator.import_with_cancel(&mut source, token).await
}
