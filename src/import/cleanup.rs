//! Removal of index documents whose record is gone or no longer indexable.
//!
//! An import only touches records that still exist in the store, so rows that
//! were hard-deleted leave orphaned documents behind. The sweeper walks every
//! id in the index, checks it against the store and deletes what is stale.

use crate::bulk::{BulkExecutor, BulkRequest, Classification, IndexTarget, Operation};
use crate::error::{BulkError, CleanupError, TransportError};
use crate::source::{Record, RecordLookup};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// One page of document ids and the cursor for the next one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdPage {
    pub ids: Vec<String>,
    pub cursor: Option<String>,
}

/// Pages through the ids of every document in an index.
#[async_trait]
pub trait IndexScanner: Send + Sync {
    async fn open_scan(&self, index: &str, page_size: usize) -> Result<IdPage, TransportError>;

    async fn next_page(&self, cursor: &str) -> Result<IdPage, TransportError>;

    /// Release server-side scan state. Called once, whether or not the scan finished.
    async fn close_scan(&self, cursor: &str) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub index: String,
    pub scanned: usize,
    pub deleted: usize,
    /// Stale ids whose delete did not go through; the next sweep picks them up again.
    pub failed_ids: Vec<String>,
}

impl CleanupReport {
    pub fn is_success(&self) -> bool {
        self.failed_ids.is_empty()
    }
}

pub struct StaleDocumentSweeper<R> {
    target: IndexTarget<R>,
    scanner: Arc<dyn IndexScanner>,
    executor: Arc<dyn BulkExecutor>,
    page_size: usize,
}

impl<R: Record> StaleDocumentSweeper<R> {
    pub fn new(
        target: IndexTarget<R>,
        scanner: Arc<dyn IndexScanner>,
        executor: Arc<dyn BulkExecutor>,
        page_size: usize,
    ) -> Self {
        Self {
            target,
            scanner,
            executor,
            page_size: page_size.max(1),
        }
    }

    pub async fn sweep<L>(&self, lookup: &L) -> Result<CleanupReport, CleanupError>
    where
        L: RecordLookup<Record = R>,
    {
        let index = self.target.name();
        let mut report = CleanupReport {
            index: index.to_string(),
            ..CleanupReport::default()
        };

        info!("cleanup: scanning index {} for stale documents", index);
        let mut page = self
            .scanner
            .open_scan(index, self.page_size)
            .await
            .map_err(CleanupError::Scan)?;
        let mut cursor = page.cursor.clone();

        let result = loop {
            if page.ids.is_empty() {
                break Ok(());
            }
            report.scanned += page.ids.len();

            if let Err(err) = self.sweep_page(lookup, &page.ids, &mut report).await {
                break Err(err);
            }

            let Some(next) = page.cursor.as_deref() else {
                break Ok(());
            };
            page = match self.scanner.next_page(next).await {
                Ok(page) => page,
                Err(err) => break Err(CleanupError::Scan(err)),
            };
            if page.cursor.is_some() {
                cursor = page.cursor.clone();
            }
        };

        if let Some(cursor) = cursor {
            if let Err(err) = self.scanner.close_scan(&cursor).await {
                warn!("cleanup: failed to release scan of {}: {}", index, err);
            }
        }

        result?;
        info!(
            "cleanup: index {} scanned {} documents, deleted {}, {} failed",
            index,
            report.scanned,
            report.deleted,
            report.failed_ids.len()
        );
        Ok(report)
    }

    async fn sweep_page<L>(
        &self,
        lookup: &L,
        ids: &[String],
        report: &mut CleanupReport,
    ) -> Result<(), CleanupError>
    where
        L: RecordLookup<Record = R>,
    {
        let live: HashSet<String> = lookup
            .find_by_ids(ids)
            .await?
            .iter()
            .filter(|record| self.target.classify(record) == Classification::Upsert)
            .map(Record::id)
            .collect();

        let stale: Vec<Operation> = ids
            .iter()
            .filter(|id| !live.contains(*id))
            .map(|id| Operation::Delete { id: id.clone() })
            .collect();
        if stale.is_empty() {
            return Ok(());
        }

        debug!("cleanup: deleting {} stale documents", stale.len());
        let request = BulkRequest::new(self.target.name(), stale);
        let stale_ids: Vec<String> = request.ids().into_iter().map(String::from).collect();

        match self.executor.execute(request).await {
            Ok(summary) => report.deleted += summary.deleted,
            Err(BulkError::Partial(partial)) => {
                warn!(
                    "cleanup: {} of {} deletes rejected",
                    partial.failed.len(),
                    stale_ids.len()
                );
                report.deleted += partial.deleted;
                report.failed_ids.extend(partial.failed_ids());
            }
            Err(BulkError::Transport(err)) => {
                warn!("cleanup: delete of {} documents failed: {}", stale_ids.len(), err);
                report.failed_ids.extend(stale_ids);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::{BulkSummary, FieldClassifier};
    use crate::source::{JsonRecord, VecRecordSource};
    use serde_json::json;
    use std::sync::Mutex;

    /// Serves fixed pages; cursors are page numbers.
    struct PagedScanner {
        pages: Vec<Vec<String>>,
        closed: Mutex<Vec<String>>,
        fail_at: Option<usize>,
    }

    impl PagedScanner {
        fn new(pages: Vec<Vec<&str>>) -> Self {
            Self {
                pages: pages
                    .into_iter()
                    .map(|page| page.into_iter().map(String::from).collect())
                    .collect(),
                closed: Mutex::new(Vec::new()),
                fail_at: None,
            }
        }

        fn page(&self, number: usize) -> Result<IdPage, TransportError> {
            if self.fail_at == Some(number) {
                return Err(TransportError::malformed("scroll expired"));
            }
            Ok(IdPage {
                ids: self.pages.get(number).cloned().unwrap_or_default(),
                cursor: Some((number + 1).to_string()),
            })
        }
    }

    #[async_trait]
    impl IndexScanner for PagedScanner {
        async fn open_scan(&self, _index: &str, _page_size: usize) -> Result<IdPage, TransportError> {
            self.page(0)
        }

        async fn next_page(&self, cursor: &str) -> Result<IdPage, TransportError> {
            self.page(cursor.parse().unwrap())
        }

        async fn close_scan(&self, cursor: &str) -> Result<(), TransportError> {
            self.closed.lock().unwrap().push(cursor.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct DeleteRecorder {
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BulkExecutor for DeleteRecorder {
        async fn execute(&self, request: BulkRequest) -> Result<BulkSummary, BulkError> {
            let mut deleted = self.deleted.lock().unwrap();
            deleted.extend(request.ids().into_iter().map(String::from));
            Ok(BulkSummary::new(0, request.delete_count()))
        }
    }

    fn target() -> IndexTarget<JsonRecord> {
        IndexTarget::new(
            "tags",
            FieldClassifier::new().delete_when_false("listable"),
            |record: &JsonRecord| record.data.clone(),
        )
    }

    fn store() -> VecRecordSource<JsonRecord> {
        VecRecordSource::new(vec![
            JsonRecord::new(1, json!({ "listable": true })),
            JsonRecord::new(2, json!({ "listable": false })),
            JsonRecord::new(4, json!({ "listable": true })),
        ])
    }

    #[tokio::test]
    async fn deletes_missing_and_excluded_records() {
        let scanner = Arc::new(PagedScanner::new(vec![vec!["1", "2", "3"], vec!["4", "5"]]));
        let executor = Arc::new(DeleteRecorder::default());
        let sweeper = StaleDocumentSweeper::new(target(), scanner.clone(), executor.clone(), 3);

        let report = sweeper.sweep(&store()).await.unwrap();

        assert_eq!(report.scanned, 5);
        assert_eq!(report.deleted, 3);
        assert!(report.is_success());
        assert_eq!(*executor.deleted.lock().unwrap(), vec!["2", "3", "5"]);
        assert_eq!(scanner.closed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn scan_failure_still_releases_the_cursor() {
        let mut scanner = PagedScanner::new(vec![vec!["1", "3"], vec!["4"]]);
        scanner.fail_at = Some(1);
        let scanner = Arc::new(scanner);
        let executor = Arc::new(DeleteRecorder::default());
        let sweeper = StaleDocumentSweeper::new(target(), scanner.clone(), executor.clone(), 2);

        let err = sweeper.sweep(&store()).await.unwrap_err();

        assert!(matches!(err, CleanupError::Scan(_)));
        assert_eq!(*executor.deleted.lock().unwrap(), vec!["3"]);
        assert_eq!(*scanner.closed.lock().unwrap(), vec!["1"]);
    }
}
