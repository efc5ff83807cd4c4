//! Import run accounting.
//!
//! Tracks what every work unit contributed so the caller can tell exactly
//! which batches need a re-run.

use crate::import::scheduler::WorkOutcome;
use crate::source::{Batch, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies one batch of a run well enough to re-submit it on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRef {
    pub sequence: usize,
    pub size: usize,
    pub first_id: Option<String>,
    pub last_id: Option<String>,
}

impl BatchRef {
    pub fn of<R: Record>(batch: &Batch<R>) -> Self {
        Self {
            sequence: batch.sequence,
            size: batch.len(),
            first_id: batch.records.first().map(Record::id),
            last_id: batch.records.last().map(Record::id),
        }
    }
}

impl fmt::Display for BatchRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch #{} ({} records", self.sequence, self.size)?;
        if let (Some(first), Some(last)) = (&self.first_id, &self.last_id) {
            write!(f, ", ids {}..={}", first, last)?;
        }
        write!(f, ")")
    }
}

/// A batch that did not apply cleanly.
#[derive(Debug, Clone, Serialize)]
pub struct FailedBatch {
    pub batch: BatchRef,
    pub error: String,
    /// Operations the engine rejected; empty when the whole call failed.
    pub failed_ids: Vec<String>,
    /// Some operations of the batch were applied and are included in the totals.
    pub partial: bool,
}

/// Aggregate result of an import run.
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub run_id: Uuid,
    pub index: String,
    pub total_indexed: usize,
    pub total_deleted: usize,
    /// Batches admitted to the scheduler.
    pub batches: usize,
    /// Records in admitted batches.
    pub records: usize,
    pub failed_batches: Vec<FailedBatch>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// The source reported End; no records were left unread.
    pub source_exhausted: bool,
    /// The run was cancelled before the source was exhausted.
    pub interrupted: bool,
    /// Last id of the last admitted batch when the run stopped early. A
    /// follow-up run starting after this id picks up the unread records.
    pub resume_after: Option<String>,
}

impl ImportReport {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            index: index.into(),
            total_indexed: 0,
            total_deleted: 0,
            batches: 0,
            records: 0,
            failed_batches: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            source_exhausted: false,
            interrupted: false,
            resume_after: None,
        }
    }

    /// Fold one terminal work unit into the totals.
    ///
    /// Successful units add their counts. Partially failed units add the
    /// counts of the operations that did apply and are listed as failed.
    /// Units that failed outright add nothing and are listed as failed.
    pub fn record(&mut self, outcome: WorkOutcome) {
        self.batches += 1;
        self.records += outcome.batch.size;

        match outcome.result {
            Ok(summary) => {
                self.total_indexed += summary.indexed;
                self.total_deleted += summary.deleted;
            }
            Err(err) => {
                let applied = err.succeeded();
                self.total_indexed += applied.indexed;
                self.total_deleted += applied.deleted;
                self.failed_batches.push(FailedBatch {
                    batch: outcome.batch,
                    error: err.to_string(),
                    failed_ids: err.failed_ids(),
                    partial: err.is_partial(),
                });
            }
        }
    }

    pub fn finish(&mut self) {
        self.failed_batches.sort_by_key(|failed| failed.batch.sequence);
        self.finished_at = Some(Utc::now());
    }

    pub fn is_success(&self) -> bool {
        self.failed_batches.is_empty() && !self.interrupted
    }

    pub fn failed_refs(&self) -> Vec<&BatchRef> {
        self.failed_batches.iter().map(|failed| &failed.batch).collect()
    }

    pub fn elapsed_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|finished| (finished - self.started_at).num_milliseconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::{BulkSummary, OperationKind};
    use crate::error::{FailedOperation, PartialBulkError, TransportError, WorkUnitError};
    use std::time::Duration;

    fn batch_ref(sequence: usize, size: usize) -> BatchRef {
        BatchRef {
            sequence,
            size,
            first_id: Some((sequence * size + 1).to_string()),
            last_id: Some(((sequence + 1) * size).to_string()),
        }
    }

    #[test]
    fn successful_units_add_their_counts() {
        let mut report = ImportReport::new("tags");
        report.record(WorkOutcome {
            batch: batch_ref(0, 10),
            result: Ok(BulkSummary::new(8, 2)),
        });
        report.record(WorkOutcome {
            batch: batch_ref(1, 10),
            result: Ok(BulkSummary::new(10, 0)),
        });
        report.finish();

        assert_eq!(report.total_indexed, 18);
        assert_eq!(report.total_deleted, 2);
        assert_eq!(report.batches, 2);
        assert_eq!(report.records, 20);
        assert_eq!(report.resume_after, None);
        assert!(report.is_success());
        assert!(report.elapsed_ms().is_some());
    }

    #[test]
    fn transport_failures_add_nothing() {
        let mut report = ImportReport::new("tags");
        report.record(WorkOutcome {
            batch: batch_ref(0, 10),
            result: Err(TransportError::Timeout(Duration::from_secs(1)).into()),
        });

        assert_eq!(report.total_indexed, 0);
        assert_eq!(report.failed_batches.len(), 1);
        assert!(!report.failed_batches[0].partial);
        assert!(report.failed_batches[0].failed_ids.is_empty());
        assert!(!report.is_success());
    }

    #[test]
    fn partial_failures_add_applied_counts() {
        let mut report = ImportReport::new("tags");
        let partial = PartialBulkError {
            indexed: 7,
            deleted: 1,
            failed: vec![FailedOperation {
                id: "5".into(),
                kind: OperationKind::Upsert,
                status: 400,
                reason: "mapper_parsing_exception".into(),
            }],
        };
        report.record(WorkOutcome {
            batch: batch_ref(0, 9),
            result: Err(WorkUnitError::from(partial)),
        });

        assert_eq!(report.total_indexed, 7);
        assert_eq!(report.total_deleted, 1);
        assert_eq!(report.failed_batches[0].failed_ids, vec!["5".to_string()]);
        assert!(report.failed_batches[0].partial);
    }

    #[test]
    fn failed_batches_are_sorted_by_sequence() {
        let mut report = ImportReport::new("tags");
        for sequence in [3, 1, 2] {
            report.record(WorkOutcome {
                batch: batch_ref(sequence, 5),
                result: Err(WorkUnitError::Aborted("panic".into())),
            });
        }
        report.finish();

        let order: Vec<usize> = report.failed_refs().iter().map(|b| b.sequence).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn batch_ref_display_includes_id_range() {
        assert_eq!(
            batch_ref(2, 100).to_string(),
            "batch #2 (100 records, ids 201..=300)"
        );
    }
}
