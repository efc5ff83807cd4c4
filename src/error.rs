use crate::bulk::{BulkSummary, OperationKind};
use crate::import::ImportReport;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while scanning the record store. Fatal to an import run.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid source query: {0}")]
    InvalidQuery(String),
    #[error("record source failed: {0}")]
    Other(String),
}

/// Errors raised when a bulk call cannot reach or complete against the search engine.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("search engine HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("search engine returned status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("search engine request timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed search engine response: {0}")]
    Malformed(String),
}

impl TransportError {
    pub fn status(status: StatusCode, body: String) -> Self {
        TransportError::Status { status, body }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        TransportError::Malformed(message.into())
    }
}

/// A single operation the search engine rejected inside an otherwise successful bulk call.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FailedOperation {
    pub id: String,
    pub kind: OperationKind,
    pub status: u16,
    pub reason: String,
}

/// The engine accepted the bulk call but rejected some of its operations.
///
/// `indexed` and `deleted` count the operations that did succeed.
#[derive(Debug, Error)]
#[error("bulk request partially failed: {} operations rejected", .failed.len())]
pub struct PartialBulkError {
    pub indexed: usize,
    pub deleted: usize,
    pub failed: Vec<FailedOperation>,
}

impl PartialBulkError {
    pub fn failed_ids(&self) -> Vec<String> {
        self.failed.iter().map(|op| op.id.clone()).collect()
    }

    pub fn succeeded(&self) -> BulkSummary {
        BulkSummary {
            indexed: self.indexed,
            deleted: self.deleted,
        }
    }
}

#[derive(Debug, Error)]
pub enum BulkError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Partial(#[from] PartialBulkError),
}

/// Terminal failure of one scheduled work unit.
#[derive(Debug, Error)]
pub enum WorkUnitError {
    #[error(transparent)]
    Bulk(#[from] BulkError),
    #[error("work unit aborted: {0}")]
    Aborted(String),
}

impl WorkUnitError {
    /// Counts for the part of the batch that was applied despite the failure.
    pub fn succeeded(&self) -> BulkSummary {
        match self {
            WorkUnitError::Bulk(BulkError::Partial(partial)) => partial.succeeded(),
            _ => BulkSummary::default(),
        }
    }

    pub fn failed_ids(&self) -> Vec<String> {
        match self {
            WorkUnitError::Bulk(BulkError::Partial(partial)) => partial.failed_ids(),
            _ => Vec::new(),
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, WorkUnitError::Bulk(BulkError::Partial(_)))
    }
}

impl From<TransportError> for WorkUnitError {
    fn from(err: TransportError) -> Self {
        WorkUnitError::Bulk(BulkError::Transport(err))
    }
}

impl From<PartialBulkError> for WorkUnitError {
    fn from(err: PartialBulkError) -> Self {
        WorkUnitError::Bulk(BulkError::Partial(err))
    }
}

/// One or more batches failed; the report lists exactly which ones.
#[derive(Debug, Error)]
#[error(
    "{} of {} batches failed for index {}",
    .report.failed_batches.len(),
    .report.batches,
    .report.index
)]
pub struct ImportAggregateError {
    pub report: ImportReport,
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Aggregate(#[from] ImportAggregateError),
    #[error("record source failed after {} batches: {error}", .report.batches)]
    Source {
        #[source]
        error: SourceError,
        report: ImportReport,
    },
    #[error("import interrupted after {} batches", .report.batches)]
    Interrupted { report: ImportReport },
}

impl ImportError {
    /// The report as it stood when the run ended, with every unit that was admitted accounted for.
    pub fn report(&self) -> &ImportReport {
        match self {
            ImportError::Aggregate(err) => &err.report,
            ImportError::Source { report, .. } => report,
            ImportError::Interrupted { report } => report,
        }
    }

    pub fn into_report(self) -> ImportReport {
        match self {
            ImportError::Aggregate(err) => err.report,
            ImportError::Source { report, .. } => report,
            ImportError::Interrupted { report } => report,
        }
    }
}

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("failed to scan index: {0}")]
    Scan(#[source] TransportError),
    #[error(transparent)]
    Source(#[from] SourceError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}
