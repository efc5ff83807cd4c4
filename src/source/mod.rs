//! Record sources feeding the reindex pipeline.
//!
//! A source is a lazy, restartable cursor over one scope of the record store.
//! Each call to `next_batch` returns the next slice of records in a stable
//! order; batches never overlap and never skip a record, and only the final
//! batch may be shorter than the requested limit.
//!
//! - **`memory`**: a cursor over records already held in memory
//! - **`postgres`**: keyset-paginated scans of a Postgres table

pub mod memory;
pub mod postgres;

use crate::error::SourceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use memory::VecRecordSource;
pub use postgres::{PgRecordSource, PgSourceQuery};

/// A domain entity the pipeline can index. Read-only to the pipeline.
pub trait Record: Send + Sync + 'static {
    /// Stable identifier, used as the document id in the index.
    fn id(&self) -> String;
}

#[async_trait]
pub trait RecordSource: Send {
    type Record: Record;

    /// Pull the next batch of at most `limit` records, or `None` once the scope is exhausted.
    async fn next_batch(&mut self, limit: usize)
    -> Result<Option<Vec<Self::Record>>, SourceError>;

    /// Approximate number of records in scope, when the source can tell cheaply.
    async fn estimate(&mut self) -> Result<Option<u64>, SourceError> {
        Ok(None)
    }
}

/// Point lookups used when reconciling the index against the store.
#[async_trait]
pub trait RecordLookup: Send + Sync {
    type Record: Record;

    /// Records that still exist for the given ids. Unknown ids are simply absent.
    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Self::Record>, SourceError>;
}

/// Records pulled in one cursor step.
#[derive(Debug, Clone)]
pub struct Batch<R> {
    /// Zero-based position of this batch within the run.
    pub sequence: usize,
    pub records: Vec<R>,
}

impl<R> Batch<R> {
    pub fn new(sequence: usize, records: Vec<R>) -> Self {
        Self { sequence, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A row read as JSON, keyed by its integer primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRecord {
    pub id: i64,
    pub data: Value,
}

impl JsonRecord {
    pub fn new(id: i64, data: Value) -> Self {
        Self { id, data }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }
}

impl Record for JsonRecord {
    fn id(&self) -> String {
        self.id.to_string()
    }
}
