use crate::bulk::operation::BulkRequest;
use crate::error::BulkError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Per-request outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkSummary {
    pub indexed: usize,
    pub deleted: usize,
}

impl BulkSummary {
    pub fn new(indexed: usize, deleted: usize) -> Self {
        Self { indexed, deleted }
    }
}

impl AddAssign for BulkSummary {
    fn add_assign(&mut self, other: BulkSummary) {
        self.indexed += other.indexed;
        self.deleted += other.deleted;
    }
}

/// Submits one bulk request to the search engine.
///
/// Implementations are shared by every in-flight work unit and must be safe
/// for concurrent use. A call that cannot complete returns
/// `BulkError::Transport`; a call the engine accepted but where some
/// operations were rejected returns `BulkError::Partial` carrying the counts
/// of the operations that did succeed.
#[async_trait]
pub trait BulkExecutor: Send + Sync {
    async fn execute(&self, request: BulkRequest) -> Result<BulkSummary, BulkError>;
}
