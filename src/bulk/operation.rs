use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Upsert,
    Delete,
}

/// One index mutation, derived from a single record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    Upsert { id: String, document: Value },
    Delete { id: String },
}

impl Operation {
    pub fn id(&self) -> &str {
        match self {
            Operation::Upsert { id, .. } | Operation::Delete { id } => id,
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Upsert { .. } => OperationKind::Upsert,
            Operation::Delete { .. } => OperationKind::Delete,
        }
    }
}

/// Ordered operations for one batch, addressed to a single index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BulkRequest {
    pub index: String,
    pub operations: Vec<Operation>,
}

impl BulkRequest {
    pub fn new(index: impl Into<String>, operations: Vec<Operation>) -> Self {
        Self {
            index: index.into(),
            operations,
        }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn upsert_count(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| op.kind() == OperationKind::Upsert)
            .count()
    }

    pub fn delete_count(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| op.kind() == OperationKind::Delete)
            .count()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.operations.iter().map(Operation::id).collect()
    }
}
