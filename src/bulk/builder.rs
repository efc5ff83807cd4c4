use crate::bulk::classify::{Classification, Classifier};
use crate::bulk::operation::{BulkRequest, Operation};
use crate::source::{Batch, Record};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Maps a record onto the document stored in the index.
pub type Projection<R> = Arc<dyn Fn(&R) -> Value + Send + Sync>;

/// Everything the pipeline needs to know about the index being rebuilt.
pub struct IndexTarget<R> {
    name: String,
    classifier: Arc<dyn Classifier<R>>,
    projection: Projection<R>,
}

impl<R> IndexTarget<R> {
    pub fn new<C, P>(name: impl Into<String>, classifier: C, projection: P) -> Self
    where
        C: Classifier<R> + 'static,
        P: Fn(&R) -> Value + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            classifier: Arc::new(classifier),
            projection: Arc::new(projection),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn classify(&self, record: &R) -> Classification {
        self.classifier.classify(record)
    }

    pub fn project(&self, record: &R) -> Value {
        (self.projection)(record)
    }
}

impl<R> Clone for IndexTarget<R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            classifier: Arc::clone(&self.classifier),
            projection: Arc::clone(&self.projection),
        }
    }
}

impl<R> fmt::Debug for IndexTarget<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexTarget")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Builds bulk requests for one index. Pure; performs no I/O.
#[derive(Debug)]
pub struct BulkOperationBuilder<R> {
    target: IndexTarget<R>,
}

impl<R> Clone for BulkOperationBuilder<R> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
        }
    }
}

impl<R: Record> BulkOperationBuilder<R> {
    pub fn new(target: IndexTarget<R>) -> Self {
        Self { target }
    }

    pub fn index(&self) -> &str {
        self.target.name()
    }

    pub fn target(&self) -> &IndexTarget<R> {
        &self.target
    }

    pub fn build(&self, batch: &Batch<R>) -> BulkRequest {
        self.build_records(&batch.records)
    }

    /// Operations come out in the same order as `records`.
    pub fn build_records(&self, records: &[R]) -> BulkRequest {
        let operations = records
            .iter()
            .map(|record| self.operation_for(record))
            .collect();

        BulkRequest::new(self.target.name(), operations)
    }

    fn operation_for(&self, record: &R) -> Operation {
        match self.target.classify(record) {
            Classification::Delete => Operation::Delete { id: record.id() },
            Classification::Upsert => Operation::Upsert {
                id: record.id(),
                document: self.target.project(record),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::operation::OperationKind;
    use serde_json::json;

    #[derive(Debug, Clone)]
    struct Tag {
        id: u32,
        name: &'static str,
        deleted: bool,
    }

    impl Record for Tag {
        fn id(&self) -> String {
            self.id.to_string()
        }
    }

    fn builder() -> BulkOperationBuilder<Tag> {
        BulkOperationBuilder::new(IndexTarget::new(
            "tags",
            |tag: &Tag| {
                if tag.deleted {
                    Classification::Delete
                } else {
                    Classification::Upsert
                }
            },
            |tag: &Tag| json!({ "name": tag.name }),
        ))
    }

    #[test]
    fn deleted_records_become_deletes() {
        let batch = Batch::new(
            0,
            vec![Tag {
                id: 3,
                name: "gone",
                deleted: true,
            }],
        );

        let request = builder().build(&batch);
        assert_eq!(
            request.operations,
            vec![Operation::Delete { id: "3".into() }]
        );
    }

    #[test]
    fn live_records_become_upserts_with_projection() {
        let batch = Batch::new(
            0,
            vec![Tag {
                id: 4,
                name: "rust",
                deleted: false,
            }],
        );

        let request = builder().build(&batch);
        assert_eq!(request.index, "tags");
        assert_eq!(
            request.operations,
            vec![Operation::Upsert {
                id: "4".into(),
                document: json!({ "name": "rust" }),
            }]
        );
    }

    #[test]
    fn build_preserves_batch_order() {
        let records: Vec<Tag> = (0..20)
            .map(|id| Tag {
                id,
                name: "t",
                deleted: id % 3 == 0,
            })
            .collect();

        let request = builder().build_records(&records);
        let ids: Vec<String> = request.ids().into_iter().map(String::from).collect();
        let expected: Vec<String> = (0..20).map(|id| id.to_string()).collect();

        assert_eq!(ids, expected);
        assert_eq!(request.delete_count(), 7);
        assert!(
            request
                .operations
                .iter()
                .filter(|op| op.kind() == OperationKind::Delete)
                .all(|op| op.id().parse::<u32>().unwrap() % 3 == 0)
        );
    }

    #[test]
    fn empty_batch_builds_empty_request() {
        let request = builder().build_records(&[]);
        assert!(request.is_empty());
        assert_eq!(request.index, "tags");
    }
}
