use crate::source::JsonRecord;
use serde_json::Value;

/// Whether a record should be present in or absent from the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Upsert,
    Delete,
}

/// Per-index rule deciding what happens to a record in the index.
pub trait Classifier<R>: Send + Sync {
    fn classify(&self, record: &R) -> Classification;
}

impl<R, F> Classifier<R> for F
where
    F: Fn(&R) -> Classification + Send + Sync,
{
    fn classify(&self, record: &R) -> Classification {
        self(record)
    }
}

/// Indexes every record it sees.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexAll;

impl<R> Classifier<R> for IndexAll {
    fn classify(&self, _record: &R) -> Classification {
        Classification::Upsert
    }
}

/// Column-driven rule for rows read as JSON.
///
/// A row is deleted from the index when any `delete_when_set` field holds a
/// non-null value (a `deleted_at` timestamp, say) or when any
/// `delete_when_false` field is not `true` (a `listable` flag that was cleared).
#[derive(Debug, Clone, Default)]
pub struct FieldClassifier {
    delete_when_set: Vec<String>,
    delete_when_false: Vec<String>,
}

impl FieldClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delete_when_set(mut self, field: impl Into<String>) -> Self {
        self.delete_when_set.push(field.into());
        self
    }

    pub fn delete_when_false(mut self, field: impl Into<String>) -> Self {
        self.delete_when_false.push(field.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.delete_when_set.is_empty() && self.delete_when_false.is_empty()
    }
}

impl Classifier<JsonRecord> for FieldClassifier {
    fn classify(&self, record: &JsonRecord) -> Classification {
        let soft_deleted = self
            .delete_when_set
            .iter()
            .any(|field| !matches!(record.field(field), None | Some(Value::Null)));

        let excluded = self
            .delete_when_false
            .iter()
            .any(|field| !matches!(record.field(field), Some(Value::Bool(true))));

        if soft_deleted || excluded {
            Classification::Delete
        } else {
            Classification::Upsert
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(data: Value) -> JsonRecord {
        JsonRecord::new(1, data)
    }

    #[test]
    fn closures_act_as_classifiers() {
        let classifier = |value: &i32| {
            if *value < 0 {
                Classification::Delete
            } else {
                Classification::Upsert
            }
        };

        assert_eq!(classifier.classify(&-1), Classification::Delete);
        assert_eq!(classifier.classify(&4), Classification::Upsert);
    }

    #[test]
    fn soft_deleted_rows_are_deleted() {
        let classifier = FieldClassifier::new().delete_when_set("deleted_at");

        let live = record(json!({ "name": "rust", "deleted_at": null }));
        let gone = record(json!({ "name": "perl", "deleted_at": "2024-01-01T00:00:00Z" }));

        assert_eq!(classifier.classify(&live), Classification::Upsert);
        assert_eq!(classifier.classify(&gone), Classification::Delete);
    }

    #[test]
    fn missing_set_field_counts_as_unset() {
        let classifier = FieldClassifier::new().delete_when_set("deleted_at");
        assert_eq!(
            classifier.classify(&record(json!({ "name": "rust" }))),
            Classification::Upsert
        );
    }

    #[test]
    fn cleared_flags_are_deleted() {
        let classifier = FieldClassifier::new().delete_when_false("listable");

        assert_eq!(
            classifier.classify(&record(json!({ "listable": true }))),
            Classification::Upsert
        );
        assert_eq!(
            classifier.classify(&record(json!({ "listable": false }))),
            Classification::Delete
        );
        assert_eq!(
            classifier.classify(&record(json!({ "listable": null }))),
            Classification::Delete
        );
    }

    #[test]
    fn empty_classifier_indexes_everything() {
        let classifier = FieldClassifier::new();
        assert!(classifier.is_empty());
        assert_eq!(
            classifier.classify(&record(json!({ "deleted_at": "yesterday" }))),
            Classification::Upsert
        );
    }
}
