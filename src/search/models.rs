//! Wire types for the Elasticsearch bulk and scroll APIs.

use crate::bulk::{BulkRequest, BulkSummary, Operation, OperationKind};
use crate::error::{BulkError, FailedOperation, PartialBulkError, TransportError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum BulkAction<'a> {
    Index(ActionMeta<'a>),
    Delete(ActionMeta<'a>),
}

#[derive(Debug, Serialize)]
struct ActionMeta<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_id")]
    id: &'a str,
}

/// Encode a request as the newline-delimited body `_bulk` expects.
///
/// Upserts become an `index` action followed by the document line; deletes
/// are a single `delete` action line. The body always ends with a newline.
pub fn encode_ndjson(request: &BulkRequest) -> Result<String, serde_json::Error> {
    let mut body = String::new();

    for operation in &request.operations {
        let meta = ActionMeta {
            index: &request.index,
            id: operation.id(),
        };

        match operation {
            Operation::Upsert { document, .. } => {
                body.push_str(&serde_json::to_string(&BulkAction::Index(meta))?);
                body.push('\n');
                body.push_str(&serde_json::to_string(document)?);
                body.push('\n');
            }
            Operation::Delete { .. } => {
                body.push_str(&serde_json::to_string(&BulkAction::Delete(meta))?);
                body.push('\n');
            }
        }
    }

    Ok(body)
}

#[derive(Debug, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub items: Vec<BTreeMap<String, BulkItem>>,
}

/// Result of one action; keyed in the response by the action name.
#[derive(Debug, Deserialize)]
pub struct BulkItem {
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    pub status: u16,
    #[serde(default)]
    pub error: Option<Value>,
}

/// Whether `action` is a response key the engine may use for `kind`.
fn answers(kind: OperationKind, action: &str) -> bool {
    match kind {
        OperationKind::Upsert => matches!(action, "index" | "create" | "update"),
        OperationKind::Delete => action == "delete",
    }
}

impl BulkItem {
    fn succeeded_for(&self, kind: OperationKind) -> bool {
        match kind {
            OperationKind::Upsert => (200..300).contains(&self.status),
            // Deleting an id the index never had, or already dropped, is a no-op.
            OperationKind::Delete => (200..300).contains(&self.status) || self.status == 404,
        }
    }

    fn reason(&self) -> String {
        match &self.error {
            Some(Value::Object(map)) => {
                let kind = map.get("type").and_then(Value::as_str);
                let reason = map.get("reason").and_then(Value::as_str);
                match (kind, reason) {
                    (Some(kind), Some(reason)) => format!("{kind}: {reason}"),
                    (Some(text), None) | (None, Some(text)) => text.to_string(),
                    (None, None) => Value::Object(map.clone()).to_string(),
                }
            }
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => format!("status {}", self.status),
        }
    }
}

/// Match the per-item results back to the operations that were sent.
///
/// Elasticsearch answers items in request order. A response whose item count
/// differs from the operation count, or whose item action does not match the
/// operation at the same position, cannot be attributed and is malformed.
pub fn interpret_bulk_response(
    request: &BulkRequest,
    response: BulkResponse,
) -> Result<BulkSummary, BulkError> {
    if response.items.len() != request.operations.len() {
        return Err(TransportError::malformed(format!(
            "bulk response has {} items for {} operations",
            response.items.len(),
            request.operations.len()
        ))
        .into());
    }

    let mut summary = BulkSummary::default();
    let mut failed = Vec::new();

    for (operation, entry) in request.operations.iter().zip(response.items) {
        let kind = operation.kind();
        let Some((action, item)) = entry.into_iter().next() else {
            return Err(TransportError::malformed(format!(
                "empty bulk response item for id {}",
                operation.id()
            ))
            .into());
        };
        if !answers(kind, &action) {
            return Err(TransportError::malformed(format!(
                "bulk response item `{}` does not answer {:?} of id {}",
                action,
                kind,
                operation.id()
            ))
            .into());
        }

        if item.succeeded_for(kind) {
            match kind {
                OperationKind::Upsert => summary.indexed += 1,
                OperationKind::Delete => summary.deleted += 1,
            }
        } else {
            failed.push(FailedOperation {
                id: item.id.clone().unwrap_or_else(|| operation.id().to_string()),
                kind,
                status: item.status,
                reason: item.reason(),
            });
        }
    }

    if failed.is_empty() {
        Ok(summary)
    } else {
        Err(PartialBulkError {
            indexed: summary.indexed,
            deleted: summary.deleted,
            failed,
        }
        .into())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ScrollStartRequest {
    pub size: usize,
    #[serde(rename = "_source")]
    pub source: bool,
    pub sort: [&'static str; 1],
}

#[derive(Debug, Serialize)]
pub(crate) struct ScrollContinueRequest<'a> {
    pub scroll: &'a str,
    pub scroll_id: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ClearScrollRequest<'a> {
    pub scroll_id: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScrollResponse {
    #[serde(rename = "_scroll_id", default)]
    pub scroll_id: Option<String>,
    pub hits: ScrollHits,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScrollHits {
    #[serde(default)]
    pub hits: Vec<ScrollHit>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScrollHit {
    #[serde(rename = "_id")]
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> BulkRequest {
        BulkRequest::new(
            "tags",
            vec![
                Operation::Upsert {
                    id: "1".into(),
                    document: json!({ "name": "rust" }),
                },
                Operation::Delete { id: "2".into() },
            ],
        )
    }

    fn response(value: Value) -> BulkResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn encode_writes_action_and_document_lines() {
        let body = encode_ndjson(&request()).unwrap();
        let lines: Vec<&str> = body.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(
            serde_json::from_str::<Value>(lines[0]).unwrap(),
            json!({ "index": { "_index": "tags", "_id": "1" } })
        );
        assert_eq!(
            serde_json::from_str::<Value>(lines[1]).unwrap(),
            json!({ "name": "rust" })
        );
        assert_eq!(
            serde_json::from_str::<Value>(lines[2]).unwrap(),
            json!({ "delete": { "_index": "tags", "_id": "2" } })
        );
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn successful_items_are_counted_by_kind() {
        let result = interpret_bulk_response(
            &request(),
            response(json!({
                "took": 3,
                "errors": false,
                "items": [
                    { "index": { "_id": "1", "status": 201, "result": "created" } },
                    { "delete": { "_id": "2", "status": 200, "result": "deleted" } }
                ]
            })),
        );

        assert_eq!(result.unwrap(), BulkSummary::new(1, 1));
    }

    #[test]
    fn delete_of_missing_document_counts_as_deleted() {
        let result = interpret_bulk_response(
            &request(),
            response(json!({
                "errors": false,
                "items": [
                    { "index": { "_id": "1", "status": 200, "result": "updated" } },
                    { "delete": { "_id": "2", "status": 404, "result": "not_found" } }
                ]
            })),
        );

        assert_eq!(result.unwrap(), BulkSummary::new(1, 1));
    }

    #[test]
    fn rejected_items_produce_partial_error() {
        let result = interpret_bulk_response(
            &request(),
            response(json!({
                "errors": true,
                "items": [
                    { "index": {
                        "_id": "1",
                        "status": 400,
                        "error": { "type": "mapper_parsing_exception", "reason": "failed to parse" }
                    } },
                    { "delete": { "_id": "2", "status": 200, "result": "deleted" } }
                ]
            })),
        );

        match result {
            Err(BulkError::Partial(partial)) => {
                assert_eq!(partial.indexed, 0);
                assert_eq!(partial.deleted, 1);
                assert_eq!(partial.failed_ids(), vec!["1".to_string()]);
                assert_eq!(partial.failed[0].status, 400);
                assert_eq!(
                    partial.failed[0].reason,
                    "mapper_parsing_exception: failed to parse"
                );
            }
            other => panic!("expected partial failure, got {other:?}"),
        }
    }

    #[test]
    fn item_count_mismatch_is_malformed() {
        let result = interpret_bulk_response(
            &request(),
            response(json!({ "errors": false, "items": [] })),
        );

        assert!(matches!(
            result,
            Err(BulkError::Transport(TransportError::Malformed(_)))
        ));
    }

    #[test]
    fn out_of_order_items_are_malformed() {
        let result = interpret_bulk_response(
            &request(),
            response(json!({
                "errors": false,
                "items": [
                    { "delete": { "_id": "2", "status": 200 } },
                    { "index": { "_id": "1", "status": 201 } }
                ]
            })),
        );

        assert!(matches!(
            result,
            Err(BulkError::Transport(TransportError::Malformed(_)))
        ));
    }

    #[test]
    fn create_and_update_answer_upserts() {
        assert!(answers(OperationKind::Upsert, "create"));
        assert!(answers(OperationKind::Upsert, "update"));
        assert!(!answers(OperationKind::Delete, "index"));
    }
}
