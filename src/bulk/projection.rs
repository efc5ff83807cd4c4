use crate::source::JsonRecord;
use serde_json::{Map, Value};

/// Document shape for rows read as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldProjection {
    /// The whole row.
    #[default]
    All,
    /// Only the listed columns; absent columns are written as `null`.
    Only(Vec<String>),
}

impl FieldProjection {
    pub fn all() -> Self {
        FieldProjection::All
    }

    pub fn only<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        if fields.is_empty() {
            FieldProjection::All
        } else {
            FieldProjection::Only(fields)
        }
    }

    pub fn project(&self, record: &JsonRecord) -> Value {
        match self {
            FieldProjection::All => record.data.clone(),
            FieldProjection::Only(fields) => {
                let document: Map<String, Value> = fields
                    .iter()
                    .map(|field| {
                        let value = record.field(field).cloned().unwrap_or(Value::Null);
                        (field.clone(), value)
                    })
                    .collect();
                Value::Object(document)
            }
        }
    }
}
