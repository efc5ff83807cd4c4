//! Bulk request construction and execution.
//!
//! - **`operation`**: the tagged upsert/delete operations and the request that carries them
//! - **`classify`**: pluggable rules deciding whether a record belongs in the index
//! - **`builder`**: turns one batch of records into a `BulkRequest`
//! - **`projection`**: document shapes for rows read as JSON
//! - **`executor`**: the seam to the search engine transport

pub mod builder;
pub mod classify;
pub mod executor;
pub mod operation;
pub mod projection;

pub use builder::{BulkOperationBuilder, IndexTarget, Projection};
pub use classify::{Classification, Classifier, FieldClassifier, IndexAll};
pub use executor::{BulkExecutor, BulkSummary};
pub use operation::{BulkRequest, Operation, OperationKind};
pub use projection::FieldProjection;
