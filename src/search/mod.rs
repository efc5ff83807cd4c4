//! Elasticsearch transport: bulk submission and id scans for clean-up.

pub mod client;
pub mod models;

pub use client::ElasticsearchClient;
pub use models::{encode_ndjson, interpret_bulk_response};
