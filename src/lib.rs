pub mod bulk;
pub mod config;
pub mod error;
pub mod import;
pub mod search;
pub mod source;

pub use bulk::{
    BulkExecutor, BulkOperationBuilder, BulkRequest, BulkSummary, Classification, Classifier,
    FieldClassifier, FieldProjection, IndexAll, IndexTarget, Operation,
};
pub use config::{DatabaseConfig, ElasticsearchConfig, ImportOptions, PartialFailurePolicy};
pub use error::{
    BulkError, CleanupError, ImportAggregateError, ImportError, SourceError, TransportError,
    WorkUnitError,
};
pub use import::{
    BatchRef, CleanupReport, ImportCoordinator, ImportReport, StaleDocumentSweeper, reindex_table,
};
pub use search::ElasticsearchClient;
pub use source::{Batch, JsonRecord, PgRecordSource, PgSourceQuery, Record, RecordSource};

use env_logger::Env;
use std::sync::Once;

static LOGGER: Once = Once::new();

/// Initialize `env_logger` once; `RUST_LOG` overrides the default `info` filter.
pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    });
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    pub use database::{TestDatabase, TestDatabaseError};

    pub mod database {
        use log::LevelFilter;
        use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use sqlx::{ConnectOptions, PgPool};
        use thiserror::Error;
        use uuid::Uuid;

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("TEST_DATABASE_URL not set")]
            MissingUrl,
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
        }

        /// Ephemeral database created on the server named by `TEST_DATABASE_URL`.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            admin_options: PgConnectOptions,
            database_name: String,
        }

        impl TestDatabase {
            pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
                let url = std::env::var("TEST_DATABASE_URL")
                    .map_err(|_| TestDatabaseError::MissingUrl)?;

                let base_options: PgConnectOptions = url.parse()?;
                let base_options = base_options.log_statements(LevelFilter::Off);
                let admin_options = base_options.clone().database("postgres");

                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(admin_options.clone())
                    .await?;

                let database_name = format!("reindex_test_{}", Uuid::new_v4().simple());
                sqlx::query(&format!(
                    "CREATE DATABASE \"{}\" TEMPLATE template0",
                    database_name
                ))
                .execute(&admin_pool)
                .await?;
                admin_pool.close().await;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(base_options.database(&database_name))
                    .await?;

                Ok(Self {
                    pool: Some(pool),
                    admin_options,
                    database_name,
                })
            }

            pub fn pool(&self) -> &PgPool {
                self.pool.as_ref().expect("test database pool is available")
            }

            pub fn pool_clone(&self) -> PgPool {
                self.pool().clone()
            }

            /// Close pool connections and drop the ephemeral database.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }

                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(self.admin_options.clone())
                    .await?;
                sqlx::query(&format!(
                    "DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)",
                    self.database_name
                ))
                .execute(&admin_pool)
                .await?;
                admin_pool.close().await;

                Ok(())
            }
        }
    }
}
