use crate::error::ConfigError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::env;
use std::time::Duration;

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_duration_millis(key: &str, default_millis: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(default_millis))
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Connection settings for the Elasticsearch cluster receiving bulk requests.
#[derive(Debug, Clone)]
pub struct ElasticsearchConfig {
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Deadline for a whole bulk call, including reading the response body.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Idle connections kept per host; match it to the import concurrency.
    pub max_connections: usize,
}

impl ElasticsearchConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env_string("ELASTICSEARCH_URL", "http://localhost:9200"),
            username: env_optional("ELASTICSEARCH_USER"),
            password: env_optional("ELASTICSEARCH_PASSWORD"),
            request_timeout: env_duration_millis("ELASTICSEARCH_TIMEOUT_MS", 30_000),
            connect_timeout: env_duration_millis("ELASTICSEARCH_CONNECT_TIMEOUT_MS", 10_000),
            max_connections: env_usize("ELASTICSEARCH_MAX_CONNECTIONS", 5).max(1),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// What to do when the engine rejects some operations of an accepted bulk call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartialFailurePolicy {
    /// Count the successful operations, list the batch as failed, keep going.
    #[default]
    Record,
    /// As `Record`, and stop admitting new batches; units already in flight finish.
    Abort,
}

/// Knobs for a single import run.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub batch_size: usize,
    pub concurrency: usize,
    pub partial_failure: PartialFailurePolicy,
}

impl ImportOptions {
    pub fn new(batch_size: usize, concurrency: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
            partial_failure: PartialFailurePolicy::default(),
        }
    }

    pub fn from_env() -> Self {
        let partial_failure = if env_bool("REINDEX_FAIL_FAST", false) {
            PartialFailurePolicy::Abort
        } else {
            PartialFailurePolicy::Record
        };

        Self {
            partial_failure,
            ..Self::new(
                env_usize("REINDEX_BATCH_SIZE", 100),
                env_usize("REINDEX_CONCURRENCY", 5),
            )
        }
    }

    pub fn with_partial_failure(mut self, policy: PartialFailurePolicy) -> Self {
        self.partial_failure = policy;
        self
    }
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Postgres connection settings for the record store.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = env_optional("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let max_connections = match env::var("REINDEX_DB_MAX_CONNECTIONS") {
            Ok(value) => value.parse::<u32>().map_err(|_| ConfigError::Invalid {
                key: "REINDEX_DB_MAX_CONNECTIONS",
                value,
            })?,
            Err(_) => 5,
        };

        Ok(Self {
            url,
            max_connections: max_connections.max(1),
        })
    }

    pub async fn connect(&self) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.url)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_options_clamp_zero_values() {
        let options = ImportOptions::new(0, 0);
        assert_eq!(options.batch_size, 1);
        assert_eq!(options.concurrency, 1);
        assert_eq!(options.partial_failure, PartialFailurePolicy::Record);
    }

    #[test]
    fn partial_failure_policy_can_be_overridden() {
        let options = ImportOptions::new(100, 2).with_partial_failure(PartialFailurePolicy::Abort);
        assert_eq!(options.partial_failure, PartialFailurePolicy::Abort);
    }

    #[test]
    fn elasticsearch_builders_override_env_values() {
        let config = ElasticsearchConfig::from_env()
            .with_base_url("http://search:9200")
            .with_request_timeout(Duration::from_millis(250));
        assert_eq!(config.base_url, "http://search:9200");
        assert_eq!(config.request_timeout, Duration::from_millis(250));
        assert!(config.max_connections >= 1);
    }
}
