use crate::error::SourceError;
use crate::source::{JsonRecord, RecordLookup, RecordSource};
use async_trait::async_trait;
use log::debug;
use regex::Regex;
use serde_json::Value;
use sqlx::PgPool;
use std::sync::OnceLock;

static IDENTIFIER_REGEX: OnceLock<Regex> = OnceLock::new();

/// Plain or schema-qualified SQL identifier, e.g. `tags` or `public.tags`.
fn identifier_regex() -> &'static Regex {
    IDENTIFIER_REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
            .expect("Invalid identifier regex")
    })
}

/// Describes which rows of which table a reindex run covers.
///
/// `filter` is a SQL boolean expression over the table alias `t` and is
/// trusted input; `table` and `id_column` are validated identifiers. The id
/// range is exclusive below and inclusive above, which is exactly the shape of
/// a failed batch's `(first_id - 1, last_id]` range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgSourceQuery {
    pub table: String,
    pub id_column: String,
    pub filter: Option<String>,
    pub after_id: Option<i64>,
    pub until_id: Option<i64>,
}

impl PgSourceQuery {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id_column: "id".to_string(),
            filter: None,
            after_id: None,
            until_id: None,
        }
    }

    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        let filter = filter.into();
        self.filter = if filter.trim().is_empty() {
            None
        } else {
            Some(filter)
        };
        self
    }

    pub fn after(mut self, id: Option<i64>) -> Self {
        self.after_id = id;
        self
    }

    pub fn until(mut self, id: Option<i64>) -> Self {
        self.until_id = id;
        self
    }

    pub fn validate(&self) -> Result<(), SourceError> {
        for (label, value) in [("table", &self.table), ("id column", &self.id_column)] {
            if !identifier_regex().is_match(value) {
                return Err(SourceError::InvalidQuery(format!(
                    "{label} '{value}' is not a valid identifier"
                )));
            }
        }

        if let (Some(after), Some(until)) = (self.after_id, self.until_id) {
            if until <= after {
                return Err(SourceError::InvalidQuery(format!(
                    "empty id range: after {after}, until {until}"
                )));
            }
        }

        Ok(())
    }

    fn filter_clause(&self) -> String {
        match &self.filter {
            Some(filter) => format!(" AND ({filter})"),
            None => String::new(),
        }
    }

    /// Keyset page: `$1` last seen id, `$2` optional upper bound, `$3` page size.
    pub fn page_sql(&self) -> String {
        format!(
            "SELECT t.{id}::bigint AS id, to_jsonb(t) AS data FROM {table} t \
             WHERE t.{id} > $1 AND ($2::bigint IS NULL OR t.{id} <= $2){filter} \
             ORDER BY t.{id} LIMIT $3",
            id = self.id_column,
            table = self.table,
            filter = self.filter_clause(),
        )
    }

    /// `$1` optional lower bound (exclusive), `$2` optional upper bound.
    pub fn count_sql(&self) -> String {
        format!(
            "SELECT COUNT(*) FROM {table} t \
             WHERE ($1::bigint IS NULL OR t.{id} > $1) AND ($2::bigint IS NULL OR t.{id} <= $2){filter}",
            id = self.id_column,
            table = self.table,
            filter = self.filter_clause(),
        )
    }

    /// `$1` array of ids. Rows outside the filter scope are treated as missing.
    pub fn lookup_sql(&self) -> String {
        format!(
            "SELECT t.{id}::bigint AS id, to_jsonb(t) AS data FROM {table} t \
             WHERE t.{id} = ANY($1){filter}",
            id = self.id_column,
            table = self.table,
            filter = self.filter_clause(),
        )
    }
}

#[derive(sqlx::FromRow)]
struct JsonRow {
    id: i64,
    data: Value,
}

impl From<JsonRow> for JsonRecord {
    fn from(row: JsonRow) -> Self {
        JsonRecord::new(row.id, row.data)
    }
}

/// Keyset-paginated scan over one Postgres table.
///
/// Pages are addressed by the last id seen rather than an offset, so rows
/// deleted mid-scan never shift later rows into an already-read page.
pub struct PgRecordSource {
    pool: PgPool,
    query: PgSourceQuery,
    page_sql: String,
    cursor: i64,
    exhausted: bool,
}

impl PgRecordSource {
    pub fn new(pool: PgPool, query: PgSourceQuery) -> Result<Self, SourceError> {
        query.validate()?;
        let page_sql = query.page_sql();
        let cursor = query.after_id.unwrap_or(i64::MIN);

        Ok(Self {
            pool,
            query,
            page_sql,
            cursor,
            exhausted: false,
        })
    }

    pub fn query(&self) -> &PgSourceQuery {
        &self.query
    }

    /// Rewind to the start of the configured id range.
    pub fn restart(&mut self) {
        self.cursor = self.query.after_id.unwrap_or(i64::MIN);
        self.exhausted = false;
    }
}

#[async_trait]
impl RecordSource for PgRecordSource {
    type Record = JsonRecord;

    async fn next_batch(&mut self, limit: usize) -> Result<Option<Vec<JsonRecord>>, SourceError> {
        if self.exhausted {
            return Ok(None);
        }

        let limit = limit.max(1);
        let rows: Vec<JsonRow> = sqlx::query_as::<_, JsonRow>(&self.page_sql)
            .bind(self.cursor)
            .bind(self.query.until_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        if rows.len() < limit {
            self.exhausted = true;
        }

        let Some(last) = rows.last() else {
            return Ok(None);
        };
        self.cursor = last.id;

        debug!(
            "postgres source: {} rows from {} (id range {}-{})",
            rows.len(),
            self.query.table,
            rows.first().map(|row| row.id).unwrap_or_default(),
            self.cursor
        );

        Ok(Some(rows.into_iter().map(JsonRecord::from).collect()))
    }

    async fn estimate(&mut self) -> Result<Option<u64>, SourceError> {
        let count: i64 = sqlx::query_scalar(&self.query.count_sql())
            .bind(self.query.after_id)
            .bind(self.query.until_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(Some(count.max(0) as u64))
    }
}

#[async_trait]
impl RecordLookup for PgRecordSource {
    type Record = JsonRecord;

    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<JsonRecord>, SourceError> {
        // Ids that are not integers cannot name a row in this table.
        let keys: Vec<i64> = ids.iter().filter_map(|id| id.parse().ok()).collect();
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<JsonRow> = sqlx::query_as::<_, JsonRow>(&self.query.lookup_sql())
            .bind(&keys)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(JsonRecord::from).collect())
    }
}
