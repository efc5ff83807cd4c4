use std::io::{self, Write};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use search_reindexer::import::{ImportObserver, ProgressTracker};
use search_reindexer::{
    BulkExecutor, DatabaseConfig, ElasticsearchClient, ElasticsearchConfig, FieldClassifier,
    FieldProjection, ImportError, ImportOptions, ImportReport, IndexTarget, JsonRecord,
    PartialFailurePolicy, PgRecordSource, PgSourceQuery, StaleDocumentSweeper, init_logger,
    reindex_table,
};

#[derive(Parser, Debug)]
#[command(
    name = "reindex",
    about = "Rebuild a search index from a Postgres table"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index every row of the table, deleting documents for excluded rows.
    Import(ImportArgs),
    /// Delete index documents whose row is gone or no longer indexable.
    Cleanup(CleanupArgs),
}

#[derive(Args, Debug)]
struct TargetArgs {
    /// Table to read, optionally schema-qualified.
    #[arg(long)]
    table: String,

    /// Integer primary key column, used as document id and pagination key.
    #[arg(long, default_value = "id")]
    id_column: String,

    /// SQL boolean expression over alias `t` limiting the rows in scope.
    #[arg(long)]
    filter: Option<String>,

    /// Destination index name.
    #[arg(long)]
    index: String,

    /// Comma-separated columns to index; defaults to the whole row.
    #[arg(long, value_delimiter = ',')]
    fields: Vec<String>,

    /// Delete the document when this column is non-null (e.g. `deleted_at`).
    #[arg(long)]
    delete_when_set: Vec<String>,

    /// Delete the document when this column is not `true` (e.g. `listable`).
    #[arg(long)]
    delete_when_false: Vec<String>,
}

#[derive(Args, Debug)]
struct ImportArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Records per bulk request (default from REINDEX_BATCH_SIZE).
    #[arg(long)]
    batch_size: Option<usize>,

    /// Bulk requests in flight at once (default from REINDEX_CONCURRENCY).
    #[arg(long)]
    concurrency: Option<usize>,

    /// Only rows with an id greater than this.
    #[arg(long)]
    after_id: Option<i64>,

    /// Only rows with an id up to and including this.
    #[arg(long)]
    until_id: Option<i64>,

    /// Stop admitting batches after the first partially rejected one.
    #[arg(long)]
    fail_fast: bool,
}

#[derive(Args, Debug)]
struct CleanupArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Document ids fetched per scroll page.
    #[arg(long, default_value_t = 500)]
    page_size: usize,
}

impl TargetArgs {
    fn query(&self) -> PgSourceQuery {
        let query = PgSourceQuery::table(&self.table).with_id_column(&self.id_column);
        match &self.filter {
            Some(filter) => query.with_filter(filter),
            None => query,
        }
    }

    fn index_target(&self) -> IndexTarget<JsonRecord> {
        let classifier = self
            .delete_when_set
            .iter()
            .fold(FieldClassifier::new(), |c, field| c.delete_when_set(field));
        let classifier = self
            .delete_when_false
            .iter()
            .fold(classifier, |c, field| c.delete_when_false(field));
        let projection = FieldProjection::only(self.fields.iter().cloned());

        IndexTarget::new(&self.index, classifier, move |record: &JsonRecord| {
            projection.project(record)
        })
    }

    /// Command-line flags that select the same rows and documents again,
    /// narrowed to the given id range.
    fn rerun_args(&self, after_id: Option<i64>, until_id: Option<i64>) -> Vec<String> {
        let mut args = vec![
            "--table".to_string(),
            self.table.clone(),
            "--id-column".to_string(),
            self.id_column.clone(),
        ];
        if let Some(filter) = &self.filter {
            args.extend(["--filter".to_string(), filter.clone()]);
        }
        args.extend(["--index".to_string(), self.index.clone()]);
        if !self.fields.is_empty() {
            args.extend(["--fields".to_string(), self.fields.join(",")]);
        }
        for field in &self.delete_when_set {
            args.extend(["--delete-when-set".to_string(), field.clone()]);
        }
        for field in &self.delete_when_false {
            args.extend(["--delete-when-false".to_string(), field.clone()]);
        }
        if let Some(after_id) = after_id {
            args.extend(["--after-id".to_string(), after_id.to_string()]);
        }
        if let Some(until_id) = until_id {
            args.extend(["--until-id".to_string(), until_id.to_string()]);
        }
        args
    }
}

/// Join arguments for a shell, single-quoting any that need it.
fn shell_line(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            let plain = !arg.is_empty()
                && arg
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || "-_.,=/:".contains(c));
            if plain {
                arg.clone()
            } else {
                format!("'{}'", arg.replace('\'', r"'\''"))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    let cli = Cli::parse();

    let database = DatabaseConfig::from_env()?;
    let mut search_config = ElasticsearchConfig::from_env();

    match cli.command {
        Command::Import(args) => {
            let defaults = ImportOptions::from_env();
            let policy = if args.fail_fast {
                PartialFailurePolicy::Abort
            } else {
                defaults.partial_failure
            };
            let options = ImportOptions::new(
                args.batch_size.unwrap_or(defaults.batch_size),
                args.concurrency.unwrap_or(defaults.concurrency),
            )
            .with_partial_failure(policy);
            search_config.max_connections = options.concurrency;

            let client = ElasticsearchClient::new(search_config)?;
            if let Err(err) = client.healthcheck().await {
                log::warn!("search engine health check failed: {}", err);
            }
            let pool = database.connect().await?;

            let token = CancellationToken::new();
            let signal_token = token.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::warn!("interrupt received; finishing in-flight batches");
                    signal_token.cancel();
                }
            });

            let query = args
                .target
                .query()
                .after(args.after_id)
                .until(args.until_id);
            let executor: Arc<dyn BulkExecutor> = Arc::new(client);
            let observer: Arc<dyn ImportObserver> = Arc::new(ProgressTracker::new());

            let result = reindex_table(
                pool,
                query,
                args.target.index_target(),
                executor,
                options,
                Some(observer),
                &token,
            )
            .await;

            match result {
                Ok(report) => print_json(&report)?,
                Err(err) => {
                    log::error!("reindex failed: {}", err);
                    if let ImportError::Source { error, .. } = &err {
                        writeln!(io::stderr(), "error: {error}")?;
                    }
                    let report = err.into_report();
                    print_json(&report)?;
                    print_rerun_hints(&args, &report)?;
                    std::process::exit(1);
                }
            }
        }
        Command::Cleanup(args) => {
            let client = ElasticsearchClient::new(search_config)?;
            let pool = database.connect().await?;
            let lookup = PgRecordSource::new(pool, args.target.query())?;

            let client = Arc::new(client);
            let sweeper = StaleDocumentSweeper::new(
                args.target.index_target(),
                client.clone(),
                client,
                args.page_size,
            );

            let report = sweeper.sweep(&lookup).await?;
            print_json(&report)?;
            if !report.is_success() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

fn print_rerun_hints(
    args: &ImportArgs,
    report: &ImportReport,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut stderr = io::stderr().lock();
    for failed in &report.failed_batches {
        let range = failed
            .batch
            .first_id
            .as_deref()
            .zip(failed.batch.last_id.as_deref())
            .and_then(|(first, last)| {
                Some((first.parse::<i64>().ok()?, last.parse::<i64>().ok()?))
            });

        match range {
            Some((first, last)) => {
                let rerun = args.target.rerun_args(Some(first - 1), Some(last));
                writeln!(
                    stderr,
                    "failed {}: re-run with: reindex import {}",
                    failed.batch,
                    shell_line(&rerun)
                )?
            }
            None => writeln!(stderr, "failed {}: {}", failed.batch, failed.error)?,
        }
    }

    if !report.source_exhausted {
        let after_id = match report.resume_after.as_deref() {
            Some(id) => id.parse::<i64>().ok(),
            None => args.after_id,
        };
        let resume = args.target.rerun_args(after_id, args.until_id);
        writeln!(
            stderr,
            "stopped before the end of the table; resume with: reindex import {}",
            shell_line(&resume)
        )?;
    }
    Ok(())
}
