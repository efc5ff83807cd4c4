use search_reindexer::source::RecordLookup;
use search_reindexer::test_support::{TestDatabase, TestDatabaseError};
use search_reindexer::{PgRecordSource, PgSourceQuery, Record, RecordSource};

async fn seeded_database() -> Option<TestDatabase> {
    let test_db = match TestDatabase::new_from_env().await {
        Ok(db) => db,
        Err(TestDatabaseError::MissingUrl) => {
            eprintln!("skipping postgres source test: TEST_DATABASE_URL not set");
            return None;
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    };

    sqlx::query(
        "CREATE TABLE tags (id BIGSERIAL PRIMARY KEY, name TEXT NOT NULL, listable BOOLEAN NOT NULL DEFAULT TRUE)",
    )
    .execute(test_db.pool())
    .await
    .expect("create table");

    sqlx::query(
        "INSERT INTO tags (name, listable) SELECT 'tag-' || n, n % 4 <> 0 FROM generate_series(1, 25) AS n",
    )
    .execute(test_db.pool())
    .await
    .expect("seed rows");

    Some(test_db)
}

#[tokio::test]
async fn keyset_pages_cover_the_table_once() {
    let Some(test_db) = seeded_database().await else {
        return;
    };

    let mut source =
        PgRecordSource::new(test_db.pool_clone(), PgSourceQuery::table("tags")).expect("valid query");
    assert_eq!(source.estimate().await.expect("count"), Some(25));

    let mut sizes = Vec::new();
    let mut ids = Vec::new();
    while let Some(batch) = source.next_batch(10).await.expect("page") {
        sizes.push(batch.len());
        ids.extend(batch.iter().map(|record| record.id));
    }

    assert_eq!(sizes, vec![10, 10, 5]);
    assert_eq!(ids, (1..=25).collect::<Vec<i64>>());
    assert!(source.next_batch(10).await.expect("end").is_none());

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn filter_and_range_scope_the_scan() {
    let Some(test_db) = seeded_database().await else {
        return;
    };

    let query = PgSourceQuery::table("tags")
        .with_filter("t.listable")
        .after(Some(10))
        .until(Some(20));
    let mut source = PgRecordSource::new(test_db.pool_clone(), query).expect("valid query");

    let batch = source.next_batch(100).await.expect("page").expect("rows");
    let ids: Vec<String> = batch.iter().map(Record::id).collect();
    assert_eq!(ids, vec!["11", "13", "14", "15", "17", "18", "19"]);
    assert_eq!(batch[0].field("name"), Some(&serde_json::json!("tag-11")));

    source.restart();
    assert_eq!(source.next_batch(100).await.expect("page").map(|b| b.len()), Some(7));

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn lookup_returns_only_rows_in_scope() {
    let Some(test_db) = seeded_database().await else {
        return;
    };

    let source = PgRecordSource::new(
        test_db.pool_clone(),
        PgSourceQuery::table("tags").with_filter("t.listable"),
    )
    .expect("valid query");

    let wanted: Vec<String> = ["3", "4", "99", "not-a-number"]
        .into_iter()
        .map(String::from)
        .collect();
    let found = source.find_by_ids(&wanted).await.expect("lookup");
    let ids: Vec<String> = found.iter().map(Record::id).collect();
    assert_eq!(ids, vec!["3"]);

    test_db.close().await.expect("failed to drop test database");
}
