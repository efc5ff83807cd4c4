use crate::error::SourceError;
use crate::source::{Record, RecordLookup, RecordSource};
use async_trait::async_trait;
use std::collections::HashSet;

/// Cursor over records the caller already holds, in insertion order.
#[derive(Debug, Clone)]
pub struct VecRecordSource<R> {
    records: Vec<R>,
    position: usize,
}

impl<R: Record + Clone> VecRecordSource<R> {
    pub fn new(records: Vec<R>) -> Self {
        Self {
            records,
            position: 0,
        }
    }

    /// Rewind to the first record.
    pub fn restart(&mut self) {
        self.position = 0;
    }

    pub fn remaining(&self) -> usize {
        self.records.len() - self.position
    }
}

#[async_trait]
impl<R: Record + Clone> RecordSource for VecRecordSource<R> {
    type Record = R;

    async fn next_batch(&mut self, limit: usize) -> Result<Option<Vec<R>>, SourceError> {
        if self.position >= self.records.len() {
            return Ok(None);
        }

        let end = (self.position + limit.max(1)).min(self.records.len());
        let batch = self.records[self.position..end].to_vec();
        self.position = end;

        Ok(Some(batch))
    }

    async fn estimate(&mut self) -> Result<Option<u64>, SourceError> {
        Ok(Some(self.records.len() as u64))
    }
}

#[async_trait]
impl<R: Record + Clone> RecordLookup for VecRecordSource<R> {
    type Record = R;

    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<R>, SourceError> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        Ok(self
            .records
            .iter()
            .filter(|record| wanted.contains(record.id().as_str()))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::JsonRecord;
    use serde_json::json;

    fn records(count: i64) -> Vec<JsonRecord> {
        (1..=count)
            .map(|id| JsonRecord::new(id, json!({ "id": id })))
            .collect()
    }

    async fn drain(source: &mut VecRecordSource<JsonRecord>, limit: usize) -> Vec<usize> {
        let mut sizes = Vec::new();
        while let Some(batch) = source.next_batch(limit).await.unwrap() {
            sizes.push(batch.len());
        }
        sizes
    }

    #[tokio::test]
    async fn batches_partition_the_records() {
        let mut source = VecRecordSource::new(records(250));
        assert_eq!(drain(&mut source, 100).await, vec![100, 100, 50]);
        assert_eq!(source.remaining(), 0);
    }

    #[tokio::test]
    async fn exhausted_source_keeps_returning_end() {
        let mut source = VecRecordSource::new(records(2));
        assert_eq!(drain(&mut source, 5).await, vec![2]);
        assert!(source.next_batch(5).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn restart_rewinds_the_cursor() {
        let mut source = VecRecordSource::new(records(3));
        drain(&mut source, 2).await;
        source.restart();
        assert_eq!(drain(&mut source, 2).await, vec![2, 1]);
    }

    #[tokio::test]
    async fn lookup_returns_only_known_ids() {
        let source = VecRecordSource::new(records(3));
        let found = source
            .find_by_ids(&["2".to_string(), "9".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 2);
    }
}
