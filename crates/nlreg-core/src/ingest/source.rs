//! Ordered record sources
//!
//! A record source is durable and resumable: records carry monotonically
//! increasing offsets, consumption position survives restarts via the
//! consumer_offsets table, and rewinding returns to the last committed
//! offset without losing records.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::Result;

/// One record read from a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub offset: u64,
    pub payload: String,
}

/// An ordered, durable, resumable stream of inbound records
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Stream name, used as the consumer_offsets key
    fn name(&self) -> &str;

    /// Read up to `max` records from the current position. Advances the
    /// in-memory position; does not commit.
    async fn poll(&mut self, max: usize) -> Result<Vec<SourceRecord>>;

    /// Durably mark `offset` as processed. Consumption resumes after it.
    async fn commit(&mut self, offset: u64) -> Result<()>;

    /// Move the position back to just after the last committed offset
    async fn rewind(&mut self) -> Result<()>;
}

/// Record source reading one JSON record per line from a log file.
///
/// The offset of a record is its line index. Blank lines keep their index
/// but are never returned. The committed position is stored in the
/// consumer_offsets table as the offset of the next unprocessed line.
pub struct JsonlRecordSource {
    name: String,
    path: PathBuf,
    pool: SqlitePool,
    /// Next line index to read
    position: u64,
}

impl JsonlRecordSource {
    /// Open a source, resuming from the committed offset if one exists
    pub async fn open(name: impl Into<String>, path: impl Into<PathBuf>, pool: SqlitePool) -> Result<Self> {
        let name = name.into();
        let position = load_committed(&pool, &name).await?;

        debug!(source = %name, position = position, "Record source opened");
        Ok(Self {
            name,
            path: path.into(),
            pool,
            position,
        })
    }

    pub fn position(&self) -> u64 {
        self.position
    }
}

#[async_trait]
impl RecordSource for JsonlRecordSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&mut self, max: usize) -> Result<Vec<SourceRecord>> {
        // A missing file is an empty stream, not an error: the producer may
        // not have written anything yet.
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let reader = BufReader::new(file);
        let mut records = Vec::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let offset = index as u64;
            if offset < self.position {
                continue;
            }
            if records.len() >= max {
                break;
            }

            self.position = offset + 1;
            if line.trim().is_empty() {
                continue;
            }
            records.push(SourceRecord {
                offset,
                payload: line,
            });
        }

        Ok(records)
    }

    async fn commit(&mut self, offset: u64) -> Result<()> {
        sqlx::query(
            "INSERT INTO consumer_offsets (source, next_offset, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(source) DO UPDATE SET next_offset = excluded.next_offset, \
             updated_at = excluded.updated_at",
        )
        .bind(&self.name)
        .bind((offset + 1) as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(source = %self.name, offset = offset, "Offset committed");
        Ok(())
    }

    async fn rewind(&mut self) -> Result<()> {
        self.position = load_committed(&self.pool, &self.name).await?;
        debug!(source = %self.name, position = self.position, "Rewound to last committed offset");
        Ok(())
    }
}

async fn load_committed(pool: &SqlitePool, name: &str) -> Result<u64> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT next_offset FROM consumer_offsets WHERE source = ?")
            .bind(name)
            .fetch_optional(pool)
            .await?;

    Ok(row.map(|(n,)| n as u64).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::setup_test_pool;
    use std::io::Write;

    async fn source_over(lines: &[&str]) -> (JsonlRecordSource, tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        let mut file = File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }

        let pool = setup_test_pool().await;
        let source = JsonlRecordSource::open("test-stream", &path, pool.clone())
            .await
            .unwrap();
        (source, dir, pool)
    }

    #[tokio::test]
    async fn test_poll_returns_records_in_order() {
        let (mut source, _dir, _pool) = source_over(&["{\"a\":1}", "{\"a\":2}", "{\"a\":3}"]).await;

        let batch = source.poll(2).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].offset, 0);
        assert_eq!(batch[1].offset, 1);

        let rest = source.poll(10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].offset, 2);
    }

    #[tokio::test]
    async fn test_commit_persists_and_resumes() {
        let (mut source, dir, pool) = source_over(&["one", "two", "three"]).await;

        let batch = source.poll(2).await.unwrap();
        source.commit(batch[1].offset).await.unwrap();

        // A fresh instance over the same stream resumes after the commit
        let mut resumed =
            JsonlRecordSource::open("test-stream", dir.path().join("records.jsonl"), pool)
                .await
                .unwrap();
        let batch = resumed.poll(10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, "three");
    }

    #[tokio::test]
    async fn test_rewind_returns_to_committed() {
        let (mut source, _dir, _pool) = source_over(&["one", "two", "three"]).await;

        let batch = source.poll(3).await.unwrap();
        source.commit(batch[0].offset).await.unwrap();

        source.rewind().await.unwrap();
        let batch = source.poll(10).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].payload, "two");
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_stream() {
        let dir = tempfile::tempdir().unwrap();
        let pool = setup_test_pool().await;
        let mut source = JsonlRecordSource::open("test-stream", dir.path().join("absent.jsonl"), pool)
            .await
            .unwrap();

        assert!(source.poll(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_lines_skipped_but_keep_offsets() {
        let (mut source, _dir, _pool) = source_over(&["one", "", "three"]).await;

        let batch = source.poll(10).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].offset, 0);
        assert_eq!(batch[1].offset, 2);
    }

    #[tokio::test]
    async fn test_offsets_isolated_per_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "one").unwrap();
        writeln!(file, "two").unwrap();

        let pool = setup_test_pool().await;
        let mut a = JsonlRecordSource::open("stream-a", &path, pool.clone()).await.unwrap();
        let batch = a.poll(10).await.unwrap();
        a.commit(batch[1].offset).await.unwrap();

        let mut b = JsonlRecordSource::open("stream-b", &path, pool).await.unwrap();
        assert_eq!(b.poll(10).await.unwrap().len(), 2);
    }
}
