//! Journal backends for heartbeat decision artifacts.
//!
//! The engine only sees the [`Journal`] trait from `vigil-broker`; this crate
//! supplies an append-only JSONL file backend for real runs and an in-memory
//! backend for tests and dry runs. Both deduplicate on the record
//! fingerprint so a replayed tick never produces a second entry.

use std::collections::HashSet;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use vigil_broker::{Journal, JournalError};
use vigil_core::DecisionRecord;

/// Append-only journal writing one JSON object per line.
pub struct JsonlJournal {
    path: PathBuf,
    inner: Mutex<JsonlState>,
}

struct JsonlState {
    file: tokio::fs::File,
    seen: HashSet<String>,
}

impl JsonlJournal {
    /// Opens (or creates) the journal file and indexes existing fingerprints
    /// so idempotence survives restarts.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, JournalError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let seen = match std::fs::File::open(&path) {
            Ok(existing) => index_fingerprints(existing, &path),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(err) => return Err(err.into()),
        };

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            inner: Mutex::new(JsonlState { file, seen }),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn index_fingerprints(file: std::fs::File, path: &Path) -> HashSet<String> {
    let mut seen = HashSet::new();
    for line in BufReader::new(file).lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<DecisionRecord>(&line) {
            Ok(record) => {
                seen.insert(record.fingerprint());
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable journal line");
            }
        }
    }
    seen
}

#[async_trait]
impl Journal for JsonlJournal {
    async fn record(&self, record: &DecisionRecord) -> Result<(), JournalError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut state = self.inner.lock().await;
        if !state.seen.insert(record.fingerprint()) {
            debug!(fingerprint = %record.fingerprint(), "duplicate journal record skipped");
            return Ok(());
        }
        state.file.write_all(line.as_bytes()).await?;
        state.file.flush().await?;
        Ok(())
    }
}

/// Journal kept entirely in memory. Used by tests and `--dry-run` style
/// sessions that should not touch disk.
#[derive(Default)]
pub struct MemoryJournal {
    records: Mutex<Vec<DecisionRecord>>,
}

impl MemoryJournal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<DecisionRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl Journal for MemoryJournal {
    async fn record(&self, record: &DecisionRecord) -> Result<(), JournalError> {
        let mut records = self.records.lock().await;
        if records
            .iter()
            .any(|existing| existing.fingerprint() == record.fingerprint())
        {
            return Ok(());
        }
        records.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;
    use vigil_core::{Outcome, RecordKind, Trigger};

    fn record(symbol: &str, timestamp: i64) -> DecisionRecord {
        DecisionRecord {
            id: Uuid::new_v4(),
            kind: RecordKind::PositionHeartbeat,
            symbol: symbol.into(),
            timestamp,
            recorded_at: Utc::now(),
            triggers: vec![Trigger::TimeCeiling],
            decision: None,
            outcome: Outcome::Info,
            detail: None,
            snapshot: None,
        }
    }

    #[tokio::test]
    async fn jsonl_round_trips_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let journal = JsonlJournal::open(&path).await.unwrap();

        let first = record("ETH", 1);
        let second = record("BTC", 2);
        journal.record(&first).await.unwrap();
        journal.record(&second).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let decoded: Vec<DecisionRecord> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(decoded, vec![first, second]);
    }

    #[tokio::test]
    async fn duplicate_fingerprints_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let journal = JsonlJournal::open(&path).await.unwrap();

        journal.record(&record("ETH", 42)).await.unwrap();
        journal.record(&record("ETH", 42)).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test]
    async fn fingerprint_index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");

        {
            let journal = JsonlJournal::open(&path).await.unwrap();
            journal.record(&record("ETH", 7)).await.unwrap();
        }
        let reopened = JsonlJournal::open(&path).await.unwrap();
        reopened.record(&record("ETH", 7)).await.unwrap();
        reopened.record(&record("ETH", 8)).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test]
    async fn memory_journal_deduplicates() {
        let journal = MemoryJournal::new();
        journal.record(&record("ETH", 1)).await.unwrap();
        journal.record(&record("ETH", 1)).await.unwrap();
        journal.record(&record("ETH", 2)).await.unwrap();
        assert_eq!(journal.records().await.len(), 2);
    }
}
