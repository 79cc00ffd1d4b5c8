use std::path::Path;

use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info};

use super::entry::StoredLog;
use super::error::Result;
use super::partitions::{LOG_PREFIX, encode_log_bound, encode_log_key, encode_meta_key};

const META_LAST_PRUNE: &str = "last_prune";

/// Fjall-backed persistent storage for ingested log entries
#[derive(Clone)]
pub struct LogLedger {
    keyspace: Keyspace,
    logs: PartitionHandle,
    metadata: PartitionHandle,
}

impl LogLedger {
    /// Open or create a ledger at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening log ledger at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;
        let logs = keyspace.open_partition("logs", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        Ok(Self {
            keyspace,
            logs,
            metadata,
        })
    }

    /// Store entries atomically; either all are written or none.
    pub fn append(&self, entries: &[StoredLog]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut batch = self.keyspace.batch();
        for entry in entries {
            let key = encode_log_key(millis(entry.created_at), &entry.id.to_string());
            batch.insert(&self.logs, key, serde_json::to_vec(entry)?);
        }
        batch.commit()?;

        debug!(count = entries.len(), "Appended log entries");
        Ok(())
    }

    /// Up to `limit` entries, newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<StoredLog>> {
        let mut entries = Vec::with_capacity(limit.min(512));
        for item in self.logs.prefix(LOG_PREFIX).rev().take(limit) {
            let (_, value) = item?;
            entries.push(serde_json::from_slice(&value)?);
        }
        Ok(entries)
    }

    /// Delete entries created before `cutoff`, returning how many went.
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let upper = encode_log_bound(millis(cutoff));
        let lower = LOG_PREFIX.as_bytes().to_vec();

        let mut keys = Vec::new();
        for item in self.logs.range(lower..upper) {
            let (key, _) = item?;
            keys.push(key);
        }

        if !keys.is_empty() {
            let mut batch = self.keyspace.batch();
            for key in &keys {
                batch.remove(&self.logs, key.clone());
            }
            batch.commit()?;
        }

        self.metadata.insert(
            encode_meta_key(META_LAST_PRUNE),
            Utc::now().to_rfc3339().as_bytes(),
        )?;

        info!(pruned = keys.len(), cutoff = %cutoff, "Pruned old log entries");
        Ok(keys.len())
    }

    /// When `prune_older_than` last ran
    pub fn last_pruned(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(value) = self.metadata.get(encode_meta_key(META_LAST_PRUNE))? else {
            return Ok(None);
        };
        let text = String::from_utf8_lossy(&value);
        Ok(DateTime::parse_from_rfc3339(&text)
            .ok()
            .map(|t| t.with_timezone(&Utc)))
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.logs.len()?)
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}

fn millis(t: DateTime<Utc>) -> u64 {
    u64::try_from(t.timestamp_millis()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogLevel, LogRecord};
    use chrono::Duration;
    use tempfile::TempDir;

    fn create_test_ledger() -> (LogLedger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let ledger = LogLedger::open(temp_dir.path().join("test_ledger")).unwrap();
        (ledger, temp_dir)
    }

    fn entry(message: &str, created_at: DateTime<Utc>) -> StoredLog {
        StoredLog::from_record(&LogRecord::new(LogLevel::Info, message), created_at)
    }

    #[test]
    fn test_open_ledger() {
        let temp_dir = TempDir::new().unwrap();
        assert!(LogLedger::open(temp_dir.path().join("nested/ledger")).is_ok());
    }

    #[test]
    fn test_append_and_recent_newest_first() {
        let (ledger, _temp) = create_test_ledger();
        let base = Utc::now();

        let entries: Vec<_> = (0..5)
            .map(|i| entry(&format!("entry {i}"), base + Duration::milliseconds(i)))
            .collect();
        ledger.append(&entries).unwrap();

        assert_eq!(ledger.count().unwrap(), 5);

        let recent = ledger.recent(3).unwrap();
        let messages: Vec<_> = recent.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["entry 4", "entry 3", "entry 2"]);
    }

    #[test]
    fn test_same_millisecond_entries_kept() {
        let (ledger, _temp) = create_test_ledger();
        let now = Utc::now();

        ledger.append(&[entry("a", now), entry("b", now)]).unwrap();
        assert_eq!(ledger.count().unwrap(), 2);
    }

    #[test]
    fn test_prune_older_than() {
        let (ledger, _temp) = create_test_ledger();
        let now = Utc::now();

        ledger
            .append(&[
                entry("ancient", now - Duration::days(40)),
                entry("old", now - Duration::days(31)),
                entry("fresh", now - Duration::days(1)),
            ])
            .unwrap();

        assert!(ledger.last_pruned().unwrap().is_none());
        let pruned = ledger.prune_older_than(now - Duration::days(30)).unwrap();
        assert_eq!(pruned, 2);

        let remaining = ledger.recent(10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].message, "fresh");
        assert!(ledger.last_pruned().unwrap().is_some());
    }

    #[test]
    fn test_reopen_keeps_entries() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ledger");

        {
            let ledger = LogLedger::open(&path).unwrap();
            ledger.append(&[entry("persisted", Utc::now())]).unwrap();
            ledger.persist().unwrap();
        }

        let ledger = LogLedger::open(&path).unwrap();
        assert_eq!(ledger.recent(1).unwrap()[0].message, "persisted");
    }
}
