use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_rusqlite::Connection;
use tracing::warn;

/// Storage key for the single history document, kept from the original
/// record layout.
const HISTORY_KEY: &str = "download-history";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("database query failed: {0}")]
    Query(#[from] rusqlite::Error),
}

/// One durable entry linking a converted source file to its output,
/// keyed by the (`original_path`, `file_name`) composite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProvenanceRecord {
    pub original_path: String,
    pub output_path: String,
    pub file_name: String,
    pub download_time: DateTime<Utc>,
}

impl ProvenanceRecord {
    fn matches(&self, original_path: &str, file_name: &str) -> bool {
        self.original_path == original_path && self.file_name == file_name
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct DownloadHistory {
    records: Vec<ProvenanceRecord>,
    last_updated: Option<DateTime<Utc>>,
}

/// Persisted conversion history. The whole document lives in memory and
/// is rewritten whole on every mutation, so a record added in this
/// process is visible to queries immediately. Single writer assumed.
pub struct ProvenanceStore {
    conn: Connection,
    history: Mutex<DownloadHistory>,
}

impl ProvenanceStore {
    /// Opens (or creates) the history database at `db_path`.
    pub async fn new(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path.to_path_buf()).await?;
        Self::with_connection(conn).await
    }

    /// Ephemeral store, used by tests and history-less runs.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::with_connection(conn).await
    }

    async fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS history (
                    key     TEXT PRIMARY KEY,
                    value   TEXT NOT NULL
                )",
                [],
            )?;
            Ok(())
        })
        .await?;

        let history = Self::load(&conn).await;
        Ok(Self {
            conn,
            history: Mutex::new(history),
        })
    }

    /// Unreadable or corrupt persisted state degrades to an empty
    /// history so the application always starts.
    async fn load(conn: &Connection) -> DownloadHistory {
        let raw = conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT value FROM history WHERE key = ?1")?;
                let mut rows = stmt.query(params![HISTORY_KEY])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row.get::<_, String>(0)?)),
                    None => Ok(None),
                }
            })
            .await;

        match raw {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(history) => history,
                Err(e) => {
                    warn!("conversion history is corrupt, starting empty: {e}");
                    DownloadHistory::default()
                }
            },
            Ok(None) => DownloadHistory::default(),
            Err(e) => {
                warn!("could not read conversion history, starting empty: {e}");
                DownloadHistory::default()
            }
        }
    }

    async fn persist(&self, history: &DownloadHistory) -> Result<(), StoreError> {
        let json = serde_json::to_string(history)?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO history (key, value) VALUES (?1, ?2)",
                    params![HISTORY_KEY, json],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Whether a conversion of this exact (source, name) pair is on
    /// record.
    pub async fn is_recorded(&self, original_path: &str, file_name: &str) -> bool {
        self.history
            .lock()
            .await
            .records
            .iter()
            .any(|r| r.matches(original_path, file_name))
    }

    /// Known output locations for a key, in insertion order.
    pub async fn record_paths(&self, original_path: &str, file_name: &str) -> Vec<String> {
        self.history
            .lock()
            .await
            .records
            .iter()
            .filter(|r| r.matches(original_path, file_name))
            .map(|r| r.output_path.clone())
            .collect()
    }

    /// Records a conversion. An existing record with the same composite
    /// key is replaced in place, so at most one record per key exists.
    pub async fn add(
        &self,
        original_path: &str,
        output_path: &str,
        file_name: &str,
    ) -> Result<(), StoreError> {
        let mut history = self.history.lock().await;
        let record = ProvenanceRecord {
            original_path: original_path.to_string(),
            output_path: output_path.to_string(),
            file_name: file_name.to_string(),
            download_time: Utc::now(),
        };
        match history
            .records
            .iter_mut()
            .find(|r| r.matches(original_path, file_name))
        {
            Some(existing) => *existing = record,
            None => history.records.push(record),
        }
        history.last_updated = Some(Utc::now());
        self.persist(&history).await
    }

    pub async fn remove(&self, original_path: &str, file_name: &str) -> Result<(), StoreError> {
        let mut history = self.history.lock().await;
        history.records.retain(|r| !r.matches(original_path, file_name));
        history.last_updated = Some(Utc::now());
        self.persist(&history).await
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        let mut history = self.history.lock().await;
        history.records.clear();
        history.last_updated = Some(Utc::now());
        self.persist(&history).await
    }

    pub async fn records(&self) -> Vec<ProvenanceRecord> {
        self.history.lock().await.records.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn add_is_visible_without_reload() {
        let store = ProvenanceStore::in_memory().await.unwrap();
        store.add("/m/a.ncm", "/out/a.mp3", "a.ncm").await.unwrap();
        assert!(store.is_recorded("/m/a.ncm", "a.ncm").await);
        assert!(!store.is_recorded("/m/b.ncm", "b.ncm").await);
    }

    #[tokio::test]
    async fn add_replaces_on_duplicate_key() {
        let store = ProvenanceStore::in_memory().await.unwrap();
        store.add("/m/a.ncm", "/out1/a.mp3", "a.ncm").await.unwrap();
        store.add("/m/a.ncm", "/out2/a.mp3", "a.ncm").await.unwrap();

        let records = store.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].output_path, "/out2/a.mp3");
        assert_eq!(
            store.record_paths("/m/a.ncm", "a.ncm").await,
            vec!["/out2/a.mp3".to_string()]
        );
    }

    #[tokio::test]
    async fn records_keep_insertion_order() {
        let store = ProvenanceStore::in_memory().await.unwrap();
        store.add("/m/a.ncm", "/out/a.mp3", "a.ncm").await.unwrap();
        store.add("/m/b.ncm", "/out/b.flac", "b.ncm").await.unwrap();
        store.add("/m/c.ncm", "/out/c.mp3", "c.ncm").await.unwrap();

        let names: Vec<_> = store
            .records()
            .await
            .into_iter()
            .map(|r| r.file_name)
            .collect();
        assert_eq!(names, vec!["a.ncm", "b.ncm", "c.ncm"]);
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let store = ProvenanceStore::in_memory().await.unwrap();
        store.add("/m/a.ncm", "/out/a.mp3", "a.ncm").await.unwrap();
        store.add("/m/b.ncm", "/out/b.mp3", "b.ncm").await.unwrap();

        store.remove("/m/a.ncm", "a.ncm").await.unwrap();
        assert!(!store.is_recorded("/m/a.ncm", "a.ncm").await);
        assert!(store.is_recorded("/m/b.ncm", "b.ncm").await);

        store.clear().await.unwrap();
        assert!(store.records().await.is_empty());
    }

    #[tokio::test]
    async fn history_survives_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("history.db");

        let store = ProvenanceStore::new(&db_path).await.unwrap();
        store.add("/m/a.ncm", "/out/a.mp3", "a.ncm").await.unwrap();
        drop(store);

        let reopened = ProvenanceStore::new(&db_path).await.unwrap();
        assert!(reopened.is_recorded("/m/a.ncm", "a.ncm").await);
        assert_eq!(reopened.records().await.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_history_fails_open() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("history.db");

        let store = ProvenanceStore::new(&db_path).await.unwrap();
        store.add("/m/a.ncm", "/out/a.mp3", "a.ncm").await.unwrap();
        drop(store);

        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute(
            "UPDATE history SET value = 'not json' WHERE key = ?1",
            params![HISTORY_KEY],
        )
        .unwrap();
        drop(conn);

        let reopened = ProvenanceStore::new(&db_path).await.unwrap();
        assert!(reopened.records().await.is_empty());
        // And the store stays writable afterwards.
        reopened.add("/m/b.ncm", "/out/b.mp3", "b.ncm").await.unwrap();
        assert!(reopened.is_recorded("/m/b.ncm", "b.ncm").await);
    }
}
