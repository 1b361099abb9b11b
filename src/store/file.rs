use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{is_valid_key, newest_unique, Store};
use crate::error::StoreError;
use crate::ir::{HistoryEntry, StoredItem};

const ITEMS_DIR: &str = "items";
const HISTORY_FILE: &str = "history.jsonl";

// distinguishes temp files of concurrent saves within one process
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Durable store: one JSON document per key plus an append-only history log.
pub struct FileStore {
    root: PathBuf,
    // serializes history appends
    history_lock: Mutex<()>,
}

#[derive(Serialize, Deserialize)]
struct HistoryRow {
    key: String,
    #[serde(rename = "createdAt")]
    created_at: DateTime<Utc>,
}

impl FileStore {
    pub fn open(root: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(root.join(ITEMS_DIR))
            .with_context(|| format!("create store dir: {}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
            history_lock: Mutex::new(()),
        })
    }

    /// `None` for keys that cannot name a file in the items directory.
    fn item_path(&self, key: &str) -> Option<PathBuf> {
        is_valid_key(key).then(|| self.root.join(ITEMS_DIR).join(format!("{key}.json")))
    }

    /// Unique sibling of `path`; the final rename is the only step writers share.
    fn tmp_path(path: &Path) -> PathBuf {
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        path.with_extension(format!("{}-{seq}.tmp", std::process::id()))
    }

    fn history_path(&self) -> PathBuf {
        self.root.join(HISTORY_FILE)
    }

    async fn read_history(&self) -> Result<Vec<HistoryRow>, StoreError> {
        let text = match tokio::fs::read_to_string(self.history_path()).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };
        let mut rows = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<HistoryRow>(line) {
                Ok(r) => rows.push(r),
                Err(err) => tracing::warn!(%err, "skipping unreadable history row"),
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl Store for FileStore {
    fn backend_name(&self) -> &'static str {
        "file"
    }

    async fn save(&self, item: &StoredItem) -> Result<(), StoreError> {
        let path = self
            .item_path(&item.key)
            .ok_or_else(|| StoreError::InvalidKey(item.key.clone()))?;
        let tmp = Self::tmp_path(&path);
        let json = serde_json::to_vec_pretty(item)?;
        let written = match tokio::fs::write(&tmp, &json).await {
            Ok(()) => tokio::fs::rename(&tmp, &path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        let row = serde_json::to_string(&HistoryRow {
            key: item.key.clone(),
            created_at: item.created_at,
        })?;
        let _guard = self.history_lock.lock().await;
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.history_path())
            .await?;
        f.write_all(format!("{row}\n").as_bytes()).await?;
        f.flush().await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredItem>, StoreError> {
        let Some(path) = self.item_path(key) else {
            return Ok(None);
        };
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<HistoryEntry>, StoreError> {
        let rows = self.read_history().await?;
        // over-fetch so removed keys do not shrink the page
        let keys = newest_unique(rows.iter().map(|r| (r.key.as_str(), r.created_at)), rows.len());
        let mut out = Vec::new();
        for key in keys {
            if out.len() >= limit {
                break;
            }
            if let Some(item) = self.get(key).await? {
                out.push(item.summary());
            }
        }
        Ok(out)
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let Some(path) = self.item_path(key) else {
            return Ok(false);
        };
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
