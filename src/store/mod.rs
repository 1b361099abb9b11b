mod file;
mod memory;
mod rest;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::ir::{HistoryEntry, StoredItem};

pub use file::FileStore;
pub use memory::MemoryStore;
pub use rest::{RestKvConfig, RestKvStore};

/// Upper bound for history listings.
pub const HISTORY_LIMIT: usize = 50;

/// Item keys are non-empty runs of ASCII letters, digits, `-` and `_`.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Key/value persistence for finished translations plus a recency index.
#[async_trait]
pub trait Store: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn save(&self, item: &StoredItem) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<StoredItem>, StoreError>;

    /// Newest first, one entry per key, at most `limit` entries.
    async fn list_recent(&self, limit: usize) -> Result<Vec<HistoryEntry>, StoreError>;

    /// Returns `false` when nothing was stored under `key`.
    async fn remove(&self, key: &str) -> Result<bool, StoreError>;
}

#[derive(Clone, Debug, Default)]
pub struct StoreSettings {
    pub rest: Option<RestKvConfig>,
    pub dir: Option<PathBuf>,
}

/// Remote store when credentials exist, then a directory store, then process memory.
pub fn open_store(settings: &StoreSettings) -> anyhow::Result<Arc<dyn Store>> {
    if let Some(rest) = settings.rest.clone() {
        return Ok(Arc::new(RestKvStore::new(rest)?));
    }
    if let Some(dir) = settings.dir.as_ref() {
        return Ok(Arc::new(FileStore::open(dir)?));
    }
    Ok(Arc::new(MemoryStore::new()))
}

/// Orders `(key, created_at)` index rows newest first, keeping the latest row per key.
pub(crate) fn newest_unique<'a, I>(rows: I, limit: usize) -> Vec<&'a str>
where
    I: IntoIterator<Item = (&'a str, chrono::DateTime<chrono::Utc>)>,
{
    let mut rows: Vec<(usize, &str, chrono::DateTime<chrono::Utc>)> = rows
        .into_iter()
        .enumerate()
        .map(|(i, (k, t))| (i, k, t))
        .collect();
    // later appends win ties
    rows.sort_by(|a, b| b.2.cmp(&a.2).then(b.0.cmp(&a.0)));
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for (_, key, _) in rows {
        if out.len() >= limit {
            break;
        }
        if seen.insert(key) {
            out.push(key);
        }
    }
    out
}
