use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{newest_unique, Store};
use crate::error::StoreError;
use crate::ir::{HistoryEntry, StoredItem};

#[derive(Default)]
struct Inner {
    items: HashMap<String, StoredItem>,
    history: Vec<(String, DateTime<Utc>)>,
}

/// Process-local store. Contents live until removed or the process exits.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn save(&self, item: &StoredItem) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.items.insert(item.key.clone(), item.clone());
        inner.history.push((item.key.clone(), item.created_at));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredItem>, StoreError> {
        Ok(self.inner.read().await.items.get(key).cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<HistoryEntry>, StoreError> {
        let inner = self.inner.read().await;
        let live = inner
            .history
            .iter()
            .filter(|(k, _)| inner.items.contains_key(k))
            .map(|(k, t)| (k.as_str(), *t));
        Ok(newest_unique(live, limit)
            .into_iter()
            .filter_map(|k| inner.items.get(k).map(StoredItem::summary))
            .collect())
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.inner.write().await.items.remove(key).is_some())
    }
}
