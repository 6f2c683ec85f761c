use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{require_id, ItemStore, ScanPage, StoreResult};
use crate::models::{Item, ID_FIELD};

#[derive(Default)]
pub struct InMemoryItemStore {
    items: RwLock<BTreeMap<String, Item>>,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl ItemStore for InMemoryItemStore {
    async fn get(&self, id: &str) -> StoreResult<Option<Item>> {
        Ok(self.items.read().await.get(id).cloned())
    }

    async fn put(&self, item: &Item) -> StoreResult<()> {
        let id = require_id(item)?.to_string();
        self.items.write().await.insert(id, item.clone());
        Ok(())
    }

    async fn merge(&self, id: &str, changes: &Item) -> StoreResult<Option<Item>> {
        let mut items = self.items.write().await;
        let Some(existing) = items.get_mut(id) else {
            return Ok(None);
        };

        for (key, value) in changes {
            if key != ID_FIELD {
                existing.insert(key.clone(), value.clone());
            }
        }

        Ok(Some(existing.clone()))
    }

    async fn delete(&self, id: &str) -> StoreResult<Option<Item>> {
        Ok(self.items.write().await.remove(id))
    }

    async fn scan(&self, limit: usize, start_after: Option<&str>) -> StoreResult<ScanPage> {
        let items = self.items.read().await;
        let lower = match start_after {
            Some(key) => Bound::Excluded(key.to_string()),
            None => Bound::Unbounded,
        };

        let mut range = items.range((lower, Bound::Unbounded));
        let page: Vec<Item> = range.by_ref().take(limit).map(|(_, v)| v.clone()).collect();
        let has_more = range.next().is_some();

        let last_key = if has_more {
            page.last().and_then(|item| crate::models::item_id(item)).map(String::from)
        } else {
            None
        };

        Ok(ScanPage {
            items: page,
            last_key,
        })
    }
}
