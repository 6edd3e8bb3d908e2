//! Persistence seam for finished item sets.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::models::item::{GeneratedItem, StoredItem};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Persists `items` under `topic` and returns them with ids assigned.
    async fn store(&self, topic: &str, items: Vec<GeneratedItem>) -> Result<Vec<StoredItem>>;
}

/// Process-local store; contents are lost on restart.
#[derive(Default)]
pub struct InMemoryItemStore {
    items: RwLock<Vec<StoredItem>>,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn by_topic(&self, topic: &str) -> Vec<StoredItem> {
        self.items
            .read()
            .await
            .iter()
            .filter(|i| i.topic == topic)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ItemStore for InMemoryItemStore {
    async fn store(&self, topic: &str, items: Vec<GeneratedItem>) -> Result<Vec<StoredItem>> {
        let now = Utc::now();
        let stored: Vec<StoredItem> = items
            .into_iter()
            .map(|item| StoredItem {
                id: Uuid::new_v4(),
                topic: topic.to_string(),
                item,
                created_at: now,
            })
            .collect();

        self.items.write().await.extend(stored.iter().cloned());
        tracing::debug!(topic = %topic, count = stored.len(), "items stored");
        Ok(stored)
    }
}
