/// Redis-backed store
///
/// Each document is one JSON string key. Writes go through MULTI/EXEC so a
/// document is replaced in one step. Uses redis::aio::ConnectionManager,
/// connected lazily on first use.

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{PersistenceStore, StoreError};
use crate::rewards::RewardBook;

const DEFAULT_PREFIX: &str = "clc:pool";

pub struct RedisStore {
    client: redis::Client,
    connection: Arc<RwLock<Option<redis::aio::ConnectionManager>>>,
    prefix: String,
}

impl RedisStore {
    pub fn new(redis_url: &str, prefix: Option<&str>) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            connection: Arc::new(RwLock::new(None)),
            prefix: prefix.unwrap_or(DEFAULT_PREFIX).to_string(),
        })
    }

    fn key(&self, doc: &str) -> String {
        format!("{}:{}", self.prefix, doc)
    }

    async fn connection(&self) -> Result<redis::aio::ConnectionManager, StoreError> {
        let mut guard = self.connection.write().await;
        if guard.is_none() {
            let manager = redis::aio::ConnectionManager::new(self.client.clone()).await?;
            tracing::info!("Redis store connected ({})", self.prefix);
            *guard = Some(manager);
        }
        guard
            .clone()
            .ok_or_else(|| StoreError::Unavailable("redis connection not initialised".to_string()))
    }

    async fn get_doc<T: DeserializeOwned + Default>(&self, doc: &str) -> Result<T, StoreError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(self.key(doc)).await?;
        match raw {
            Some(text) => Ok(serde_json::from_str(&text)?),
            None => Ok(T::default()),
        }
    }

    async fn set_doc<T: Serialize>(&self, doc: &str, value: &T) -> Result<(), StoreError> {
        let text = serde_json::to_string(value)?;
        let mut conn = self.connection().await?;
        let key = self.key(doc);
        let _: () = redis::pipe()
            .atomic()
            .set(&key, text)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceStore for RedisStore {
    async fn load_book(&self) -> Result<RewardBook, StoreError> {
        self.get_doc("book").await
    }

    async fn save_book(&self, book: &RewardBook) -> Result<(), StoreError> {
        self.set_doc("book", book).await
    }

    fn describe(&self) -> String {
        format!("redis:{}", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_prefixed() {
        let store = RedisStore::new("redis://127.0.0.1/", None).unwrap();
        assert_eq!(store.key("book"), "clc:pool:book");
        let store = RedisStore::new("redis://127.0.0.1/", Some("test")).unwrap();
        assert_eq!(store.key("book"), "test:book");
        assert_eq!(store.describe(), "redis:test");
    }

    #[test]
    fn test_rejects_bad_url() {
        assert!(RedisStore::new("not a url", None).is_err());
    }
}
