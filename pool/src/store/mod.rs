/// Durable state for the pool
///
/// One document, the reward book (rewards, mined keys, settlement + payout
/// journals, current epoch), always written whole. `save_book` returning Ok
/// means the document is durable.

pub mod file;
pub mod memory;
pub mod redis;

use async_trait::async_trait;
use thiserror::Error;

use crate::rewards::RewardBook;

pub use self::file::FileStore;
pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn load_book(&self) -> Result<RewardBook, StoreError>;
    async fn save_book(&self, book: &RewardBook) -> Result<(), StoreError>;
    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}
