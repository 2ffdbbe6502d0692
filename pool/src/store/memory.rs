/// In-process store. Nothing survives a restart; meant for tests and dry runs.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

use super::{PersistenceStore, StoreError};
use crate::rewards::RewardBook;

#[derive(Default)]
pub struct MemoryStore {
    book: Mutex<Option<RewardBook>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent save fail (failure injection).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Successful saves so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn saved_book(&self) -> Option<RewardBook> {
        self.book.lock().await.clone()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl PersistenceStore for MemoryStore {
    async fn load_book(&self) -> Result<RewardBook, StoreError> {
        Ok(self.book.lock().await.clone().unwrap_or_default())
    }

    async fn save_book(&self, book: &RewardBook) -> Result<(), StoreError> {
        self.check_writable()?;
        *self.book.lock().await = Some(book.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
