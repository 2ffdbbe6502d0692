/// JSON documents on disk.
///
/// `<dir>/pool_book.json`, replaced atomically (write temp file, fsync,
/// rename). When no book exists yet, the older `rewards.json` / `mined.json`
/// pair in the same directory is imported.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::{PersistenceStore, StoreError};
use crate::ledger::CoinId;
use crate::rewards::RewardBook;

const BOOK_FILE: &str = "pool_book.json";
const LEGACY_REWARDS_FILE: &str = "rewards.json";
const LEGACY_MINED_FILE: &str = "mined.json";

pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        let path = self.path(name);
        let tmp = self.path(&format!("{}.tmp", name));

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn import_legacy(&self) -> Result<Option<RewardBook>, StoreError> {
        let rewards: Option<BTreeMap<CoinId, BTreeMap<String, f64>>> =
            Self::read_json(&self.path(LEGACY_REWARDS_FILE)).await?;
        let mined: Option<BTreeMap<CoinId, String>> =
            Self::read_json(&self.path(LEGACY_MINED_FILE)).await?;
        if rewards.is_none() && mined.is_none() {
            return Ok(None);
        }
        let book = RewardBook {
            rewards: rewards.unwrap_or_default(),
            mined: mined.unwrap_or_default(),
            ..RewardBook::default()
        };
        tracing::warn!(
            "Imported legacy {} / {} from {} ({} coins, {} keys)",
            LEGACY_REWARDS_FILE,
            LEGACY_MINED_FILE,
            self.dir.display(),
            book.rewards.len(),
            book.mined.len()
        );
        Ok(Some(book))
    }
}

#[async_trait]
impl PersistenceStore for FileStore {
    async fn load_book(&self) -> Result<RewardBook, StoreError> {
        if let Some(book) = Self::read_json(&self.path(BOOK_FILE)).await? {
            return Ok(book);
        }
        match self.import_legacy().await? {
            Some(book) => {
                self.save_book(&book).await?;
                Ok(book)
            }
            None => Ok(RewardBook::default()),
        }
    }

    async fn save_book(&self, book: &RewardBook) -> Result<(), StoreError> {
        self.write_json(BOOK_FILE, book).await
    }

    fn describe(&self) -> String {
        format!("file:{}", self.dir.display())
    }
}
