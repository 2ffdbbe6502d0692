/// Reward book - everything the pool owes and owns, kept durable
///
/// - `rewards`: coin id -> pool secret -> unpaid amount
/// - `mined`: coin id -> coin private key (spend authority)
/// - `settlements`: win settlements that have not finished yet
/// - `payouts`: payouts that are about to split, or have split, a
///   consolidation coin but have not transferred it yet
/// - `epoch`: share counts and used hashes since the last win
///
/// The whole book is one persisted document, so a win can move the epoch's
/// shares into its settlement entry and reset the epoch in a single write.
/// `Bookkeeper::commit` applies a change to a copy, writes the copy, and only
/// then swaps it in, so memory never runs ahead of disk.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::ledger::CoinId;
use crate::metrics::prometheus as metrics;
use crate::shares::ContributionLedger;
use crate::store::{PersistenceStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStage {
    /// Coin claimed and its key stored; dev/pool fee not confirmed.
    Claimed,
    /// Fee merged into the fee coin; rewards not yet written.
    FeePaid,
}

impl fmt::Display for SettlementStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementStage::Claimed => write!(f, "claimed"),
            SettlementStage::FeePaid => write!(f, "fee_paid"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub stage: SettlementStage,
    /// Share counts at the moment of the win.
    pub shares: BTreeMap<String, u64>,
    pub updated_at: i64,
}

impl SettlementRecord {
    pub fn claimed(shares: BTreeMap<String, u64>) -> Self {
        Self { stage: SettlementStage::Claimed, shares, updated_at: Utc::now().timestamp() }
    }

    pub fn advance(&mut self, stage: SettlementStage) {
        self.stage = stage;
        self.updated_at = Utc::now().timestamp();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRecord {
    /// Consolidation coin created by the split.
    pub target: CoinId,
    /// Mined coin whose key owns `target`.
    pub owner: CoinId,
    /// Written before the split is sent; cleared once the split is known to
    /// have landed and the owner coin's reward left the book.
    #[serde(default)]
    pub split_pending: bool,
    pub started_at: i64,
}

impl PayoutRecord {
    pub fn intent(target: CoinId, owner: CoinId) -> Self {
        Self { target, owner, split_pending: true, started_at: Utc::now().timestamp() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardBook {
    #[serde(default)]
    pub rewards: BTreeMap<CoinId, BTreeMap<String, f64>>,
    #[serde(default)]
    pub mined: BTreeMap<CoinId, String>,
    #[serde(default)]
    pub settlements: BTreeMap<CoinId, SettlementRecord>,
    #[serde(default)]
    pub payouts: BTreeMap<String, PayoutRecord>,
    #[serde(default)]
    pub epoch: ContributionLedger,
}

impl RewardBook {
    /// Unpaid reward of `pool_secret` on `coin_id`, if nonzero.
    pub fn reward(&self, coin_id: CoinId, pool_secret: &str) -> Option<f64> {
        self.rewards
            .get(&coin_id)
            .and_then(|m| m.get(pool_secret))
            .copied()
            .filter(|v| *v > 0.0)
    }

    /// Coins carrying a nonzero reward for `pool_secret`, ascending.
    pub fn unpaid_coins(&self, pool_secret: &str) -> Vec<CoinId> {
        self.rewards
            .keys()
            .copied()
            .filter(|id| self.reward(*id, pool_secret).is_some())
            .collect()
    }

    pub fn total_unpaid(&self, pool_secret: &str) -> f64 {
        self.rewards
            .keys()
            .filter_map(|id| self.reward(*id, pool_secret))
            .sum()
    }

    /// Drop a paid reward; a coin with nobody left to pay leaves `rewards`.
    pub fn remove_reward(&mut self, coin_id: CoinId, pool_secret: &str) {
        if let Some(m) = self.rewards.get_mut(&coin_id) {
            m.remove(pool_secret);
            if m.is_empty() {
                self.rewards.remove(&coin_id);
            }
        }
    }

    pub fn coin_key(&self, coin_id: CoinId) -> Option<&str> {
        self.mined.get(&coin_id).map(String::as_str)
    }
}

/// Shared, durable handle on the reward book.
pub struct Bookkeeper {
    book: Mutex<RewardBook>,
    store: Arc<dyn PersistenceStore>,
}

impl Bookkeeper {
    pub async fn load(store: Arc<dyn PersistenceStore>) -> Result<Self, StoreError> {
        let book = store.load_book().await?;
        tracing::info!(
            "Reward book loaded from {}: {} coins with rewards, {} mined keys, {} pending settlements, {} payouts in flight, {} shares this epoch",
            store.describe(),
            book.rewards.len(),
            book.mined.len(),
            book.settlements.len(),
            book.payouts.len(),
            book.epoch.total_shares()
        );
        Ok(Self { book: Mutex::new(book), store })
    }

    pub async fn read<R>(&self, f: impl FnOnce(&RewardBook) -> R) -> R {
        let book = self.book.lock().await;
        f(&book)
    }

    pub async fn snapshot(&self) -> RewardBook {
        self.book.lock().await.clone()
    }

    /// Apply `f` and persist; on a failed write the book is left untouched.
    pub async fn commit<R>(&self, f: impl FnOnce(&mut RewardBook) -> R) -> Result<R, StoreError> {
        let mut book = self.book.lock().await;
        let mut next = book.clone();
        let out = f(&mut next);
        if let Err(e) = self.store.save_book(&next).await {
            metrics::inc_persistence_errors();
            tracing::error!("Failed to persist reward book: {}", e);
            return Err(e);
        }
        *book = next;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn book() -> RewardBook {
        let mut b = RewardBook::default();
        b.rewards.insert(7, BTreeMap::from([("a".to_string(), 2.5), ("b".to_string(), 1.0)]));
        b.rewards.insert(3, BTreeMap::from([("a".to_string(), 1.25)]));
        b.rewards.insert(5, BTreeMap::from([("a".to_string(), 0.0), ("b".to_string(), 4.0)]));
        b
    }

    #[test]
    fn test_unpaid_coins_sorted_and_nonzero() {
        let b = book();
        assert_eq!(b.unpaid_coins("a"), vec![3, 7]);
        assert_eq!(b.unpaid_coins("b"), vec![5, 7]);
        assert!(b.unpaid_coins("nobody").is_empty());
        assert_eq!(b.total_unpaid("a"), 3.75);
    }

    #[test]
    fn test_remove_reward_prunes_empty_coins() {
        let mut b = book();
        b.remove_reward(3, "a");
        assert!(!b.rewards.contains_key(&3));
        b.remove_reward(7, "a");
        assert_eq!(b.unpaid_coins("b"), vec![5, 7]);
    }

    #[test]
    fn test_books_without_epoch_still_load() {
        let back: RewardBook = serde_json::from_str(r#"{"rewards": {"3": {"a": 1.0}}, "mined": {}}"#).unwrap();
        assert!(back.epoch.is_empty());
        assert_eq!(back.reward(3, "a"), Some(1.0));
    }

    #[test]
    fn test_json_roundtrip_with_integer_keys() {
        let mut b = book();
        b.mined.insert(7, "ab".repeat(32));
        b.settlements.insert(9, SettlementRecord::claimed(BTreeMap::from([("a".to_string(), 3)])));
        b.payouts.insert("a".to_string(), PayoutRecord::intent(40, 7));
        b.epoch.record("a", "h1");

        let text = serde_json::to_string(&b).unwrap();
        assert!(text.contains("\"fee_paid\"") || text.contains("\"claimed\""));
        let back: RewardBook = serde_json::from_str(&text).unwrap();
        assert_eq!(back, b);
    }

    #[tokio::test]
    async fn test_commit_is_all_or_nothing() {
        let store = Arc::new(MemoryStore::new());
        let keeper = Bookkeeper::load(store.clone()).await.unwrap();

        keeper.commit(|b| b.mined.insert(1, "k1".to_string())).await.unwrap();
        assert_eq!(store.saved_book().await.unwrap().mined.get(&1).map(String::as_str), Some("k1"));
        assert_eq!(store.write_count(), 1);

        store.fail_writes(true);
        let res = keeper.commit(|b| b.mined.insert(2, "k2".to_string())).await;
        assert!(res.is_err());
        assert_eq!(store.write_count(), 1);
        assert!(keeper.read(|b| b.coin_key(2).is_none()).await);
        assert_eq!(keeper.read(|b| b.coin_key(1).map(str::to_string)).await.as_deref(), Some("k1"));
    }
}
