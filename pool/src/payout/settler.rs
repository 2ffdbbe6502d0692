/// Payout Settler - consolidates a miner's rewards into one coin and hands it over
///
/// For one pool secret, walking its rewarded coins in ascending id order:
/// - first coin: split the reward off into a fresh coin (`ledger length + 1`),
///   which becomes the consolidation target
/// - every later coin: merge its reward into the target
/// - finally: transfer the target to the miner's address, signed with the key
///   of the coin the target was split from
///
/// Each reward leaves the book as soon as its coin has been folded in. A
/// `PayoutRecord` is journaled before the split is sent, so a payout that
/// died anywhere before the transfer resumes into the same target instead of
/// splitting again.

use std::sync::Arc;
use tokio::sync::Mutex;

use super::amount::render_amount;
use crate::crypto::CoinKey;
use crate::error::PoolError;
use crate::ledger::{CoinId, LedgerClient, LedgerError, MergeRequest, SplitRequest, TransferRequest};
use crate::metrics::prometheus as metrics;
use crate::rewards::{Bookkeeper, PayoutRecord};

pub struct PayoutSettler {
    ledger: Arc<dyn LedgerClient>,
    book: Arc<Bookkeeper>,
    lock: Mutex<()>,
}

impl PayoutSettler {
    pub fn new(ledger: Arc<dyn LedgerClient>, book: Arc<Bookkeeper>) -> Self {
        Self { ledger, book, lock: Mutex::new(()) }
    }

    /// Coins holding an unpaid reward for `pool_secret`, ascending.
    pub async fn unpaid_coins(&self, pool_secret: &str) -> Vec<CoinId> {
        self.book.read(|b| b.unpaid_coins(pool_secret)).await
    }

    pub async fn total_unpaid(&self, pool_secret: &str) -> f64 {
        self.book.read(|b| b.total_unpaid(pool_secret)).await
    }

    /// Pay everything owed to `pool_secret` to `destination`.
    /// Returns the id of the coin handed over.
    pub async fn payout(&self, pool_secret: &str, destination: &str) -> Result<CoinId, PoolError> {
        let _guard = self.lock.lock().await;
        match self.run(pool_secret, destination).await {
            Ok(coin_id) => {
                metrics::inc_payouts_completed();
                tracing::info!("💸 Paid out coin #{} for {} to {}", coin_id, pool_secret, destination);
                Ok(coin_id)
            }
            Err(PoolError::NoRewardAvailable) => Err(PoolError::NoRewardAvailable),
            Err(e) => {
                metrics::inc_payout_failures();
                tracing::error!("Payout for {} failed: {}", pool_secret, e);
                Err(e)
            }
        }
    }

    async fn run(&self, pool_secret: &str, destination: &str) -> Result<CoinId, PoolError> {
        let (coins, mut record) = self
            .book
            .read(|b| (b.unpaid_coins(pool_secret), b.payouts.get(pool_secret).cloned()))
            .await;

        if coins.is_empty() && record.is_none() {
            return Err(PoolError::NoRewardAvailable);
        }
        if let Some(r) = &record {
            tracing::warn!(
                "Resuming payout for {} into coin #{} (started {})",
                pool_secret,
                r.target,
                r.started_at
            );
        }
        if let Some(r) = record.clone().filter(|r| r.split_pending) {
            record = self.finish_split(pool_secret, &r).await?;
        }

        let coins = self.book.read(|b| b.unpaid_coins(pool_secret)).await;
        for coin_id in coins {
            match record.as_ref().map(|r| r.target) {
                None => record = Some(self.split(pool_secret, coin_id, None).await?),
                Some(target) => self.merge(pool_secret, coin_id, target).await?,
            }
        }

        let record = record.ok_or(PoolError::NoRewardAvailable)?;
        let owner = self.coin_key(record.owner).await?;
        let sign = owner.sign(destination)?;
        self.ledger
            .transact(&TransferRequest { cid: record.target, new_holder: destination.to_string(), sign })
            .await?;
        self.book
            .commit(|b| {
                b.payouts.remove(pool_secret);
            })
            .await?;
        Ok(record.target)
    }

    /// Settle a split whose outcome was never recorded.
    async fn finish_split(
        &self,
        pool_secret: &str,
        record: &PayoutRecord,
    ) -> Result<Option<PayoutRecord>, PoolError> {
        let owner = self.coin_key(record.owner).await?;
        match self.ledger.get_coin(record.target).await {
            Ok(coin) if coin.holder.as_deref() == Some(owner.public_key_hex().as_str()) => {
                tracing::info!("Split into coin #{} had landed; recording it", record.target);
                Ok(Some(self.confirm_split(pool_secret, record.owner, record.target).await?))
            }
            Ok(_) => {
                // Another coin took the id, so this split can never land.
                tracing::warn!(
                    "Coin #{} belongs to someone else; payout for {} starts over",
                    record.target,
                    pool_secret
                );
                self.book
                    .commit(|b| {
                        b.payouts.remove(pool_secret);
                    })
                    .await?;
                Ok(None)
            }
            // The ledger refuses a second coin with the same id, so resending is safe.
            Err(LedgerError::Protocol(_)) => {
                Ok(Some(self.split(pool_secret, record.owner, Some(record.target)).await?))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Split the reward on `coin_id` into `target` (a fresh id when None),
    /// journaling the intent before anything is sent.
    async fn split(
        &self,
        pool_secret: &str,
        coin_id: CoinId,
        target: Option<CoinId>,
    ) -> Result<PayoutRecord, PoolError> {
        let key = self.coin_key(coin_id).await?;
        let vol = self.volume(pool_secret, coin_id).await?;
        let target = match target {
            Some(target) => target,
            None => {
                let target = self.ledger.ledger_length().await? + 1;
                let intent = PayoutRecord::intent(target, coin_id);
                let secret = pool_secret.to_string();
                self.book
                    .commit(move |b| {
                        b.payouts.insert(secret, intent);
                    })
                    .await?;
                target
            }
        };

        let sign = key.sign(&format!("{} 1 {}", target, vol))?;
        self.ledger
            .split(&SplitRequest { origin: coin_id, target, vol: vol.clone(), sign })
            .await?;
        tracing::info!("Split {} from coin #{} into coin #{}", vol, coin_id, target);
        self.confirm_split(pool_secret, coin_id, target).await
    }

    async fn confirm_split(
        &self,
        pool_secret: &str,
        owner: CoinId,
        target: CoinId,
    ) -> Result<PayoutRecord, PoolError> {
        let secret = pool_secret.to_string();
        let record = self
            .book
            .commit(move |b| {
                b.remove_reward(owner, &secret);
                let record = b.payouts.entry(secret).or_insert_with(|| PayoutRecord::intent(target, owner));
                record.split_pending = false;
                record.clone()
            })
            .await?;
        Ok(record)
    }

    async fn merge(&self, pool_secret: &str, coin_id: CoinId, target: CoinId) -> Result<(), PoolError> {
        let key = self.coin_key(coin_id).await?;
        let vol = self.volume(pool_secret, coin_id).await?;
        let target_coin = self.ledger.get_coin(target).await?;
        let sign = key.sign(&format!("{} {} {}", target, target_coin.tx_count(), vol))?;
        self.ledger
            .merge(&MergeRequest { origin: coin_id, target, vol: vol.clone(), sign })
            .await?;
        self.book.commit(|b| b.remove_reward(coin_id, pool_secret)).await?;
        tracing::info!("Merged {} from coin #{} into coin #{}", vol, coin_id, target);
        Ok(())
    }

    /// Amount to move off `coin_id`: the reward, capped by what the coin holds.
    async fn volume(&self, pool_secret: &str, coin_id: CoinId) -> Result<String, PoolError> {
        let reward = self
            .book
            .read(|b| b.reward(coin_id, pool_secret))
            .await
            .unwrap_or(0.0);
        let coin = self.ledger.get_coin(coin_id).await?;
        Ok(render_amount(reward.min(coin.val)))
    }

    async fn coin_key(&self, coin_id: CoinId) -> Result<CoinKey, PoolError> {
        let secret = self
            .book
            .read(|b| b.coin_key(coin_id).map(str::to_string))
            .await
            .ok_or(PoolError::MissingCoinKey(coin_id))?;
        Ok(CoinKey::from_hex(&secret)?)
    }
}
