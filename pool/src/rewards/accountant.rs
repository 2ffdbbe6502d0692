/// Reward Accountant - turns a winning share into a coin and per-miner rewards
///
/// Settlement of a win:
/// 1. submit the solution upstream and learn the new coin id
/// 2. persist the coin key with a `Claimed` journal entry holding the epoch's
///    share counts, and reset the epoch, in one write
/// 3. merge the dev/pool fee into the fee coin, journal moves to `FeePaid`
/// 4. split the post-fee value proportionally to the epoch's share counts
///    and persist the rewards, dropping the journal entry
///
/// Nothing after step 1 is retried automatically. A failure there leaves the
/// journal entry in place and surfaces as `SettlementIncomplete`; `resume`
/// finishes entries that got as far as `FeePaid` (step 4 needs no upstream
/// writes).

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;

use super::book::{Bookkeeper, SettlementRecord, SettlementStage};
use crate::crypto::CoinKey;
use crate::error::PoolError;
use crate::ledger::{CoinId, LedgerClient, MergeRequest, SolvedChallenge};
use crate::metrics::prometheus as metrics;
use crate::shares::{ContributionLedger, ShareSubmission};

pub struct RewardAccountant {
    ledger: Arc<dyn LedgerClient>,
    book: Arc<Bookkeeper>,
    fee_coin_id: CoinId,
    dev_fee_rate: f64,
    pool_fee_rate: f64,
}

impl RewardAccountant {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        book: Arc<Bookkeeper>,
        fee_coin_id: CoinId,
        dev_fee_rate: f64,
        pool_fee_rate: f64,
    ) -> Self {
        Self { ledger, book, fee_coin_id, dev_fee_rate, pool_fee_rate }
    }

    pub fn book(&self) -> &Arc<Bookkeeper> {
        &self.book
    }

    /// Settle a winning share; `shares` are the epoch's counts including it.
    pub async fn settle(
        &self,
        share: &ShareSubmission,
        shares: &BTreeMap<String, u64>,
    ) -> Result<CoinId, PoolError> {
        let key = CoinKey::from_hex(&share.coin_private_key)?;

        let coin_id = self
            .ledger
            .submit_solution(&SolvedChallenge {
                holder: share.holder.clone(),
                sign: share.signature.clone(),
                hash: share.mined_hash.clone(),
            })
            .await
            .map_err(|e| {
                metrics::inc_settlement_failures();
                tracing::error!("Ledger refused winning hash {}: {}", share.mined_hash, e);
                PoolError::from(e)
            })?;

        metrics::inc_coins_won();
        tracing::info!(
            "🎉 Coin #{} mined by {} ({} contributors, {} shares)",
            coin_id,
            share.pool_secret,
            shares.len(),
            shares.values().sum::<u64>()
        );

        let record = SettlementRecord::claimed(shares.clone());
        let secret = share.coin_private_key.clone();
        self.book
            .commit(move |b| {
                b.mined.insert(coin_id, secret);
                b.settlements.insert(coin_id, record);
                b.epoch = ContributionLedger::new();
            })
            .await
            .map_err(|e| self.incomplete(coin_id, SettlementStage::Claimed, e))?;

        self.pay_fee(coin_id, &key)
            .await
            .map_err(|e| self.incomplete(coin_id, SettlementStage::Claimed, e))?;

        self.book
            .commit(|b| {
                if let Some(r) = b.settlements.get_mut(&coin_id) {
                    r.advance(SettlementStage::FeePaid);
                }
            })
            .await
            .map_err(|e| {
                self.incomplete(coin_id, SettlementStage::Claimed, format!("fee paid but not journaled: {}", e))
            })?;

        self.distribute(coin_id)
            .await
            .map_err(|e| self.incomplete(coin_id, SettlementStage::FeePaid, e))?;

        Ok(coin_id)
    }

    /// Finish a settlement from its journal entry.
    pub async fn resume(&self, coin_id: CoinId) -> Result<(), PoolError> {
        let stage = self
            .book
            .read(|b| b.settlements.get(&coin_id).map(|r| r.stage))
            .await
            .ok_or(PoolError::UnknownSettlement(coin_id))?;

        match stage {
            SettlementStage::Claimed => Err(PoolError::SettlementIncomplete {
                coin_id,
                stage,
                reason: "fee payment was never confirmed".to_string(),
            }),
            SettlementStage::FeePaid => {
                self.distribute(coin_id).await.map_err(|e| self.incomplete(coin_id, stage, e))?;
                tracing::info!("Settlement of coin #{} resumed and completed", coin_id);
                Ok(())
            }
        }
    }

    /// Resume every `FeePaid` entry; `Claimed` ones are only reported.
    /// Returns how many settlements were completed.
    pub async fn resume_pending(&self) -> usize {
        let mut completed = 0;
        for (coin_id, record) in self.pending().await {
            match record.stage {
                SettlementStage::FeePaid => match self.resume(coin_id).await {
                    Ok(()) => completed += 1,
                    Err(e) => tracing::error!("Could not resume settlement of coin #{}: {}", coin_id, e),
                },
                SettlementStage::Claimed => tracing::warn!(
                    "Settlement of coin #{} is stuck at stage claimed since {}; verify the fee merge on the ledger",
                    coin_id,
                    record.updated_at
                ),
            }
        }
        completed
    }

    pub async fn pending(&self) -> Vec<(CoinId, SettlementRecord)> {
        self.book
            .read(|b| b.settlements.iter().map(|(id, r)| (*id, r.clone())).collect())
            .await
    }

    async fn pay_fee(&self, coin_id: CoinId, key: &CoinKey) -> Result<(), PoolError> {
        let coin = self.ledger.get_coin(coin_id).await?;
        let fee_coin = self.ledger.get_coin(self.fee_coin_id).await?;

        let fee_volume = coin.val * (self.dev_fee_rate + self.pool_fee_rate);
        let vol = fee_volume.to_string();
        let message = format!("{} {} {}", self.fee_coin_id, fee_coin.tx_count(), vol);
        let sign = key.sign(&message)?;

        self.ledger
            .merge(&MergeRequest { origin: coin_id, target: self.fee_coin_id, vol: vol.clone(), sign })
            .await?;
        tracing::info!("Fee of {} from coin #{} merged into coin #{}", vol, coin_id, self.fee_coin_id);
        Ok(())
    }

    async fn distribute(&self, coin_id: CoinId) -> Result<(), PoolError> {
        let shares = self
            .book
            .read(|b| b.settlements.get(&coin_id).map(|r| r.shares.clone()))
            .await
            .ok_or(PoolError::UnknownSettlement(coin_id))?;

        let coin = self.ledger.get_coin(coin_id).await?;
        let rewards = split_rewards(&shares, coin.val);
        tracing::info!(
            "Coin #{} worth {} after fees split across {} contributors",
            coin_id,
            coin.val,
            rewards.len()
        );

        self.book
            .commit(move |b| {
                if !rewards.is_empty() {
                    b.rewards.insert(coin_id, rewards);
                }
                b.settlements.remove(&coin_id);
            })
            .await?;
        Ok(())
    }

    fn incomplete(&self, coin_id: CoinId, stage: SettlementStage, reason: impl Display) -> PoolError {
        metrics::inc_settlement_failures();
        let err = PoolError::SettlementIncomplete { coin_id, stage, reason: reason.to_string() };
        tracing::error!("{}", err);
        err
    }
}

/// Proportional split of `value` by share count.
pub fn split_rewards(shares: &BTreeMap<String, u64>, value: f64) -> BTreeMap<String, f64> {
    let total: u64 = shares.values().sum();
    if total == 0 {
        return BTreeMap::new();
    }
    shares
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(secret, count)| (secret.clone(), *count as f64 / total as f64 * value))
        .collect()
}
