/// Share Processing Pipeline - validation + epoch bookkeeping + win settlement
///
/// Complete flow for one submission, under the epoch lock:
/// 1. Validate against the current challenge and the epoch's replay set
/// 2. Record the share on a copy of the epoch
/// 3. Non-win: persist the copy in the reward book, then swap it in
/// 4. Win: settle the coin; the settlement resets the epoch in the same
///    write that journals the shares
///
/// Holding the lock across settlement means no share can land between the
/// reward snapshot and the reset.

use std::sync::Arc;
use tokio::sync::Mutex;

use super::contributions::ContributionLedger;
use super::validator::{ShareOutcome, ShareSubmission, ShareValidator};
use crate::error::PoolError;
use crate::ledger::{ChallengeCache, CoinId};
use crate::metrics::prometheus as metrics;
use crate::rewards::RewardAccountant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    Won { coin_id: CoinId },
}

pub struct ShareProcessor {
    validator: ShareValidator,
    challenge: Arc<ChallengeCache>,
    accountant: Arc<RewardAccountant>,
    epoch: Mutex<ContributionLedger>,
}

impl ShareProcessor {
    /// Build the processor around the epoch stored in the reward book.
    pub async fn load(
        validator: ShareValidator,
        challenge: Arc<ChallengeCache>,
        accountant: Arc<RewardAccountant>,
    ) -> Self {
        let epoch = accountant.book().read(|b| b.epoch.clone()).await;
        tracing::info!(
            "Epoch restored: {} contributors, {} shares, {} used hashes",
            epoch.contributors(),
            epoch.total_shares(),
            epoch.used_hash_count()
        );
        update_epoch_gauges(&epoch);
        Self { validator, challenge, accountant, epoch: Mutex::new(epoch) }
    }

    pub async fn submit(&self, share: &ShareSubmission) -> Result<SubmitOutcome, PoolError> {
        let challenge = self.challenge.get_current().await.ok_or(PoolError::ChallengeUnavailable)?;
        let mut epoch = self.epoch.lock().await;

        let outcome = match self.validator.validate(share, &challenge, &epoch) {
            Ok(outcome) => outcome,
            Err(rejection) => {
                metrics::inc_shares_rejected(rejection.label());
                tracing::debug!("Share from {} rejected: {}", share.pool_secret, rejection);
                return Err(rejection.into());
            }
        };

        let mut next = epoch.clone();
        next.record(&share.pool_secret, &share.mined_hash);

        if outcome == ShareOutcome::Accepted {
            self.persist(&next).await?;
            metrics::inc_shares_accepted();
            *epoch = next;
            update_epoch_gauges(&epoch);
            tracing::debug!(
                "Share accepted from {} ({} this epoch)",
                share.pool_secret,
                epoch.share_count(&share.pool_secret)
            );
            return Ok(SubmitOutcome::Accepted);
        }

        metrics::inc_shares_accepted();
        tracing::info!("Winning share from {} (hash {})", share.pool_secret, share.mined_hash);
        match self.accountant.settle(share, next.shares()).await {
            Ok(coin_id) => {
                self.reload(&mut epoch).await;
                Ok(SubmitOutcome::Won { coin_id })
            }
            Err(e @ PoolError::SettlementIncomplete { .. }) => {
                // Whatever the settlement managed to write is the epoch now.
                self.reload(&mut epoch).await;
                Err(e)
            }
            Err(e) => {
                // Nothing was claimed: the share still counts, the hash is spent.
                if let Err(store_err) = self.persist(&next).await {
                    tracing::error!(
                        "Unclaimed win from {} ({}) could not be recorded",
                        share.pool_secret,
                        e
                    );
                    return Err(store_err);
                }
                *epoch = next;
                update_epoch_gauges(&epoch);
                Err(e)
            }
        }
    }

    pub async fn epoch_snapshot(&self) -> ContributionLedger {
        self.epoch.lock().await.clone()
    }

    async fn persist(&self, epoch: &ContributionLedger) -> Result<(), PoolError> {
        let epoch = epoch.clone();
        self.accountant.book().commit(move |b| b.epoch = epoch).await?;
        Ok(())
    }

    async fn reload(&self, epoch: &mut ContributionLedger) {
        *epoch = self.accountant.book().read(|b| b.epoch.clone()).await;
        update_epoch_gauges(epoch);
        if epoch.is_empty() {
            tracing::info!("Epoch reset");
        }
    }
}

fn update_epoch_gauges(epoch: &ContributionLedger) {
    metrics::set_epoch_shares(epoch.total_shares());
    metrics::set_epoch_contributors(epoch.contributors());
}
