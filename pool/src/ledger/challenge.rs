/// Challenge Cache - Current mining job from the CLC ledger
///
/// Periodically fetches the ledger's job and republishes it to miners with
/// the pool's own (easier) difficulty. The ledger's difficulty is kept aside
/// as the win threshold. A failed fetch leaves the previous snapshot in place.

use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time;

use super::client::{LedgerClient, LedgerError};
use super::types::NetworkJob;
use crate::metrics::prometheus as metrics;
use crate::shares::target::Target;

#[derive(Debug, Clone)]
pub struct Challenge {
    pub seed: String,
    /// Win threshold, as published by the ledger.
    pub network_difficulty: Target,
    /// Share acceptance threshold, the pool's own.
    pub pool_difficulty: Target,
    pub fetched_at: i64,
    extra: Map<String, Value>,
}

impl Challenge {
    pub fn from_job(job: NetworkJob, pool_difficulty: &Target) -> Result<Self, LedgerError> {
        let network_difficulty = Target::from_hex(&job.diff)
            .map_err(|e| LedgerError::Protocol(format!("challenge difficulty: {}", e)))?;
        Ok(Self {
            seed: job.seed,
            network_difficulty,
            pool_difficulty: pool_difficulty.clone(),
            fetched_at: Utc::now().timestamp(),
            extra: job.extra,
        })
    }

    /// The job as miners see it: upstream fields, `diff` set to the pool target.
    pub fn published(&self) -> Value {
        let mut out = self.extra.clone();
        out.insert("seed".to_string(), Value::String(self.seed.clone()));
        out.insert(
            "diff".to_string(),
            Value::String(self.pool_difficulty.as_hex().to_string()),
        );
        Value::Object(out)
    }
}

pub struct ChallengeCache {
    ledger: Arc<dyn LedgerClient>,
    pool_difficulty: Target,
    refresh_interval: Duration,
    current: Arc<RwLock<Option<Arc<Challenge>>>>,
}

impl ChallengeCache {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        pool_difficulty: Target,
        refresh_interval: Duration,
    ) -> Self {
        tracing::info!(
            "ChallengeCache: pool difficulty={}, interval={}ms",
            pool_difficulty.as_hex(),
            refresh_interval.as_millis()
        );
        Self {
            ledger,
            pool_difficulty,
            refresh_interval,
            current: Arc::new(RwLock::new(None)),
        }
    }

    /// Last good snapshot; `None` only until the first successful fetch.
    pub async fn get_current(&self) -> Option<Arc<Challenge>> {
        self.current.read().await.clone()
    }

    /// Fetch the ledger job and replace the snapshot wholesale.
    pub async fn refresh(&self) -> Result<Arc<Challenge>, LedgerError> {
        let result = async {
            let job = self.ledger.get_challenge().await?;
            Challenge::from_job(job, &self.pool_difficulty)
        }
        .await;

        match result {
            Ok(challenge) => {
                let challenge = Arc::new(challenge);
                let mut current = self.current.write().await;
                let changed = current.as_ref().map(|c| c.seed != challenge.seed).unwrap_or(true);
                if changed {
                    tracing::info!(
                        "New challenge: seed={}, network difficulty={}",
                        challenge.seed,
                        challenge.network_difficulty.as_hex()
                    );
                    metrics::inc_challenge_updates();
                }
                *current = Some(challenge.clone());
                Ok(challenge)
            }
            Err(e) => {
                metrics::inc_challenge_fetch_errors();
                tracing::warn!("Challenge refresh failed, keeping previous snapshot: {}", e);
                Err(e)
            }
        }
    }

    /// Spawn the refresh loop. The first tick fires immediately.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut interval = time::interval(cache.refresh_interval);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let _ = cache.refresh().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockLedger;
    use serde_json::json;

    fn cache(ledger: Arc<MockLedger>) -> ChallengeCache {
        ChallengeCache::new(
            ledger,
            Target::from_hex("000000ffff").unwrap(),
            Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn test_empty_until_first_fetch() {
        let ledger = Arc::new(MockLedger::new());
        ledger.fail_challenge(true);
        let cache = cache(ledger.clone());

        assert!(cache.refresh().await.is_err());
        assert!(cache.get_current().await.is_none());
    }

    #[tokio::test]
    async fn test_overwrites_diff_with_pool_target() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_challenge("seed-a", "00000000ff");
        let cache = cache(ledger.clone());

        cache.refresh().await.unwrap();
        let current = cache.get_current().await.unwrap();
        assert_eq!(current.seed, "seed-a");
        assert_eq!(current.network_difficulty.as_hex(), "00000000ff");
        assert_eq!(current.published()["diff"], json!("000000ffff"));
        assert_eq!(current.published()["seed"], json!("seed-a"));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_challenge("seed-a", "00ff");
        let cache = cache(ledger.clone());
        cache.refresh().await.unwrap();

        ledger.fail_challenge(true);
        assert!(cache.refresh().await.is_err());
        assert_eq!(cache.get_current().await.unwrap().seed, "seed-a");

        // A job with an unparsable difficulty is a failed refresh too.
        ledger.fail_challenge(false);
        ledger.set_challenge("seed-b", "not-hex");
        assert!(matches!(cache.refresh().await, Err(LedgerError::Protocol(_))));
        assert_eq!(cache.get_current().await.unwrap().seed, "seed-a");
    }

    #[tokio::test]
    async fn test_start_populates_snapshot() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_challenge("seed-loop", "00ff");
        let cache = Arc::new(cache(ledger));

        let handle = cache.start();
        for _ in 0..50 {
            if cache.get_current().await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();
        assert_eq!(cache.get_current().await.unwrap().seed, "seed-loop");
    }
}
