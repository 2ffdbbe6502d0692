/// CLC Ledger Client - Communication with the upstream coin server
///
/// Plain HTTP GET + JSON, one request per ledger operation. Every request is
/// bounded by a timeout and classified on failure:
/// - `Unavailable`: transport error, timeout, or circuit breaker open. The
///   ledger did not answer, so nothing is known to have been committed.
/// - `Protocol`: the ledger answered, but not with the expected success shape.
///
/// Neither class is retried here. Sign-and-submit steps must never be replayed
/// blindly; callers decide.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

use super::types::{
    ack_error, Coin, CoinEnvelope, CoinId, LengthEnvelope, MergeRequest, NetworkJob,
    SolvedChallenge, SolvedEnvelope, SplitRequest, TransferRequest,
};
use crate::metrics::prometheus as metrics;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    #[error("ledger protocol error: {0}")]
    Protocol(String),
}

/// Operations the pool needs from the ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn get_challenge(&self) -> Result<NetworkJob, LedgerError>;
    /// Claim a solved challenge; returns the id of the newly minted coin.
    async fn submit_solution(&self, solved: &SolvedChallenge) -> Result<CoinId, LedgerError>;
    async fn get_coin(&self, id: CoinId) -> Result<Coin, LedgerError>;
    async fn ledger_length(&self) -> Result<u64, LedgerError>;
    async fn split(&self, req: &SplitRequest) -> Result<(), LedgerError>;
    async fn merge(&self, req: &MergeRequest) -> Result<(), LedgerError>;
    async fn transact(&self, req: &TransferRequest) -> Result<(), LedgerError>;
}

#[derive(Debug, Clone)]
struct CircuitBreaker {
    failures: u32,
    last_failure: Option<Instant>,
    is_open: bool,
    max_failures: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    fn new() -> Self {
        Self {
            failures: 0,
            last_failure: None,
            is_open: false,
            max_failures: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }

    fn record_failure(&mut self) {
        self.failures += 1;
        self.last_failure = Some(Instant::now());

        if self.failures >= self.max_failures && !self.is_open {
            self.is_open = true;
            tracing::error!(
                "Ledger circuit breaker tripped after {} failures, pausing requests for {}s",
                self.failures,
                self.reset_timeout.as_secs()
            );
        }
    }

    fn record_success(&mut self) {
        if self.failures > 0 {
            self.failures = 0;
            tracing::info!("Ledger circuit breaker reset");
        }
    }

    fn check(&mut self) -> Result<(), LedgerError> {
        if self.is_open {
            if let Some(last_fail) = self.last_failure {
                if last_fail.elapsed() > self.reset_timeout {
                    tracing::info!("Ledger circuit breaker half-open, allowing a request");
                    self.is_open = false;
                    self.failures = 0;
                } else {
                    return Err(LedgerError::Unavailable("circuit breaker is open".to_string()));
                }
            }
        }
        Ok(())
    }
}

pub struct HttpLedgerClient {
    base_url: String,
    client: reqwest::Client,
    circuit_breaker: Arc<RwLock<CircuitBreaker>>,
}

impl HttpLedgerClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Unavailable(format!("http client init failed: {}", e)))?;

        let base_url = base_url.trim_end_matches('/').to_string();
        tracing::info!("HttpLedgerClient initialized: {} (timeout {:?})", base_url, timeout);

        Ok(Self {
            base_url,
            client,
            circuit_breaker: Arc::new(RwLock::new(CircuitBreaker::new())),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` with `query`, returning the decoded JSON body.
    async fn fetch(&self, path: &str, query: &[(&str, String)]) -> Result<Value, LedgerError> {
        metrics::inc_ledger_requests();

        let res = async {
            self.circuit_breaker.write().await.check()?;

            let url = format!("{}{}", self.base_url, path);
            let response = match self.client.get(&url).query(query).send().await {
                Ok(r) => r,
                Err(e) => {
                    self.circuit_breaker.write().await.record_failure();
                    let kind = if e.is_timeout() { "timeout" } else { "request failed" };
                    return Err(LedgerError::Unavailable(format!("{} {}: {}", kind, path, e)));
                }
            };

            let status = response.status();
            let body = match response.text().await {
                Ok(b) => b,
                Err(e) => {
                    self.circuit_breaker.write().await.record_failure();
                    return Err(LedgerError::Unavailable(format!("reading {} body: {}", path, e)));
                }
            };
            self.circuit_breaker.write().await.record_success();

            // The ledger reports application errors as `{error}` with a 5xx
            // status, so a JSON body always wins over the status code.
            match serde_json::from_str::<Value>(&body) {
                Ok(v) => {
                    if !status.is_success() {
                        return Err(LedgerError::Protocol(
                            ack_error(&v).unwrap_or_else(|| format!("HTTP {}", status)),
                        ));
                    }
                    Ok(v)
                }
                Err(_) => Err(LedgerError::Protocol(format!(
                    "{} answered HTTP {} with a non-JSON body",
                    path, status
                ))),
            }
        }
        .await;

        if res.is_err() {
            metrics::inc_ledger_errors();
        }
        res
    }

    async fn fetch_as<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, LedgerError> {
        let value = self.fetch(path, query).await?;
        serde_json::from_value(value.clone())
            .map_err(|e| LedgerError::Protocol(format!("unexpected {} payload {}: {}", path, value, e)))
    }

    async fn fetch_ack(&self, path: &str, query: &[(&str, String)]) -> Result<(), LedgerError> {
        let value = self.fetch(path, query).await?;
        match ack_error(&value) {
            None => Ok(()),
            Some(err) => Err(LedgerError::Protocol(err)),
        }
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn get_challenge(&self) -> Result<NetworkJob, LedgerError> {
        self.fetch_as("/get-challenge", &[]).await
    }

    async fn submit_solution(&self, solved: &SolvedChallenge) -> Result<CoinId, LedgerError> {
        let query = [
            ("holder", solved.holder.clone()),
            ("sign", solved.sign.clone()),
            ("hash", solved.hash.clone()),
        ];
        let value = self.fetch("/challenge-solved", &query).await?;
        let envelope: SolvedEnvelope = serde_json::from_value(value.clone()).unwrap_or(SolvedEnvelope { id: None });
        envelope.id.ok_or_else(|| {
            LedgerError::Protocol(format!("challenge-solved returned no coin id: {}", value))
        })
    }

    async fn get_coin(&self, id: CoinId) -> Result<Coin, LedgerError> {
        let envelope: CoinEnvelope = self.fetch_as(&format!("/coin/{}", id), &[]).await?;
        Ok(envelope.coin)
    }

    async fn ledger_length(&self) -> Result<u64, LedgerError> {
        let envelope: LengthEnvelope = self.fetch_as("/ledger-length", &[]).await?;
        Ok(envelope.length)
    }

    async fn split(&self, req: &SplitRequest) -> Result<(), LedgerError> {
        let query = [
            ("origin", req.origin.to_string()),
            ("target", req.target.to_string()),
            ("vol", req.vol.clone()),
            ("sign", req.sign.clone()),
        ];
        self.fetch_ack("/split", &query).await
    }

    async fn merge(&self, req: &MergeRequest) -> Result<(), LedgerError> {
        let query = [
            ("origin", req.origin.to_string()),
            ("target", req.target.to_string()),
            ("vol", req.vol.clone()),
            ("sign", req.sign.clone()),
        ];
        self.fetch_ack("/merge", &query).await
    }

    async fn transact(&self, req: &TransferRequest) -> Result<(), LedgerError> {
        let query = [
            ("cid", req.cid.to_string()),
            ("sign", req.sign.clone()),
            ("newholder", req.new_holder.clone()),
        ];
        self.fetch_ack("/transaction", &query).await
    }
}
