/// Wire types for the upstream CLC ledger.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type CoinId = u64;

/// Mining job as published by the ledger's `/get-challenge`.
///
/// Only `seed` and `diff` are interpreted; anything else the ledger sends is
/// kept so it can be passed through to miners untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkJob {
    pub seed: String,
    pub diff: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A coin as returned by `/coin/:id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Coin {
    pub val: f64,
    #[serde(default)]
    pub transactions: Vec<Value>,
    #[serde(default)]
    pub holder: Option<String>,
}

impl Coin {
    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CoinEnvelope {
    pub coin: Coin,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LengthEnvelope {
    pub length: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SolvedEnvelope {
    #[serde(default)]
    pub id: Option<CoinId>,
}

/// Move `vol` from `origin` into a fresh coin `target` (`/split`).
#[derive(Debug, Clone, PartialEq)]
pub struct SplitRequest {
    pub origin: CoinId,
    pub target: CoinId,
    pub vol: String,
    pub sign: String,
}

/// Move `vol` from `origin` into the existing coin `target` (`/merge`).
#[derive(Debug, Clone, PartialEq)]
pub struct MergeRequest {
    pub origin: CoinId,
    pub target: CoinId,
    pub vol: String,
    pub sign: String,
}

/// Hand coin `cid` over to `new_holder` (`/transaction`).
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub cid: CoinId,
    pub new_holder: String,
    pub sign: String,
}

/// Solved challenge forwarded to the ledger (`/challenge-solved`).
#[derive(Debug, Clone, PartialEq)]
pub struct SolvedChallenge {
    pub holder: String,
    pub sign: String,
    pub hash: String,
}

/// Interpret a `{message: "success"}` / `{error: ...}` acknowledgement.
pub(crate) fn ack_error(body: &Value) -> Option<String> {
    if body.get("message").and_then(Value::as_str) == Some("success") {
        return None;
    }
    Some(
        body.get("error")
            .map(|e| match e.as_str() {
                Some(s) => s.to_string(),
                None => e.to_string(),
            })
            .unwrap_or_else(|| body.to_string()),
    )
}
