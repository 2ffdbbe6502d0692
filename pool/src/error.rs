/// Pool error taxonomy
///
/// Every failure a request can hit ends up as a `PoolError`, rendered at the
/// HTTP boundary as `{"error": message}` with a non-2xx status. Nothing here
/// is retried automatically: a sign-and-submit step that failed halfway needs
/// a human to look at the ledger.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::crypto::KeyError;
use crate::ledger::{CoinId, LedgerError};
use crate::rewards::SettlementStage;
use crate::shares::ShareRejection;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum PoolError {
    /// User-caused, no state change.
    #[error("{0}")]
    Rejected(#[from] ShareRejection),

    #[error("{0} query param not provided")]
    MissingParameter(&'static str),

    #[error("no challenge has been fetched from the ledger yet")]
    ChallengeUnavailable,

    #[error("Already paid out your rewards, or you have not yet mined any.")]
    NoRewardAvailable,

    /// Transport failure or timeout; the ledger committed nothing we know of.
    #[error("ledger unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The ledger answered without the expected success shape.
    #[error("ledger rejected the request: {0}")]
    UpstreamProtocol(String),

    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),

    #[error(
        "settlement of coin #{coin_id} stopped after stage {stage}: {reason}; manual reconciliation required"
    )]
    SettlementIncomplete {
        coin_id: CoinId,
        stage: SettlementStage,
        reason: String,
    },

    #[error("no incomplete settlement recorded for coin #{0}")]
    UnknownSettlement(CoinId),

    #[error("no private key stored for coin #{0}")]
    MissingCoinKey(CoinId),

    #[error("coin key error: {0}")]
    Key(#[from] KeyError),
}

impl From<LedgerError> for PoolError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Unavailable(m) => PoolError::UpstreamUnavailable(m),
            LedgerError::Protocol(m) => PoolError::UpstreamProtocol(m),
        }
    }
}

impl PoolError {
    pub fn status(&self) -> StatusCode {
        match self {
            PoolError::Rejected(_) | PoolError::MissingParameter(_) => StatusCode::BAD_REQUEST,
            PoolError::NoRewardAvailable | PoolError::UnknownSettlement(_) => StatusCode::NOT_FOUND,
            PoolError::ChallengeUnavailable | PoolError::UpstreamUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            PoolError::UpstreamProtocol(_) => StatusCode::BAD_GATEWAY,
            PoolError::Persistence(_)
            | PoolError::SettlementIncomplete { .. }
            | PoolError::MissingCoinKey(_)
            | PoolError::Key(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PoolError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
