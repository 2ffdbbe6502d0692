// HTTP API
//
// Miner-facing: /get-challenge, /challenge-solved, /payouts, /total, /payout.
// Operator-facing: /health, /metrics, /settlements.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::error::PoolError;
use crate::ledger::{ChallengeCache, CoinId};
use crate::metrics::prometheus as metrics;
use crate::payout::PayoutSettler;
use crate::rewards::RewardAccountant;
use crate::shares::{ShareProcessor, ShareSubmission, SubmitOutcome};

#[derive(Clone)]
pub struct AppState {
    pub challenge: Arc<ChallengeCache>,
    pub processor: Arc<ShareProcessor>,
    pub accountant: Arc<RewardAccountant>,
    pub settler: Arc<PayoutSettler>,
    pub store: String,
    pub start_time: i64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/get-challenge", get(api_get_challenge))
        .route("/challenge-solved", get(api_challenge_solved))
        .route("/payouts/:poolsecret", get(api_payouts))
        .route("/total/:poolsecret", get(api_total))
        .route("/payout/:poolsecret", get(api_payout))
        .route("/health", get(api_health))
        .route("/metrics", get(api_metrics))
        .route("/settlements", get(api_settlements))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn api_get_challenge(State(state): State<AppState>) -> Result<Json<Value>, PoolError> {
    let challenge = state.challenge.get_current().await.ok_or(PoolError::ChallengeUnavailable)?;
    Ok(Json(challenge.published()))
}

#[derive(Debug, Deserialize)]
struct SolvedQuery {
    holder: Option<String>,
    sign: Option<String>,
    hash: Option<String>,
    poolsecret: Option<String>,
    key: Option<String>,
}

fn required(value: Option<String>, name: &'static str) -> Result<String, PoolError> {
    value.filter(|v| !v.is_empty()).ok_or(PoolError::MissingParameter(name))
}

async fn api_challenge_solved(
    State(state): State<AppState>,
    Query(q): Query<SolvedQuery>,
) -> Result<Json<Value>, PoolError> {
    let share = ShareSubmission {
        holder: required(q.holder, "holder")?,
        signature: required(q.sign, "sign")?,
        mined_hash: required(q.hash, "hash")?,
        pool_secret: required(q.poolsecret, "poolsecret")?,
        coin_private_key: required(q.key, "key")?,
    };

    match state.processor.submit(&share).await? {
        SubmitOutcome::Accepted => Ok(Json(json!({"message": "success"}))),
        SubmitOutcome::Won { coin_id } => Ok(Json(json!({"message": "success", "id": coin_id}))),
    }
}

async fn api_payouts(
    State(state): State<AppState>,
    Path(poolsecret): Path<String>,
) -> Json<Vec<CoinId>> {
    Json(state.settler.unpaid_coins(&poolsecret).await)
}

async fn api_total(State(state): State<AppState>, Path(poolsecret): Path<String>) -> Json<Value> {
    Json(json!({"total": state.settler.total_unpaid(&poolsecret).await}))
}

#[derive(Debug, Deserialize)]
struct PayoutQuery {
    addr: Option<String>,
}

async fn api_payout(
    State(state): State<AppState>,
    Path(poolsecret): Path<String>,
    Query(q): Query<PayoutQuery>,
) -> Result<Json<Value>, PoolError> {
    let addr = required(q.addr, "addr")?;
    let id = state.settler.payout(&poolsecret, &addr).await?;
    Ok(Json(json!({"id": id})))
}

async fn api_health(State(state): State<AppState>) -> Json<Value> {
    let challenge = state.challenge.get_current().await;
    let pending = state.accountant.pending().await.len();
    Json(json!({
        "status": "ok",
        "challenge": challenge.as_ref().map(|c| c.seed.clone()),
        "challenge_age_secs": challenge.map(|c| Utc::now().timestamp() - c.fetched_at),
        "store": state.store,
        "pending_settlements": pending,
        "uptime_secs": Utc::now().timestamp() - state.start_time,
    }))
}

async fn api_metrics() -> impl IntoResponse {
    let body = metrics::render();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

async fn api_settlements(State(state): State<AppState>) -> Json<Value> {
    let pending: Vec<Value> = state
        .accountant
        .pending()
        .await
        .into_iter()
        .map(|(coin_id, record)| {
            json!({
                "coin_id": coin_id,
                "stage": record.stage,
                "shares": record.shares,
                "updated_at": record.updated_at,
            })
        })
        .collect();
    Json(json!({"settlements": pending}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewards::Bookkeeper;
    use crate::shares::{ShareValidator, Target};
    use crate::store::MemoryStore;
    use crate::test_support::{mined_hash, test_key, test_key_hex, MockLedger};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    const SEED: &str = "abcd";
    const EASY: &str = "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff";

    async fn app(with_challenge: bool) -> Router {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_challenge(SEED, &"0".repeat(64));
        let challenge = Arc::new(ChallengeCache::new(
            ledger.clone(),
            Target::from_hex(EASY).unwrap(),
            Duration::from_secs(60),
        ));
        if with_challenge {
            challenge.refresh().await.unwrap();
        }
        let store = Arc::new(MemoryStore::new());
        let book = Arc::new(Bookkeeper::load(store).await.unwrap());
        let accountant = Arc::new(RewardAccountant::new(ledger.clone(), book.clone(), 0, 0.021, 0.02));
        let processor =
            Arc::new(ShareProcessor::load(ShareValidator::new(false), challenge.clone(), accountant.clone()).await);
        let settler = Arc::new(PayoutSettler::new(ledger, book));
        router(AppState {
            challenge,
            processor,
            accountant,
            settler,
            store: "memory".to_string(),
            start_time: Utc::now().timestamp(),
        })
    }

    async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
        let res = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_challenge_publishes_pool_difficulty() {
        let app = app(true).await;
        let (status, body) = get(&app, "/get-challenge").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["seed"], SEED);
        assert_eq!(body["diff"], EASY);
    }

    #[tokio::test]
    async fn test_challenge_unavailable_is_503() {
        let app = app(false).await;
        let (status, body) = get(&app, "/get-challenge").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_share_submission_and_errors() {
        let app = app(true).await;
        let key = test_key(1);
        let holder = key.public_key_hex();
        let uri = format!(
            "/challenge-solved?holder={}&sign={}&hash={}&poolsecret=alice&key={}",
            holder,
            key.sign(&holder).unwrap(),
            mined_hash(&holder, SEED),
            test_key_hex(1)
        );

        let (status, body) = get(&app, &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "success");

        let (status, body) = get(&app, &uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "This hash has already been submitted!");

        let (status, body) = get(&app, "/challenge-solved?holder=04ab").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "sign query param not provided");
    }

    #[tokio::test]
    async fn test_rewards_and_payout_without_rewards() {
        let app = app(true).await;
        let (status, body) = get(&app, "/payouts/alice").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));

        let (_, body) = get(&app, "/total/alice").await;
        assert_eq!(body["total"], 0.0);

        let (status, _) = get(&app, "/payout/alice").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = get(&app, "/payout/alice?addr=04dest").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Already paid out your rewards, or you have not yet mined any.");
    }

    #[tokio::test]
    async fn test_operator_endpoints() {
        let app = app(true).await;
        let (status, body) = get(&app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["challenge"], SEED);
        assert_eq!(body["pending_settlements"], 0);

        let (_, body) = get(&app, "/settlements").await;
        assert_eq!(body["settlements"], json!([]));

        let res = app
            .clone()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
