// CLC Mining Pool
//
// Challenge relay, share accounting, win settlement and coin payouts in
// front of a CLC ledger server.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use clc_pool::api::{self, AppState};
use clc_pool::config::{Config, StorageBackend};
use clc_pool::ledger::{ChallengeCache, HttpLedgerClient, LedgerClient};
use clc_pool::payout::PayoutSettler;
use clc_pool::rewards::{Bookkeeper, RewardAccountant};
use clc_pool::shares::{ShareProcessor, ShareValidator};
use clc_pool::store::{FileStore, MemoryStore, PersistenceStore, RedisStore};

async fn open_store(cfg: &Config) -> Result<Arc<dyn PersistenceStore>> {
    let store: Arc<dyn PersistenceStore> = match cfg.storage {
        StorageBackend::File => Arc::new(
            FileStore::open(&cfg.data_dir)
                .await
                .with_context(|| format!("opening data dir {}", cfg.data_dir))?,
        ),
        StorageBackend::Redis => Arc::new(RedisStore::new(&cfg.redis_url, cfg.redis_prefix.as_deref())?),
        StorageBackend::Memory => {
            tracing::warn!("⚠️  In-memory storage: rewards and mined coin keys are lost on restart");
            Arc::new(MemoryStore::new())
        }
    };
    Ok(store)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("SIGTERM, shutting down"),
                    _ = tokio::signal::ctrl_c() => tracing::info!("SIGINT, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!("Failed to register SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("SIGINT, shutting down");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Ctrl+C, shutting down");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::info!("🚀 CLC Pool v{}", env!("CARGO_PKG_VERSION"));
    let cfg = Config::load()?;
    tracing::info!(
        "Ledger {} | fees: pool={} dev={} -> coin #{} | storage={:?}",
        cfg.ledger_url,
        cfg.pool_fee_rate,
        cfg.dev_fee_rate,
        cfg.fee_coin_id,
        cfg.storage
    );

    let store = open_store(&cfg).await?;

    let ledger: Arc<dyn LedgerClient> = Arc::new(HttpLedgerClient::new(&cfg.ledger_url, cfg.ledger_timeout())?);

    let challenge = Arc::new(ChallengeCache::new(ledger.clone(), cfg.pool_target()?, cfg.refresh_interval()));
    if let Err(e) = challenge.refresh().await {
        tracing::warn!("Initial challenge fetch failed ({}); serving 503 until the ledger answers", e);
    }
    let refresher = challenge.start();

    let book = Arc::new(Bookkeeper::load(store.clone()).await.context("loading reward book")?);
    let accountant = Arc::new(RewardAccountant::new(
        ledger.clone(),
        book.clone(),
        cfg.fee_coin_id,
        cfg.dev_fee_rate,
        cfg.pool_fee_rate,
    ));
    let resumed = accountant.resume_pending().await;
    if resumed > 0 {
        tracing::info!("Completed {} interrupted settlements", resumed);
    }

    let processor = Arc::new(
        ShareProcessor::load(ShareValidator::new(cfg.accept_split_sentinel), challenge.clone(), accountant.clone())
            .await,
    );
    let settler = Arc::new(PayoutSettler::new(ledger.clone(), book.clone()));

    let app = api::router(AppState {
        challenge,
        processor,
        accountant,
        settler,
        store: store.describe(),
        start_time: Utc::now().timestamp(),
    });

    let listener = tokio::net::TcpListener::bind(&cfg.api_listen)
        .await
        .with_context(|| format!("binding {}", cfg.api_listen))?;
    tracing::info!("📡 CLC Pool API listening on {}", cfg.api_listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    refresher.abort();
    tracing::info!("🏁 CLC Pool shut down cleanly");
    Ok(())
}
