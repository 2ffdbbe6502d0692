use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::ledger::CoinId;
use crate::shares::Target;

pub const DEFAULT_API_LISTEN: &str = "0.0.0.0:6066";
pub const DEFAULT_LEDGER_URL: &str = "https://clc.ix.tc";
pub const DEFAULT_POOL_DIFFICULTY: &str =
    "000000FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF";
const DEFAULT_REFRESH_MS: u64 = 2000;
const DEFAULT_LEDGER_TIMEOUT_SECS: u64 = 10;
const DEFAULT_POOL_FEE_RATE: f64 = 0.02;
const DEFAULT_DEV_FEE_RATE: f64 = 0.021;
const DEFAULT_CONFIG_FILE: &str = "pool_config.json";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    File,
    Redis,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown storage backend {:?} (expected file, redis or memory)", other),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
    pub api_listen: String,
    /// Base URL of the upstream CLC ledger.
    pub ledger_url: String,
    pub ledger_timeout_secs: u64,
    pub challenge_refresh_ms: u64,
    /// Pool acceptance threshold, 64 hex digits.
    pub pool_difficulty: String,
    pub pool_fee_rate: f64,
    pub dev_fee_rate: f64,
    /// Coin receiving the dev + pool fee of every win.
    pub fee_coin_id: CoinId,
    pub storage: StorageBackend,
    /// Directory for the file store.
    pub data_dir: String,
    pub redis_url: String,
    #[serde(default)]
    pub redis_prefix: Option<String>,
    /// Accept the literal signature "split" without verification (legacy miners).
    #[serde(default)]
    pub accept_split_sentinel: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_listen: DEFAULT_API_LISTEN.to_string(),
            ledger_url: DEFAULT_LEDGER_URL.to_string(),
            ledger_timeout_secs: DEFAULT_LEDGER_TIMEOUT_SECS,
            challenge_refresh_ms: DEFAULT_REFRESH_MS,
            pool_difficulty: DEFAULT_POOL_DIFFICULTY.to_string(),
            pool_fee_rate: DEFAULT_POOL_FEE_RATE,
            dev_fee_rate: DEFAULT_DEV_FEE_RATE,
            fee_coin_id: 0,
            storage: StorageBackend::File,
            data_dir: ".".to_string(),
            redis_url: "redis://127.0.0.1/".to_string(),
            redis_prefix: None,
            accept_split_sentinel: false,
        }
    }
}

impl Config {
    /// Defaults, then `CLC_POOL_*` environment, then `pool_config.json`
    /// (or the file named by `CLC_POOL_CONFIG`).
    pub fn load() -> Result<Self> {
        let path = std::env::var("CLC_POOL_CONFIG").ok();
        let explicit = path.is_some();
        let path = path.unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());

        let file = match std::fs::read_to_string(&path) {
            Ok(txt) => {
                tracing::info!("Loaded pool config from {}", path);
                Some(txt)
            }
            Err(e) if explicit => return Err(e).with_context(|| format!("reading {}", path)),
            Err(_) => None,
        };

        Self::from_sources(file.as_deref(), |key| std::env::var(key).ok())
    }

    pub fn from_sources(file: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env(&env)?;

        if let Some(txt) = file {
            let overrides: serde_json::Map<String, serde_json::Value> =
                serde_json::from_str(txt).context("pool config is not a JSON object")?;
            let mut merged = serde_json::to_value(&cfg)?;
            if let Some(obj) = merged.as_object_mut() {
                obj.extend(overrides);
            }
            cfg = serde_json::from_value(merged).context("invalid pool config")?;
        }

        cfg.sanitize()?;
        Ok(cfg)
    }

    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(l) = env("CLC_POOL_LISTEN") {
            self.api_listen = l;
        } else if let Some(p) = env("PORT") {
            // legacy
            self.api_listen = format!("0.0.0.0:{}", p);
        }
        if let Some(u) = env("CLC_POOL_LEDGER_URL") { self.ledger_url = u; }
        if let Some(t) = env("CLC_POOL_LEDGER_TIMEOUT") { self.ledger_timeout_secs = t.parse().unwrap_or(DEFAULT_LEDGER_TIMEOUT_SECS); }
        if let Some(r) = env("CLC_POOL_REFRESH_MS") { self.challenge_refresh_ms = r.parse().unwrap_or(DEFAULT_REFRESH_MS); }
        if let Some(d) = env("CLC_POOL_DIFFICULTY") { self.pool_difficulty = d; }
        if let Some(f) = env("CLC_POOL_FEE") { self.pool_fee_rate = f.parse().unwrap_or(DEFAULT_POOL_FEE_RATE); }
        if let Some(f) = env("CLC_POOL_DEV_FEE") { self.dev_fee_rate = f.parse().unwrap_or(DEFAULT_DEV_FEE_RATE); }
        if let Some(c) = env("CLC_POOL_FEE_COIN") { self.fee_coin_id = c.parse().unwrap_or(0); }
        if let Some(s) = env("CLC_POOL_STORAGE") { self.storage = s.parse()?; }
        if let Some(d) = env("CLC_POOL_DATA_DIR") { self.data_dir = d; }
        if let Some(r) = env("CLC_POOL_REDIS_URL") {
            self.redis_url = r;
        } else if let Some(r) = env("REDIS_URL") {
            // legacy
            self.redis_url = r;
        }
        if let Some(p) = env("CLC_POOL_REDIS_PREFIX") { self.redis_prefix = Some(p); }
        if let Some(a) = env("CLC_POOL_ACCEPT_SPLIT_SENTINEL") {
            self.accept_split_sentinel = matches!(a.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    fn sanitize(&mut self) -> Result<()> {
        if self.api_listen.trim().is_empty() {
            self.api_listen = DEFAULT_API_LISTEN.to_string();
        }
        if self.ledger_url.trim().is_empty() {
            self.ledger_url = DEFAULT_LEDGER_URL.to_string();
        }
        self.ledger_url = self.ledger_url.trim_end_matches('/').to_string();
        if self.challenge_refresh_ms == 0 {
            self.challenge_refresh_ms = DEFAULT_REFRESH_MS;
        }
        if self.ledger_timeout_secs == 0 {
            self.ledger_timeout_secs = DEFAULT_LEDGER_TIMEOUT_SECS;
        }
        if self.pool_fee_rate < 0.0 || self.dev_fee_rate < 0.0 {
            bail!("fee rates must not be negative");
        }
        if self.pool_fee_rate + self.dev_fee_rate >= 1.0 {
            bail!(
                "pool fee {} plus dev fee {} leaves nothing for miners",
                self.pool_fee_rate,
                self.dev_fee_rate
            );
        }
        self.pool_target()?;
        Ok(())
    }

    pub fn pool_target(&self) -> Result<Target> {
        Target::from_hex(&self.pool_difficulty)
            .map_err(|e| anyhow::anyhow!("invalid pool difficulty {:?}: {}", self.pool_difficulty, e))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.challenge_refresh_ms)
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_secs(self.ledger_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::from_sources(None, env(&[])).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.api_listen, "0.0.0.0:6066");
        assert_eq!(cfg.refresh_interval(), Duration::from_millis(2000));
        assert!(!cfg.accept_split_sentinel);
        assert_eq!(cfg.pool_target().unwrap().as_hex(), DEFAULT_POOL_DIFFICULTY);
    }

    #[test]
    fn test_env_overrides() {
        let cfg = Config::from_sources(
            None,
            env(&[
                ("PORT", "7000"),
                ("CLC_POOL_LEDGER_URL", "http://localhost:9000/"),
                ("CLC_POOL_STORAGE", "Memory"),
                ("CLC_POOL_FEE_COIN", "42"),
                ("CLC_POOL_ACCEPT_SPLIT_SENTINEL", "true"),
                ("CLC_POOL_REFRESH_MS", "garbage"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.api_listen, "0.0.0.0:7000");
        assert_eq!(cfg.ledger_url, "http://localhost:9000");
        assert_eq!(cfg.storage, StorageBackend::Memory);
        assert_eq!(cfg.fee_coin_id, 42);
        assert!(cfg.accept_split_sentinel);
        assert_eq!(cfg.challenge_refresh_ms, 2000);
    }

    #[test]
    fn test_file_wins_over_env_and_keeps_unset_fields() {
        let file = r#"{"fee_coin_id": 7, "storage": "redis", "challenge_refresh_ms": 0}"#;
        let cfg = Config::from_sources(Some(file), env(&[("CLC_POOL_FEE_COIN", "42"), ("CLC_POOL_DATA_DIR", "/var/clc")]))
            .unwrap();
        assert_eq!(cfg.fee_coin_id, 7);
        assert_eq!(cfg.storage, StorageBackend::Redis);
        assert_eq!(cfg.data_dir, "/var/clc");
        assert_eq!(cfg.challenge_refresh_ms, 2000);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Config::from_sources(None, env(&[("CLC_POOL_DIFFICULTY", "xyz")])).is_err());
        assert!(Config::from_sources(None, env(&[("CLC_POOL_STORAGE", "postgres")])).is_err());
        assert!(Config::from_sources(Some(r#"{"pool_fee_rate": 0.99}"#), env(&[])).is_err());
        assert!(Config::from_sources(Some("[1, 2]"), env(&[])).is_err());
    }
}
