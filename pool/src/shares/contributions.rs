/// Contribution Ledger - share counts and replay set for the current epoch
///
/// An epoch runs from one win to the next. Share counts and the used-hash
/// set live in the same value so they can only ever be reset together.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContributionLedger {
    #[serde(default)]
    shares: BTreeMap<String, u64>,
    #[serde(default)]
    used_hashes: BTreeSet<String>,
}

impl ContributionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one share for `pool_secret` and burn `mined_hash`.
    /// Returns false (and changes nothing) if the hash was already used.
    pub fn record(&mut self, pool_secret: &str, mined_hash: &str) -> bool {
        if !self.used_hashes.insert(mined_hash.to_string()) {
            return false;
        }
        *self.shares.entry(pool_secret.to_string()).or_insert(0) += 1;
        true
    }

    pub fn is_used(&self, mined_hash: &str) -> bool {
        self.used_hashes.contains(mined_hash)
    }

    pub fn share_count(&self, pool_secret: &str) -> u64 {
        self.shares.get(pool_secret).copied().unwrap_or(0)
    }

    pub fn shares(&self) -> &BTreeMap<String, u64> {
        &self.shares
    }

    pub fn total_shares(&self) -> u64 {
        self.shares.values().sum()
    }

    pub fn contributors(&self) -> usize {
        self.shares.len()
    }

    pub fn used_hash_count(&self) -> usize {
        self.used_hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty() && self.used_hashes.is_empty()
    }
}
