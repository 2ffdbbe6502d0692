/// Share Validator - identity, signature, difficulty and replay checks
///
/// Checks run in a fixed order and the first failure wins:
/// 1. declared coin private key derives exactly `holder`
/// 2. `sign` verifies against `holder` over the message `holder`
/// 3. the mined hash meets the pool difficulty
/// 4. the mined hash is `sha256(holder ++ seed)` for the current challenge
/// 5. the mined hash has not been used this epoch
///
/// A share that passes and also meets the network difficulty is a win.

use thiserror::Error;

use super::contributions::ContributionLedger;
use super::target::parse_hex_u256;
use crate::crypto::{self, CoinKey};
use crate::ledger::Challenge;

/// Legacy miners send this instead of a signature.
pub const SPLIT_SENTINEL: &str = "split";

/// A share as submitted to `/challenge-solved`.
#[derive(Debug, Clone)]
pub struct ShareSubmission {
    pub holder: String,
    pub signature: String,
    pub mined_hash: String,
    pub coin_private_key: String,
    pub pool_secret: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareOutcome {
    Accepted,
    AcceptedWin,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShareRejection {
    #[error("Invalid secret key")]
    KeyMismatch,
    #[error("Invalid mining signature.")]
    InvalidSignature,
    #[error("Mined hash is not a hex number.")]
    MalformedHash,
    #[error("Mined hash does not meet difficulty criteria.")]
    InsufficientDifficulty,
    #[error("Invalid mined hash.")]
    InvalidHash,
    #[error("This hash has already been submitted!")]
    DuplicateHash,
}

impl ShareRejection {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ShareRejection::KeyMismatch => "key_mismatch",
            ShareRejection::InvalidSignature => "invalid_signature",
            ShareRejection::MalformedHash => "malformed_hash",
            ShareRejection::InsufficientDifficulty => "low_difficulty",
            ShareRejection::InvalidHash => "invalid_hash",
            ShareRejection::DuplicateHash => "duplicate",
        }
    }
}

pub struct ShareValidator {
    accept_split_sentinel: bool,
}

impl ShareValidator {
    pub fn new(accept_split_sentinel: bool) -> Self {
        if accept_split_sentinel {
            tracing::warn!(
                "Share signatures equal to {:?} are accepted WITHOUT verification",
                SPLIT_SENTINEL
            );
        }
        Self { accept_split_sentinel }
    }

    pub fn validate(
        &self,
        share: &ShareSubmission,
        challenge: &Challenge,
        epoch: &ContributionLedger,
    ) -> Result<ShareOutcome, ShareRejection> {
        // 1. Identity: the declared key must own `holder`.
        let key = CoinKey::from_hex(&share.coin_private_key).map_err(|_| ShareRejection::KeyMismatch)?;
        if key.public_key_hex() != share.holder {
            return Err(ShareRejection::KeyMismatch);
        }

        // 2. Mining signature over the holder key itself.
        if self.accept_split_sentinel && share.signature == SPLIT_SENTINEL {
            tracing::info!("Unsigned share accepted via split sentinel for {}", share.pool_secret);
        } else if !crypto::verify(&share.holder, &share.holder, &share.signature).unwrap_or(false) {
            return Err(ShareRejection::InvalidSignature);
        }

        // 3. Pool difficulty.
        let hash_value = parse_hex_u256(&share.mined_hash).map_err(|_| ShareRejection::MalformedHash)?;
        if !challenge.pool_difficulty.admits(&hash_value) {
            return Err(ShareRejection::InsufficientDifficulty);
        }

        // 4. The hash must be the real work for this seed.
        let expected = crypto::sha256_hex(&format!("{}{}", share.holder, challenge.seed));
        if expected != share.mined_hash {
            return Err(ShareRejection::InvalidHash);
        }

        // 5. Replay.
        if epoch.is_used(&share.mined_hash) {
            return Err(ShareRejection::DuplicateHash);
        }

        if challenge.network_difficulty.admits(&hash_value) {
            Ok(ShareOutcome::AcceptedWin)
        } else {
            Ok(ShareOutcome::Accepted)
        }
    }
}
