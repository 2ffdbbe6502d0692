/// Upstream CLC ledger: client and cached mining job

pub mod challenge;
pub mod client;
pub mod types;

pub use challenge::{Challenge, ChallengeCache};
pub use client::{HttpLedgerClient, LedgerClient, LedgerError};
pub use types::{
    Coin, CoinId, MergeRequest, NetworkJob, SolvedChallenge, SplitRequest, TransferRequest,
};
