pub mod api;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod payout;
pub mod rewards;
pub mod shares;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;
