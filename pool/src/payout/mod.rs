/// Payout module
///
/// Consolidation of unpaid rewards into a single coin for the miner, and the
/// amount rendering the ledger expects.

pub mod amount;
pub mod settler;

pub use amount::{render_amount, truncate_amount, AMOUNT_SCALE};
pub use settler::PayoutSettler;
