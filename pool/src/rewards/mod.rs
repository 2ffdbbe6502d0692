/// Rewards module
///
/// The durable reward book and the settlement of won coins into it.

pub mod accountant;
pub mod book;

pub use accountant::{split_rewards, RewardAccountant};
pub use book::{Bookkeeper, PayoutRecord, RewardBook, SettlementRecord, SettlementStage};
