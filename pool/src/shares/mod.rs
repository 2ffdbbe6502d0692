/// Mining shares module
///
/// Share validation, the per-epoch contribution ledger, and the processing
/// pipeline that ties them to win settlement.

pub mod contributions;
pub mod processor;
pub mod target;
pub mod validator;

pub use contributions::ContributionLedger;
pub use processor::{ShareProcessor, SubmitOutcome};
pub use target::{parse_hex_u256, Target, TargetError};
pub use validator::{ShareOutcome, ShareRejection, ShareSubmission, ShareValidator, SPLIT_SENTINEL};
