/// 256-bit difficulty targets.
///
/// Difficulty is a maximum accepted value: a hash, read as a big-endian
/// unsigned integer, meets a target when it is numerically <= the target.
/// Lower targets are harder.

use num_bigint::BigUint;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("not a hex number: {0:?}")]
pub struct TargetError(pub String);

/// Parse a hex string (optionally `0x`-prefixed) as a big-endian integer.
pub fn parse_hex_u256(hex: &str) -> Result<BigUint, TargetError> {
    let clean = hex.trim().trim_start_matches("0x");
    if clean.is_empty() {
        return Err(TargetError(hex.to_string()));
    }
    BigUint::parse_bytes(clean.as_bytes(), 16).ok_or_else(|| TargetError(hex.to_string()))
}

#[derive(Clone, PartialEq, Eq)]
pub struct Target {
    hex: String,
    value: BigUint,
}

impl Target {
    pub fn from_hex(hex: &str) -> Result<Self, TargetError> {
        let value = parse_hex_u256(hex)?;
        Ok(Self { hex: hex.trim().to_string(), value })
    }

    /// Hex text as configured / received, used when publishing the target.
    pub fn as_hex(&self) -> &str {
        &self.hex
    }

    pub fn admits(&self, hash: &BigUint) -> bool {
        hash <= &self.value
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Target({})", self.hex)
    }
}
