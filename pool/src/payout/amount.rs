/// Ledger amount rendering.
///
/// The ledger verifies signatures over the exact decimal text it receives, so
/// the amount placed in a signed message and the `vol` query parameter must be
/// the same string. Amounts are cut to at most 8 fractional digits (never
/// rounded), and a value without a fractional part becomes 0: the ledger's
/// split/merge endpoints have always been driven that way and existing coins
/// depend on it.

use rust_decimal::Decimal;
use std::str::FromStr;

/// Maximum number of fractional digits the ledger accepts in a volume.
pub const AMOUNT_SCALE: u32 = 8;

/// Apply the ledger truncation rule to a floating amount.
///
/// Non-finite values and values outside `Decimal`'s range render as 0.
pub fn truncate_amount(value: f64) -> Decimal {
    if !value.is_finite() {
        return Decimal::ZERO;
    }
    // `Display` on f64 gives the shortest round-trip text, never exponent form.
    let text = value.to_string();
    let Some(dot) = text.find('.') else {
        return Decimal::ZERO;
    };
    let end = (dot + 1 + AMOUNT_SCALE as usize).min(text.len());
    Decimal::from_str(&text[..end])
        .map(|d| d.normalize())
        .unwrap_or(Decimal::ZERO)
}

/// Wire text for a truncated amount.
pub fn render_amount(value: f64) -> String {
    truncate_amount(value).to_string()
}
