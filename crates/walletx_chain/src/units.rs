//! Exact decimal ↔ base-unit conversion and address parsing.
//!
//! Amounts arrive from the UI as decimal strings ("1.5") and leave for the
//! chain as integers in the native currency's smallest unit. Conversion is
//! exact: input with more fractional digits than the currency supports is
//! rejected instead of rounded.

use alloy_primitives::{Address, U256};

/// Why a decimal amount string was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,

    #[error("amount {0:?} is not a plain decimal number")]
    Malformed(String),

    #[error("amount has {digits} fractional digits, at most {max} are supported")]
    ExcessPrecision { digits: usize, max: u8 },

    #[error("amount is too large")]
    Overflow,
}

/// Why an address string was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address {0:?} must be 0x followed by 40 hex digits")]
    Malformed(String),

    #[error("address {0:?} fails its mixed-case checksum")]
    BadChecksum(String),
}

/// Parse a decimal string into base units with `decimals` fractional digits.
///
/// Accepts `123`, `123.45`, `.5`, `1.` and surrounding whitespace. Rejects
/// signs, exponents, separators, a bare `.`, and over-precise input.
pub fn parse_units(amount: &str, decimals: u8) -> Result<U256, AmountError> {
    let amount = amount.trim();
    if amount.is_empty() {
        return Err(AmountError::Empty);
    }

    let (whole, fraction) = match amount.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (amount, None),
    };

    let fraction = fraction.unwrap_or("");
    let is_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !is_digits(whole) || !is_digits(fraction) || (whole.is_empty() && fraction.is_empty()) {
        return Err(AmountError::Malformed(amount.to_string()));
    }

    if fraction.len() > decimals as usize {
        // Trailing zeros carry no value; "1.50" is fine at one decimal.
        let significant = fraction.trim_end_matches('0');
        if significant.len() > decimals as usize {
            return Err(AmountError::ExcessPrecision {
                digits: significant.len(),
                max: decimals,
            });
        }
    }

    let mut digits = String::with_capacity(whole.len() + decimals as usize + 1);
    digits.push('0');
    digits.push_str(whole);
    let kept = fraction.len().min(decimals as usize);
    digits.push_str(&fraction[..kept]);
    for _ in kept..decimals as usize {
        digits.push('0');
    }

    U256::from_str_radix(&digits, 10).map_err(|_| AmountError::Overflow)
}

/// Render base units as a decimal string, e.g. `1500000000000000000` at 18
/// decimals becomes `"1.5"`. Always keeps at least one fractional digit.
pub fn format_units(value: U256, decimals: u8) -> String {
    let raw = value.to_string();
    let decimals = decimals as usize;
    if decimals == 0 {
        return format!("{raw}.0");
    }

    let padded = if raw.len() <= decimals {
        format!("{}{raw}", "0".repeat(decimals - raw.len() + 1))
    } else {
        raw
    };
    let (whole, fraction) = padded.split_at(padded.len() - decimals);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        format!("{whole}.0")
    } else {
        format!("{whole}.{fraction}")
    }
}

/// Parse a `0x`-prefixed, 40 hex digit address.
///
/// All-lowercase and all-uppercase input is accepted as is; mixed case must
/// match the EIP-55 checksum.
pub fn parse_address(input: &str) -> Result<Address, AddressError> {
    let s = input.trim();
    let malformed = || AddressError::Malformed(input.to_string());

    let hex = s.strip_prefix("0x").ok_or_else(malformed)?;
    if hex.len() != 40 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(malformed());
    }

    let has_lower = hex.bytes().any(|b| b.is_ascii_lowercase());
    let has_upper = hex.bytes().any(|b| b.is_ascii_uppercase());
    if has_lower && has_upper {
        return Address::parse_checksummed(s, None)
            .map_err(|_| AddressError::BadChecksum(input.to_string()));
    }

    s.parse::<Address>().map_err(|_| malformed())
}
