//! Fixed-point conversion between user-entered decimal strings and on-chain
//! base units.

use alloy_primitives::utils::{format_units, parse_units, ParseUnits, UnitsError};
use alloy_primitives::U256;

use crate::errors::Result;

/// Parse a plain decimal string (`"1500"`, `"0.25"`) into base units.
///
/// Only unsigned decimal notation is accepted: no sign, no exponent, no
/// separators, and no more fractional digits than `decimals`.
pub fn parse_amount(text: &str, decimals: u8) -> Result<U256> {
    let text = text.trim();
    if !is_plain_decimal(text, decimals) {
        return Err(UnitsError::InvalidUnit(text.to_string()).into());
    }
    match parse_units(text, decimals)? {
        ParseUnits::U256(value) => Ok(value),
        ParseUnits::I256(_) => Err(UnitsError::InvalidUnit(text.to_string()).into()),
    }
}

/// Render base units as a trimmed decimal string: `1500`, `0.25`.
pub fn format_amount(value: U256, decimals: u8) -> Result<String> {
    let raw = format_units(value, decimals)?;
    Ok(trim_fraction(&raw))
}

/// Lossy conversion for ratios and progress bars.
pub fn to_display_f64(value: U256, decimals: u8) -> f64 {
    format_amount(value, decimals)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// `10^decimals` as base units, i.e. one whole token.
pub fn one_token(decimals: u8) -> U256 {
    U256::from(10u64).pow(U256::from(decimals))
}

/// Whole-token amount to base units.
pub fn whole_tokens(amount: u64, decimals: u8) -> U256 {
    U256::from(amount) * one_token(decimals)
}

fn is_plain_decimal(text: &str, decimals: u8) -> bool {
    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (text, None),
    };
    if int_part.is_empty() || !int_part.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    match frac_part {
        None => true,
        Some(f) => {
            !f.is_empty() && f.len() <= decimals as usize && f.chars().all(|c| c.is_ascii_digit())
        }
    }
}

fn trim_fraction(raw: &str) -> String {
    match raw.split_once('.') {
        Some((int_part, frac)) => {
            let frac = frac.trim_end_matches('0');
            if frac.is_empty() {
                int_part.to_string()
            } else {
                format!("{int_part}.{frac}")
            }
        }
        None => raw.to_string(),
    }
}
