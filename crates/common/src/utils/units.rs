//! Decimal <-> base-unit conversion for 18-decimal native assets.

use crate::error::{CommonError, Result};

/// Decimals of the native asset (wei per ether).
pub const NATIVE_DECIMALS: u32 = 18;

/// Parses a decimal string such as `"0.25"` into base units.
pub fn parse_units(amount: &str, decimals: u32) -> Result<u128> {
    let amount = amount.trim();
    let invalid = || CommonError::InvalidAmount(amount.to_string());

    let (whole, fraction) = match amount.split_once('.') {
        Some((w, f)) => (w, f),
        None => (amount, ""),
    };

    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    if fraction.len() > decimals as usize {
        return Err(invalid());
    }

    let scale = 10u128.checked_pow(decimals).ok_or_else(invalid)?;
    let whole_units = if whole.is_empty() {
        0
    } else {
        whole.parse::<u128>().map_err(|_| invalid())?
    };

    let padded = format!("{:0<width$}", fraction, width = decimals as usize);
    let fraction_units = if padded.is_empty() {
        0
    } else {
        padded.parse::<u128>().map_err(|_| invalid())?
    };

    whole_units
        .checked_mul(scale)
        .and_then(|w| w.checked_add(fraction_units))
        .ok_or_else(invalid)
}

/// Formats base units as a decimal string, always keeping at least one
/// fractional digit (`1.0`, `0.25`).
pub fn format_units(value: u128, decimals: u32) -> String {
    let scale = 10u128.pow(decimals);
    let whole = value / scale;
    let fraction = value % scale;

    if fraction == 0 {
        return format!("{}.0", whole);
    }

    let digits = format!("{:0>width$}", fraction, width = decimals as usize);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

pub fn parse_ether(amount: &str) -> Result<u128> {
    parse_units(amount, NATIVE_DECIMALS)
}

pub fn format_ether(value: u128) -> String {
    format_units(value, NATIVE_DECIMALS)
}
