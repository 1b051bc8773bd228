//! Conversions between human-readable token amounts and smallest-unit
//! integers. The settlement token carries 6 decimals.

use alloy_primitives::U256;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::{AppError, AppResult};

pub const TOKEN_DECIMALS: u32 = 6;

/// Parse a decimal amount string (e.g. "100.5") into smallest units.
pub fn parse_token_amount(raw: &str) -> AppResult<U256> {
    let amount: Decimal = raw
        .trim()
        .parse()
        .map_err(|e| AppError::InvalidInput(format!("invalid amount '{}': {}", raw, e)))?;

    if amount.is_sign_negative() {
        return Err(AppError::InvalidInput(format!(
            "amount must not be negative: {}",
            raw
        )));
    }

    let scale = Decimal::from(10u64.pow(TOKEN_DECIMALS));
    let scaled = amount
        .checked_mul(scale)
        .ok_or_else(|| AppError::InvalidInput(format!("amount out of range: {}", raw)))?;

    if scaled.fract() != Decimal::ZERO {
        return Err(AppError::InvalidInput(format!(
            "amount has more than {} decimal places: {}",
            TOKEN_DECIMALS, raw
        )));
    }

    let units = scaled
        .to_u128()
        .ok_or_else(|| AppError::InvalidInput(format!("amount out of range: {}", raw)))?;
    Ok(U256::from(units))
}

/// Format a smallest-unit amount as a decimal string.
pub fn format_token_amount(units: U256) -> AppResult<String> {
    let units = u128::try_from(units)
        .map_err(|_| AppError::InvalidInput(format!("amount out of range: {}", units)))?;
    let units = i128::try_from(units)
        .map_err(|_| AppError::InvalidInput(format!("amount out of range: {}", units)))?;

    Ok(Decimal::from_i128_with_scale(units, TOKEN_DECIMALS)
        .normalize()
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whole_and_fractional_amounts() {
        assert_eq!(parse_token_amount("100").unwrap(), U256::from(100_000_000u64));
        assert_eq!(parse_token_amount("100.5").unwrap(), U256::from(100_500_000u64));
        assert_eq!(parse_token_amount("0.000001").unwrap(), U256::from(1u64));
        assert_eq!(parse_token_amount("0").unwrap(), U256::ZERO);
    }

    #[test]
    fn rejects_invalid_amounts() {
        assert!(parse_token_amount("-1").is_err());
        assert!(parse_token_amount("0.0000001").is_err());
        assert!(parse_token_amount("abc").is_err());
    }

    #[test]
    fn formats_smallest_units() {
        assert_eq!(format_token_amount(U256::from(100_500_000u64)).unwrap(), "100.5");
        assert_eq!(format_token_amount(U256::from(1u64)).unwrap(), "0.000001");
        assert_eq!(format_token_amount(U256::ZERO).unwrap(), "0");
    }

    #[test]
    fn roundtrips_through_units() {
        let units = parse_token_amount("1234.567891").unwrap();
        assert_eq!(format_token_amount(units).unwrap(), "1234.567891");
    }

    #[test]
    fn agrees_with_decimal_arithmetic() {
        use rust_decimal_macros::dec;

        let units = parse_token_amount(&dec!(42.000001).to_string()).unwrap();
        assert_eq!(units, U256::from(42_000_001u64));
        assert_eq!(format_token_amount(units).unwrap(), dec!(42.000001).to_string());
    }
}
