use std::fmt;

use serde::{Deserialize, Serialize};

/// Amounts are integer minor units of their currency to avoid floating-point drift.
/// 1 usdc = 100 minor units, 1 eth = 1_000_000 minor units.
pub type MinorUnits = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    /// Gas currency
    Eth,
    /// Stable currency
    Usdc,
}

impl Currency {
    pub const ALL: [Currency; 2] = [Currency::Eth, Currency::Usdc];

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Eth => "eth",
            Currency::Usdc => "usdc",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "eth" => Some(Currency::Eth),
            "usdc" => Some(Currency::Usdc),
            _ => None,
        }
    }

    /// Number of decimal places the currency is rendered with.
    pub fn decimals(&self) -> u32 {
        match self {
            Currency::Eth => 6,
            Currency::Usdc => 2,
        }
    }

    /// Minor units in one whole unit.
    pub fn scale(&self) -> MinorUnits {
        10_i64.pow(self.decimals())
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Format minor units as a fixed-precision decimal string.
/// Example: (Usdc, 525) -> "5.25", (Eth, 0) -> "0.000000"
pub fn format_amount(currency: Currency, amount: MinorUnits) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    let scale = currency.scale().unsigned_abs();
    format!(
        "{}{}.{:0width$}",
        sign,
        abs / scale,
        abs % scale,
        width = currency.decimals() as usize
    )
}

/// Parse a non-negative decimal string into minor units of `currency`.
/// Digits beyond the currency precision are truncated.
/// Example: (Usdc, "5.25") -> 525, (Usdc, "5") -> 500, (Eth, ".5") -> 500_000
pub fn parse_amount(currency: Currency, input: &str) -> Result<MinorUnits, ParseAmountError> {
    let input = input.trim();
    if input.starts_with('-') {
        return Err(ParseAmountError::Negative);
    }

    let (units_str, fraction_str) = match input.split_once('.') {
        Some((units, fraction)) => (units, fraction),
        None => (input, ""),
    };

    if units_str.is_empty() && fraction_str.is_empty() {
        return Err(ParseAmountError::InvalidFormat);
    }
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if !all_digits(units_str) || !all_digits(fraction_str) {
        return Err(ParseAmountError::InvalidFormat);
    }

    let units: MinorUnits = if units_str.is_empty() {
        0
    } else {
        units_str.parse().map_err(|_| ParseAmountError::Overflow)?
    };

    let decimals = currency.decimals() as usize;
    let mut fraction: String = fraction_str.chars().take(decimals).collect();
    while fraction.len() < decimals {
        fraction.push('0');
    }
    let fraction: MinorUnits = fraction.parse().map_err(|_| ParseAmountError::InvalidFormat)?;

    units
        .checked_mul(currency.scale())
        .and_then(|v| v.checked_add(fraction))
        .ok_or(ParseAmountError::Overflow)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseAmountError {
    InvalidFormat,
    Negative,
    Overflow,
}

impl fmt::Display for ParseAmountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseAmountError::InvalidFormat => write!(f, "invalid amount format"),
            ParseAmountError::Negative => write!(f, "amount cannot be negative"),
            ParseAmountError::Overflow => write!(f, "amount is too large"),
        }
    }
}

impl std::error::Error for ParseAmountError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(Currency::Usdc, 525), "5.25");
        assert_eq!(format_amount(Currency::Usdc, 0), "0.00");
        assert_eq!(format_amount(Currency::Usdc, 7), "0.07");
        assert_eq!(format_amount(Currency::Eth, 0), "0.000000");
        assert_eq!(format_amount(Currency::Eth, 100), "0.000100");
        assert_eq!(format_amount(Currency::Eth, 1_500_000), "1.500000");
        assert_eq!(format_amount(Currency::Usdc, -250), "-2.50");
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount(Currency::Usdc, "5.25"), Ok(525));
        assert_eq!(parse_amount(Currency::Usdc, "5"), Ok(500));
        assert_eq!(parse_amount(Currency::Usdc, "3.00"), Ok(300));
        assert_eq!(parse_amount(Currency::Usdc, "0.5"), Ok(50));
        assert_eq!(parse_amount(Currency::Usdc, ".75"), Ok(75));
        assert_eq!(parse_amount(Currency::Usdc, "1."), Ok(100));
        assert_eq!(parse_amount(Currency::Usdc, "1.999"), Ok(199)); // Truncates
        assert_eq!(parse_amount(Currency::Eth, "0.0001"), Ok(100));
        assert_eq!(parse_amount(Currency::Eth, " 2 "), Ok(2_000_000));
    }

    #[test]
    fn test_parse_amount_invalid() {
        assert_eq!(
            parse_amount(Currency::Usdc, "-1.00"),
            Err(ParseAmountError::Negative)
        );
        assert_eq!(
            parse_amount(Currency::Usdc, "abc"),
            Err(ParseAmountError::InvalidFormat)
        );
        assert_eq!(
            parse_amount(Currency::Usdc, "1.2.3"),
            Err(ParseAmountError::InvalidFormat)
        );
        assert_eq!(
            parse_amount(Currency::Usdc, "+5"),
            Err(ParseAmountError::InvalidFormat)
        );
        assert_eq!(
            parse_amount(Currency::Usdc, ""),
            Err(ParseAmountError::InvalidFormat)
        );
        assert_eq!(
            parse_amount(Currency::Usdc, "."),
            Err(ParseAmountError::InvalidFormat)
        );
        assert_eq!(
            parse_amount(Currency::Eth, "99999999999999999"),
            Err(ParseAmountError::Overflow)
        );
    }

    #[test]
    fn test_currency_codes() {
        assert_eq!(Currency::from_str("USDC"), Some(Currency::Usdc));
        assert_eq!(Currency::from_str("eth"), Some(Currency::Eth));
        assert_eq!(Currency::from_str("btc"), None);
        for currency in Currency::ALL {
            assert_eq!(Currency::from_str(currency.as_str()), Some(currency));
        }
    }
}
