use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A normalized price as observed on a page.
///
/// `valid == true` guarantees `decimal` was parsed from `raw` and is not
/// negative. Invalid values keep `original` so the failure can be diagnosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceValue {
    pub original: String,
    pub raw: String,
    pub currency_symbol: Option<String>,
    pub currency_code: Option<String>,
    #[serde(with = "rust_decimal::serde::str")]
    pub decimal: Decimal,
    pub valid: bool,
}

/// Grouping and decimal separators used when rendering a price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberStyle {
    pub grouping: Option<char>,
    pub decimal: char,
}

impl NumberStyle {
    pub const EN: NumberStyle = NumberStyle { grouping: Some(','), decimal: '.' };
    pub const EU: NumberStyle = NumberStyle { grouping: Some('.'), decimal: ',' };
    pub const SWISS: NumberStyle = NumberStyle { grouping: Some('\''), decimal: '.' };
    pub const SPACED: NumberStyle = NumberStyle { grouping: Some('\u{a0}'), decimal: ',' };
    pub const PLAIN: NumberStyle = NumberStyle { grouping: None, decimal: '.' };
}

impl PriceValue {
    pub fn invalid(original: impl Into<String>) -> Self {
        let original = original.into();
        Self {
            raw: original.trim().to_string(),
            original,
            currency_symbol: None,
            currency_code: None,
            decimal: Decimal::ZERO,
            valid: false,
        }
    }

    /// Render the amount with two fraction digits in the given style.
    pub fn format(&self, style: NumberStyle) -> String {
        let fixed = format!("{:.2}", self.decimal.round_dp(2));
        let (sign, unsigned) = match fixed.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None => ("", fixed.as_str()),
        };
        let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, "00"));

        let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
        for (i, ch) in int_part.chars().enumerate() {
            if i > 0 && (int_part.len() - i) % 3 == 0 {
                if let Some(sep) = style.grouping {
                    grouped.push(sep);
                }
            }
            grouped.push(ch);
        }

        format!("{}{}{}{}", sign, grouped, style.decimal, frac_part)
    }
}

impl fmt::Display for PriceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.valid {
            return write!(f, "invalid price {:?}", self.original);
        }
        let amount = self.format(NumberStyle::PLAIN);
        match (&self.currency_code, &self.currency_symbol) {
            (Some(code), _) => write!(f, "{} {}", amount, code),
            (None, Some(symbol)) => write!(f, "{}{}", symbol, amount),
            (None, None) => write!(f, "{}", amount),
        }
    }
}
