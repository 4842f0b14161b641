use serde::{Deserialize, Serialize};
use std::fmt;

/// Monetary amount in integer cents (BRL).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Rounds a decimal amount (e.g. `150.005`) to the nearest cent.
    pub fn from_decimal(value: f64) -> Result<Self, String> {
        if !value.is_finite() {
            return Err("Amount must be finite".to_string());
        }
        Ok(Money((value * 100.0).round() as i64))
    }

    /// Parses amounts that arrive either as `"150.00"`, `"150,00"` or `"1.234,56"`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("Empty amount".to_string());
        }
        let normalized = if trimmed.contains(',') {
            trimmed.replace('.', "").replace(',', ".")
        } else {
            trimmed.to_string()
        };
        let value = normalized
            .parse::<f64>()
            .map_err(|e| format!("Invalid amount '{}': {}", raw, e))?;
        Self::from_decimal(value)
    }

    pub fn cents(&self) -> i64 {
        self.0
    }

    pub fn as_decimal(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn abs_diff(&self, other: Money) -> Money {
        Money((self.0 - other.0).abs())
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// `self × percent / 100`, rounded half away from zero to the cent.
    pub fn percentage(&self, percent: f64) -> Money {
        Money((self.0 as f64 * percent / 100.0).round() as i64)
    }

    /// Splits into `parts` equal integer-cent amounts; the last part absorbs the remainder.
    pub fn split(&self, parts: u32) -> Vec<Money> {
        if parts == 0 {
            return Vec::new();
        }
        let n = parts as i64;
        let base = self.0 / n;
        let remainder = self.0 - base * n;
        let mut out = vec![Money(base); parts as usize];
        if let Some(last) = out.last_mut() {
            last.0 += remainder;
        }
        out
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        Money(iter.map(|m| m.0).sum())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}
