//! Monetary amounts in integer minor units.
//!
//! All refund arithmetic happens on `i64` minor units (cents, pence, …) so
//! that no floating-point rounding can leak into money totals.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RefundryError;

/// An ISO-4217 currency code, normalized to uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[cfg_attr(feature = "openapi", schema(value_type = String))]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    /// Parse a three-letter ISO-4217 code. Lowercase input is accepted and
    /// normalized.
    pub fn parse(code: &str) -> Result<Self, RefundryError> {
        let trimmed = code.trim();
        if trimmed.len() != 3 || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(RefundryError::Validation(format!(
                "invalid currency code: {trimmed:?}"
            )));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// Return the code as a str slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An amount of money in integer minor units with its currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Money {
    /// Amount in minor units (e.g. cents). Always non-negative for refunds.
    pub amount: i64,
    /// ISO-4217 currency.
    pub currency: Currency,
}

impl Money {
    /// Create a new amount.
    #[must_use]
    pub fn new(amount: i64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// Checked addition; fails on currency mismatch or overflow.
    pub fn checked_add(&self, other: &Money) -> Result<Money, RefundryError> {
        if self.currency != other.currency {
            return Err(RefundryError::Validation(format!(
                "currency mismatch: {} vs {}",
                self.currency, other.currency
            )));
        }
        let amount = self.amount.checked_add(other.amount).ok_or_else(|| {
            RefundryError::Validation("amount overflow in addition".to_owned())
        })?;
        Ok(Money::new(amount, self.currency.clone()))
    }

    /// Checked subtraction; fails on currency mismatch or overflow.
    pub fn checked_sub(&self, other: &Money) -> Result<Money, RefundryError> {
        if self.currency != other.currency {
            return Err(RefundryError::Validation(format!(
                "currency mismatch: {} vs {}",
                self.currency, other.currency
            )));
        }
        let amount = self.amount.checked_sub(other.amount).ok_or_else(|| {
            RefundryError::Validation("amount overflow in subtraction".to_owned())
        })?;
        Ok(Money::new(amount, self.currency.clone()))
    }

    /// `true` when the amount is strictly positive.
    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.amount > 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}
