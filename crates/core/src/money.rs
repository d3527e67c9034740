//! Monetary amounts.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// An amount of money in minor units (e.g. cents) of a single currency.
///
/// Value object: compared by value, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    currency: String,
    minor_units: i64,
}

impl Money {
    pub fn new(currency: impl Into<String>, minor_units: i64) -> DomainResult<Self> {
        let currency = currency.into();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(DomainError::validation(format!(
                "currency must be a 3-letter ISO code, got '{currency}'"
            )));
        }
        Ok(Self {
            currency,
            minor_units,
        })
    }

    pub fn zero(currency: impl Into<String>) -> DomainResult<Self> {
        Self::new(currency, 0)
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn minor_units(&self) -> i64 {
        self.minor_units
    }

    pub fn is_zero(&self) -> bool {
        self.minor_units == 0
    }

    pub fn is_positive(&self) -> bool {
        self.minor_units > 0
    }

    pub fn checked_add(&self, other: &Money) -> DomainResult<Money> {
        self.same_currency(other)?;
        let minor_units = self
            .minor_units
            .checked_add(other.minor_units)
            .ok_or_else(|| DomainError::validation("amount overflow"))?;
        Ok(Money {
            currency: self.currency.clone(),
            minor_units,
        })
    }

    pub fn checked_sub(&self, other: &Money) -> DomainResult<Money> {
        self.same_currency(other)?;
        let minor_units = self
            .minor_units
            .checked_sub(other.minor_units)
            .ok_or_else(|| DomainError::validation("amount overflow"))?;
        Ok(Money {
            currency: self.currency.clone(),
            minor_units,
        })
    }

    fn same_currency(&self, other: &Money) -> DomainResult<()> {
        if self.currency != other.currency {
            return Err(DomainError::validation(format!(
                "currency mismatch: {} vs {}",
                self.currency, other.currency
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_lowercase_currency() {
        assert!(Money::new("usd", 10).is_err());
    }

    #[test]
    fn arithmetic_requires_same_currency() {
        let usd = Money::new("USD", 100).unwrap();
        let eur = Money::new("EUR", 100).unwrap();
        assert!(usd.checked_add(&eur).is_err());
        assert_eq!(
            usd.checked_sub(&Money::new("USD", 40).unwrap()).unwrap(),
            Money::new("USD", 60).unwrap()
        );
    }
}
