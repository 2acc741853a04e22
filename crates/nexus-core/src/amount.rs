//! Monetary amounts.
//!
//! The HTTP API and the ledger exchange amounts as `CURRENCY:VALUE` strings
//! (`"EUR:4.50"`). Parsing is strict: the value must be a positive decimal
//! with at most two fractional digits, because that is the widest precision
//! the generated pain.001 `InstdAmt` may carry.

use std::{fmt, str::FromStr};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, de};

use crate::error::Error;

/// A currency code plus a positive decimal value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Amount {
  pub currency: String,
  pub value:    Decimal,
}

impl Amount {
  /// Build an amount, enforcing positivity and the two-fractional-digit rule.
  pub fn new(currency: &str, value: Decimal) -> Result<Self, Error> {
    let input = format!("{currency}:{value}");
    if currency.is_empty() || !currency.chars().all(|c| c.is_ascii_uppercase())
    {
      return Err(Error::InvalidAmount {
        input,
        reason: "currency must be non-empty uppercase ASCII".into(),
      });
    }
    if value <= Decimal::ZERO {
      return Err(Error::InvalidAmount {
        input,
        reason: "value must be positive".into(),
      });
    }
    // `normalize` strips trailing zeros, so "1.100" is accepted as 1.1.
    if value.normalize().scale() > 2 {
      return Err(Error::InvalidAmount {
        input,
        reason: "more than 2 fractional digits".into(),
      });
    }
    Ok(Self { currency: currency.to_owned(), value: value.normalize() })
  }

  /// The bare decimal rendering used inside pain.001 (`InstdAmt` text).
  pub fn value_string(&self) -> String { self.value.to_string() }
}

impl FromStr for Amount {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Error> {
    let (currency, value) = s.split_once(':').ok_or_else(|| {
      Error::InvalidAmount {
        input:  s.to_owned(),
        reason: "expected CURRENCY:VALUE".into(),
      }
    })?;
    let value = Decimal::from_str(value).map_err(|e| Error::InvalidAmount {
      input:  s.to_owned(),
      reason: e.to_string(),
    })?;
    Self::new(currency, value)
  }
}

impl fmt::Display for Amount {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.currency, self.value)
  }
}

impl Serialize for Amount {
  fn serialize<S: serde::Serializer>(
    &self,
    serializer: S,
  ) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.to_string())
  }
}

impl<'de> Deserialize<'de> for Amount {
  fn deserialize<D: serde::Deserializer<'de>>(
    deserializer: D,
  ) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(de::Error::custom)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_currency_and_value() {
    let a: Amount = "TESTKUDOS:1".parse().unwrap();
    assert_eq!(a.currency, "TESTKUDOS");
    assert_eq!(a.value_string(), "1");

    let b: Amount = "EUR:4.50".parse().unwrap();
    assert_eq!(b.value_string(), "4.5");
  }

  #[test]
  fn rejects_excess_fractional_digits() {
    let err = "EUR:1.001".parse::<Amount>().unwrap_err();
    assert!(matches!(err, Error::InvalidAmount { .. }), "{err}");
  }

  #[test]
  fn accepts_trailing_zeros_beyond_two_digits() {
    let a: Amount = "EUR:1.100".parse().unwrap();
    assert_eq!(a.value_string(), "1.1");
  }

  #[test]
  fn rejects_zero_negative_and_malformed() {
    assert!("EUR:0".parse::<Amount>().is_err());
    assert!("EUR:-5".parse::<Amount>().is_err());
    assert!("5".parse::<Amount>().is_err());
    assert!("eur:5".parse::<Amount>().is_err());
  }

  #[test]
  fn serde_round_trip_is_the_string_form() {
    let a: Amount = "EUR:2.25".parse().unwrap();
    let json = serde_json::to_string(&a).unwrap();
    assert_eq!(json, "\"EUR:2.25\"");
    let back: Amount = serde_json::from_str(&json).unwrap();
    assert_eq!(back, a);
  }
}
