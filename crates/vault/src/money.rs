//! Exact two-decimal money amounts.
//!
//! Financial amounts are carried as integer cents so that `12.50` leaves the
//! cipher exactly as `12.50`. Input may be a JSON number or a decimal string;
//! numbers are read through their shortest decimal text, so `0.1 + 0.2` style
//! drift is rejected rather than rounded. The serialised form is always the
//! two-decimal string (`250` and `"250"` both come back as `"250.00"`).

use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A signed amount in minor units (cents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Money {
    cents: i64,
}

/// Error parsing a [`Money`] string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyParseError {
    /// Not of the form `[-]digits[.d[d]]`.
    #[error("invalid amount `{0}`")]
    Invalid(String),

    /// More than two fractional digits; parsing would lose precision.
    #[error("amount `{0}` has more than two decimal places")]
    TooPrecise(String),

    /// Does not fit in 64-bit cents.
    #[error("amount `{0}` is out of range")]
    Overflow(String),
}

impl Money {
    /// Construct from a number of cents.
    pub const fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Amount in cents.
    pub const fn cents(&self) -> i64 {
        self.cents
    }

    /// Parse a JSON number.
    ///
    /// # Errors
    ///
    /// As for [`Money::from_str`] applied to the number's decimal text.
    pub fn from_number(n: &serde_json::Number) -> Result<Self, MoneyParseError> {
        if let Some(i) = n.as_i64() {
            return Self::from_i64(i);
        }
        if let Some(u) = n.as_u64() {
            return i64::try_from(u)
                .map_err(|_| MoneyParseError::Overflow(u.to_string()))
                .and_then(Self::from_i64);
        }
        match n.as_f64() {
            Some(f) => Self::from_f64(f),
            None => Err(MoneyParseError::Invalid(n.to_string())),
        }
    }

    fn from_i64(whole: i64) -> Result<Self, MoneyParseError> {
        whole
            .checked_mul(100)
            .map(Self::from_cents)
            .ok_or_else(|| MoneyParseError::Overflow(whole.to_string()))
    }

    fn from_f64(value: f64) -> Result<Self, MoneyParseError> {
        if !value.is_finite() {
            return Err(MoneyParseError::Invalid(value.to_string()));
        }
        // `Display` for f64 is the shortest text that round-trips, never exponent form.
        format!("{value}").parse()
    }
}

impl FromStr for Money {
    type Err = MoneyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MoneyParseError::Invalid(s.to_owned());
        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (whole, frac) = match body.split_once('.') {
            Some((w, f)) => (w, Some(f)),
            None => (body, None),
        };
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let frac_cents = match frac {
            None => 0,
            Some(f) if f.is_empty() || !f.bytes().all(|b| b.is_ascii_digit()) => {
                return Err(invalid())
            }
            Some(f) if f.len() > 2 => return Err(MoneyParseError::TooPrecise(s.to_owned())),
            Some(f) if f.len() == 1 => i64::from(f.as_bytes()[0] - b'0') * 10,
            Some(f) => i64::from(f.as_bytes()[0] - b'0') * 10 + i64::from(f.as_bytes()[1] - b'0'),
        };

        let overflow = || MoneyParseError::Overflow(s.to_owned());
        let whole: i64 = whole.parse().map_err(|_| overflow())?;
        let cents = whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(frac_cents))
            .ok_or_else(overflow)?;
        Ok(Self {
            cents: if negative { -cents } else { cents },
        })
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct MoneyVisitor;

impl<'de> de::Visitor<'de> for MoneyVisitor {
    type Value = Money;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a money amount as a number or decimal string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Money, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Money, E> {
        Money::from_i64(v).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Money, E> {
        i64::try_from(v)
            .map_err(|_| MoneyParseError::Overflow(v.to_string()))
            .and_then(Money::from_i64)
            .map_err(E::custom)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Money, E> {
        Money::from_f64(v).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(MoneyVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_cents_exactly() {
        let m: Money = "12.50".parse().unwrap();
        assert_eq!(m.cents(), 1250);
        assert_eq!(m.to_string(), "12.50");
    }

    #[test]
    fn normalises_short_forms() {
        assert_eq!("250".parse::<Money>().unwrap().to_string(), "250.00");
        assert_eq!("250.0".parse::<Money>().unwrap().to_string(), "250.00");
        assert_eq!("0.07".parse::<Money>().unwrap().cents(), 7);
    }

    #[test]
    fn negative_amounts() {
        let m: Money = "-0.05".parse().unwrap();
        assert_eq!(m.cents(), -5);
        assert_eq!(m.to_string(), "-0.05");
    }

    #[test]
    fn rejects_extra_precision() {
        assert!(matches!(
            "12.499".parse::<Money>(),
            Err(MoneyParseError::TooPrecise(_))
        ));
    }

    #[test]
    fn rejects_garbage() {
        for s in ["", "-", "1.", ".5", "1,00", "abc", "1.2.3", "+1"] {
            assert!(s.parse::<Money>().is_err(), "accepted {s:?}");
        }
    }

    #[test]
    fn rejects_overflow() {
        assert!(matches!(
            "99999999999999999999".parse::<Money>(),
            Err(MoneyParseError::Overflow(_))
        ));
    }

    #[test]
    fn serde_uses_string_form() {
        let m = Money::from_cents(25000);
        assert_eq!(serde_json::to_string(&m).unwrap(), r#""250.00""#);
        let back: Money = serde_json::from_str(r#""250.00""#).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn deserialises_numbers_exactly() {
        for (text, cents) in [
            ("250.00", 25000),
            ("250", 25000),
            ("12.5", 1250),
            ("0.07", 7),
            ("-3", -300),
        ] {
            let m: Money = serde_json::from_str(text).unwrap();
            assert_eq!(m.cents(), cents, "{text}");
        }
        assert!(serde_json::from_str::<Money>("12.499").is_err());
        assert!(serde_json::from_str::<Money>("0.30000000000000004").is_err());
        assert!(serde_json::from_str::<Money>("true").is_err());
    }

    #[test]
    fn from_number_matches_string_parse() {
        let n: serde_json::Number = serde_json::from_str("19.99").unwrap();
        assert_eq!(Money::from_number(&n).unwrap(), "19.99".parse().unwrap());
        let big = serde_json::Number::from(u64::MAX);
        assert!(matches!(Money::from_number(&big), Err(MoneyParseError::Overflow(_))));
    }
}
