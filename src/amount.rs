use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Fixed-point decimal with 4 decimal places, stored as a scaled integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(i64);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid amount '{0}'")]
pub struct ParseAmountError(String);

impl Amount {
    const SCALE: i64 = 10_000;

    pub const ZERO: Amount = Amount(0);

    /// Largest magnitude accepted from text or serialized input. Leaves
    /// headroom so ledger sums never overflow the scaled `i64`.
    pub const MAX: Amount = Amount(1_000_000_000 * Self::SCALE);

    pub fn from_float(value: f64) -> Self {
        Amount((value * Self::SCALE as f64).round() as i64)
    }

    pub fn from_scaled(value: i64) -> Self {
        Amount(value)
    }

    /// Whole currency units, e.g. `Amount::units(20)` is `20.0000`.
    pub fn units(value: i64) -> Self {
        Amount(value * Self::SCALE)
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    fn within_limit(self) -> bool {
        self.0.abs() <= Self::MAX.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        let whole = abs / Self::SCALE;
        let frac = abs % Self::SCALE;
        write!(f, "{sign}{whole}.{frac:04}")
    }
}

/// Parses plain decimal text ("25", "25.5", "-0.0001") without going through
/// floating point. More than 4 fractional digits, or a magnitude above
/// [`Amount::MAX`], is rejected.
impl FromStr for Amount {
    type Err = ParseAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseAmountError(s.to_string());
        let text = s.trim();
        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(err());
        }
        if frac.len() > 4 || !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
            return Err(err());
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| err())?
        };
        let frac: i64 = if frac.is_empty() {
            0
        } else {
            format!("{frac:0<4}").parse().map_err(|_| err())?
        };
        let value = whole
            .checked_mul(Self::SCALE)
            .and_then(|w| w.checked_add(frac))
            .ok_or_else(err)?;
        let amount = Amount(if negative { -value } else { value });
        if !amount.within_limit() {
            return Err(err());
        }
        Ok(amount)
    }
}

/// Serialized as decimal text so records and audit entries stay readable.
impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Accepts decimal text, integers (whole units) and floats.
impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AmountVisitor;

        impl Visitor<'_> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a decimal amount")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
                v.checked_mul(Amount::SCALE)
                    .map(Amount)
                    .filter(|a| a.within_limit())
                    .ok_or_else(|| E::custom("amount out of range"))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
                i64::try_from(v)
                    .map_err(|_| E::custom("amount out of range"))
                    .and_then(|v| self.visit_i64(v))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Amount, E> {
                let limit = (Amount::MAX.0 / Amount::SCALE) as f64;
                if !v.is_finite() || v.abs() > limit {
                    return Err(E::custom("amount out of range"));
                }
                Ok(Amount::from_float(v))
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

impl std::ops::Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Amount(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Amount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Amount(self.0 - rhs.0)
    }
}

impl std::ops::AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::ops::SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, |acc, a| acc + a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_float_converts_correctly() {
        assert_eq!(Amount::from_float(100.0), Amount::from_scaled(1_000_000));
        assert_eq!(Amount::from_float(1.5), Amount::from_scaled(15_000));
        assert_eq!(Amount::from_float(0.0001), Amount::from_scaled(1));
    }

    #[test]
    fn from_float_rounds_correctly() {
        assert_eq!(Amount::from_float(1.23456), Amount::from_scaled(12346));
        assert_eq!(Amount::from_float(1.23454), Amount::from_scaled(12345));
    }

    #[test]
    fn units_scales_whole_values() {
        assert_eq!(Amount::units(20), Amount::from_scaled(200_000));
        assert_eq!(Amount::units(-3).to_string(), "-3.0000");
    }

    #[test]
    fn display_formats_positive_and_negative() {
        assert_eq!(Amount::from_scaled(1_000_000).to_string(), "100.0000");
        assert_eq!(Amount::from_scaled(1).to_string(), "0.0001");
        assert_eq!(Amount::from_scaled(-502_500).to_string(), "-50.2500");
        assert_eq!(Amount::ZERO.to_string(), "0.0000");
    }

    #[test]
    fn parse_decimal_text() {
        assert_eq!("25".parse::<Amount>().unwrap(), Amount::units(25));
        assert_eq!("25.5".parse::<Amount>().unwrap(), Amount::from_scaled(255_000));
        assert_eq!(" 0.0001 ".parse::<Amount>().unwrap(), Amount::from_scaled(1));
        assert_eq!("-10.25".parse::<Amount>().unwrap(), Amount::from_scaled(-102_500));
        assert_eq!(".5".parse::<Amount>().unwrap(), Amount::from_scaled(5_000));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("".parse::<Amount>().is_err());
        assert!("abc".parse::<Amount>().is_err());
        assert!("1.23456".parse::<Amount>().is_err());
        assert!("1,5".parse::<Amount>().is_err());
        assert!(".".parse::<Amount>().is_err());
    }

    #[test]
    fn parse_rejects_amounts_above_limit() {
        assert_eq!("1000000000".parse::<Amount>().unwrap(), Amount::MAX);
        assert!("1000000000.0001".parse::<Amount>().is_err());
        assert!("900000000000000".parse::<Amount>().is_err());
        assert!("-900000000000000".parse::<Amount>().is_err());
        assert!(serde_json::from_str::<Amount>("900000000000000").is_err());
        assert!(serde_json::from_str::<Amount>("9e14").is_err());
    }

    #[test]
    fn arithmetic() {
        let mut a = Amount::units(100);
        a += Amount::units(50);
        assert_eq!(a, Amount::units(150));
        a -= Amount::units(30);
        assert_eq!(a, Amount::units(120));
        assert_eq!(a - Amount::units(200), Amount::units(-80));
    }

    #[test]
    fn sum_of_amounts() {
        let total: Amount = [Amount::units(20), Amount::units(15)].into_iter().sum();
        assert_eq!(total, Amount::units(35));
        let empty: Amount = std::iter::empty().sum();
        assert_eq!(empty, Amount::ZERO);
    }

    #[test]
    fn serde_accepts_text_integers_and_floats() {
        let parsed: Vec<Amount> = serde_json::from_str(r#"["12.5", 3, 0.25]"#).unwrap();
        assert_eq!(
            parsed,
            vec![Amount::from_scaled(125_000), Amount::units(3), Amount::from_scaled(2_500)]
        );
        assert_eq!(serde_json::to_string(&Amount::units(20)).unwrap(), "\"20.0000\"");
    }

    #[test]
    fn sign_predicates() {
        assert!(Amount::units(1).is_positive());
        assert!(!Amount::ZERO.is_positive());
        assert!(!Amount::units(-1).is_positive());
    }
}
