//! Token amounts in smallest-unit denomination.
//!
//! Amounts are unsigned 256-bit integers, matching the width of an ERC-20
//! balance. No floating point anywhere: parsing takes decimal digit strings,
//! arithmetic is checked, and the JSON form is a decimal string so values
//! above 2^53 survive JavaScript consumers.

use alloy_primitives::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};

/// A non-negative token amount.
///
/// ```
/// use quorum_core::Amount;
///
/// let a: Amount = "1000000000000000000".parse().unwrap();
/// let b = Amount::from(5u64);
/// assert_eq!(a.checked_add(b).unwrap().to_string(), "1000000000000000005");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(U256);

impl Amount {
    pub const ZERO: Amount = Amount(U256::ZERO);

    /// Parse a base-10 digit string.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidAmount`] for empty input or anything other than
    /// ASCII digits (signs, decimals, whitespace, hex), and
    /// [`CoreError::AmountOverflow`] when the value does not fit 256 bits.
    pub fn parse(s: &str) -> CoreResult<Self> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CoreError::InvalidAmount(s.to_string()));
        }
        U256::from_str_radix(s, 10)
            .map(Amount)
            .map_err(|_| CoreError::AmountOverflow)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_add(self, rhs: Amount) -> CoreResult<Amount> {
        self.0
            .checked_add(rhs.0)
            .map(Amount)
            .ok_or(CoreError::AmountOverflow)
    }

    /// `self - rhs`, or `None` if that would go negative.
    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    /// Sum an iterator of amounts, failing on overflow.
    pub fn checked_sum<I: IntoIterator<Item = Amount>>(iter: I) -> CoreResult<Amount> {
        iter.into_iter()
            .try_fold(Amount::ZERO, |acc, next| acc.checked_add(next))
    }

    /// `self / total` as a whole percentage, rounded down and capped at 100.
    /// A zero total reads as 0%.
    pub fn percent_of(self, total: Amount) -> u8 {
        if total.is_zero() {
            return 0;
        }
        // Cap the numerator first so the multiplication cannot overflow.
        let part = self.0.min(total.0);
        let hundred = U256::from(100u64);
        let pct = match part.checked_mul(hundred) {
            Some(scaled) => scaled / total.0,
            // part * 100 overflowed: scale the denominator down instead.
            None => part / (total.0 / hundred).max(U256::from(1u64)),
        };
        let pct = pct.min(hundred);
        u8::try_from(pct.as_limbs()[0]).unwrap_or(100)
    }

    pub fn as_u256(&self) -> U256 {
        self.0
    }
}

impl From<u64> for Amount {
    fn from(v: u64) -> Self {
        Amount(U256::from(v))
    }
}

impl From<U256> for Amount {
    fn from(v: U256) -> Self {
        Amount(v)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::parse(s)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Amount::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_U256: &str =
        "115792089237316195423570985008687907853269984665640564039457584007913129639935";

    #[test]
    fn parse_accepts_digits_only() {
        assert_eq!(Amount::parse("0").unwrap(), Amount::ZERO);
        assert_eq!(Amount::parse("42").unwrap(), Amount::from(42u64));
        for bad in ["", "-1", "1.5", " 7", "0x10", "1e18"] {
            assert!(
                matches!(Amount::parse(bad), Err(CoreError::InvalidAmount(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn parse_rejects_values_past_256_bits() {
        assert_eq!(Amount::parse(MAX_U256).unwrap().to_string(), MAX_U256);
        let too_big = format!("{MAX_U256}0");
        assert!(matches!(
            Amount::parse(&too_big),
            Err(CoreError::AmountOverflow)
        ));
    }

    #[test]
    fn checked_arithmetic() {
        let max = Amount::parse(MAX_U256).unwrap();
        assert!(matches!(
            max.checked_add(Amount::from(1u64)),
            Err(CoreError::AmountOverflow)
        ));
        assert_eq!(Amount::from(3u64).checked_sub(Amount::from(5u64)), None);
        assert_eq!(
            Amount::checked_sum([100u64, 100, 100].map(Amount::from)).unwrap(),
            Amount::from(300u64)
        );
    }

    #[test]
    fn percent_of_rounds_down() {
        let total = Amount::from(300u64);
        assert_eq!(Amount::from(200u64).percent_of(total), 66);
        assert_eq!(Amount::from(300u64).percent_of(total), 100);
        assert_eq!(Amount::ZERO.percent_of(total), 0);
        assert_eq!(Amount::from(5u64).percent_of(Amount::ZERO), 0);

        let max = Amount::parse(MAX_U256).unwrap();
        assert_eq!(max.percent_of(max), 100);
    }

    #[test]
    fn serializes_as_decimal_string() {
        let amount = Amount::parse("1000000000000000000000").unwrap();
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"1000000000000000000000\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amount);
        assert!(serde_json::from_str::<Amount>("\"abc\"").is_err());
    }
}
