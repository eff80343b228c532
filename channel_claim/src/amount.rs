// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Drop amounts
//!
//! The ledger counts value in drops, its smallest integer unit
//! (1 XRP = 1,000,000 drops). Every amount that is stored, compared or signed
//! is a [`Drops`] value. Decimal XRP only exists at the edges, through
//! [`to_drops`] and [`to_xrp`].
//!
//! # Example
//! ```rust
//! use channel_claim::amount::{to_drops, to_xrp, Drops};
//! use rust_decimal::Decimal;
//! use std::str::FromStr;
//!
//! let drops = to_drops(Decimal::from_str("1.5").unwrap()).unwrap();
//! assert_eq!(drops, Drops::new(1_500_000));
//! assert_eq!(to_xrp(drops), Decimal::from_str("1.5").unwrap());
//! ```

use std::{fmt, ops::Sub, str::FromStr};

use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Number of drops in one XRP.
pub const DROPS_PER_XRP: u64 = 1_000_000;

/// Decimal places of XRP that map onto whole drops.
pub const XRP_DECIMALS: u32 = 6;

/// Errors produced while converting between XRP and drops
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount {value} XRP cannot be represented at {XRP_DECIMALS}-decimal precision")]
    Precision { value: String },
    #[error("amount {value} is negative")]
    Negative { value: String },
    #[error("amount {value} does not fit in 64-bit drops")]
    Overflow { value: String },
    #[error("invalid drops amount: {value}")]
    Parse { value: String },
}

/// Integer amount of drops.
///
/// Serialized as a decimal string, which is how the ledger's JSON API
/// encodes native amounts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Drops(u64);

impl Drops {
    pub const ZERO: Drops = Drops(0);

    pub const fn new(drops: u64) -> Self {
        Self(drops)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub fn checked_add(self, other: Drops) -> Option<Drops> {
        self.0.checked_add(other.0).map(Drops)
    }

    /// Difference clamped at zero.
    pub fn saturating_sub(self, other: Drops) -> Drops {
        Drops(self.0.saturating_sub(other.0))
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Sub for Drops {
    type Output = Option<Drops>;

    fn sub(self, rhs: Drops) -> Self::Output {
        self.0.checked_sub(rhs.0).map(Drops)
    }
}

impl From<u64> for Drops {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Drops> for u64 {
    fn from(value: Drops) -> Self {
        value.0
    }
}

impl fmt::Display for Drops {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Drops {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Drops)
            .map_err(|_| AmountError::Parse {
                value: s.to_owned(),
            })
    }
}

impl TryFrom<String> for Drops {
    type Error = AmountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Drops> for String {
    fn from(value: Drops) -> Self {
        value.0.to_string()
    }
}

fn round_xrp(xrp: Decimal) -> Decimal {
    xrp.round_dp_with_strategy(XRP_DECIMALS, RoundingStrategy::MidpointAwayFromZero)
}

/// Converts decimal XRP to drops, rounding to 6 decimal places first.
///
/// # Errors
///
/// Returns [`AmountError::Precision`] if a second rounding pass changes the
/// value or the scaled amount is not integral, [`AmountError::Negative`] for
/// negative input and [`AmountError::Overflow`] if the result exceeds `u64`.
pub fn to_drops(xrp: Decimal) -> Result<Drops, AmountError> {
    if xrp.is_sign_negative() && !xrp.is_zero() {
        return Err(AmountError::Negative {
            value: xrp.to_string(),
        });
    }

    let rounded = round_xrp(xrp);
    if round_xrp(rounded) != rounded {
        return Err(AmountError::Precision {
            value: xrp.to_string(),
        });
    }

    let scaled = rounded
        .checked_mul(Decimal::from(DROPS_PER_XRP))
        .ok_or_else(|| AmountError::Overflow {
            value: xrp.to_string(),
        })?;
    if !scaled.fract().is_zero() {
        return Err(AmountError::Precision {
            value: xrp.to_string(),
        });
    }

    scaled.to_u64().map(Drops).ok_or_else(|| AmountError::Overflow {
        value: xrp.to_string(),
    })
}

/// Converts drops to decimal XRP. Exact.
pub fn to_xrp(drops: Drops) -> Decimal {
    Decimal::from_i128_with_scale(drops.0 as i128, XRP_DECIMALS).normalize()
}

/// Amount owed after `elapsed_secs` at `rate_per_minute`, rounded to the
/// nearest drop (half up).
///
/// # Errors
///
/// Returns [`AmountError::Overflow`] if the owed amount exceeds `u64`.
pub fn prorate(rate_per_minute: Drops, elapsed_secs: u64) -> Result<Drops, AmountError> {
    let owed = (elapsed_secs as u128 * rate_per_minute.0 as u128 + 30) / 60;
    u64::try_from(owed).map(Drops).map_err(|_| AmountError::Overflow {
        value: owed.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rstest::*;
    use rust_decimal::Decimal;

    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[rstest]
    #[case::whole("60", 60_000_000)]
    #[case::fraction("0.000001", 1)]
    #[case::rounds_down("1.0000004", 1_000_000)]
    #[case::rounds_half_away("1.0000005", 1_000_001)]
    #[case::zero("0", 0)]
    fn xrp_to_drops(#[case] xrp: &str, #[case] expected: u64) {
        assert_eq!(to_drops(dec(xrp)).unwrap(), Drops::new(expected));
    }

    #[test]
    fn negative_xrp_is_rejected() {
        assert!(matches!(
            to_drops(dec("-0.5")),
            Err(AmountError::Negative { .. })
        ));
    }

    #[test]
    fn overflowing_xrp_is_rejected() {
        assert!(matches!(
            to_drops(dec("100000000000000000000")),
            Err(AmountError::Overflow { .. })
        ));
    }

    #[rstest]
    #[case("0.1234565")]
    #[case("42.000000499")]
    #[case("99999.999999")]
    #[case("1")]
    fn rounding_is_idempotent(#[case] xrp: &str) {
        let drops = to_drops(dec(xrp)).unwrap();
        assert_eq!(to_drops(to_xrp(drops)).unwrap(), drops);
    }

    #[test]
    fn drops_to_xrp_is_exact() {
        assert_eq!(to_xrp(Drops::new(1_500_001)), dec("1.500001"));
        assert_eq!(to_xrp(Drops::ZERO), Decimal::ZERO);
    }

    #[rstest]
    #[case::one_minute(60, 1_000_000)]
    #[case::one_second(1, 16_667)]
    #[case::one_hour(3600, 60_000_000)]
    fn prorate_at_one_xrp_per_minute(#[case] secs: u64, #[case] expected: u64) {
        assert_eq!(
            prorate(Drops::new(1_000_000), secs).unwrap(),
            Drops::new(expected)
        );
    }

    #[test]
    fn drops_serialize_as_strings() {
        let json = serde_json::to_string(&Drops::new(750_000)).unwrap();
        assert_eq!(json, "\"750000\"");
        let back: Drops = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Drops::new(750_000));
        assert!(serde_json::from_str::<Drops>("\"-1\"").is_err());
    }
}
