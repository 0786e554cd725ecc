//! Fixed precision amounts for the two traded assets.
//!
//! Amounts are exact signed counts of the smallest unit: cents for USD and
//! satoshi for BTC. All balance movement happens in these integers; the only
//! floating point step is the BTC to USD conversion at a quoted price.

use std::fmt;
use std::ops::{Add, Neg, Sub};
use std::str::FromStr;
use thiserror::Error;

pub const USD_PRECISION: usize = 2;
pub const USD_BASE: i64 = 100;
pub const BTC_PRECISION: usize = 8;
pub const BTC_BASE: i64 = 100_000_000;

#[derive(Debug, Error, Eq, PartialEq)]
#[error("malformed amount {0:?}")]
pub struct MalformedAmount(pub String);

/// An amount of US dollars in cents.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Usd(i64);

/// An amount of bitcoin in satoshi.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Btc(i64);

impl Usd {
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn as_cents(self) -> i64 {
        self.0
    }

    /// Rounds half away from zero to cent precision.
    pub fn from_f64(dollars: f64) -> Self {
        Self((dollars * USD_BASE as f64).round() as i64)
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / USD_BASE as f64
    }
}

impl Btc {
    pub const fn from_sats(sats: i64) -> Self {
        Self(sats)
    }

    pub const fn as_sats(self) -> i64 {
        self.0
    }

    /// Rounds half away from zero to satoshi precision.
    pub fn from_f64(btc: f64) -> Self {
        Self((btc * BTC_BASE as f64).round() as i64)
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / BTC_BASE as f64
    }

    /// Converts this amount to USD at the given price (USD per BTC), rounded
    /// half away from zero to cent precision. Every downstream comparison and
    /// transfer uses the resulting integer.
    pub fn to_usd(self, price: f64) -> Usd {
        Usd((self.to_f64() * price * USD_BASE as f64).round() as i64)
    }
}

macro_rules! impl_amount_ops {
    ($amount:ident) => {
        impl Add for $amount {
            type Output = Self;
            fn add(self, rhs: Self) -> Self {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $amount {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self {
                Self(self.0 - rhs.0)
            }
        }

        impl Neg for $amount {
            type Output = Self;
            fn neg(self) -> Self {
                Self(-self.0)
            }
        }
    };
}

impl_amount_ops!(Usd);
impl_amount_ops!(Btc);

impl fmt::Display for Usd {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        format_base_units(f, self.0, USD_PRECISION)
    }
}

impl fmt::Display for Btc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        format_base_units(f, self.0, BTC_PRECISION)
    }
}

impl FromStr for Usd {
    type Err = MalformedAmount;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_base_units(s, USD_PRECISION).map(Self)
    }
}

impl FromStr for Btc {
    type Err = MalformedAmount;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_base_units(s, BTC_PRECISION).map(Self)
    }
}

fn format_base_units(f: &mut fmt::Formatter, amount: i64, precision: usize) -> fmt::Result {
    let sign = if amount < 0 { "-" } else { "" };
    let magnitude = amount.unsigned_abs();
    let base = 10u64.pow(precision as u32);
    write!(
        f,
        "{}{}.{:0precision$}",
        sign,
        magnitude / base,
        magnitude % base,
        precision = precision
    )
}

/// Parses a signed decimal string into base units. Fractional digits beyond
/// `precision` are truncated toward zero, missing ones are zero padded.
fn parse_base_units(input: &str, precision: usize) -> Result<i64, MalformedAmount> {
    let malformed = || MalformedAmount(input.to_string());

    let mut s = input.trim();
    let negative = match s.strip_prefix('-') {
        Some(rest) => {
            s = rest.trim_start();
            true
        }
        None => false,
    };
    if s.is_empty() {
        return Err(malformed());
    }

    let (int_part, frac_part) = match s.split_once('.') {
        Some((int_part, frac_part)) => (int_part, frac_part),
        None => (s, ""),
    };
    if int_part.is_empty()
        || !int_part.bytes().all(|b| b.is_ascii_digit())
        || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(malformed());
    }

    let int_part: i64 = int_part.parse().map_err(|_| malformed())?;
    let frac_digits: i64 = frac_part
        .bytes()
        .chain(std::iter::repeat(b'0'))
        .take(precision)
        .fold(0i64, |acc, b| acc * 10 + i64::from(b - b'0'));

    let base = 10i64.pow(precision as u32);
    let amount = int_part
        .checked_mul(base)
        .and_then(|units| units.checked_add(frac_digits))
        .ok_or_else(malformed)?;
    Ok(if negative { -amount } else { amount })
}
