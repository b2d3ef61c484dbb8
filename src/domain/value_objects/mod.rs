//! Value Objects for the storefront

use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Sub};
use uuid::Uuid;

macro_rules! define_id {
    ($($name:ident),+ $(,)?) => {$(
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self { Self(Uuid::now_v7()) }
            pub fn from_uuid(id: Uuid) -> Self { Self(id) }
            pub fn as_uuid(&self) -> Uuid { self.0 }
        }

        impl Default for $name { fn default() -> Self { Self::new() } }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
        }
    )+};
}

define_id!(UserId, ItemId, OrderId, OrderItemId, AddressId, PaymentId, CouponId, RefundId);

/// Money value object. Fixed-point, two decimal places, single store currency.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self { Self(amount) }
    pub fn from_cents(cents: i64) -> Self { Self(Decimal::new(cents, 2)) }
    pub fn amount(&self) -> Decimal { self.0 }
    pub fn is_negative(&self) -> bool { self.0 < Decimal::ZERO }
    pub fn is_zero(&self) -> bool { self.0.is_zero() }
    pub fn multiply(&self, qty: Quantity) -> Money { Money(self.0 * Decimal::from(qty.value())) }

    /// Negative amounts become zero.
    pub fn floor_zero(self) -> Money { self.max(Money::ZERO) }

    /// Amount in the currency's minor unit (cents), rounded half away from zero.
    pub fn minor_units(&self) -> Option<i64> { (self.0 * Decimal::ONE_HUNDRED).round().to_i64() }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money { Money(self.0 + rhs.0) }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money { Money(self.0 - rhs.0) }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money { iter.fold(Money::ZERO, Add::add) }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:.2}", self.0) }
}

/// Line quantity. Never zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(u32);

impl Quantity {
    pub const ONE: Quantity = Quantity(1);

    pub fn new(value: u32) -> Option<Self> { (value > 0).then_some(Self(value)) }
    pub fn value(&self) -> u32 { self.0 }
    pub fn increment(&self) -> Self { Self(self.0.saturating_add(1)) }
    /// `None` when the last unit is taken away.
    pub fn decrement(&self) -> Option<Self> { Self::new(self.0 - 1) }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

const SLUG_MAX_LEN: usize = 50;

/// URL-safe catalog key: ASCII letters, digits, hyphens and underscores.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Slug(String);

impl Slug {
    pub fn new(value: impl Into<String>) -> Result<Self, SlugError> {
        let value = value.into().trim().to_string();
        if value.is_empty() { return Err(SlugError::Empty); }
        if value.len() > SLUG_MAX_LEN { return Err(SlugError::TooLong); }
        if let Some(c) = value.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_')) {
            return Err(SlugError::InvalidChar(c));
        }
        Ok(Self(value))
    }

    /// Builds a slug from a display title, e.g. `"Yamaha F310 Guitar"` -> `yamaha-f310-guitar`.
    pub fn from_title(title: &str) -> Result<Self, SlugError> {
        let words: Vec<String> = title
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_ascii_lowercase)
            .collect();
        let mut slug = words.join("-");
        slug.truncate(SLUG_MAX_LEN);
        Self::new(slug.trim_end_matches('-'))
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl TryFrom<String> for Slug {
    type Error = SlugError;
    fn try_from(value: String) -> Result<Self, SlugError> { Self::new(value) }
}

impl From<Slug> for String {
    fn from(slug: Slug) -> String { slug.0 }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlugError {
    #[error("slug is empty")]
    Empty,
    #[error("slug is longer than 50 characters")]
    TooLong,
    #[error("slug contains invalid character {0:?}")]
    InvalidChar(char),
}

pub const REF_CODE_LEN: usize = 20;

/// Human-readable order reference, handed to the customer once an order is placed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefCode(String);

impl RefCode {
    pub fn generate() -> Self {
        let code: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(REF_CODE_LEN)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        Self(code)
    }

    /// Accepts any non-empty code up to the generated length; lookups decide whether it exists.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        (!value.is_empty() && value.len() <= REF_CODE_LEN).then(|| Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for RefCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Closed choice sets. Each variant carries its stored code and display label.
macro_rules! choices {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => ($code:literal, $label:literal)),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name { $(#[serde(rename = $code)] $variant),+ }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];
            pub fn code(&self) -> &'static str { match self { $(Self::$variant => $code),+ } }
            pub fn label(&self) -> &'static str { match self { $(Self::$variant => $label),+ } }
            pub fn from_code(code: &str) -> Option<Self> {
                match code { $($code => Some(Self::$variant),)+ _ => None }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.label()) }
        }
    };
}

choices!(
    /// Instrument family an item belongs to.
    Category {
        Guitar => ("G", "Guitar"),
        Violin => ("V", "Violin"),
        Piano => ("P", "Piano"),
        Tabla => ("T", "Tabla"),
        Drum => ("D", "Drum"),
    }
);

choices!(
    /// Badge style shown next to an item.
    Label {
        Primary => ("P", "primary"),
        Secondary => ("S", "secondary"),
        Danger => ("D", "danger"),
    }
);

choices!(
    Country {
        India => ("IN", "India"),
        Nepal => ("NP", "Nepal"),
    }
);

choices!(
    State {
        Delhi => ("DL", "Delhi"),
        Haryana => ("HR", "Haryana"),
        Punjab => ("PB", "Punjab"),
        UttarPradesh => ("UP", "Uttar Pradesh"),
        Lucknow => ("LK", "Lucknow"),
        Bihar => ("BH", "Bihar"),
        Bangalore => ("BN", "Bangalore"),
        Maharashtra => ("MH", "Maharashtra"),
    }
);

choices!(
    AddressType {
        Billing => ("B", "Billing"),
        Shipping => ("S", "Shipping"),
    }
);

choices!(
    PaymentOption {
        Stripe => ("S", "Stripe"),
        PayPal => ("P", "PayPal"),
    }
);

impl Default for Label { fn default() -> Self { Label::Primary } }
impl Default for Country { fn default() -> Self { Country::India } }

impl PaymentOption {
    /// Path segment used by the payment routes.
    pub fn path(&self) -> &'static str {
        match self { Self::Stripe => "stripe", Self::PayPal => "paypal" }
    }

    pub fn from_path(segment: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|o| o.path() == segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug() {
        assert_eq!(Slug::new("fender-strat_01").unwrap().as_str(), "fender-strat_01");
        assert_eq!(Slug::new(""), Err(SlugError::Empty));
        assert_eq!(Slug::new("a b"), Err(SlugError::InvalidChar(' ')));
        assert_eq!(Slug::from_title("  Yamaha F310 -- Guitar!").unwrap().as_str(), "yamaha-f310-guitar");
    }

    #[test]
    fn test_money_arithmetic() {
        let price = Money::from_cents(1999);
        assert_eq!(price.multiply(Quantity::new(3).unwrap()), Money::from_cents(5997));
        assert_eq!((Money::from_cents(500) - Money::from_cents(800)).floor_zero(), Money::ZERO);
        assert_eq!(Money::from_cents(4999).minor_units(), Some(4999));
        assert_eq!(Money::from_cents(4999).to_string(), "49.99");
    }

    #[test]
    fn test_quantity_never_zero() {
        assert!(Quantity::new(0).is_none());
        assert_eq!(Quantity::ONE.increment().value(), 2);
        assert!(Quantity::ONE.decrement().is_none());
    }

    #[test]
    fn test_ref_code() {
        let code = RefCode::generate();
        assert_eq!(code.as_str().len(), REF_CODE_LEN);
        assert!(code.as_str().chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert!(RefCode::parse("   ").is_none());
        assert_eq!(RefCode::parse(" abc ").unwrap().as_str(), "abc");
    }

    #[test]
    fn test_choice_codes() {
        assert_eq!(State::from_code("MH"), Some(State::Maharashtra));
        assert_eq!(Category::from_code("S"), None);
        assert_eq!(PaymentOption::from_path("paypal"), Some(PaymentOption::PayPal));
        assert_eq!(serde_json::to_string(&Country::Nepal).unwrap(), "\"NP\"");
    }
}
