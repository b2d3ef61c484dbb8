//! Form submissions accepted by the storefront.
//!
//! Each form deserializes from `application/x-www-form-urlencoded` with every
//! field as raw text, is checked with [`validator`], and is then cleaned into
//! a typed submission. Checkbox fields follow HTML semantics: absent means off.

use std::borrow::Cow;

use serde::{Deserialize, Deserializer};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::domain::aggregates::AddressDraft;
use crate::domain::value_objects::{Country, PaymentOption, RefCode, State};

fn checkbox<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let raw = String::deserialize(deserializer)?;
    let raw = raw.trim();
    Ok(!raw.is_empty() && !matches!(raw, "false" | "off" | "0"))
}

pub(crate) fn field_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(Cow::Borrowed(message));
    error
}

fn invalid_choice() -> ValidationError { field_error("invalid_choice", "Select a valid choice.") }

fn validate_country(code: &str) -> Result<(), ValidationError> {
    if code.is_empty() || Country::from_code(code).is_some() { Ok(()) } else { Err(invalid_choice()) }
}

fn validate_state(code: &str) -> Result<(), ValidationError> {
    if code.is_empty() || State::from_code(code).is_some() { Ok(()) } else { Err(invalid_choice()) }
}

fn validate_payment_option(code: &str) -> Result<(), ValidationError> {
    PaymentOption::from_code(code).map(|_| ()).ok_or_else(invalid_choice)
}

fn into_result(errors: ValidationErrors) -> Result<(), ValidationErrors> {
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct CheckoutForm {
    #[validate(length(max = 100))]
    pub shipping_address: String,
    #[validate(length(max = 100))]
    pub shipping_address2: String,
    #[validate(custom = "validate_country")]
    pub shipping_country: String,
    #[validate(length(min = 1, message = "This field is required."), custom = "validate_state")]
    pub shipping_state: String,
    #[validate(length(max = 20))]
    pub shipping_zip: String,

    #[validate(length(max = 100))]
    pub billing_address: String,
    #[validate(length(max = 100))]
    pub billing_address2: String,
    #[validate(custom = "validate_country")]
    pub billing_country: String,
    #[validate(custom = "validate_state")]
    pub billing_state: String,
    #[validate(length(max = 20))]
    pub billing_zip: String,

    #[serde(deserialize_with = "checkbox")]
    pub same_billing_address: bool,
    #[serde(deserialize_with = "checkbox")]
    pub set_default_shipping: bool,
    #[serde(deserialize_with = "checkbox")]
    pub use_default_shipping: bool,
    #[serde(deserialize_with = "checkbox")]
    pub set_default_billing: bool,
    #[serde(deserialize_with = "checkbox")]
    pub use_default_billing: bool,

    #[validate(custom = "validate_payment_option")]
    pub payment_option: String,
}

/// Where the shipping address comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShippingChoice {
    UseDefault,
    Enter { draft: AddressDraft, set_default: bool },
}

/// Where the billing address comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingChoice {
    SameAsShipping,
    UseDefault,
    Enter { draft: AddressDraft, set_default: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSubmission {
    pub shipping: ShippingChoice,
    pub billing: BillingChoice,
    pub payment_option: PaymentOption,
}

impl CheckoutForm {
    pub fn clean(&self) -> Result<CheckoutSubmission, ValidationErrors> {
        let mut errors = self.validate().err().unwrap_or_else(ValidationErrors::new);

        let billing_state = State::from_code(&self.billing_state);
        let enters_billing = !self.same_billing_address && !self.use_default_billing;
        if enters_billing && self.billing_state.is_empty() {
            errors.add("billing_state", field_error("required", "This field is required."));
        }
        into_result(errors)?;

        // Every code below passed validation above.
        let shipping = if self.use_default_shipping {
            ShippingChoice::UseDefault
        } else {
            let draft = AddressDraft {
                street_address: self.shipping_address.trim().to_string(),
                apartment_address: self.shipping_address2.trim().to_string(),
                country: Country::from_code(&self.shipping_country).unwrap_or_default(),
                state: State::from_code(&self.shipping_state).unwrap_or(State::Delhi),
                zip: self.shipping_zip.trim().to_string(),
            };
            ShippingChoice::Enter { draft, set_default: self.set_default_shipping }
        };

        let billing = match (self.same_billing_address, self.use_default_billing, billing_state) {
            (true, _, _) => BillingChoice::SameAsShipping,
            (false, true, _) => BillingChoice::UseDefault,
            (false, false, state) => {
                let draft = AddressDraft {
                    street_address: self.billing_address.trim().to_string(),
                    apartment_address: self.billing_address2.trim().to_string(),
                    country: Country::from_code(&self.billing_country).unwrap_or_default(),
                    state: state.unwrap_or(State::Delhi),
                    zip: self.billing_zip.trim().to_string(),
                };
                BillingChoice::Enter { draft, set_default: self.set_default_billing }
            }
        };

        let payment_option = PaymentOption::from_code(&self.payment_option).unwrap_or(PaymentOption::Stripe);
        Ok(CheckoutSubmission { shipping, billing, payment_option })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct CouponForm {
    #[validate(length(min = 1, max = 15))]
    pub code: String,
}

impl CouponForm {
    /// The trimmed code to look up.
    pub fn clean(&self) -> Result<String, ValidationErrors> {
        let form = Self { code: self.code.trim().to_string() };
        form.validate()?;
        Ok(form.code)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct RefundForm {
    #[validate(length(min = 1, max = 20))]
    pub ref_code: String,
    #[validate(length(min = 1, message = "Tell us why you want a refund."))]
    pub message: String,
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundSubmission {
    pub ref_code: RefCode,
    pub reason: String,
    pub email: String,
}

impl RefundForm {
    pub fn clean(&self) -> Result<RefundSubmission, ValidationErrors> {
        let form = Self {
            ref_code: self.ref_code.trim().to_string(),
            message: self.message.trim().to_string(),
            email: self.email.trim().to_string(),
        };
        form.validate()?;
        let ref_code = RefCode::parse(&form.ref_code).ok_or_else(|| {
            let mut errors = ValidationErrors::new();
            errors.add("ref_code", field_error("invalid", "Enter a valid order reference."));
            errors
        })?;
        Ok(RefundSubmission { ref_code, reason: form.message, email: form.email })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct PaymentForm {
    #[serde(rename = "stripeToken")]
    pub stripe_token: String,
    #[serde(deserialize_with = "checkbox")]
    pub save: bool,
    #[serde(deserialize_with = "checkbox")]
    pub use_default: bool,
}

/// Card tokens become part of the charge's idempotency key, which the
/// provider caps at 255 characters.
const MAX_TOKEN_LEN: usize = 128;

/// How the charge is funded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentSource {
    /// Charge the provider customer saved on the profile.
    SavedCustomer,
    /// Charge a fresh card token, optionally saving it for one-click purchases.
    Token { token: String, save: bool },
}

impl PaymentForm {
    pub fn clean(&self) -> Result<PaymentSource, ValidationErrors> {
        if self.use_default {
            return Ok(PaymentSource::SavedCustomer);
        }
        let token = self.stripe_token.trim();
        if token.is_empty() {
            let mut errors = ValidationErrors::new();
            errors.add("stripeToken", field_error("required", "Card details are required."));
            return Err(errors);
        }
        if token.len() > MAX_TOKEN_LEN {
            let mut errors = ValidationErrors::new();
            errors.add("stripeToken", field_error("invalid", "Card details are invalid."));
            return Err(errors);
        }
        Ok(PaymentSource::Token { token: token.to_string(), save: self.save })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct RegistrationForm {
    #[validate(length(min = 1, max = 150))]
    pub username: String,
    #[validate(email)]
    pub email: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkout() -> CheckoutForm {
        CheckoutForm {
            shipping_address: "221B Baker Lane".into(),
            shipping_state: "DL".into(),
            shipping_zip: "110001".into(),
            same_billing_address: true,
            payment_option: "S".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_checkout_clean() {
        let submission = checkout().clean().unwrap();
        assert_eq!(submission.payment_option, PaymentOption::Stripe);
        assert_eq!(submission.billing, BillingChoice::SameAsShipping);
        match submission.shipping {
            ShippingChoice::Enter { draft, set_default } => {
                assert_eq!(draft.state, State::Delhi);
                assert_eq!(draft.country, Country::India);
                assert!(!set_default);
            }
            other => panic!("unexpected shipping choice {other:?}"),
        }
    }

    #[test]
    fn test_checkout_requires_state_and_payment_option() {
        let form = CheckoutForm { shipping_state: String::new(), payment_option: "X".into(), ..checkout() };
        let errors = form.clean().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("shipping_state"));
        assert!(fields.contains_key("payment_option"));
    }

    #[test]
    fn test_checkout_rejects_unknown_choices() {
        let form = CheckoutForm { shipping_country: "US".into(), shipping_state: "ZZ".into(), ..checkout() };
        let errors = form.clean().unwrap_err();
        assert!(errors.field_errors().contains_key("shipping_country"));
        assert!(errors.field_errors().contains_key("shipping_state"));
    }

    #[test]
    fn test_distinct_billing_needs_state() {
        let form = CheckoutForm { same_billing_address: false, ..checkout() };
        assert!(form.clean().unwrap_err().field_errors().contains_key("billing_state"));

        let form = CheckoutForm { same_billing_address: false, billing_state: "MH".into(), set_default_billing: true, ..checkout() };
        match form.clean().unwrap().billing {
            BillingChoice::Enter { draft, set_default } => {
                assert_eq!(draft.state, State::Maharashtra);
                assert!(set_default);
            }
            other => panic!("unexpected billing choice {other:?}"),
        }
    }

    #[test]
    fn test_default_address_toggles() {
        let form = CheckoutForm { use_default_shipping: true, same_billing_address: false, use_default_billing: true, ..checkout() };
        let submission = form.clean().unwrap();
        assert_eq!(submission.shipping, ShippingChoice::UseDefault);
        assert_eq!(submission.billing, BillingChoice::UseDefault);
    }

    #[test]
    fn test_coupon_and_refund_forms() {
        assert_eq!(CouponForm { code: "  SAVE10 ".into() }.clean().unwrap(), "SAVE10");
        assert!(CouponForm { code: "   ".into() }.clean().is_err());

        let refund = RefundForm { ref_code: " abc123 ".into(), message: "Broken string".into(), email: "a@b.in".into() };
        assert_eq!(refund.clean().unwrap().ref_code.as_str(), "abc123");

        let bad = RefundForm { email: "not-an-email".into(), ..refund };
        assert!(bad.clean().unwrap_err().field_errors().contains_key("email"));
    }

    #[test]
    fn test_payment_form() {
        assert_eq!(PaymentForm { use_default: true, ..Default::default() }.clean().unwrap(), PaymentSource::SavedCustomer);
        assert!(PaymentForm::default().clean().unwrap_err().field_errors().contains_key("stripeToken"));
        let form = PaymentForm { stripe_token: "tok_visa".into(), save: true, use_default: false };
        assert_eq!(form.clean().unwrap(), PaymentSource::Token { token: "tok_visa".into(), save: true });
        let form = PaymentForm { stripe_token: "t".repeat(200), ..Default::default() };
        assert!(form.clean().unwrap_err().field_errors().contains_key("stripeToken"));
    }
}
