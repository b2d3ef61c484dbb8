//! Shipping and billing addresses

use serde::Serialize;
use crate::domain::value_objects::{AddressId, AddressType, Country, State, UserId};

/// Address fields as entered on the checkout form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressDraft {
    pub street_address: String,
    pub apartment_address: String,
    pub country: Country,
    pub state: State,
    pub zip: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Address {
    pub(crate) id: AddressId,
    pub(crate) user: UserId,
    pub(crate) street_address: String,
    pub(crate) apartment_address: String,
    pub(crate) country: Country,
    pub(crate) state: State,
    pub(crate) zip: String,
    pub(crate) address_type: AddressType,
    pub(crate) default: bool,
}

impl Address {
    pub fn new(user: UserId, street_address: impl Into<String>, state: State, address_type: AddressType) -> Self {
        Self {
            id: AddressId::new(), user, street_address: street_address.into(), apartment_address: String::new(),
            country: Country::default(), state, zip: String::new(), address_type, default: false,
        }
    }

    pub fn from_draft(user: UserId, draft: AddressDraft, address_type: AddressType, default: bool) -> Self {
        Self {
            id: AddressId::new(), user, street_address: draft.street_address, apartment_address: draft.apartment_address,
            country: draft.country, state: draft.state, zip: draft.zip, address_type, default,
        }
    }

    /// Fresh copy of this address filed under another type; never the default.
    pub fn copy_as(&self, address_type: AddressType) -> Self {
        Self { id: AddressId::new(), address_type, default: false, ..self.clone() }
    }

    pub fn with_zip(mut self, zip: impl Into<String>) -> Self { self.zip = zip.into(); self }
    pub fn make_default(mut self) -> Self { self.default = true; self }

    pub fn id(&self) -> AddressId { self.id }
    pub fn user(&self) -> UserId { self.user }
    pub fn street_address(&self) -> &str { &self.street_address }
    pub fn apartment_address(&self) -> &str { &self.apartment_address }
    pub fn country(&self) -> Country { self.country }
    pub fn state(&self) -> State { self.state }
    pub fn zip(&self) -> &str { &self.zip }
    pub fn address_type(&self) -> AddressType { self.address_type }
    pub fn is_default(&self) -> bool { self.default }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_as_billing() {
        let shipping = Address::new(UserId::new(), "12 MG Road", State::Bangalore, AddressType::Shipping).make_default();
        let billing = shipping.copy_as(AddressType::Billing);
        assert_ne!(billing.id(), shipping.id());
        assert_eq!(billing.street_address(), "12 MG Road");
        assert_eq!(billing.address_type(), AddressType::Billing);
        assert!(!billing.is_default());
    }
}
