//! Users and their storefront profile

use chrono::{DateTime, Utc};
use serde::Serialize;
use crate::domain::events::{DomainEvent, UserEvent};
use crate::domain::value_objects::UserId;

/// Identity record owned by the external auth provider; mirrored locally for ownership.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct User {
    pub(crate) id: UserId,
    pub(crate) username: String,
    pub(crate) email: String,
    pub(crate) date_joined: DateTime<Utc>,
}

/// 1:1 extension of a [`User`]. Created together with the user, never on its own.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub(crate) user: UserId,
    pub(crate) provider_customer_id: Option<String>,
    pub(crate) one_click_purchasing: bool,
}

/// Result of registering a user: both records, to be persisted in one transaction.
#[derive(Clone, Debug)]
pub struct Registration {
    pub user: User,
    pub profile: UserProfile,
    pub events: Vec<DomainEvent>,
}

impl User {
    pub fn register(username: impl Into<String>, email: impl Into<String>) -> Registration {
        let user = Self { id: UserId::new(), username: username.into(), email: email.into(), date_joined: Utc::now() };
        let profile = UserProfile { user: user.id, provider_customer_id: None, one_click_purchasing: false };
        let events = vec![DomainEvent::User(UserEvent::ProfileCreated { user_id: user.id })];
        Registration { user, profile, events }
    }

    pub fn id(&self) -> UserId { self.id }
    pub fn username(&self) -> &str { &self.username }
    pub fn email(&self) -> &str { &self.email }
    pub fn date_joined(&self) -> DateTime<Utc> { self.date_joined }
}

impl UserProfile {
    pub fn user(&self) -> UserId { self.user }
    pub fn provider_customer_id(&self) -> Option<&str> { self.provider_customer_id.as_deref() }
    pub fn one_click_purchasing(&self) -> bool { self.one_click_purchasing }

    /// Records the provider customer without enabling one-click purchasing.
    /// A retried payment reuses it instead of creating another one.
    pub fn remember_customer(&mut self, customer_id: impl Into<String>) {
        self.provider_customer_id = Some(customer_id.into());
    }

    /// Customer to charge for a one-click purchase.
    pub fn saved_customer(&self) -> Option<&str> {
        self.provider_customer_id().filter(|_| self.one_click_purchasing)
    }

    /// Remembers the provider customer so later purchases can reuse the saved card.
    pub fn save_customer(&mut self, customer_id: impl Into<String>) {
        self.provider_customer_id = Some(customer_id.into());
        self.one_click_purchasing = true;
    }
}
