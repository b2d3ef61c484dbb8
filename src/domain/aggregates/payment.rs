//! Payment receipt

use chrono::{DateTime, Utc};
use serde::Serialize;
use crate::domain::value_objects::{Money, PaymentId, UserId};

/// Receipt of a completed charge. Immutable once recorded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Payment {
    pub(crate) id: PaymentId,
    pub(crate) charge_id: String,
    pub(crate) user: Option<UserId>,
    pub(crate) amount: Money,
    pub(crate) timestamp: DateTime<Utc>,
}

impl Payment {
    pub fn record(charge_id: impl Into<String>, user: UserId, amount: Money) -> Self {
        Self { id: PaymentId::new(), charge_id: charge_id.into(), user: Some(user), amount, timestamp: Utc::now() }
    }

    pub fn id(&self) -> PaymentId { self.id }
    pub fn charge_id(&self) -> &str { &self.charge_id }
    /// `None` once the paying user has been deleted.
    pub fn user(&self) -> Option<UserId> { self.user }
    pub fn amount(&self) -> Money { self.amount }
    pub fn timestamp(&self) -> DateTime<Utc> { self.timestamp }
}
