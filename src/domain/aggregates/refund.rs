//! Refund request

use chrono::{DateTime, Utc};
use serde::Serialize;
use crate::domain::value_objects::{OrderId, RefundId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Refund {
    pub(crate) id: RefundId,
    pub(crate) order: OrderId,
    pub(crate) reason: String,
    pub(crate) accepted: bool,
    pub(crate) email: String,
    pub(crate) created_at: DateTime<Utc>,
}

impl Refund {
    pub fn request(order: OrderId, reason: impl Into<String>, email: impl Into<String>) -> Self {
        Self { id: RefundId::new(), order, reason: reason.into(), accepted: false, email: email.into(), created_at: Utc::now() }
    }

    pub fn accept(&mut self) { self.accepted = true; }

    pub fn id(&self) -> RefundId { self.id }
    pub fn order(&self) -> OrderId { self.order }
    pub fn reason(&self) -> &str { &self.reason }
    pub fn is_accepted(&self) -> bool { self.accepted }
    pub fn email(&self) -> &str { &self.email }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
}
