//! Domain events
use crate::domain::value_objects::{ItemId, Money, OrderId, RefCode, RefundId, UserId};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DomainEvent {
    User(UserEvent),
    Order(OrderEvent),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UserEvent {
    ProfileCreated { user_id: UserId },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    Opened { order_id: OrderId, user_id: UserId },
    ItemAdded { order_id: OrderId, item_id: ItemId, quantity: u32 },
    ItemRemoved { order_id: OrderId, item_id: ItemId, remaining: u32 },
    CouponApplied { order_id: OrderId, code: String },
    Placed { order_id: OrderId, ref_code: RefCode, total: Money },
    BeingDelivered { order_id: OrderId },
    Received { order_id: OrderId },
    RefundRequested { order_id: OrderId },
    RefundGranted { order_id: OrderId, refund_id: RefundId },
}

impl DomainEvent {
    /// Message-bus subject, e.g. `store.order.placed`.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::User(UserEvent::ProfileCreated { .. }) => "store.user.profile_created",
            Self::Order(e) => match e {
                OrderEvent::Opened { .. } => "store.order.opened",
                OrderEvent::ItemAdded { .. } => "store.order.item_added",
                OrderEvent::ItemRemoved { .. } => "store.order.item_removed",
                OrderEvent::CouponApplied { .. } => "store.order.coupon_applied",
                OrderEvent::Placed { .. } => "store.order.placed",
                OrderEvent::BeingDelivered { .. } => "store.order.being_delivered",
                OrderEvent::Received { .. } => "store.order.received",
                OrderEvent::RefundRequested { .. } => "store.order.refund_requested",
                OrderEvent::RefundGranted { .. } => "store.order.refund_granted",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_payload_is_tagged() {
        let order_id = OrderId::new();
        let event = DomainEvent::Order(OrderEvent::Placed {
            order_id,
            ref_code: RefCode::parse("abc123").unwrap(),
            total: Money::from_cents(4999),
        });
        assert_eq!(event.subject(), "store.order.placed");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "placed");
        assert_eq!(json["order_id"], order_id.to_string());
        assert_eq!(json["ref_code"], "abc123");
        assert_eq!(json["total"], "49.99");
    }
}
