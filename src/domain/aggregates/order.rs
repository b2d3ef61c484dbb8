//! Order Aggregate
//!
//! An order with `ordered == false` is the user's cart. Payment capture places
//! it; after that only the fulfilment and refund flags move.

use chrono::{DateTime, Utc};
use serde::Serialize;
use crate::domain::aggregates::{Coupon, Item};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::{AddressId, Money, OrderId, OrderItemId, PaymentId, Quantity, RefCode, RefundId, UserId};

/// One line of an order: an item at a quantity.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderItem {
    pub(crate) id: OrderItemId,
    pub(crate) user: UserId,
    pub(crate) item: Item,
    pub(crate) quantity: Quantity,
    pub(crate) ordered: bool,
}

impl OrderItem {
    pub fn new(user: UserId, item: Item) -> Self {
        Self { id: OrderItemId::new(), user, item, quantity: Quantity::ONE, ordered: false }
    }

    pub fn id(&self) -> OrderItemId { self.id }
    pub fn user(&self) -> UserId { self.user }
    pub fn item(&self) -> &Item { &self.item }
    pub fn quantity(&self) -> Quantity { self.quantity }
    pub fn is_ordered(&self) -> bool { self.ordered }

    pub fn total_item_price(&self) -> Money { self.item.price().multiply(self.quantity) }
    pub fn total_discount_item_price(&self) -> Option<Money> { self.item.discount_price().map(|d| d.multiply(self.quantity)) }
    pub fn amount_saved(&self) -> Money {
        self.total_discount_item_price().map_or(Money::ZERO, |d| self.total_item_price() - d)
    }

    /// Discount-aware line total.
    pub fn final_price(&self) -> Money { self.total_discount_item_price().unwrap_or_else(|| self.total_item_price()) }
}

/// Coarse lifecycle position derived from the status flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStage { Cart, Placed, BeingDelivered, Received, RefundRequested, Refunded }

#[derive(Clone, Debug)]
pub struct Order {
    pub(crate) id: OrderId,
    pub(crate) user: UserId,
    pub(crate) ref_code: Option<RefCode>,
    pub(crate) items: Vec<OrderItem>,
    pub(crate) start_date: DateTime<Utc>,
    pub(crate) ordered_date: Option<DateTime<Utc>>,
    pub(crate) ordered: bool,
    pub(crate) billing_address: Option<AddressId>,
    pub(crate) shipping_address: Option<AddressId>,
    pub(crate) payment: Option<PaymentId>,
    pub(crate) coupon: Option<Coupon>,
    pub(crate) being_delivered: bool,
    pub(crate) received: bool,
    pub(crate) refund_requested: bool,
    pub(crate) refund_granted: bool,
    pub(crate) events: Vec<DomainEvent>,
}

impl Order {
    /// A fresh, empty cart.
    pub fn open(user: UserId) -> Self {
        let mut order = Self {
            id: OrderId::new(), user, ref_code: None, items: vec![], start_date: Utc::now(), ordered_date: None,
            ordered: false, billing_address: None, shipping_address: None, payment: None, coupon: None,
            being_delivered: false, received: false, refund_requested: false, refund_granted: false, events: vec![],
        };
        order.raise_event(DomainEvent::Order(OrderEvent::Opened { order_id: order.id, user_id: user }));
        order
    }

    pub fn id(&self) -> OrderId { self.id }
    pub fn user(&self) -> UserId { self.user }
    pub fn ref_code(&self) -> Option<&RefCode> { self.ref_code.as_ref() }
    pub fn items(&self) -> &[OrderItem] { &self.items }
    pub fn start_date(&self) -> DateTime<Utc> { self.start_date }
    pub fn ordered_date(&self) -> Option<DateTime<Utc>> { self.ordered_date }
    pub fn is_ordered(&self) -> bool { self.ordered }
    pub fn billing_address(&self) -> Option<AddressId> { self.billing_address }
    pub fn shipping_address(&self) -> Option<AddressId> { self.shipping_address }
    pub fn payment(&self) -> Option<PaymentId> { self.payment }
    pub fn coupon(&self) -> Option<&Coupon> { self.coupon.as_ref() }
    pub fn is_being_delivered(&self) -> bool { self.being_delivered }
    pub fn is_received(&self) -> bool { self.received }
    pub fn is_refund_requested(&self) -> bool { self.refund_requested }
    pub fn is_refund_granted(&self) -> bool { self.refund_granted }

    pub fn stage(&self) -> OrderStage {
        match self {
            Self { refund_granted: true, .. } => OrderStage::Refunded,
            Self { refund_requested: true, .. } => OrderStage::RefundRequested,
            Self { received: true, .. } => OrderStage::Received,
            Self { being_delivered: true, .. } => OrderStage::BeingDelivered,
            Self { ordered: true, .. } => OrderStage::Placed,
            _ => OrderStage::Cart,
        }
    }

    pub fn subtotal(&self) -> Money { self.items.iter().map(OrderItem::final_price).sum() }

    /// Raw coupon amount, not capped by the subtotal.
    pub fn coupon_amount(&self) -> Money { self.coupon.as_ref().map_or(Money::ZERO, Coupon::amount) }

    /// Subtotal minus coupon, floored at zero.
    pub fn total(&self) -> Money { (self.subtotal() - self.coupon_amount()).floor_zero() }

    pub fn apply_coupon(&mut self, coupon: Coupon) -> Result<(), OrderError> {
        self.ensure_open()?;
        self.raise_event(DomainEvent::Order(OrderEvent::CouponApplied { order_id: self.id, code: coupon.code().to_string() }));
        self.coupon = Some(coupon);
        Ok(())
    }

    pub fn set_addresses(&mut self, shipping: AddressId, billing: AddressId) -> Result<(), OrderError> {
        self.ensure_open()?;
        self.shipping_address = Some(shipping);
        self.billing_address = Some(billing);
        Ok(())
    }

    /// Closes the cart after a successful charge.
    pub fn place(&mut self, payment: PaymentId, ref_code: RefCode, at: DateTime<Utc>) -> Result<(), OrderError> {
        self.ensure_open()?;
        if self.items.is_empty() { return Err(OrderError::NoItems); }
        for line in &mut self.items { line.ordered = true; }
        self.ordered = true;
        self.ordered_date = Some(at);
        self.payment = Some(payment);
        self.raise_event(DomainEvent::Order(OrderEvent::Placed { order_id: self.id, ref_code: ref_code.clone(), total: self.total() }));
        self.ref_code = Some(ref_code);
        Ok(())
    }

    pub fn mark_being_delivered(&mut self) -> Result<(), OrderError> {
        self.ensure_placed()?;
        self.being_delivered = true;
        self.raise_event(DomainEvent::Order(OrderEvent::BeingDelivered { order_id: self.id }));
        Ok(())
    }

    pub fn mark_received(&mut self) -> Result<(), OrderError> {
        self.ensure_placed()?;
        self.received = true;
        self.raise_event(DomainEvent::Order(OrderEvent::Received { order_id: self.id }));
        Ok(())
    }

    pub fn request_refund(&mut self) -> Result<(), OrderError> {
        self.ensure_placed()?;
        if self.refund_requested || self.refund_granted { return Err(OrderError::RefundAlreadyRequested); }
        self.refund_requested = true;
        self.raise_event(DomainEvent::Order(OrderEvent::RefundRequested { order_id: self.id }));
        Ok(())
    }

    pub fn grant_refund(&mut self, refund: RefundId) -> Result<(), OrderError> {
        if !self.refund_requested { return Err(OrderError::NoRefundRequested); }
        self.refund_requested = false;
        self.refund_granted = true;
        self.raise_event(DomainEvent::Order(OrderEvent::RefundGranted { order_id: self.id, refund_id: refund }));
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    pub(crate) fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }

    pub(crate) fn ensure_open(&self) -> Result<(), OrderError> {
        if self.ordered { Err(OrderError::AlreadyPlaced) } else { Ok(()) }
    }

    fn ensure_placed(&self) -> Result<(), OrderError> {
        if self.ordered { Ok(()) } else { Err(OrderError::NotPlaced) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("order has no items")]
    NoItems,
    #[error("order has already been placed")]
    AlreadyPlaced,
    #[error("order has not been placed yet")]
    NotPlaced,
    #[error("this item was not in your cart")]
    NotInCart,
    #[error("add a billing address before paying")]
    NoBillingAddress,
    #[error("a refund has already been requested for this order")]
    RefundAlreadyRequested,
    #[error("no refund has been requested for this order")]
    NoRefundRequested,
}
