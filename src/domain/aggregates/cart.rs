//! Cart operations on the open order

use crate::domain::aggregates::{Item, Order, OrderError, OrderItem};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::{Quantity, Slug};

/// What happened to a cart line after a removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CartChange {
    /// The line is still there with this many units.
    Decremented(Quantity),
    /// The line is gone.
    LineRemoved,
}

impl Order {
    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    pub fn line(&self, slug: &Slug) -> Option<&OrderItem> { self.items.iter().find(|l| l.item.slug() == slug) }

    /// Adds one unit, merging into an existing line for the same item.
    pub fn add_item(&mut self, item: &Item) -> Result<Quantity, OrderError> {
        self.ensure_open()?;
        let quantity = match self.items.iter_mut().find(|l| l.item.id() == item.id()) {
            Some(existing) => {
                existing.quantity = existing.quantity.increment();
                existing.quantity
            }
            None => {
                self.items.push(OrderItem::new(self.user, item.clone()));
                Quantity::ONE
            }
        };
        self.raise_event(DomainEvent::Order(OrderEvent::ItemAdded { order_id: self.id, item_id: item.id(), quantity: quantity.value() }));
        Ok(quantity)
    }

    /// Takes one unit away; the line disappears with its last unit.
    pub fn remove_single_item(&mut self, slug: &Slug) -> Result<CartChange, OrderError> {
        self.ensure_open()?;
        let pos = self.position(slug)?;
        let line = &mut self.items[pos];
        let item_id = line.item.id();
        let change = match line.quantity.decrement() {
            Some(q) => { line.quantity = q; CartChange::Decremented(q) }
            None => { self.items.remove(pos); CartChange::LineRemoved }
        };
        let remaining = match change { CartChange::Decremented(q) => q.value(), CartChange::LineRemoved => 0 };
        self.raise_event(DomainEvent::Order(OrderEvent::ItemRemoved { order_id: self.id, item_id, remaining }));
        Ok(change)
    }

    /// Drops the whole line regardless of quantity.
    pub fn remove_item(&mut self, slug: &Slug) -> Result<CartChange, OrderError> {
        self.ensure_open()?;
        let pos = self.position(slug)?;
        let line = self.items.remove(pos);
        self.raise_event(DomainEvent::Order(OrderEvent::ItemRemoved { order_id: self.id, item_id: line.item.id(), remaining: 0 }));
        Ok(CartChange::LineRemoved)
    }

    fn position(&self, slug: &Slug) -> Result<usize, OrderError> {
        self.items.iter().position(|l| l.item.slug() == slug).ok_or(OrderError::NotInCart)
    }
}
