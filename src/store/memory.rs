//! In-process store. One mutex over all tables makes every call a serializable transaction.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::aggregates::{Address, Coupon, Item, Order, Payment, Refund, User, UserProfile};
use crate::domain::value_objects::{AddressId, AddressType, CouponId, ItemId, OrderId, PaymentId, RefundId, Slug, UserId};
use crate::store::{OrderKey, OrderUpdate, OrderWrite, Page, Store};
use crate::{Result, ShopError};

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    profiles: HashMap<UserId, UserProfile>,
    items: HashMap<ItemId, Item>,
    coupons: HashMap<CouponId, Coupon>,
    addresses: HashMap<AddressId, Address>,
    orders: HashMap<OrderId, Order>,
    payments: HashMap<PaymentId, Payment>,
    refunds: HashMap<RefundId, Refund>,
}

impl Tables {
    fn open_order_id(&self, user: UserId) -> Option<OrderId> {
        self.orders.values().find(|o| o.user == user && !o.ordered).map(|o| o.id)
    }

    fn find_order(&self, key: &OrderKey) -> Option<&Order> {
        match key {
            OrderKey::Id(id) => self.orders.get(id),
            OrderKey::RefCode(code) => self.orders.values().find(|o| o.ref_code.as_ref() == Some(code)),
        }
    }

    fn check_order(&self, order: &Order) -> Result<()> {
        if !order.ordered {
            if let Some(open) = self.open_order_id(order.user).filter(|id| *id != order.id) {
                return Err(ShopError::Conflict(format!("user already has open order {open}")));
            }
        }
        if let Some(code) = &order.ref_code {
            if self.orders.values().any(|o| o.id != order.id && o.ref_code.as_ref() == Some(code)) {
                return Err(ShopError::Conflict(format!("ref code {code} already in use")));
            }
        }
        Ok(())
    }

    fn save_order(&mut self, mut order: Order) -> Result<()> {
        self.check_order(&order)?;
        order.events.clear();
        self.orders.insert(order.id, order);
        Ok(())
    }

    fn insert_address(&mut self, address: Address) {
        if address.default {
            for other in self.addresses.values_mut() {
                if other.user == address.user && other.address_type == address.address_type {
                    other.default = false;
                }
            }
        }
        self.addresses.insert(address.id, address);
    }

    fn insert_payment(&mut self, payment: Payment) -> Result<()> {
        if self.payments.values().any(|p| p.charge_id == payment.charge_id) {
            return Err(ShopError::Conflict(format!("charge {} already recorded", payment.charge_id)));
        }
        self.payments.insert(payment.id, payment);
        Ok(())
    }

    fn upsert_refund(&mut self, refund: Refund) -> Result<()> {
        if self.refunds.values().any(|r| r.order == refund.order && r.id != refund.id) {
            return Err(ShopError::Conflict("a refund already exists for this order".to_string()));
        }
        self.refunds.insert(refund.id, refund);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl Store for MemoryStore {
    async fn register_user(&self, user: &User, profile: &UserProfile) -> Result<()> {
        let mut t = self.tables.lock().await;
        if t.users.values().any(|u| u.username == user.username) {
            return Err(ShopError::Conflict(format!("username {} is taken", user.username)));
        }
        t.users.insert(user.id, user.clone());
        t.profiles.insert(user.id, profile.clone());
        Ok(())
    }

    async fn user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn profile(&self, user: UserId) -> Result<Option<UserProfile>> {
        Ok(self.tables.lock().await.profiles.get(&user).cloned())
    }

    async fn save_profile(&self, profile: &UserProfile) -> Result<()> {
        let mut t = self.tables.lock().await;
        match t.profiles.get_mut(&profile.user) {
            Some(existing) => { *existing = profile.clone(); Ok(()) }
            None => Err(ShopError::UserNotFound),
        }
    }

    async fn insert_item(&self, item: &Item) -> Result<()> {
        let mut t = self.tables.lock().await;
        if t.items.values().any(|i| i.slug == item.slug) {
            return Err(ShopError::Conflict(format!("slug {} already exists", item.slug)));
        }
        t.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn item_by_slug(&self, slug: &Slug) -> Result<Option<Item>> {
        Ok(self.tables.lock().await.items.values().find(|i| &i.slug == slug).cloned())
    }

    async fn list_items(&self, page: Page) -> Result<Vec<Item>> {
        let t = self.tables.lock().await;
        let mut items: Vec<Item> = t.items.values().cloned().collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        let skip = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        Ok(items.into_iter().skip(skip).take(page.per_page as usize).collect())
    }

    async fn insert_coupon(&self, coupon: &Coupon) -> Result<()> {
        let mut t = self.tables.lock().await;
        if t.coupons.values().any(|c| c.code == coupon.code) {
            return Err(ShopError::Conflict(format!("coupon {} already exists", coupon.code)));
        }
        t.coupons.insert(coupon.id, coupon.clone());
        Ok(())
    }

    async fn coupon_by_code(&self, code: &str) -> Result<Option<Coupon>> {
        Ok(self.tables.lock().await.coupons.values().find(|c| c.code == code).cloned())
    }

    async fn addresses(&self, user: UserId) -> Result<Vec<Address>> {
        let t = self.tables.lock().await;
        Ok(t.addresses.values().filter(|a| a.user == user).cloned().collect())
    }

    async fn default_address(&self, user: UserId, kind: AddressType) -> Result<Option<Address>> {
        let t = self.tables.lock().await;
        Ok(t.addresses.values().find(|a| a.user == user && a.address_type == kind && a.default).cloned())
    }

    async fn open_order(&self, user: UserId) -> Result<Option<Order>> {
        let t = self.tables.lock().await;
        Ok(t.open_order_id(user).and_then(|id| t.orders.get(&id)).cloned())
    }

    async fn update_open_order<F, R>(&self, user: UserId, f: F) -> Result<R>
    where
        F: FnOnce(Option<Order>) -> Result<(OrderWrite, R)> + Send,
        R: Send,
    {
        let mut t = self.tables.lock().await;
        if !t.users.contains_key(&user) {
            return Err(ShopError::UserNotFound);
        }
        let open_id = t.open_order_id(user);
        let open = open_id.and_then(|id| t.orders.get(&id)).cloned();
        let (write, out) = f(open)?;
        match write {
            OrderWrite::Delete => {
                if let Some(id) = open_id {
                    t.orders.remove(&id);
                }
            }
            OrderWrite::Save(order) => t.save_order(order)?,
            OrderWrite::Checkout { order, new_addresses } => {
                t.check_order(&order)?;
                for address in new_addresses {
                    t.insert_address(address);
                }
                t.save_order(order)?;
            }
            OrderWrite::Place { order, payment } => {
                t.check_order(&order)?;
                t.insert_payment(payment)?;
                t.save_order(order)?;
            }
        }
        Ok(out)
    }

    async fn order(&self, key: &OrderKey) -> Result<Option<Order>> {
        Ok(self.tables.lock().await.find_order(key).cloned())
    }

    async fn placed_orders(&self, user: UserId) -> Result<Vec<Order>> {
        let t = self.tables.lock().await;
        let mut orders: Vec<Order> = t.orders.values().filter(|o| o.user == user && o.ordered).cloned().collect();
        orders.sort_by(|a, b| b.ordered_date.cmp(&a.ordered_date));
        Ok(orders)
    }

    async fn update_order<F, R>(&self, key: OrderKey, f: F) -> Result<R>
    where
        F: FnOnce(Order) -> Result<(OrderUpdate, R)> + Send,
        R: Send,
    {
        let mut t = self.tables.lock().await;
        let order = t.find_order(&key).cloned().ok_or(ShopError::OrderNotFound)?;
        let (update, out) = f(order)?;
        t.check_order(&update.order)?;
        if let Some(refund) = update.refund {
            t.upsert_refund(refund)?;
        }
        t.save_order(update.order)?;
        Ok(out)
    }

    async fn refund(&self, id: RefundId) -> Result<Option<Refund>> {
        Ok(self.tables.lock().await.refunds.get(&id).cloned())
    }

    async fn refunds_for_order(&self, order: OrderId) -> Result<Vec<Refund>> {
        let t = self.tables.lock().await;
        Ok(t.refunds.values().filter(|r| r.order == order).cloned().collect())
    }

    async fn payments(&self, user: UserId) -> Result<Vec<Payment>> {
        let t = self.tables.lock().await;
        let mut payments: Vec<Payment> = t.payments.values().filter(|p| p.user == Some(user)).cloned().collect();
        payments.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(payments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::{Category, Money, State};

    async fn store_with_user() -> (MemoryStore, UserId) {
        let store = MemoryStore::new();
        let reg = User::register("meera", "meera@example.com");
        store.register_user(&reg.user, &reg.profile).await.unwrap();
        (store, reg.user.id())
    }

    #[tokio::test]
    async fn test_second_open_order_is_a_conflict() {
        let (store, user) = store_with_user().await;
        store.update_open_order(user, |_| Ok((OrderWrite::Save(Order::open(user)), ()))).await.unwrap();
        let err = store.update_open_order(user, |_| Ok((OrderWrite::Save(Order::open(user)), ()))).await.unwrap_err();
        assert!(matches!(err, ShopError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_closure_error_leaves_state_untouched() {
        let (store, user) = store_with_user().await;
        let err = store
            .update_open_order(user, |_| -> Result<(OrderWrite, ())> { Err(ShopError::NoOpenOrder) })
            .await
            .unwrap_err();
        assert!(matches!(err, ShopError::NoOpenOrder));
        assert!(store.open_order(user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_new_default_address_replaces_old_default() {
        let (store, user) = store_with_user().await;
        let first = Address::new(user, "1 Park St", State::Delhi, AddressType::Shipping).make_default();
        let second = Address::new(user, "2 Park St", State::Punjab, AddressType::Shipping).make_default();
        let mut order = Order::open(user);
        order.set_addresses(first.id(), first.id()).unwrap();
        store
            .update_open_order(user, move |_| Ok((OrderWrite::Checkout { order, new_addresses: vec![first, second] }, ())))
            .await
            .unwrap();
        let default = store.default_address(user, AddressType::Shipping).await.unwrap().unwrap();
        assert_eq!(default.street_address(), "2 Park St");
        assert_eq!(store.addresses(user).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_slug_rejected() {
        let store = MemoryStore::new();
        let slug = Slug::new("tabla-set").unwrap();
        let item = Item::create("Tabla", slug.clone(), Money::from_cents(100), Category::Tabla).unwrap();
        store.insert_item(&item).await.unwrap();
        let dup = Item::create("Tabla 2", slug, Money::from_cents(100), Category::Tabla).unwrap();
        assert!(matches!(store.insert_item(&dup).await, Err(ShopError::Conflict(_))));
    }
}
