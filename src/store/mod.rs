//! Persistence seam.
//!
//! Every state change that has to be serialized per user goes through a
//! closure-taking method: the store opens a transaction, locks the rows the
//! change depends on, hands the current aggregate to the closure and applies
//! the returned write before committing. A closure error rolls everything back.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;

use crate::domain::aggregates::{Address, Coupon, Item, Order, Payment, Refund, User, UserProfile};
use crate::domain::value_objects::{AddressType, OrderId, RefCode, RefundId, Slug, UserId};
use crate::Result;

/// What to do with the open order once a cart closure returns.
#[derive(Debug)]
pub enum OrderWrite {
    /// Delete the open order that was handed to the closure.
    Delete,
    Save(Order),
    /// Persist newly entered addresses, then the order that points at them.
    Checkout { order: Order, new_addresses: Vec<Address> },
    /// Record the payment and persist the now-placed order.
    Place { order: Order, payment: Payment },
}

/// Result of a closure over a placed order.
#[derive(Debug)]
pub struct OrderUpdate {
    pub order: Order,
    /// Inserted, or updated when it already exists.
    pub refund: Option<Refund>,
}

#[derive(Debug, Clone)]
pub enum OrderKey {
    Id(OrderId),
    RefCode(RefCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub per_page: u32,
}

impl Page {
    pub fn new(number: Option<u32>, per_page: Option<u32>) -> Self {
        Self { number: number.unwrap_or(1).max(1), per_page: per_page.unwrap_or(20).clamp(1, 100) }
    }

    pub fn limit(&self) -> i64 { i64::from(self.per_page) }
    pub fn offset(&self) -> i64 { i64::from(self.number - 1) * i64::from(self.per_page) }
}

impl Default for Page {
    fn default() -> Self { Self::new(None, None) }
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Inserts the user and its profile atomically.
    async fn register_user(&self, user: &User, profile: &UserProfile) -> Result<()>;
    async fn user(&self, id: UserId) -> Result<Option<User>>;
    async fn profile(&self, user: UserId) -> Result<Option<UserProfile>>;
    async fn save_profile(&self, profile: &UserProfile) -> Result<()>;

    async fn insert_item(&self, item: &Item) -> Result<()>;
    async fn item_by_slug(&self, slug: &Slug) -> Result<Option<Item>>;
    /// Newest first.
    async fn list_items(&self, page: Page) -> Result<Vec<Item>>;

    async fn insert_coupon(&self, coupon: &Coupon) -> Result<()>;
    async fn coupon_by_code(&self, code: &str) -> Result<Option<Coupon>>;

    async fn addresses(&self, user: UserId) -> Result<Vec<Address>>;
    async fn default_address(&self, user: UserId, kind: AddressType) -> Result<Option<Address>>;

    async fn open_order(&self, user: UserId) -> Result<Option<Order>>;

    /// Runs `f` on the user's open order (if any) with the user locked.
    async fn update_open_order<F, R>(&self, user: UserId, f: F) -> Result<R>
    where
        F: FnOnce(Option<Order>) -> Result<(OrderWrite, R)> + Send,
        R: Send;

    async fn order(&self, key: &OrderKey) -> Result<Option<Order>>;
    /// Placed orders, newest first.
    async fn placed_orders(&self, user: UserId) -> Result<Vec<Order>>;

    /// Runs `f` on a locked order; `OrderNotFound` when the key matches nothing.
    async fn update_order<F, R>(&self, key: OrderKey, f: F) -> Result<R>
    where
        F: FnOnce(Order) -> Result<(OrderUpdate, R)> + Send,
        R: Send;

    async fn refund(&self, id: RefundId) -> Result<Option<Refund>>;
    async fn refunds_for_order(&self, order: OrderId) -> Result<Vec<Refund>>;
    async fn payments(&self, user: UserId) -> Result<Vec<Payment>>;
}
