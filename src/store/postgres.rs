//! PostgreSQL store.
//!
//! Cart and payment writes lock the owning `users` row first, which serializes
//! concurrent requests from the same user. The partial unique index
//! `orders_one_open_per_user` backs up the single-cart rule, and the unique
//! `payments.charge_id` stops a charge from being recorded twice.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::aggregates::{Address, Coupon, Item, Order, OrderItem, Payment, Refund, User, UserProfile};
use crate::domain::value_objects::{
    AddressId, AddressType, Category, Country, CouponId, ItemId, Label, Money, OrderId, OrderItemId, PaymentId,
    Quantity, RefCode, RefundId, Slug, State, UserId,
};
use crate::store::{OrderKey, OrderUpdate, OrderWrite, Page, Store};
use crate::{Result, ShopError};

impl From<sqlx::Error> for ShopError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                let what = db.constraint().unwrap_or("unique constraint");
                return ShopError::Conflict(format!("{what} violated"));
            }
        }
        ShopError::Storage(e.to_string())
    }
}

fn corrupt(what: impl std::fmt::Display) -> ShopError {
    ShopError::Storage(format!("corrupt row: {what}"))
}

fn choice<T>(parse: fn(&str) -> Option<T>, column: &str, code: &str) -> Result<T> {
    parse(code).ok_or_else(|| corrupt(format!("{column} = {code:?}")))
}

fn to_i32(value: usize, column: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| ShopError::Storage(format!("{column} out of range")))
}

// =============================================================================
// Rows
// =============================================================================

const ITEM_COLUMNS: &str = "i.id, i.title, i.price, i.discount_price, i.category, i.label, i.slug, \
    i.description, i.image, i.image2, i.image3, i.image4, i.created_at";

#[derive(FromRow)]
struct ItemRow {
    id: Uuid,
    title: String,
    price: Decimal,
    discount_price: Option<Decimal>,
    category: String,
    label: String,
    slug: String,
    description: String,
    image: String,
    image2: String,
    image3: String,
    image4: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ItemRow> for Item {
    type Error = ShopError;

    fn try_from(r: ItemRow) -> Result<Self> {
        Ok(Item {
            id: ItemId::from_uuid(r.id),
            category: choice(Category::from_code, "items.category", &r.category)?,
            label: choice(Label::from_code, "items.label", &r.label)?,
            slug: Slug::new(r.slug).map_err(corrupt)?,
            title: r.title,
            price: Money::new(r.price),
            discount_price: r.discount_price.map(Money::new),
            description: r.description,
            images: [r.image, r.image2, r.image3, r.image4],
            created_at: r.created_at,
        })
    }
}

#[derive(FromRow)]
struct LineRow {
    line_id: Uuid,
    line_user_id: Uuid,
    order_id: Uuid,
    quantity: i32,
    ordered: bool,
    #[sqlx(flatten)]
    item: ItemRow,
}

const ORDER_SELECT: &str = "SELECT o.id, o.user_id, o.ref_code, o.start_date, o.ordered_date, o.ordered, \
    o.billing_address_id, o.shipping_address_id, o.payment_id, o.coupon_id, \
    c.code AS coupon_code, c.amount AS coupon_amount, \
    o.being_delivered, o.received, o.refund_requested, o.refund_granted \
    FROM orders o LEFT JOIN coupons c ON c.id = o.coupon_id";

#[derive(FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: Uuid,
    ref_code: Option<String>,
    start_date: DateTime<Utc>,
    ordered_date: Option<DateTime<Utc>>,
    ordered: bool,
    billing_address_id: Option<Uuid>,
    shipping_address_id: Option<Uuid>,
    payment_id: Option<Uuid>,
    coupon_id: Option<Uuid>,
    coupon_code: Option<String>,
    coupon_amount: Option<Decimal>,
    being_delivered: bool,
    received: bool,
    refund_requested: bool,
    refund_granted: bool,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Result<Order> {
        let coupon = match (self.coupon_id, self.coupon_code, self.coupon_amount) {
            (Some(id), Some(code), Some(amount)) => Some(Coupon { id: CouponId::from_uuid(id), code, amount: Money::new(amount) }),
            _ => None,
        };
        let ref_code = match self.ref_code {
            Some(code) => Some(RefCode::parse(&code).ok_or_else(|| corrupt(format!("orders.ref_code = {code:?}")))?),
            None => None,
        };
        Ok(Order {
            id: OrderId::from_uuid(self.id),
            user: UserId::from_uuid(self.user_id),
            ref_code,
            items,
            start_date: self.start_date,
            ordered_date: self.ordered_date,
            ordered: self.ordered,
            billing_address: self.billing_address_id.map(AddressId::from_uuid),
            shipping_address: self.shipping_address_id.map(AddressId::from_uuid),
            payment: self.payment_id.map(PaymentId::from_uuid),
            coupon,
            being_delivered: self.being_delivered,
            received: self.received,
            refund_requested: self.refund_requested,
            refund_granted: self.refund_granted,
            events: vec![],
        })
    }
}

#[derive(FromRow)]
struct AddressRow {
    id: Uuid,
    user_id: Uuid,
    street_address: String,
    apartment_address: String,
    country: String,
    state: String,
    zip: String,
    address_type: String,
    is_default: bool,
}

impl TryFrom<AddressRow> for Address {
    type Error = ShopError;

    fn try_from(r: AddressRow) -> Result<Self> {
        Ok(Address {
            id: AddressId::from_uuid(r.id),
            user: UserId::from_uuid(r.user_id),
            country: choice(Country::from_code, "addresses.country", &r.country)?,
            state: choice(State::from_code, "addresses.state", &r.state)?,
            address_type: choice(AddressType::from_code, "addresses.address_type", &r.address_type)?,
            street_address: r.street_address,
            apartment_address: r.apartment_address,
            zip: r.zip,
            default: r.is_default,
        })
    }
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    date_joined: DateTime<Utc>,
}

#[derive(FromRow)]
struct ProfileRow {
    user_id: Uuid,
    provider_customer_id: Option<String>,
    one_click_purchasing: bool,
}

#[derive(FromRow)]
struct CouponRow {
    id: Uuid,
    code: String,
    amount: Decimal,
}

#[derive(FromRow)]
struct PaymentRow {
    id: Uuid,
    charge_id: String,
    user_id: Option<Uuid>,
    amount: Decimal,
    timestamp: DateTime<Utc>,
}

#[derive(FromRow)]
struct RefundRow {
    id: Uuid,
    order_id: Uuid,
    reason: String,
    accepted: bool,
    email: String,
    created_at: DateTime<Utc>,
}

impl From<RefundRow> for Refund {
    fn from(r: RefundRow) -> Self {
        Refund {
            id: RefundId::from_uuid(r.id),
            order: OrderId::from_uuid(r.order_id),
            reason: r.reason,
            accepted: r.accepted,
            email: r.email,
            created_at: r.created_at,
        }
    }
}

// =============================================================================
// Connection-level helpers, shared by pool reads and transactions
// =============================================================================

enum OrderFilter<'a> {
    Id(Uuid),
    RefCode(&'a str),
    OpenFor(Uuid),
    PlacedFor(Uuid),
}

async fn fetch_orders(conn: &mut PgConnection, filter: OrderFilter<'_>, lock: bool) -> Result<Vec<Order>> {
    let (clause, order_by) = match filter {
        OrderFilter::Id(_) => ("o.id = $1", ""),
        OrderFilter::RefCode(_) => ("o.ref_code = $1", ""),
        OrderFilter::OpenFor(_) => ("o.user_id = $1 AND NOT o.ordered", ""),
        OrderFilter::PlacedFor(_) => ("o.user_id = $1 AND o.ordered", " ORDER BY o.ordered_date DESC"),
    };
    let sql = format!("{ORDER_SELECT} WHERE {clause}{order_by}{}", if lock { " FOR UPDATE OF o" } else { "" });
    let query = sqlx::query_as::<_, OrderRow>(&sql);
    let rows = match filter {
        OrderFilter::Id(id) | OrderFilter::OpenFor(id) | OrderFilter::PlacedFor(id) => query.bind(id),
        OrderFilter::RefCode(code) => query.bind(code),
    }
    .fetch_all(&mut *conn)
    .await?;
    if rows.is_empty() {
        return Ok(vec![]);
    }

    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let sql = format!(
        "SELECT oi.id AS line_id, oi.user_id AS line_user_id, oi.order_id, oi.quantity, oi.ordered, {ITEM_COLUMNS} \
         FROM order_items oi JOIN items i ON i.id = oi.item_id \
         WHERE oi.order_id = ANY($1) ORDER BY oi.position"
    );
    let lines = sqlx::query_as::<_, LineRow>(&sql).bind(ids.as_slice()).fetch_all(&mut *conn).await?;

    let mut grouped: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
    for line in lines {
        let quantity = u32::try_from(line.quantity).ok().and_then(Quantity::new)
            .ok_or_else(|| corrupt(format!("order_items.quantity = {}", line.quantity)))?;
        grouped.entry(line.order_id).or_default().push(OrderItem {
            id: OrderItemId::from_uuid(line.line_id),
            user: UserId::from_uuid(line.line_user_id),
            item: Item::try_from(line.item)?,
            quantity,
            ordered: line.ordered,
        });
    }

    rows.into_iter()
        .map(|row| {
            let items = grouped.remove(&row.id).unwrap_or_default();
            row.into_order(items)
        })
        .collect()
}

async fn save_order(conn: &mut PgConnection, order: &Order) -> Result<()> {
    sqlx::query(
        "INSERT INTO orders (id, user_id, ref_code, start_date, ordered_date, ordered, billing_address_id, \
         shipping_address_id, payment_id, coupon_id, being_delivered, received, refund_requested, refund_granted) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
         ON CONFLICT (id) DO UPDATE SET ref_code = EXCLUDED.ref_code, ordered_date = EXCLUDED.ordered_date, \
         ordered = EXCLUDED.ordered, billing_address_id = EXCLUDED.billing_address_id, \
         shipping_address_id = EXCLUDED.shipping_address_id, payment_id = EXCLUDED.payment_id, \
         coupon_id = EXCLUDED.coupon_id, being_delivered = EXCLUDED.being_delivered, received = EXCLUDED.received, \
         refund_requested = EXCLUDED.refund_requested, refund_granted = EXCLUDED.refund_granted",
    )
    .bind(order.id.as_uuid())
    .bind(order.user.as_uuid())
    .bind(order.ref_code.as_ref().map(RefCode::as_str))
    .bind(order.start_date)
    .bind(order.ordered_date)
    .bind(order.ordered)
    .bind(order.billing_address.map(|a| a.as_uuid()))
    .bind(order.shipping_address.map(|a| a.as_uuid()))
    .bind(order.payment.map(|p| p.as_uuid()))
    .bind(order.coupon.as_ref().map(|c| c.id.as_uuid()))
    .bind(order.being_delivered)
    .bind(order.received)
    .bind(order.refund_requested)
    .bind(order.refund_granted)
    .execute(&mut *conn)
    .await?;

    sqlx::query("DELETE FROM order_items WHERE order_id = $1")
        .bind(order.id.as_uuid())
        .execute(&mut *conn)
        .await?;

    for (position, line) in order.items.iter().enumerate() {
        sqlx::query(
            "INSERT INTO order_items (id, order_id, user_id, item_id, quantity, ordered, position) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(line.id.as_uuid())
        .bind(order.id.as_uuid())
        .bind(line.user.as_uuid())
        .bind(line.item.id.as_uuid())
        .bind(to_i32(line.quantity.value() as usize, "order_items.quantity")?)
        .bind(line.ordered)
        .bind(to_i32(position, "order_items.position")?)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn insert_address(conn: &mut PgConnection, address: &Address) -> Result<()> {
    if address.default {
        sqlx::query("UPDATE addresses SET is_default = FALSE WHERE user_id = $1 AND address_type = $2 AND is_default")
            .bind(address.user.as_uuid())
            .bind(address.address_type.code())
            .execute(&mut *conn)
            .await?;
    }
    sqlx::query(
        "INSERT INTO addresses (id, user_id, street_address, apartment_address, country, state, zip, address_type, is_default) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(address.id.as_uuid())
    .bind(address.user.as_uuid())
    .bind(&address.street_address)
    .bind(&address.apartment_address)
    .bind(address.country.code())
    .bind(address.state.code())
    .bind(&address.zip)
    .bind(address.address_type.code())
    .bind(address.default)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_payment(conn: &mut PgConnection, payment: &Payment) -> Result<()> {
    sqlx::query("INSERT INTO payments (id, charge_id, user_id, amount, timestamp) VALUES ($1, $2, $3, $4, $5)")
        .bind(payment.id.as_uuid())
        .bind(&payment.charge_id)
        .bind(payment.user.map(|u| u.as_uuid()))
        .bind(payment.amount.amount())
        .bind(payment.timestamp)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn upsert_refund(conn: &mut PgConnection, refund: &Refund) -> Result<()> {
    sqlx::query(
        "INSERT INTO refunds (id, order_id, reason, accepted, email, created_at) VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (id) DO UPDATE SET accepted = EXCLUDED.accepted",
    )
    .bind(refund.id.as_uuid())
    .bind(refund.order.as_uuid())
    .bind(&refund.reason)
    .bind(refund.accepted)
    .bind(&refund.email)
    .bind(refund.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn lock_user(conn: &mut PgConnection, user: UserId) -> Result<()> {
    sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
        .bind(user.as_uuid())
        .fetch_optional(&mut *conn)
        .await?
        .map(|_| ())
        .ok_or(ShopError::UserNotFound)
}

// =============================================================================
// Store
// =============================================================================

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
    pub fn pool(&self) -> &PgPool { &self.pool }
}

#[async_trait]
impl Store for PgStore {
    async fn register_user(&self, user: &User, profile: &UserProfile) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO users (id, username, email, date_joined) VALUES ($1, $2, $3, $4)")
            .bind(user.id.as_uuid())
            .bind(&user.username)
            .bind(&user.email)
            .bind(user.date_joined)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO user_profiles (user_id, provider_customer_id, one_click_purchasing) VALUES ($1, $2, $3)")
            .bind(profile.user.as_uuid())
            .bind(profile.provider_customer_id.as_deref())
            .bind(profile.one_click_purchasing)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn user(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT id, username, email, date_joined FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| User { id: UserId::from_uuid(r.id), username: r.username, email: r.email, date_joined: r.date_joined }))
    }

    async fn profile(&self, user: UserId) -> Result<Option<UserProfile>> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "SELECT user_id, provider_customer_id, one_click_purchasing FROM user_profiles WHERE user_id = $1",
        )
        .bind(user.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| UserProfile {
            user: UserId::from_uuid(r.user_id),
            provider_customer_id: r.provider_customer_id,
            one_click_purchasing: r.one_click_purchasing,
        }))
    }

    async fn save_profile(&self, profile: &UserProfile) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE user_profiles SET provider_customer_id = $2, one_click_purchasing = $3 WHERE user_id = $1",
        )
        .bind(profile.user.as_uuid())
        .bind(profile.provider_customer_id.as_deref())
        .bind(profile.one_click_purchasing)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(ShopError::UserNotFound);
        }
        Ok(())
    }

    async fn insert_item(&self, item: &Item) -> Result<()> {
        sqlx::query(
            "INSERT INTO items (id, title, price, discount_price, category, label, slug, description, \
             image, image2, image3, image4, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(item.id.as_uuid())
        .bind(&item.title)
        .bind(item.price.amount())
        .bind(item.discount_price.map(|d| d.amount()))
        .bind(item.category.code())
        .bind(item.label.code())
        .bind(item.slug.as_str())
        .bind(&item.description)
        .bind(&item.images[0])
        .bind(&item.images[1])
        .bind(&item.images[2])
        .bind(&item.images[3])
        .bind(item.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn item_by_slug(&self, slug: &Slug) -> Result<Option<Item>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items i WHERE i.slug = $1");
        let row = sqlx::query_as::<_, ItemRow>(&sql)
            .bind(slug.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Item::try_from).transpose()
    }

    async fn list_items(&self, page: Page) -> Result<Vec<Item>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items i ORDER BY i.created_at DESC, i.id DESC LIMIT $1 OFFSET $2");
        let rows = sqlx::query_as::<_, ItemRow>(&sql)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Item::try_from).collect()
    }

    async fn insert_coupon(&self, coupon: &Coupon) -> Result<()> {
        sqlx::query("INSERT INTO coupons (id, code, amount) VALUES ($1, $2, $3)")
            .bind(coupon.id.as_uuid())
            .bind(&coupon.code)
            .bind(coupon.amount.amount())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn coupon_by_code(&self, code: &str) -> Result<Option<Coupon>> {
        let row = sqlx::query_as::<_, CouponRow>("SELECT id, code, amount FROM coupons WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Coupon { id: CouponId::from_uuid(r.id), code: r.code, amount: Money::new(r.amount) }))
    }

    async fn addresses(&self, user: UserId) -> Result<Vec<Address>> {
        let rows = sqlx::query_as::<_, AddressRow>(
            "SELECT id, user_id, street_address, apartment_address, country, state, zip, address_type, is_default \
             FROM addresses WHERE user_id = $1 ORDER BY address_type, is_default DESC",
        )
        .bind(user.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Address::try_from).collect()
    }

    async fn default_address(&self, user: UserId, kind: AddressType) -> Result<Option<Address>> {
        let row = sqlx::query_as::<_, AddressRow>(
            "SELECT id, user_id, street_address, apartment_address, country, state, zip, address_type, is_default \
             FROM addresses WHERE user_id = $1 AND address_type = $2 AND is_default",
        )
        .bind(user.as_uuid())
        .bind(kind.code())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Address::try_from).transpose()
    }

    async fn open_order(&self, user: UserId) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        Ok(fetch_orders(&mut conn, OrderFilter::OpenFor(user.as_uuid()), false).await?.into_iter().next())
    }

    async fn update_open_order<F, R>(&self, user: UserId, f: F) -> Result<R>
    where
        F: FnOnce(Option<Order>) -> Result<(OrderWrite, R)> + Send,
        R: Send,
    {
        let mut tx = self.pool.begin().await?;
        lock_user(&mut tx, user).await?;
        let open = fetch_orders(&mut tx, OrderFilter::OpenFor(user.as_uuid()), true).await?.into_iter().next();
        let open_id = open.as_ref().map(Order::id);

        let (write, out) = f(open)?;
        match write {
            OrderWrite::Delete => {
                if let Some(id) = open_id {
                    sqlx::query("DELETE FROM orders WHERE id = $1").bind(id.as_uuid()).execute(&mut *tx).await?;
                }
            }
            OrderWrite::Save(order) => save_order(&mut tx, &order).await?,
            OrderWrite::Checkout { order, new_addresses } => {
                for address in &new_addresses {
                    insert_address(&mut tx, address).await?;
                }
                save_order(&mut tx, &order).await?;
            }
            OrderWrite::Place { order, payment } => {
                insert_payment(&mut tx, &payment).await?;
                save_order(&mut tx, &order).await?;
            }
        }
        tx.commit().await?;
        Ok(out)
    }

    async fn order(&self, key: &OrderKey) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        let filter = match key {
            OrderKey::Id(id) => OrderFilter::Id(id.as_uuid()),
            OrderKey::RefCode(code) => OrderFilter::RefCode(code.as_str()),
        };
        Ok(fetch_orders(&mut conn, filter, false).await?.into_iter().next())
    }

    async fn placed_orders(&self, user: UserId) -> Result<Vec<Order>> {
        let mut conn = self.pool.acquire().await?;
        fetch_orders(&mut conn, OrderFilter::PlacedFor(user.as_uuid()), false).await
    }

    async fn update_order<F, R>(&self, key: OrderKey, f: F) -> Result<R>
    where
        F: FnOnce(Order) -> Result<(OrderUpdate, R)> + Send,
        R: Send,
    {
        let mut tx = self.pool.begin().await?;
        let filter = match &key {
            OrderKey::Id(id) => OrderFilter::Id(id.as_uuid()),
            OrderKey::RefCode(code) => OrderFilter::RefCode(code.as_str()),
        };
        let order = fetch_orders(&mut tx, filter, true).await?.into_iter().next().ok_or(ShopError::OrderNotFound)?;

        let (update, out) = f(order)?;
        if let Some(refund) = &update.refund {
            upsert_refund(&mut tx, refund).await?;
        }
        save_order(&mut tx, &update.order).await?;
        tx.commit().await?;
        Ok(out)
    }

    async fn refund(&self, id: RefundId) -> Result<Option<Refund>> {
        let row = sqlx::query_as::<_, RefundRow>(
            "SELECT id, order_id, reason, accepted, email, created_at FROM refunds WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Refund::from))
    }

    async fn refunds_for_order(&self, order: OrderId) -> Result<Vec<Refund>> {
        let rows = sqlx::query_as::<_, RefundRow>(
            "SELECT id, order_id, reason, accepted, email, created_at FROM refunds WHERE order_id = $1 ORDER BY created_at",
        )
        .bind(order.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Refund::from).collect())
    }

    async fn payments(&self, user: UserId) -> Result<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(
            "SELECT id, charge_id, user_id, amount, timestamp FROM payments WHERE user_id = $1 ORDER BY timestamp DESC",
        )
        .bind(user.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Payment {
                id: PaymentId::from_uuid(r.id),
                charge_id: r.charge_id,
                user: r.user_id.map(UserId::from_uuid),
                amount: Money::new(r.amount),
                timestamp: r.timestamp,
            })
            .collect())
    }
}
