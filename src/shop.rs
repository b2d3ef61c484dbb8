//! Storefront service.
//!
//! One method per request-level operation. Domain rules live on the
//! aggregates; this layer resolves inputs, runs the aggregate change inside a
//! store transaction, talks to the payment provider and publishes the events
//! the aggregates raised.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};
use validator::{Validate, ValidationErrors};

use crate::domain::aggregates::{Address, CartChange, Coupon, Item, Order, OrderError, OrderStage, Payment, Refund, User};
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::{AddressType, Money, OrderId, PaymentOption, RefCode, RefundId, Slug, UserId};
use crate::forms::{
    field_error, BillingChoice, CheckoutForm, CouponForm, PaymentForm, PaymentSource, RefundForm, RegistrationForm,
    ShippingChoice,
};
use crate::payments::{ChargeRequest, ChargeSource, GatewayError, PaymentGateway};
use crate::store::{OrderKey, OrderUpdate, OrderWrite, Page, Store};
use crate::{Result, ShopError};

// =============================================================================
// Event publishing
// =============================================================================

/// Publishes domain events to NATS when a client is configured.
///
/// Publishing is best effort: the state change has already been committed,
/// so a failure is logged and dropped.
#[derive(Clone, Default)]
pub struct EventPublisher {
    client: Option<async_nats::Client>,
}

impl EventPublisher {
    pub fn new(client: Option<async_nats::Client>) -> Self { Self { client } }

    pub fn disabled() -> Self { Self::default() }

    pub async fn publish(&self, events: Vec<DomainEvent>) {
        let Some(client) = &self.client else { return };
        for event in events {
            let payload = match serde_json::to_vec(&event) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(subject = event.subject(), error = %e, "failed to encode event");
                    continue;
                }
            };
            if let Err(e) = client.publish(event.subject().to_string(), payload.into()).await {
                warn!(subject = event.subject(), error = %e, "failed to publish event");
            }
        }
    }
}

// =============================================================================
// Views
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderLine {
    pub slug: String,
    pub title: String,
    pub quantity: u32,
    pub price: Money,
    pub discount_price: Option<Money>,
    pub total_item_price: Money,
    pub total_discount_item_price: Option<Money>,
    pub amount_saved: Money,
    pub final_price: Money,
}

/// Priced view of an order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderSummary {
    pub order_id: OrderId,
    pub ref_code: Option<RefCode>,
    pub stage: OrderStage,
    pub lines: Vec<OrderLine>,
    pub subtotal: Money,
    pub coupon: Option<String>,
    pub discount: Money,
    pub total: Money,
}

impl From<&Order> for OrderSummary {
    fn from(order: &Order) -> Self {
        let lines = order
            .items()
            .iter()
            .map(|line| OrderLine {
                slug: line.item().slug().to_string(),
                title: line.item().title().to_string(),
                quantity: line.quantity().value(),
                price: line.item().price(),
                discount_price: line.item().discount_price(),
                total_item_price: line.total_item_price(),
                total_discount_item_price: line.total_discount_item_price(),
                amount_saved: line.amount_saved(),
                final_price: line.final_price(),
            })
            .collect();
        Self {
            order_id: order.id(),
            ref_code: order.ref_code().cloned(),
            stage: order.stage(),
            lines,
            subtotal: order.subtotal(),
            coupon: order.coupon().map(|c| c.code().to_string()),
            discount: order.coupon_amount(),
            total: order.total(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutOutcome {
    pub order_id: OrderId,
    pub payment_option: PaymentOption,
    /// Where the client goes to pay.
    pub next: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receipt {
    pub order_id: OrderId,
    pub ref_code: RefCode,
    pub charge_id: String,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartUpdate {
    /// Units of the item left in the cart; zero once its line is gone.
    pub quantity: u32,
    /// False once the last line is removed and the cart deleted.
    pub cart_open: bool,
}

fn missing_default(field: &'static str) -> ShopError {
    let mut errors = ValidationErrors::new();
    errors.add(field, field_error("no_default", "No default address available."));
    ShopError::Validation(errors)
}

// =============================================================================
// Service
// =============================================================================

pub struct Shop<S, G> {
    store: Arc<S>,
    gateway: Arc<G>,
    events: EventPublisher,
}

impl<S: Store, G: PaymentGateway> Shop<S, G> {
    pub fn new(store: Arc<S>, gateway: Arc<G>, events: EventPublisher) -> Self {
        Self { store, gateway, events }
    }

    pub fn store(&self) -> &S { &self.store }

    // -------------------------------------------------------------------------
    // Users and catalog
    // -------------------------------------------------------------------------

    /// Creates the user and its blank profile in one transaction.
    pub async fn register_user(&self, form: &RegistrationForm) -> Result<User> {
        form.validate()?;
        let registration = User::register(form.username.trim(), form.email.trim());
        self.store.register_user(&registration.user, &registration.profile).await?;
        info!(user_id = %registration.user.id(), username = registration.user.username(), "user registered");
        self.events.publish(registration.events).await;
        Ok(registration.user)
    }

    pub async fn add_item(&self, item: Item) -> Result<Item> {
        self.store.insert_item(&item).await?;
        info!(item_id = %item.id(), slug = %item.slug(), "item added to catalog");
        Ok(item)
    }

    pub async fn add_coupon(&self, coupon: Coupon) -> Result<Coupon> {
        self.store.insert_coupon(&coupon).await?;
        info!(code = coupon.code(), amount = %coupon.amount(), "coupon created");
        Ok(coupon)
    }

    pub async fn catalog(&self, page: Page) -> Result<Vec<Item>> {
        self.store.list_items(page).await
    }

    pub async fn item(&self, slug: &str) -> Result<Item> {
        let not_found = || ShopError::ItemNotFound(slug.to_string());
        let slug = Slug::new(slug).map_err(|_| not_found())?;
        self.store.item_by_slug(&slug).await?.ok_or_else(not_found)
    }

    // -------------------------------------------------------------------------
    // Cart
    // -------------------------------------------------------------------------

    /// Adds one unit of the item, opening a cart if the user has none.
    pub async fn add_to_cart(&self, user: UserId, slug: &str) -> Result<CartUpdate> {
        let item = self.item(slug).await?;
        let (quantity, events) = self
            .store
            .update_open_order(user, move |open| {
                let mut order = open.unwrap_or_else(|| Order::open(user));
                let quantity = order.add_item(&item)?;
                let events = order.take_events();
                Ok((OrderWrite::Save(order), (quantity, events)))
            })
            .await?;
        info!(user_id = %user, slug, quantity = quantity.value(), "item added to cart");
        self.events.publish(events).await;
        Ok(CartUpdate { quantity: quantity.value(), cart_open: true })
    }

    /// Takes one unit of the item out of the cart.
    pub async fn remove_single_from_cart(&self, user: UserId, slug: &str) -> Result<CartUpdate> {
        self.remove(user, slug, false).await
    }

    /// Drops the item's whole line from the cart.
    pub async fn remove_from_cart(&self, user: UserId, slug: &str) -> Result<CartUpdate> {
        self.remove(user, slug, true).await
    }

    async fn remove(&self, user: UserId, slug: &str, whole_line: bool) -> Result<CartUpdate> {
        let item = self.item(slug).await?;
        let result = self
            .store
            .update_open_order(user, move |open| {
                let mut order = open.ok_or(ShopError::NoOpenOrder)?;
                let change = if whole_line {
                    order.remove_item(item.slug())?
                } else {
                    order.remove_single_item(item.slug())?
                };
                let events = order.take_events();
                let cart_open = !order.is_empty();
                let write = if cart_open { OrderWrite::Save(order) } else { OrderWrite::Delete };
                Ok((write, (change, cart_open, events)))
            })
            .await;
        let (change, cart_open, events) = result.inspect_err(|e| warn!(user_id = %user, slug, error = %e, "cart removal rejected"))?;

        let quantity = match change {
            CartChange::Decremented(q) => q.value(),
            CartChange::LineRemoved => 0,
        };
        info!(user_id = %user, slug, quantity, cart_open, "item removed from cart");
        self.events.publish(events).await;
        Ok(CartUpdate { quantity, cart_open })
    }

    pub async fn order_summary(&self, user: UserId) -> Result<OrderSummary> {
        let order = self.store.open_order(user).await?.ok_or(ShopError::NoOpenOrder)?;
        Ok(OrderSummary::from(&order))
    }

    // -------------------------------------------------------------------------
    // Checkout
    // -------------------------------------------------------------------------

    /// Validates the checkout form and attaches shipping and billing
    /// addresses to the open order. Nothing is written when any part fails.
    pub async fn checkout(&self, user: UserId, form: &CheckoutForm) -> Result<CheckoutOutcome> {
        let submission = form.clean().inspect_err(|_| warn!(user_id = %user, "checkout form invalid"))?;

        let (shipping, new_shipping) = match submission.shipping {
            ShippingChoice::UseDefault => (self.default_address(user, AddressType::Shipping, "use_default_shipping").await?, false),
            ShippingChoice::Enter { draft, set_default } => {
                (Address::from_draft(user, draft, AddressType::Shipping, set_default), true)
            }
        };
        let (billing, new_billing) = match submission.billing {
            BillingChoice::SameAsShipping => (shipping.copy_as(AddressType::Billing), true),
            BillingChoice::UseDefault => (self.default_address(user, AddressType::Billing, "use_default_billing").await?, false),
            BillingChoice::Enter { draft, set_default } => {
                (Address::from_draft(user, draft, AddressType::Billing, set_default), true)
            }
        };

        let (shipping_id, billing_id) = (shipping.id(), billing.id());
        let new_addresses: Vec<Address> = [(shipping, new_shipping), (billing, new_billing)]
            .into_iter()
            .filter_map(|(address, is_new)| is_new.then_some(address))
            .collect();

        let order_id = self
            .store
            .update_open_order(user, move |open| {
                let mut order = open.ok_or(ShopError::NoOpenOrder)?;
                if order.is_empty() {
                    return Err(OrderError::NoItems.into());
                }
                order.set_addresses(shipping_id, billing_id)?;
                let id = order.id();
                Ok((OrderWrite::Checkout { order, new_addresses }, id))
            })
            .await?;

        let payment_option = submission.payment_option;
        info!(user_id = %user, order_id = %order_id, payment_option = payment_option.code(), "checkout saved");
        Ok(CheckoutOutcome { order_id, payment_option, next: format!("/payment/{}", payment_option.path()) })
    }

    async fn default_address(&self, user: UserId, kind: AddressType, field: &'static str) -> Result<Address> {
        self.store.default_address(user, kind).await?.ok_or_else(|| missing_default(field))
    }

    pub async fn addresses(&self, user: UserId) -> Result<Vec<Address>> {
        self.store.addresses(user).await
    }

    /// Attaches a coupon to the open order, replacing any earlier one.
    pub async fn apply_coupon(&self, user: UserId, form: &CouponForm) -> Result<OrderSummary> {
        let code = form.clean()?;
        let Some(coupon) = self.store.coupon_by_code(&code).await? else {
            warn!(user_id = %user, code = %code, "coupon does not exist");
            return Err(ShopError::CouponNotFound(code));
        };
        let (summary, events) = self
            .store
            .update_open_order(user, move |open| {
                let mut order = open.ok_or(ShopError::NoOpenOrder)?;
                order.apply_coupon(coupon)?;
                let summary = OrderSummary::from(&order);
                let events = order.take_events();
                Ok((OrderWrite::Save(order), (summary, events)))
            })
            .await?;
        info!(user_id = %user, order_id = %summary.order_id, code = %code, total = %summary.total, "coupon applied");
        self.events.publish(events).await;
        Ok(summary)
    }

    // -------------------------------------------------------------------------
    // Payment
    // -------------------------------------------------------------------------

    /// Charges the open order's total and places the order.
    ///
    /// The charge carries an idempotency key built from the order id, the
    /// amount and the card or saved customer being charged, so a repeated
    /// submission cannot charge twice while a retry with another card gets a
    /// fresh attempt. After the charge the open order is locked again and must
    /// still be the same order with the same total. If it cannot be placed the
    /// charge is refunded.
    pub async fn capture_payment(&self, user: UserId, option: PaymentOption, form: &PaymentForm) -> Result<Receipt> {
        if option != PaymentOption::Stripe {
            warn!(user_id = %user, option = option.code(), "payment option has no gateway");
            return Err(ShopError::UnsupportedPaymentOption(option));
        }
        let source = form.clean()?;

        let order = self.store.open_order(user).await?.ok_or(ShopError::NoOpenOrder)?;
        if order.is_empty() {
            return Err(OrderError::NoItems.into());
        }
        if order.billing_address().is_none() {
            return Err(OrderError::NoBillingAddress.into());
        }
        let account = self.store.user(user).await?.ok_or(ShopError::UserNotFound)?;
        let mut profile = self.store.profile(user).await?.ok_or(ShopError::UserNotFound)?;

        // (what is charged, what distinguishes this attempt, customer to save on success)
        let (charge_source, attempt, save_customer) = match source {
            PaymentSource::SavedCustomer => {
                let customer = profile.saved_customer().ok_or_else(|| {
                    let mut errors = ValidationErrors::new();
                    errors.add("use_default", field_error("no_saved_card", "No saved card on file."));
                    ShopError::Validation(errors)
                })?;
                (ChargeSource::Customer(customer.to_string()), customer.to_string(), None)
            }
            PaymentSource::Token { token, save: true } => {
                let customer = match profile.provider_customer_id() {
                    Some(existing) => {
                        self.gateway.attach_source(existing, &token).await?;
                        existing.to_string()
                    }
                    None => {
                        let created = self.gateway.create_customer(account.email(), &token).await?;
                        profile.remember_customer(created.clone());
                        if let Err(e) = self.store.save_profile(&profile).await {
                            warn!(user_id = %user, error = %e, "failed to remember payment customer");
                        }
                        created
                    }
                };
                (ChargeSource::Customer(customer.clone()), token, Some(customer))
            }
            PaymentSource::Token { token, save: false } => (ChargeSource::Token(token.clone()), token, None),
        };

        let total = order.total();
        let minor_units = total
            .minor_units()
            .ok_or_else(|| GatewayError::InvalidRequest(format!("amount {total} out of range")))?;
        let request = ChargeRequest {
            amount: total,
            source: charge_source,
            idempotency_key: format!("order-{}-{minor_units}-{attempt}", order.id()),
            description: format!("Order {} for {}", order.id(), account.username()),
        };
        let charge = self.gateway.charge(&request).await.inspect_err(|e| {
            warn!(user_id = %user, order_id = %order.id(), amount = %total, error = %e, "charge failed");
        })?;

        let expected = order.id();
        let payment = Payment::record(charge.id.clone(), user, total);
        let charge_id = charge.id.clone();
        let placed = self
            .store
            .update_open_order(user, move |open| {
                let mut order = open
                    .filter(|o| o.id() == expected)
                    .ok_or_else(|| ShopError::Conflict("order is no longer open".to_string()))?;
                if order.total() != total {
                    return Err(ShopError::Conflict("order total changed during payment".to_string()));
                }
                let ref_code = RefCode::generate();
                order.place(payment.id(), ref_code.clone(), Utc::now())?;
                let events = order.take_events();
                let receipt = Receipt { order_id: order.id(), ref_code, charge_id, amount: total };
                Ok((OrderWrite::Place { order, payment }, (receipt, events)))
            })
            .await;
        let (receipt, events) = match placed {
            Ok(placed) => placed,
            Err(e) => {
                warn!(user_id = %user, order_id = %expected, charge_id = %charge.id, error = %e, "charge succeeded but order was not placed");
                self.release_charge(user, &charge.id).await;
                return Err(e);
            }
        };

        if let Some(customer) = save_customer {
            profile.save_customer(customer);
            if let Err(e) = self.store.save_profile(&profile).await {
                warn!(user_id = %user, error = %e, "failed to save payment customer");
            }
        }

        info!(
            user_id = %user,
            order_id = %receipt.order_id,
            ref_code = %receipt.ref_code,
            charge_id = %receipt.charge_id,
            amount = %receipt.amount,
            "order placed"
        );
        self.events.publish(events).await;
        Ok(receipt)
    }

    /// Refunds a charge that has no payment recorded for it. A charge the
    /// store already holds belongs to an order placed by an earlier
    /// submission with the same idempotency key, and is left alone.
    async fn release_charge(&self, user: UserId, charge_id: &str) {
        match self.store.payments(user).await {
            Ok(payments) if payments.iter().any(|p| p.charge_id() == charge_id) => return,
            Ok(_) => {}
            Err(e) => {
                error!(user_id = %user, charge_id, error = %e, "could not check recorded payments, charge not refunded");
                return;
            }
        }
        match self.gateway.refund(charge_id).await {
            Ok(()) => info!(user_id = %user, charge_id, "unrecorded charge refunded"),
            Err(e) => error!(user_id = %user, charge_id, error = %e, "failed to refund unrecorded charge"),
        }
    }

    pub async fn payments(&self, user: UserId) -> Result<Vec<Payment>> {
        self.store.payments(user).await
    }

    // -------------------------------------------------------------------------
    // Orders and refunds
    // -------------------------------------------------------------------------

    /// Completed orders, newest first.
    pub async fn order_history(&self, user: UserId) -> Result<Vec<OrderSummary>> {
        let orders = self.store.placed_orders(user).await?;
        Ok(orders.iter().map(OrderSummary::from).collect())
    }

    pub async fn order(&self, id: OrderId) -> Result<OrderSummary> {
        let order = self.store.order(&OrderKey::Id(id)).await?.ok_or(ShopError::OrderNotFound)?;
        Ok(OrderSummary::from(&order))
    }

    pub async fn request_refund(&self, form: &RefundForm) -> Result<Refund> {
        let submission = form.clean()?;
        let ref_code = submission.ref_code.clone();
        let result = self
            .store
            .update_order(OrderKey::RefCode(submission.ref_code), move |mut order| {
                order.request_refund()?;
                let refund = Refund::request(order.id(), submission.reason, submission.email);
                let events = order.take_events();
                Ok((OrderUpdate { order, refund: Some(refund.clone()) }, (refund, events)))
            })
            .await;
        let (refund, events) = result.inspect_err(|e| warn!(ref_code = %ref_code, error = %e, "refund request rejected"))?;
        info!(ref_code = %ref_code, order_id = %refund.order(), refund_id = %refund.id(), "refund requested");
        self.events.publish(events).await;
        Ok(refund)
    }

    pub async fn refunds(&self, order: OrderId) -> Result<Vec<Refund>> {
        self.store.refunds_for_order(order).await
    }

    pub async fn mark_being_delivered(&self, id: OrderId) -> Result<OrderSummary> {
        self.transition(id, Order::mark_being_delivered).await
    }

    pub async fn mark_received(&self, id: OrderId) -> Result<OrderSummary> {
        self.transition(id, Order::mark_received).await
    }

    async fn transition(&self, id: OrderId, apply: fn(&mut Order) -> std::result::Result<(), OrderError>) -> Result<OrderSummary> {
        let (summary, events) = self
            .store
            .update_order(OrderKey::Id(id), move |mut order| {
                apply(&mut order)?;
                let summary = OrderSummary::from(&order);
                let events = order.take_events();
                Ok((OrderUpdate { order, refund: None }, (summary, events)))
            })
            .await?;
        info!(order_id = %id, stage = ?summary.stage, "order status changed");
        self.events.publish(events).await;
        Ok(summary)
    }

    /// Accepts a pending refund and marks its order refunded.
    pub async fn accept_refund(&self, id: RefundId) -> Result<Refund> {
        let mut refund = self.store.refund(id).await?.ok_or(ShopError::RefundNotFound)?;
        let (refund, events) = self
            .store
            .update_order(OrderKey::Id(refund.order()), move |mut order| {
                order.grant_refund(refund.id())?;
                refund.accept();
                let events = order.take_events();
                Ok((OrderUpdate { order, refund: Some(refund.clone()) }, (refund, events)))
            })
            .await?;
        info!(refund_id = %id, order_id = %refund.order(), "refund accepted");
        self.events.publish(events).await;
        Ok(refund)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::{Category, State};
    use crate::payments::testing::FakeGateway;
    use crate::store::MemoryStore;

    type TestShop = Shop<MemoryStore, FakeGateway>;

    async fn shop_with(gateway: FakeGateway) -> (TestShop, UserId) {
        let shop = Shop::new(Arc::new(MemoryStore::new()), Arc::new(gateway), EventPublisher::disabled());
        let form = RegistrationForm { username: "asha".into(), email: "asha@example.com".into() };
        let user = shop.register_user(&form).await.unwrap();

        let guitar = Item::create("Acoustic Guitar", Slug::new("acoustic-guitar").unwrap(), Money::from_cents(5999), Category::Guitar)
            .unwrap()
            .with_discount(Money::from_cents(4999))
            .unwrap();
        shop.add_item(guitar).await.unwrap();
        let tabla = Item::create("Tabla Pair", Slug::new("tabla-pair").unwrap(), Money::from_cents(2000), Category::Tabla).unwrap();
        shop.add_item(tabla).await.unwrap();
        shop.add_coupon(Coupon::new("SAVE5", Money::from_cents(500)).unwrap()).await.unwrap();
        (shop, user.id())
    }

    fn checkout_form() -> CheckoutForm {
        CheckoutForm {
            shipping_address: "12 MG Road".into(),
            shipping_state: "MH".into(),
            shipping_zip: "400001".into(),
            same_billing_address: true,
            payment_option: "S".into(),
            ..Default::default()
        }
    }

    fn card(save: bool) -> PaymentForm {
        PaymentForm { stripe_token: "tok_visa".into(), save, use_default: false }
    }

    async fn ready_to_pay(shop: &TestShop, user: UserId) {
        shop.add_to_cart(user, "acoustic-guitar").await.unwrap();
        shop.checkout(user, &checkout_form()).await.unwrap();
    }

    #[tokio::test]
    async fn test_registration_creates_blank_profile() {
        let (shop, user) = shop_with(FakeGateway::approving("ch_1")).await;
        let profile = shop.store().profile(user).await.unwrap().unwrap();
        assert!(!profile.one_click_purchasing());
        assert_eq!(profile.provider_customer_id(), None);

        let dup = RegistrationForm { username: "asha".into(), email: "other@example.com".into() };
        assert!(matches!(shop.register_user(&dup).await, Err(ShopError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_adding_twice_merges_into_one_line() {
        let (shop, user) = shop_with(FakeGateway::approving("ch_1")).await;
        shop.add_to_cart(user, "tabla-pair").await.unwrap();
        let update = shop.add_to_cart(user, "tabla-pair").await.unwrap();
        assert_eq!(update.quantity, 2);

        let summary = shop.order_summary(user).await.unwrap();
        assert_eq!(summary.lines.len(), 1);
        assert_eq!(summary.lines[0].quantity, 2);
        assert_eq!(summary.total, Money::from_cents(4000));
    }

    #[tokio::test]
    async fn test_removing_last_unit_deletes_cart() {
        let (shop, user) = shop_with(FakeGateway::approving("ch_1")).await;
        shop.add_to_cart(user, "tabla-pair").await.unwrap();
        shop.add_to_cart(user, "tabla-pair").await.unwrap();

        let update = shop.remove_single_from_cart(user, "tabla-pair").await.unwrap();
        assert_eq!(update, CartUpdate { quantity: 1, cart_open: true });
        let update = shop.remove_single_from_cart(user, "tabla-pair").await.unwrap();
        assert_eq!(update, CartUpdate { quantity: 0, cart_open: false });

        assert!(shop.store().open_order(user).await.unwrap().is_none());
        assert!(matches!(shop.order_summary(user).await, Err(ShopError::NoOpenOrder)));
        assert!(matches!(shop.remove_single_from_cart(user, "tabla-pair").await, Err(ShopError::NoOpenOrder)));
    }

    #[tokio::test]
    async fn test_remove_line_and_missing_items() {
        let (shop, user) = shop_with(FakeGateway::approving("ch_1")).await;
        shop.add_to_cart(user, "tabla-pair").await.unwrap();
        shop.add_to_cart(user, "tabla-pair").await.unwrap();
        shop.add_to_cart(user, "acoustic-guitar").await.unwrap();

        let update = shop.remove_from_cart(user, "tabla-pair").await.unwrap();
        assert_eq!(update, CartUpdate { quantity: 0, cart_open: true });
        assert!(matches!(
            shop.remove_from_cart(user, "tabla-pair").await,
            Err(ShopError::Order(OrderError::NotInCart))
        ));
        assert!(matches!(shop.add_to_cart(user, "harmonium").await, Err(ShopError::ItemNotFound(_))));
    }

    #[tokio::test]
    async fn test_unknown_coupon_leaves_order_unchanged() {
        let (shop, user) = shop_with(FakeGateway::approving("ch_1")).await;
        shop.add_to_cart(user, "acoustic-guitar").await.unwrap();
        let summary = shop.apply_coupon(user, &CouponForm { code: "SAVE5".into() }).await.unwrap();
        assert_eq!(summary.total, Money::from_cents(4499));

        let err = shop.apply_coupon(user, &CouponForm { code: "BOGUS".into() }).await.unwrap_err();
        assert!(matches!(err, ShopError::CouponNotFound(code) if code == "BOGUS"));
        let summary = shop.order_summary(user).await.unwrap();
        assert_eq!(summary.coupon.as_deref(), Some("SAVE5"));
        assert_eq!(summary.discount, Money::from_cents(500));
    }

    #[tokio::test]
    async fn test_checkout_uses_defaults() {
        let (shop, user) = shop_with(FakeGateway::approving("ch_1")).await;
        shop.add_to_cart(user, "tabla-pair").await.unwrap();

        let form = CheckoutForm { use_default_shipping: true, ..checkout_form() };
        let err = shop.checkout(user, &form).await.unwrap_err();
        assert!(matches!(&err, ShopError::Validation(e) if e.field_errors().contains_key("use_default_shipping")));
        assert!(shop.addresses(user).await.unwrap().is_empty());

        let form = CheckoutForm { set_default_shipping: true, ..checkout_form() };
        let outcome = shop.checkout(user, &form).await.unwrap();
        assert_eq!(outcome.next, "/payment/stripe");

        let outcome = shop.checkout(user, &CheckoutForm { use_default_shipping: true, ..checkout_form() }).await.unwrap();
        let addresses = shop.addresses(user).await.unwrap();
        let shipping: Vec<_> = addresses.iter().filter(|a| a.address_type() == AddressType::Shipping).collect();
        assert_eq!(shipping.len(), 1);
        assert!(shipping[0].is_default());
        assert_eq!(shipping[0].state(), State::Maharashtra);

        let order = shop.store().open_order(user).await.unwrap().unwrap();
        assert_eq!(order.id(), outcome.order_id);
        assert_eq!(order.shipping_address(), Some(shipping[0].id()));
        assert_ne!(order.billing_address(), order.shipping_address());
    }

    #[tokio::test]
    async fn test_checkout_without_cart() {
        let (shop, user) = shop_with(FakeGateway::approving("ch_1")).await;
        assert!(matches!(shop.checkout(user, &checkout_form()).await, Err(ShopError::NoOpenOrder)));
    }

    #[tokio::test]
    async fn test_successful_capture_places_order() {
        let (shop, user) = shop_with(FakeGateway::approving("ch_123")).await;
        ready_to_pay(&shop, user).await;

        let receipt = shop.capture_payment(user, PaymentOption::Stripe, &card(false)).await.unwrap();
        assert_eq!(receipt.amount, Money::from_cents(4999));
        assert_eq!(receipt.charge_id, "ch_123");

        let payments = shop.payments(user).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].charge_id(), "ch_123");
        assert_eq!(payments[0].amount(), Money::from_cents(4999));

        assert!(shop.store().open_order(user).await.unwrap().is_none());
        let history = shop.order_history(user).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].stage, OrderStage::Placed);
        assert_eq!(history[0].ref_code.as_ref(), Some(&receipt.ref_code));
        let placed = shop.store().order(&OrderKey::Id(receipt.order_id)).await.unwrap().unwrap();
        assert!(placed.is_ordered() && placed.ordered_date().is_some());
        assert_eq!(placed.payment(), Some(payments[0].id()));

        let charges = shop.gateway.charges();
        assert_eq!(charges[0].idempotency_key, format!("order-{}-4999-tok_visa", receipt.order_id));
        assert_eq!(charges[0].source, ChargeSource::Token("tok_visa".into()));
    }

    #[tokio::test]
    async fn test_failed_charge_keeps_order_open() {
        let (shop, user) = shop_with(FakeGateway::declining("Your card was declined.")).await;
        ready_to_pay(&shop, user).await;

        let err = shop.capture_payment(user, PaymentOption::Stripe, &card(true)).await.unwrap_err();
        assert!(matches!(err, ShopError::PaymentFailed(GatewayError::Declined(_))));
        assert!(shop.payments(user).await.unwrap().is_empty());
        let order = shop.store().open_order(user).await.unwrap().unwrap();
        assert!(!order.is_ordered());
        let profile = shop.store().profile(user).await.unwrap().unwrap();
        assert!(!profile.one_click_purchasing());
        assert_eq!(profile.saved_customer(), None);
    }

    #[tokio::test]
    async fn test_retry_with_another_card_after_decline() {
        let (shop, user) = shop_with(FakeGateway::approving("ch_5").decline_next("Your card was declined.")).await;
        ready_to_pay(&shop, user).await;

        let declined = PaymentForm { stripe_token: "tok_declined".into(), ..Default::default() };
        let err = shop.capture_payment(user, PaymentOption::Stripe, &declined).await.unwrap_err();
        assert!(matches!(err, ShopError::PaymentFailed(GatewayError::Declined(_))));

        let receipt = shop.capture_payment(user, PaymentOption::Stripe, &card(false)).await.unwrap();
        assert_eq!(receipt.charge_id, "ch_5");
        let charges = shop.gateway.charges();
        assert_eq!(charges.len(), 2);
        assert_eq!(charges[0].source, ChargeSource::Token("tok_declined".into()));
        assert_eq!(charges[1].source, ChargeSource::Token("tok_visa".into()));
        assert_ne!(charges[0].idempotency_key, charges[1].idempotency_key);
        assert_eq!(shop.payments(user).await.unwrap().len(), 1);
        assert!(shop.gateway.refunds().is_empty());
    }

    #[tokio::test]
    async fn test_retry_saving_card_reuses_customer() {
        let (shop, user) = shop_with(FakeGateway::approving("ch_5").decline_next("Your card was declined.")).await;
        ready_to_pay(&shop, user).await;

        assert!(shop.capture_payment(user, PaymentOption::Stripe, &card(true)).await.is_err());
        let profile = shop.store().profile(user).await.unwrap().unwrap();
        assert_eq!(profile.provider_customer_id(), Some("cus_1"));
        assert!(!profile.one_click_purchasing());
        let saved = PaymentForm { use_default: true, ..Default::default() };
        assert!(matches!(
            shop.capture_payment(user, PaymentOption::Stripe, &saved).await,
            Err(ShopError::Validation(_))
        ));

        shop.capture_payment(user, PaymentOption::Stripe, &card(true)).await.unwrap();
        assert_eq!(shop.gateway.customers().len(), 1);
        assert_eq!(*shop.gateway.attached.lock().unwrap(), vec![("cus_1".to_string(), "tok_visa".to_string())]);
        let profile = shop.store().profile(user).await.unwrap().unwrap();
        assert_eq!(profile.saved_customer(), Some("cus_1"));
    }

    #[tokio::test]
    async fn test_charge_refunded_when_cart_changes_during_payment() {
        let (shop, user) = shop_with(FakeGateway::approving("ch_5")).await;
        ready_to_pay(&shop, user).await;

        let store = shop.store.clone();
        let tabla = store.item_by_slug(&Slug::new("tabla-pair").unwrap()).await.unwrap().unwrap();
        shop.gateway.during_next_charge(async move {
            store
                .update_open_order(user, move |open| {
                    let mut order = open.ok_or(ShopError::NoOpenOrder)?;
                    order.add_item(&tabla)?;
                    Ok((OrderWrite::Save(order), ()))
                })
                .await
                .unwrap();
        });

        let err = shop.capture_payment(user, PaymentOption::Stripe, &card(false)).await.unwrap_err();
        assert!(matches!(err, ShopError::Conflict(_)));
        assert_eq!(shop.gateway.refunds(), vec!["ch_5".to_string()]);
        assert!(shop.payments(user).await.unwrap().is_empty());
        assert_eq!(shop.store().open_order(user).await.unwrap().unwrap().items().len(), 2);

        let receipt = shop.capture_payment(user, PaymentOption::Stripe, &card(false)).await.unwrap();
        assert_eq!(receipt.amount, Money::from_cents(6999));
        assert_eq!(receipt.charge_id, "ch_5_1");
        assert_eq!(shop.payments(user).await.unwrap().len(), 1);
        assert_eq!(shop.gateway.refunds().len(), 1);
    }

    #[tokio::test]
    async fn test_saved_card_enables_one_click() {
        let (shop, user) = shop_with(FakeGateway::approving("ch_9")).await;
        let saved = PaymentForm { use_default: true, ..Default::default() };
        ready_to_pay(&shop, user).await;
        assert!(matches!(
            shop.capture_payment(user, PaymentOption::Stripe, &saved).await,
            Err(ShopError::Validation(_))
        ));

        shop.capture_payment(user, PaymentOption::Stripe, &card(true)).await.unwrap();
        let profile = shop.store().profile(user).await.unwrap().unwrap();
        assert!(profile.one_click_purchasing());
        assert_eq!(profile.provider_customer_id(), Some("cus_1"));

        shop.add_to_cart(user, "tabla-pair").await.unwrap();
        shop.checkout(user, &checkout_form()).await.unwrap();
        let receipt = shop.capture_payment(user, PaymentOption::Stripe, &saved).await.unwrap();
        assert_eq!(receipt.charge_id, "ch_9_1");
        let charges = shop.gateway.charges();
        assert_eq!(charges.len(), 2);
        assert_eq!(charges[1].source, ChargeSource::Customer("cus_1".into()));
        assert_eq!(shop.payments(user).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_capture_preconditions() {
        let (shop, user) = shop_with(FakeGateway::approving("ch_1")).await;
        assert!(matches!(
            shop.capture_payment(user, PaymentOption::PayPal, &card(false)).await,
            Err(ShopError::UnsupportedPaymentOption(PaymentOption::PayPal))
        ));
        assert!(matches!(
            shop.capture_payment(user, PaymentOption::Stripe, &card(false)).await,
            Err(ShopError::NoOpenOrder)
        ));
        shop.add_to_cart(user, "tabla-pair").await.unwrap();
        assert!(matches!(
            shop.capture_payment(user, PaymentOption::Stripe, &card(false)).await,
            Err(ShopError::Order(OrderError::NoBillingAddress))
        ));
        assert!(shop.gateway.charges().is_empty());
    }

    #[tokio::test]
    async fn test_refund_workflow() {
        let (shop, user) = shop_with(FakeGateway::approving("ch_7")).await;
        ready_to_pay(&shop, user).await;
        let receipt = shop.capture_payment(user, PaymentOption::Stripe, &card(false)).await.unwrap();

        let form = RefundForm {
            ref_code: receipt.ref_code.as_str().to_string(),
            message: "Neck is warped".into(),
            email: "asha@example.com".into(),
        };
        let refund = shop.request_refund(&form).await.unwrap();
        assert_eq!(refund.order(), receipt.order_id);
        assert!(!refund.is_accepted());
        assert!(matches!(
            shop.request_refund(&form).await,
            Err(ShopError::Order(OrderError::RefundAlreadyRequested))
        ));

        let accepted = shop.accept_refund(refund.id()).await.unwrap();
        assert!(accepted.is_accepted());
        assert_eq!(shop.refunds(receipt.order_id).await.unwrap(), vec![accepted]);
        assert_eq!(shop.order(receipt.order_id).await.unwrap().stage, OrderStage::Refunded);
        assert!(matches!(shop.accept_refund(refund.id()).await, Err(ShopError::Order(OrderError::NoRefundRequested))));
    }

    #[tokio::test]
    async fn test_unknown_ref_code_creates_no_refund() {
        let (shop, user) = shop_with(FakeGateway::approving("ch_1")).await;
        ready_to_pay(&shop, user).await;
        let receipt = shop.capture_payment(user, PaymentOption::Stripe, &card(false)).await.unwrap();

        let form = RefundForm {
            ref_code: "abcdefghij0123456789".into(),
            message: "Never arrived".into(),
            email: "asha@example.com".into(),
        };
        assert!(matches!(shop.request_refund(&form).await, Err(ShopError::OrderNotFound)));
        assert!(shop.refunds(receipt.order_id).await.unwrap().is_empty());
        let placed = shop.store().order(&OrderKey::Id(receipt.order_id)).await.unwrap().unwrap();
        assert!(!placed.is_refund_requested());
    }

    #[tokio::test]
    async fn test_staff_transitions() {
        let (shop, user) = shop_with(FakeGateway::approving("ch_2")).await;
        ready_to_pay(&shop, user).await;
        let receipt = shop.capture_payment(user, PaymentOption::Stripe, &card(false)).await.unwrap();

        let summary = shop.mark_being_delivered(receipt.order_id).await.unwrap();
        assert_eq!(summary.stage, OrderStage::BeingDelivered);
        let summary = shop.mark_received(receipt.order_id).await.unwrap();
        assert_eq!(summary.stage, OrderStage::Received);
        assert_eq!(summary.lines[0].quantity, 1);
        assert!(matches!(shop.mark_received(OrderId::new()).await, Err(ShopError::OrderNotFound)));
    }
}
