//! HTTP surface.
//!
//! Requests are form-encoded like the storefront's HTML forms; responses are
//! JSON. Authentication is delegated to the fronting identity proxy, which
//! passes the signed-in user as `x-user-id` and staff accounts with
//! `x-user-role: staff`.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{async_trait, Form, Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::{Address, Item, OrderError, Payment, Refund, User};
use crate::domain::value_objects::{OrderId, PaymentOption, RefundId, UserId};
use crate::forms::{CheckoutForm, CouponForm, PaymentForm, RefundForm, RegistrationForm};
use crate::payments::PaymentGateway;
use crate::shop::{CartUpdate, CheckoutOutcome, OrderSummary, Receipt, Shop};
use crate::store::{Page, Store};
use crate::ShopError;

pub const USER_HEADER: &str = "x-user-id";
pub const ROLE_HEADER: &str = "x-user-role";

type AppState<S, G> = State<Arc<Shop<S, G>>>;
type ApiResult<T> = Result<T, ApiError>;

pub fn router<S: Store, G: PaymentGateway>(shop: Arc<Shop<S, G>>) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "music-store"})) }))
        .route("/register", post(register::<S, G>))
        .route("/items", get(list_items::<S, G>))
        .route("/product/:slug", get(get_item::<S, G>))
        .route("/add-to-cart/:slug", post(add_to_cart::<S, G>))
        .route("/remove-from-cart/:slug", post(remove_from_cart::<S, G>))
        .route("/remove-item-from-cart/:slug", post(remove_single_from_cart::<S, G>))
        .route("/order-summary", get(order_summary::<S, G>))
        .route("/checkout", post(checkout::<S, G>))
        .route("/add-coupon", post(add_coupon::<S, G>))
        .route("/payment/:option", post(payment::<S, G>))
        .route("/request-refund", post(request_refund::<S, G>))
        .route("/orders", get(order_history::<S, G>))
        .route("/addresses", get(addresses::<S, G>))
        .route("/payments", get(payments::<S, G>))
        .route("/staff/orders/:id", get(staff_order::<S, G>))
        .route("/staff/orders/:id/refunds", get(staff_refunds::<S, G>))
        .route("/staff/orders/:id/being-delivered", post(being_delivered::<S, G>))
        .route("/staff/orders/:id/received", post(received::<S, G>))
        .route("/staff/refunds/:id/accept", post(accept_refund::<S, G>))
        .with_state(shop)
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug)]
pub enum ApiError {
    Shop(ShopError),
    Unauthorized,
    Forbidden,
    NotFound,
}

impl From<ShopError> for ApiError {
    fn from(e: ShopError) -> Self { Self::Shop(e) }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<BTreeMap<String, Vec<String>>>,
}

fn status_of(e: &ShopError) -> StatusCode {
    match e {
        ShopError::Validation(_) | ShopError::InvalidItem(_) | ShopError::InvalidCoupon(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ShopError::ItemNotFound(_)
        | ShopError::OrderNotFound
        | ShopError::CouponNotFound(_)
        | ShopError::NoOpenOrder
        | ShopError::AddressNotFound
        | ShopError::RefundNotFound
        | ShopError::UserNotFound => StatusCode::NOT_FOUND,
        ShopError::Order(e) => match e {
            OrderError::NotInCart => StatusCode::NOT_FOUND,
            OrderError::NoItems | OrderError::NoBillingAddress => StatusCode::UNPROCESSABLE_ENTITY,
            OrderError::AlreadyPlaced
            | OrderError::NotPlaced
            | OrderError::RefundAlreadyRequested
            | OrderError::NoRefundRequested => StatusCode::CONFLICT,
        },
        ShopError::PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
        ShopError::UnsupportedPaymentOption(_) => StatusCode::NOT_IMPLEMENTED,
        ShopError::Conflict(_) => StatusCode::CONFLICT,
        ShopError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn field_messages(errors: &validator::ValidationErrors) -> BTreeMap<String, Vec<String>> {
    errors
        .field_errors()
        .into_iter()
        .map(|(field, errs)| {
            let messages = errs
                .iter()
                .map(|e| e.message.as_ref().map_or_else(|| e.code.to_string(), |m| m.to_string()))
                .collect();
            (field.to_string(), messages)
        })
        .collect()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Shop(e) => {
                let status = status_of(&e);
                if status.is_server_error() {
                    tracing::error!(error = %e, "request failed");
                }
                let fields = match &e {
                    ShopError::Validation(errors) => Some(field_messages(errors)),
                    _ => None,
                };
                (status, ErrorBody { error: e.to_string(), fields })
            }
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, ErrorBody { error: "login required".into(), fields: None }),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, ErrorBody { error: "staff only".into(), fields: None }),
            ApiError::NotFound => (StatusCode::NOT_FOUND, ErrorBody { error: "not found".into(), fields: None }),
        };
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Extractors
// =============================================================================

/// The signed-in user.
pub struct CurrentUser(pub UserId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map(|id| CurrentUser(UserId::from_uuid(id)))
            .ok_or(ApiError::Unauthorized)
    }
}

/// A signed-in staff member.
pub struct Staff;

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Staff {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        CurrentUser::from_request_parts(parts, state).await?;
        match parts.headers.get(ROLE_HEADER).and_then(|v| v.to_str().ok()) {
            Some("staff") => Ok(Staff),
            _ => Err(ApiError::Forbidden),
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

async fn register<S: Store, G: PaymentGateway>(State(shop): AppState<S, G>, Form(form): Form<RegistrationForm>) -> ApiResult<(StatusCode, Json<User>)> {
    Ok((StatusCode::CREATED, Json(shop.register_user(&form).await?)))
}

async fn list_items<S: Store, G: PaymentGateway>(State(shop): AppState<S, G>, Query(p): Query<ListParams>) -> ApiResult<Json<Vec<Item>>> {
    Ok(Json(shop.catalog(Page::new(p.page, p.per_page)).await?))
}

async fn get_item<S: Store, G: PaymentGateway>(State(shop): AppState<S, G>, Path(slug): Path<String>) -> ApiResult<Json<Item>> {
    Ok(Json(shop.item(&slug).await?))
}

async fn add_to_cart<S: Store, G: PaymentGateway>(State(shop): AppState<S, G>, CurrentUser(user): CurrentUser, Path(slug): Path<String>) -> ApiResult<Json<CartUpdate>> {
    Ok(Json(shop.add_to_cart(user, &slug).await?))
}

async fn remove_from_cart<S: Store, G: PaymentGateway>(State(shop): AppState<S, G>, CurrentUser(user): CurrentUser, Path(slug): Path<String>) -> ApiResult<Json<CartUpdate>> {
    Ok(Json(shop.remove_from_cart(user, &slug).await?))
}

async fn remove_single_from_cart<S: Store, G: PaymentGateway>(State(shop): AppState<S, G>, CurrentUser(user): CurrentUser, Path(slug): Path<String>) -> ApiResult<Json<CartUpdate>> {
    Ok(Json(shop.remove_single_from_cart(user, &slug).await?))
}

async fn order_summary<S: Store, G: PaymentGateway>(State(shop): AppState<S, G>, CurrentUser(user): CurrentUser) -> ApiResult<Json<OrderSummary>> {
    Ok(Json(shop.order_summary(user).await?))
}

async fn checkout<S: Store, G: PaymentGateway>(State(shop): AppState<S, G>, CurrentUser(user): CurrentUser, Form(form): Form<CheckoutForm>) -> ApiResult<Json<CheckoutOutcome>> {
    Ok(Json(shop.checkout(user, &form).await?))
}

async fn add_coupon<S: Store, G: PaymentGateway>(State(shop): AppState<S, G>, CurrentUser(user): CurrentUser, Form(form): Form<CouponForm>) -> ApiResult<Json<OrderSummary>> {
    Ok(Json(shop.apply_coupon(user, &form).await?))
}

async fn payment<S: Store, G: PaymentGateway>(
    State(shop): AppState<S, G>,
    CurrentUser(user): CurrentUser,
    Path(option): Path<String>,
    Form(form): Form<PaymentForm>,
) -> ApiResult<(StatusCode, Json<Receipt>)> {
    let option = PaymentOption::from_path(&option).ok_or(ApiError::NotFound)?;
    Ok((StatusCode::CREATED, Json(shop.capture_payment(user, option, &form).await?)))
}

async fn request_refund<S: Store, G: PaymentGateway>(State(shop): AppState<S, G>, Form(form): Form<RefundForm>) -> ApiResult<(StatusCode, Json<Refund>)> {
    Ok((StatusCode::CREATED, Json(shop.request_refund(&form).await?)))
}

async fn order_history<S: Store, G: PaymentGateway>(State(shop): AppState<S, G>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Vec<OrderSummary>>> {
    Ok(Json(shop.order_history(user).await?))
}

async fn addresses<S: Store, G: PaymentGateway>(State(shop): AppState<S, G>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Vec<Address>>> {
    Ok(Json(shop.addresses(user).await?))
}

async fn payments<S: Store, G: PaymentGateway>(State(shop): AppState<S, G>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Vec<Payment>>> {
    Ok(Json(shop.payments(user).await?))
}

async fn staff_order<S: Store, G: PaymentGateway>(State(shop): AppState<S, G>, _: Staff, Path(id): Path<Uuid>) -> ApiResult<Json<OrderSummary>> {
    Ok(Json(shop.order(OrderId::from_uuid(id)).await?))
}

async fn staff_refunds<S: Store, G: PaymentGateway>(State(shop): AppState<S, G>, _: Staff, Path(id): Path<Uuid>) -> ApiResult<Json<Vec<Refund>>> {
    Ok(Json(shop.refunds(OrderId::from_uuid(id)).await?))
}

async fn being_delivered<S: Store, G: PaymentGateway>(State(shop): AppState<S, G>, _: Staff, Path(id): Path<Uuid>) -> ApiResult<Json<OrderSummary>> {
    Ok(Json(shop.mark_being_delivered(OrderId::from_uuid(id)).await?))
}

async fn received<S: Store, G: PaymentGateway>(State(shop): AppState<S, G>, _: Staff, Path(id): Path<Uuid>) -> ApiResult<Json<OrderSummary>> {
    Ok(Json(shop.mark_received(OrderId::from_uuid(id)).await?))
}

async fn accept_refund<S: Store, G: PaymentGateway>(State(shop): AppState<S, G>, _: Staff, Path(id): Path<Uuid>) -> ApiResult<Json<Refund>> {
    Ok(Json(shop.accept_refund(RefundId::from_uuid(id)).await?))
}
