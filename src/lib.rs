//! Music Store
//!
//! Storefront backend for a musical instrument shop.
//!
//! ## Features
//! - Instrument catalog with discount pricing
//! - Per-user cart backed by a single open order
//! - Checkout with saved default addresses
//! - Flat-amount coupons
//! - Card payments through a pluggable provider
//! - Refund requests and staff fulfilment flags

pub mod config;
pub mod domain;
pub mod forms;
pub mod http;
pub mod payments;
pub mod shop;
pub mod store;

use thiserror::Error;

use crate::domain::aggregates::{CouponError, ItemError, OrderError};
use crate::domain::value_objects::PaymentOption;
use crate::payments::GatewayError;

pub use crate::shop::{EventPublisher, Shop};
pub use crate::store::{MemoryStore, PgStore, Store};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum ShopError {
    #[error("invalid form submission")]
    Validation(#[from] validator::ValidationErrors),

    #[error("item not found: {0}")]
    ItemNotFound(String),

    #[error("order not found")]
    OrderNotFound,

    #[error("coupon not found: {0}")]
    CouponNotFound(String),

    #[error("you do not have an active order")]
    NoOpenOrder,

    #[error("address not found")]
    AddressNotFound,

    #[error("refund not found")]
    RefundNotFound,

    #[error("user not found")]
    UserNotFound,

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error("invalid item: {0}")]
    InvalidItem(#[from] ItemError),

    #[error("invalid coupon: {0}")]
    InvalidCoupon(#[from] CouponError),

    #[error("payment failed: {0}")]
    PaymentFailed(#[from] GatewayError),

    #[error("payment option {0} is not supported")]
    UnsupportedPaymentOption(PaymentOption),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, ShopError>;
