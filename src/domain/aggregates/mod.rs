//! Aggregates module
pub mod item;
pub mod order;
pub mod cart;
pub mod address;
pub mod coupon;
pub mod payment;
pub mod refund;
pub mod profile;

pub use item::{Item, ItemError};
pub use order::{Order, OrderError, OrderItem, OrderStage};
pub use cart::CartChange;
pub use address::{Address, AddressDraft};
pub use coupon::{Coupon, CouponError};
pub use payment::Payment;
pub use refund::Refund;
pub use profile::{Registration, User, UserProfile};
