//! Shared types for the storefront checkout system.

pub mod money;
pub mod types;

pub use money::Money;
pub use types::{CartLineId, OrderId, OrderItemId, ProductId, UserId};
