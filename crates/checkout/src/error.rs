//! Checkout error types.

use common::{CartLineId, OrderId, ProductId};
use store::{OrderStatus, StoreError};
use thiserror::Error;

/// Errors surfaced by checkout and cart operations.
///
/// Creation and cancellation failures carry no storage detail; the
/// underlying error is logged where it happens.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The user's cart has no lines.
    #[error("Cart is empty")]
    EmptyCart,

    /// A line asks for more than the product has, or the product is inactive.
    #[error("Insufficient stock for {0}")]
    InsufficientStock(String),

    /// The placement transaction was rolled back.
    #[error("Failed to create order")]
    OrderCreationFailed,

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Only pending and processing orders can be cancelled.
    #[error("Order cannot be cancelled in {0} status")]
    OrderNotCancellable(OrderStatus),

    /// The cancellation transaction was rolled back.
    #[error("Failed to cancel order")]
    OrderCancellationFailed,

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Product is out of stock: {0}")]
    ProductUnavailable(String),

    #[error("Cart item not found: {0}")]
    CartLineNotFound(CartLineId),

    #[error("Invalid quantity: {0} (must be greater than 0)")]
    InvalidQuantity(u32),

    /// A storage failure outside the atomic regions.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}
