use thiserror::Error;

use crate::ProductId;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A guarded decrement found less stock than requested, or the product
    /// is inactive or missing.
    #[error("Insufficient stock for product {product_id}")]
    InsufficientStock { product_id: ProductId },

    /// The generated order number is already taken.
    #[error("Order number {0} already exists")]
    DuplicateOrderNumber(String),

    /// The referenced product does not exist.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// The transaction could not be committed.
    #[error("Commit failed: {0}")]
    CommitFailed(String),

    /// A value does not fit the column or domain type it maps to.
    #[error("Value out of range for {field}: {value}")]
    OutOfRange { field: &'static str, value: i64 },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
