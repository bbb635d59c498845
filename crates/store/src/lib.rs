//! Persistence substrate for the storefront checkout system.
//!
//! Three concerns share one relational store:
//! - the inventory view of products (guarded reserve / release)
//! - cart lines and the cart snapshot joined with live product data
//! - the order ledger (orders and their immutable item snapshots)
//!
//! All writes of an order placement or cancellation go through a
//! [`StoreTx`], which rolls back unless explicitly committed.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod records;
pub mod store;

pub use common::{CartLineId, Money, OrderId, OrderItemId, ProductId, UserId};
pub use error::{Result, StoreError};
pub use memory::{InMemoryStore, InMemoryTx};
pub use postgres::{PostgresStore, PostgresTx};
pub use records::{
    Address, CartLine, CartSnapshotLine, NewOrder, NewOrderItem, NewProduct, Order, OrderItem,
    OrderStatus, ParseOrderStatusError, Product, StatusChange,
};
pub use store::{Store, StoreTx};
