//! Records persisted by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CartLineId, Money, OrderId, OrderItemId, ProductId, UserId};

/// A catalog product as seen by checkout.
///
/// `quantity` is the available stock. It only moves through
/// [`StoreTx::reserve`](crate::StoreTx::reserve) and
/// [`StoreTx::release`](crate::StoreTx::release).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub sku: String,
    pub price: Money,
    pub quantity: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Product {
    /// Returns true if the product can be put into a cart.
    pub fn is_in_stock(&self) -> bool {
        self.quantity > 0 && self.is_active
    }
}

/// Input for creating a product.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub sku: String,
    pub price: Money,
    pub quantity: u32,
    pub is_active: bool,
}

impl NewProduct {
    /// Creates an active product.
    pub fn new(name: impl Into<String>, sku: impl Into<String>, price: Money, quantity: u32) -> Self {
        Self {
            name: name.into(),
            sku: sku.into(),
            price,
            quantity,
            is_active: true,
        }
    }

    /// Marks the product inactive.
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// One product line in a user's cart.
///
/// There is at most one line per `(user_id, product_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub id: CartLineId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A cart line joined with its product's live attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSnapshotLine {
    pub line_id: CartLineId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub product_name: String,
    pub product_sku: String,
    pub unit_price: Money,
    pub available: u32,
    pub is_active: bool,
}

impl CartSnapshotLine {
    /// Returns quantity × current unit price.
    pub fn subtotal(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }

    /// Returns true if the product can currently cover this line.
    pub fn is_satisfiable(&self) -> bool {
        self.is_active && self.quantity <= self.available
    }
}

/// A structured postal address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub name: String,
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub postal_code: String,
    pub country: String,
}

/// The lifecycle status of an order.
///
/// Cancellation path:
/// ```text
/// Pending ──► Processing ──► Shipped ──► Delivered
///    │            │
///    └────────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Placed, inventory reserved.
    #[default]
    Pending,
    Processing,
    Shipped,
    /// Terminal.
    Delivered,
    /// Terminal. Inventory has been released.
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    /// Returns true if the customer may cancel the order in this status.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Processing)
    }

    /// Returns true if no further transition is possible via cancellation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Returns true if `next` follows this status in the documented lifecycle.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Shipped)
                | (Processing, Cancelled)
                | (Shipped, Delivered)
        )
    }

    /// Returns the persisted string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown order status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown order status: {0}")]
pub struct ParseOrderStatusError(pub String);

impl std::str::FromStr for OrderStatus {
    type Err = ParseOrderStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseOrderStatusError(s.to_string()))
    }
}

/// A placed order.
///
/// Everything except `status` and `updated_at` is frozen at creation;
/// `total == subtotal + tax + shipping`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub order_number: String,
    pub status: OrderStatus,
    pub subtotal: Money,
    pub tax: Money,
    pub shipping: Money,
    pub total: Money,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<OrderItem>,
}

/// Result of an administrative status overwrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub previous: OrderStatus,
    pub order: Order,
}

/// Input for inserting an order header.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: OrderId,
    pub user_id: UserId,
    pub order_number: String,
    pub subtotal: Money,
    pub tax: Money,
    pub shipping: Money,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub notes: Option<String>,
}

impl NewOrder {
    pub fn total(&self) -> Money {
        self.subtotal + self.tax + self.shipping
    }
}

/// Snapshot of a product line frozen at order creation.
///
/// `product_id` becomes `None` if the product is later deleted; the
/// item keeps its name, SKU and price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: Option<ProductId>,
    pub product_name: String,
    pub product_sku: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub subtotal: Money,
    pub created_at: DateTime<Utc>,
}

/// Input for inserting an order item.
#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub product_sku: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl NewOrderItem {
    pub fn subtotal(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

impl From<&CartSnapshotLine> for NewOrderItem {
    fn from(line: &CartSnapshotLine) -> Self {
        Self {
            product_id: line.product_id,
            product_name: line.product_name.clone(),
            product_sku: line.product_sku.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
        }
    }
}
