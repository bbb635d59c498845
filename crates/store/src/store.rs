use async_trait::async_trait;

use crate::{
    CartLine, CartLineId, CartSnapshotLine, NewOrder, NewOrderItem, NewProduct, Order, OrderId,
    OrderItem, OrderStatus, Product, ProductId, Result, StatusChange, UserId,
};

/// Core trait for store implementations.
///
/// Methods on the store itself run outside any caller-visible transaction.
/// Writes that must be atomic together go through [`Store::begin`].
#[async_trait]
pub trait Store: Send + Sync {
    /// The scoped transaction handle of this backend.
    type Tx: StoreTx + 'static;

    /// Starts a transaction.
    ///
    /// The returned handle rolls back when dropped without
    /// [`StoreTx::commit`].
    async fn begin(&self) -> Result<Self::Tx>;

    // -- catalog --

    async fn insert_product(&self, product: NewProduct) -> Result<Product>;

    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>>;

    /// Deletes a product. Cart lines for it disappear, order items keep
    /// their snapshot with the product reference cleared.
    async fn delete_product(&self, product_id: ProductId) -> Result<bool>;

    // -- cart --

    /// Returns the user's cart lines joined with live product data,
    /// oldest line first. Empty when the user has no lines.
    async fn cart_snapshot(&self, user_id: UserId) -> Result<Vec<CartSnapshotLine>>;

    /// Adds `quantity` of a product, merging into an existing line.
    async fn add_to_cart(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartLine>;

    async fn get_cart_line(&self, user_id: UserId, line_id: CartLineId)
    -> Result<Option<CartLine>>;

    async fn set_cart_line_quantity(
        &self,
        user_id: UserId,
        line_id: CartLineId,
        quantity: u32,
    ) -> Result<Option<CartLine>>;

    async fn delete_cart_line(&self, user_id: UserId, line_id: CartLineId) -> Result<bool>;

    async fn clear_cart(&self, user_id: UserId) -> Result<u64>;

    // -- order ledger --

    /// Returns one page of the user's orders, newest first, with items,
    /// and the total number of orders the user has.
    async fn list_orders(&self, user_id: UserId, limit: u32, offset: u32)
    -> Result<(Vec<Order>, u64)>;

    /// Loads an order with its items, scoped to the owning user.
    async fn find_order(&self, user_id: UserId, order_id: OrderId) -> Result<Option<Order>>;

    /// Overwrites the status of an order regardless of its current value,
    /// returning the status it replaced.
    async fn set_order_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Option<StatusChange>>;
}

/// A scoped unit of work.
///
/// Writes become visible to other transactions only on [`commit`](Self::commit).
/// Dropping the handle, including on an early `?` return, discards them.
#[async_trait]
pub trait StoreTx: Send {
    /// Atomically decrements available stock by `quantity`.
    ///
    /// Single guarded write: fails with
    /// [`StoreError::InsufficientStock`](crate::StoreError::InsufficientStock)
    /// if the product is missing, inactive, or has less than `quantity`.
    async fn reserve(&mut self, product_id: ProductId, quantity: u32) -> Result<()>;

    /// Atomically increments available stock by `quantity`.
    ///
    /// Returns false if the product no longer exists.
    async fn release(&mut self, product_id: ProductId, quantity: u32) -> Result<bool>;

    /// Inserts an order header with status pending.
    ///
    /// Fails with
    /// [`StoreError::DuplicateOrderNumber`](crate::StoreError::DuplicateOrderNumber)
    /// if the order number is taken.
    async fn insert_order(&mut self, order: NewOrder) -> Result<Order>;

    async fn insert_order_item(
        &mut self,
        order_id: OrderId,
        item: NewOrderItem,
    ) -> Result<OrderItem>;

    async fn clear_cart(&mut self, user_id: UserId) -> Result<u64>;

    /// Reads an order scoped to the user and holds it exclusively until the
    /// transaction ends. Items are not attached.
    async fn lock_order(&mut self, user_id: UserId, order_id: OrderId) -> Result<Option<Order>>;

    async fn order_items(&mut self, order_id: OrderId) -> Result<Vec<OrderItem>>;

    async fn update_order_status(&mut self, order_id: OrderId, status: OrderStatus) -> Result<()>;

    /// Publishes every write made through this handle.
    async fn commit(self) -> Result<()>;
}
