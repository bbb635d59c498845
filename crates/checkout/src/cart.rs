//! Cart management ahead of checkout.

use common::{CartLineId, Money, ProductId, UserId};
use serde::Serialize;
use store::{CartLine, CartSnapshotLine, Store};

use crate::error::CheckoutError;

/// The user's cart priced against live product data.
#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    pub items: Vec<CartSnapshotLine>,
    pub subtotal: Money,
    pub total: Money,
}

impl CartView {
    fn from_lines(items: Vec<CartSnapshotLine>) -> Self {
        let subtotal: Money = items.iter().map(CartSnapshotLine::subtotal).sum();
        Self {
            items,
            subtotal,
            total: subtotal,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Cart operations for a single store.
///
/// Stock checks here are advisory. Nothing is reserved until checkout.
pub struct CartService<S: Store> {
    store: S,
}

impl<S: Store> CartService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn view(&self, user_id: UserId) -> Result<CartView, CheckoutError> {
        let lines = self.store.cart_snapshot(user_id).await?;
        Ok(CartView::from_lines(lines))
    }

    /// Adds a product, merging into an existing line for the same product.
    #[tracing::instrument(skip(self))]
    pub async fn add(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartLine, CheckoutError> {
        if quantity == 0 {
            return Err(CheckoutError::InvalidQuantity(quantity));
        }
        let product = self
            .store
            .get_product(product_id)
            .await?
            .ok_or(CheckoutError::ProductNotFound(product_id))?;
        if !product.is_in_stock() {
            return Err(CheckoutError::ProductUnavailable(product.name));
        }

        let line = self.store.add_to_cart(user_id, product_id, quantity).await?;
        tracing::debug!(line_id = %line.id, quantity = line.quantity, "cart line updated");
        Ok(line)
    }

    /// Sets the quantity of a line.
    #[tracing::instrument(skip(self))]
    pub async fn update(
        &self,
        user_id: UserId,
        line_id: CartLineId,
        quantity: u32,
    ) -> Result<CartLine, CheckoutError> {
        if quantity == 0 {
            return Err(CheckoutError::InvalidQuantity(quantity));
        }
        let line = self
            .store
            .get_cart_line(user_id, line_id)
            .await?
            .ok_or(CheckoutError::CartLineNotFound(line_id))?;
        let product = self
            .store
            .get_product(line.product_id)
            .await?
            .ok_or(CheckoutError::ProductNotFound(line.product_id))?;
        if !product.is_active || product.quantity < quantity {
            return Err(CheckoutError::InsufficientStock(product.name));
        }

        self.store
            .set_cart_line_quantity(user_id, line_id, quantity)
            .await?
            .ok_or(CheckoutError::CartLineNotFound(line_id))
    }

    pub async fn remove(&self, user_id: UserId, line_id: CartLineId) -> Result<(), CheckoutError> {
        if self.store.delete_cart_line(user_id, line_id).await? {
            Ok(())
        } else {
            Err(CheckoutError::CartLineNotFound(line_id))
        }
    }

    /// Empties the cart, returning how many lines were removed.
    pub async fn clear(&self, user_id: UserId) -> Result<u64, CheckoutError> {
        Ok(self.store.clear_cart(user_id).await?)
    }
}
