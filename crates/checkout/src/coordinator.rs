//! Checkout transaction coordinator.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use common::{Money, OrderId, UserId};
use serde::Deserialize;
use store::{
    Address, CartSnapshotLine, NewOrder, NewOrderItem, Order, OrderStatus, Store, StoreError,
    StoreTx,
};

use crate::config::CheckoutConfig;
use crate::error::CheckoutError;
use crate::order_number;
use crate::pagination::{PageRequest, Paginated};

/// Input for placing an order from the user's cart.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrder {
    pub shipping_address: Address,
    /// Defaults to the shipping address.
    #[serde(default)]
    pub billing_address: Option<Address>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl PlaceOrder {
    pub fn ship_to(shipping_address: Address) -> Self {
        Self {
            shipping_address,
            billing_address: None,
            notes: None,
        }
    }
}

/// Order amounts computed once at placement.
///
/// Tax and shipping are not modelled and are always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTotals {
    pub subtotal: Money,
    pub tax: Money,
    pub shipping: Money,
}

impl OrderTotals {
    pub fn from_lines(lines: &[CartSnapshotLine]) -> Self {
        Self {
            subtotal: lines.iter().map(CartSnapshotLine::subtotal).sum(),
            tax: Money::zero(),
            shipping: Money::zero(),
        }
    }

    pub fn total(&self) -> Money {
        self.subtotal + self.tax + self.shipping
    }
}

type OrderNumberFn = dyn Fn() -> String + Send + Sync;

/// Orchestrates order placement, cancellation and status changes.
///
/// Placement and cancellation each run as one store transaction; any
/// failure before commit drops the transaction and with it every write.
pub struct CheckoutCoordinator<S: Store> {
    store: S,
    config: CheckoutConfig,
    order_numbers: Arc<OrderNumberFn>,
}

impl<S: Store> CheckoutCoordinator<S> {
    /// Creates a coordinator with default limits.
    pub fn new(store: S) -> Self {
        Self::with_config(store, CheckoutConfig::default())
    }

    pub fn with_config(store: S, config: CheckoutConfig) -> Self {
        Self {
            store,
            config,
            order_numbers: Arc::new(order_number::generate),
        }
    }

    /// Replaces the order number generator.
    pub fn with_order_numbers(
        mut self,
        generate: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        self.order_numbers = Arc::new(generate);
        self
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Places an order from everything in the user's cart.
    ///
    /// Stock is checked twice: once against the snapshot for a clear error
    /// with no side effects, and again by the guarded reservation inside the
    /// transaction, which is what actually prevents overselling.
    #[tracing::instrument(skip(self, request))]
    pub async fn place_order(
        &self,
        user_id: UserId,
        request: PlaceOrder,
    ) -> Result<Order, CheckoutError> {
        let started = Instant::now();

        let lines = self.store.cart_snapshot(user_id).await?;
        if lines.is_empty() {
            reject("empty_cart");
            return Err(CheckoutError::EmptyCart);
        }
        if let Some(line) = lines.iter().find(|line| !line.is_satisfiable()) {
            tracing::warn!(
                product_id = %line.product_id,
                requested = line.quantity,
                available = line.available,
                "checkout rejected by stock pre-check"
            );
            reject("insufficient_stock");
            return Err(CheckoutError::InsufficientStock(line.product_name.clone()));
        }

        let totals = OrderTotals::from_lines(&lines);
        let billing_address = request
            .billing_address
            .unwrap_or_else(|| request.shipping_address.clone());

        let mut attempt = 0;
        loop {
            attempt += 1;
            let new_order = NewOrder {
                id: OrderId::new(),
                user_id,
                order_number: (self.order_numbers)(),
                subtotal: totals.subtotal,
                tax: totals.tax,
                shipping: totals.shipping,
                shipping_address: request.shipping_address.clone(),
                billing_address: billing_address.clone(),
                notes: request.notes.clone(),
            };

            let staged = tokio::time::timeout(
                self.config.transaction_timeout,
                self.stage_order(new_order, &lines),
            )
            .await;

            let outcome = match staged {
                Ok(Ok((tx, order))) => tx.commit().await.map(|()| order),
                Ok(Err(e)) => Err(e),
                Err(_) => {
                    tracing::error!(
                        timeout_ms = self.config.transaction_timeout.as_millis() as u64,
                        "order placement timed out and was rolled back"
                    );
                    reject("timeout");
                    return Err(CheckoutError::OrderCreationFailed);
                }
            };

            match outcome {
                Ok(order) => {
                    let units: u64 = lines.iter().map(|line| u64::from(line.quantity)).sum();
                    metrics::counter!("orders_placed_total").increment(1);
                    metrics::counter!("inventory_units_reserved_total").increment(units);
                    metrics::histogram!("checkout_duration_seconds")
                        .record(started.elapsed().as_secs_f64());
                    tracing::info!(
                        order_id = %order.id,
                        order_number = %order.order_number,
                        total = %order.total,
                        items = order.items.len(),
                        "order placed"
                    );
                    return Ok(order);
                }
                Err(StoreError::InsufficientStock { product_id }) => {
                    let name = lines
                        .iter()
                        .find(|line| line.product_id == product_id)
                        .map(|line| line.product_name.clone())
                        .unwrap_or_else(|| product_id.to_string());
                    tracing::warn!(%product_id, "reservation lost a race, order rolled back");
                    reject("insufficient_stock");
                    return Err(CheckoutError::InsufficientStock(name));
                }
                Err(StoreError::DuplicateOrderNumber(number))
                    if attempt < self.config.order_number_attempts =>
                {
                    tracing::warn!(%number, attempt, "order number collision, retrying");
                }
                Err(e) => {
                    tracing::error!(error = %e, attempt, "order placement rolled back");
                    reject("storage");
                    return Err(CheckoutError::OrderCreationFailed);
                }
            }
        }
    }

    /// Performs every placement write and hands back the open transaction.
    ///
    /// The caller's deadline covers this part only; once the transaction is
    /// returned, commit runs to completion so a slow commit is never reported
    /// as a failure after it has been applied.
    async fn stage_order(
        &self,
        new_order: NewOrder,
        lines: &[CartSnapshotLine],
    ) -> Result<(S::Tx, Order), StoreError> {
        let mut tx = self.store.begin().await?;

        let mut order = tx.insert_order(new_order).await?;
        for line in lines {
            let item = tx
                .insert_order_item(order.id, NewOrderItem::from(line))
                .await?;
            order.items.push(item);
        }

        // product id order, so concurrent checkouts take row locks in the same sequence
        let mut reservations: Vec<&CartSnapshotLine> = lines.iter().collect();
        reservations.sort_by_key(|line| line.product_id);
        for line in reservations {
            tx.reserve(line.product_id, line.quantity).await?;
        }
        tx.clear_cart(order.user_id).await?;

        Ok((tx, order))
    }

    /// Cancels a pending or processing order and returns its stock.
    ///
    /// The status is read under an exclusive lock in the same transaction
    /// that releases inventory, so a repeated or concurrent cancel sees
    /// `cancelled` and fails instead of releasing twice.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<Order, CheckoutError> {
        let staged = tokio::time::timeout(
            self.config.transaction_timeout,
            self.stage_cancellation(user_id, order_id),
        )
        .await;

        let (tx, order, released) = match staged {
            Ok(staged) => staged?,
            Err(_) => {
                tracing::error!("order cancellation timed out and was rolled back");
                return Err(CheckoutError::OrderCancellationFailed);
            }
        };
        tx.commit().await.map_err(cancellation_failed)?;

        metrics::counter!("orders_cancelled_total").increment(1);
        metrics::counter!("inventory_units_released_total").increment(released);
        tracing::info!(order_number = %order.order_number, released, "order cancelled");
        Ok(order)
    }

    async fn stage_cancellation(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<(S::Tx, Order, u64), CheckoutError> {
        let mut tx = self.store.begin().await.map_err(cancellation_failed)?;

        let mut order = tx
            .lock_order(user_id, order_id)
            .await
            .map_err(cancellation_failed)?
            .ok_or(CheckoutError::OrderNotFound(order_id))?;

        if !order.status.can_cancel() {
            tracing::warn!(status = %order.status, "order not cancellable");
            return Err(CheckoutError::OrderNotCancellable(order.status));
        }

        let items = tx.order_items(order_id).await.map_err(cancellation_failed)?;
        let mut released = 0;
        for item in &items {
            // deleted products have nothing to return to
            let Some(product_id) = item.product_id else {
                continue;
            };
            if tx
                .release(product_id, item.quantity)
                .await
                .map_err(cancellation_failed)?
            {
                released += u64::from(item.quantity);
            }
        }

        tx.update_order_status(order_id, OrderStatus::Cancelled)
            .await
            .map_err(cancellation_failed)?;

        order.status = OrderStatus::Cancelled;
        order.updated_at = Utc::now();
        order.items = items;
        Ok((tx, order, released))
    }

    /// Lists the user's orders, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn list_orders(
        &self,
        user_id: UserId,
        page: PageRequest,
    ) -> Result<Paginated<Order>, CheckoutError> {
        let (orders, total) = self
            .store
            .list_orders(user_id, page.per_page, page.offset())
            .await?;
        Ok(Paginated::new(orders, page, total))
    }

    /// Loads one of the user's orders with its items.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, user_id: UserId, order_id: OrderId) -> Result<Order, CheckoutError> {
        self.store
            .find_order(user_id, order_id)
            .await?
            .ok_or(CheckoutError::OrderNotFound(order_id))
    }

    /// Administrative status overwrite.
    ///
    /// Any of the five statuses is accepted from any current status. Jumps
    /// outside the documented lifecycle are allowed but logged.
    #[tracing::instrument(skip(self))]
    pub async fn set_order_status(
        &self,
        order_id: OrderId,
        status: &str,
    ) -> Result<Order, CheckoutError> {
        let status: OrderStatus = status
            .parse()
            .map_err(|_| CheckoutError::InvalidStatus(status.to_string()))?;

        let change = self
            .store
            .set_order_status(order_id, status)
            .await?
            .ok_or(CheckoutError::OrderNotFound(order_id))?;

        if change.previous != status && !change.previous.can_transition_to(status) {
            tracing::warn!(
                from = %change.previous,
                to = %status,
                "order status set outside the documented lifecycle"
            );
        }
        Ok(change.order)
    }
}

fn reject(reason: &'static str) {
    metrics::counter!("orders_rejected_total", "reason" => reason).increment(1);
}

fn cancellation_failed(e: StoreError) -> CheckoutError {
    tracing::error!(error = %e, "order cancellation rolled back");
    CheckoutError::OrderCancellationFailed
}

#[cfg(test)]
mod tests {
    use common::ProductId;
    use store::{CartLineId, InMemoryStore, NewProduct};

    use super::*;

    fn address() -> Address {
        Address {
            name: "Ada Lovelace".to_string(),
            line1: "12 St James's Square".to_string(),
            line2: None,
            city: "London".to_string(),
            state: None,
            postal_code: "SW1Y 4JH".to_string(),
            country: "GB".to_string(),
        }
    }

    fn line(quantity: u32, price_cents: i64) -> CartSnapshotLine {
        CartSnapshotLine {
            line_id: CartLineId::new(),
            product_id: ProductId::new(),
            quantity,
            product_name: "Widget".to_string(),
            product_sku: "SKU-001".to_string(),
            unit_price: Money::from_cents(price_cents),
            available: 100,
            is_active: true,
        }
    }

    #[test]
    fn totals_sum_line_subtotals() {
        let totals = OrderTotals::from_lines(&[line(2, 1000), line(1, 550)]);
        assert_eq!(totals.subtotal.cents(), 2550);
        assert!(totals.tax.is_zero());
        assert!(totals.shipping.is_zero());
        assert_eq!(totals.total(), totals.subtotal);
    }

    #[tokio::test]
    async fn billing_defaults_to_shipping() {
        let store = InMemoryStore::new();
        let product = store
            .insert_product(NewProduct::new("Widget", "SKU-001", Money::from_cents(1000), 5))
            .await
            .unwrap();
        let user = UserId::new();
        store.add_to_cart(user, product.id, 1).await.unwrap();

        let coordinator = CheckoutCoordinator::new(store);
        let order = coordinator
            .place_order(user, PlaceOrder::ship_to(address()))
            .await
            .unwrap();

        assert_eq!(order.billing_address, order.shipping_address);
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn explicit_billing_and_notes_are_kept() {
        let store = InMemoryStore::new();
        let product = store
            .insert_product(NewProduct::new("Widget", "SKU-001", Money::from_cents(1000), 5))
            .await
            .unwrap();
        let user = UserId::new();
        store.add_to_cart(user, product.id, 1).await.unwrap();

        let billing = Address {
            city: "Cambridge".to_string(),
            ..address()
        };
        let coordinator = CheckoutCoordinator::new(store);
        let order = coordinator
            .place_order(
                user,
                PlaceOrder {
                    shipping_address: address(),
                    billing_address: Some(billing.clone()),
                    notes: Some("gift wrap".to_string()),
                },
            )
            .await
            .unwrap();

        assert_eq!(order.billing_address, billing);
        assert_eq!(order.notes.as_deref(), Some("gift wrap"));
    }

    #[tokio::test]
    async fn invalid_status_is_rejected_before_lookup() {
        let coordinator = CheckoutCoordinator::new(InMemoryStore::new());
        let err = coordinator
            .set_order_status(OrderId::new(), "refunded")
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::InvalidStatus(s) if s == "refunded"));

        let err = coordinator
            .set_order_status(OrderId::new(), "shipped")
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::OrderNotFound(_)));
    }
}
