use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    CartLine, CartLineId, CartSnapshotLine, NewOrder, NewOrderItem, NewProduct, Order, OrderId,
    OrderItem, OrderItemId, OrderStatus, Product, ProductId, Result, StatusChange, StoreError,
    UserId,
    store::{Store, StoreTx},
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    products: HashMap<ProductId, Product>,
    // insertion order is cart order
    cart_lines: Vec<CartLine>,
    // insertion order is creation order; items live in `order_items`
    orders: Vec<Order>,
    order_items: Vec<OrderItem>,
}

impl MemoryState {
    fn snapshot(&self, user_id: UserId) -> Vec<CartSnapshotLine> {
        self.cart_lines
            .iter()
            .filter(|line| line.user_id == user_id)
            .filter_map(|line| {
                let product = self.products.get(&line.product_id)?;
                Some(CartSnapshotLine {
                    line_id: line.id,
                    product_id: product.id,
                    quantity: line.quantity,
                    product_name: product.name.clone(),
                    product_sku: product.sku.clone(),
                    unit_price: product.price,
                    available: product.quantity,
                    is_active: product.is_active,
                })
            })
            .collect()
    }

    fn clear_cart(&mut self, user_id: UserId) -> u64 {
        let before = self.cart_lines.len();
        self.cart_lines.retain(|line| line.user_id != user_id);
        (before - self.cart_lines.len()) as u64
    }

    fn items_for(&self, order_id: OrderId) -> Vec<OrderItem> {
        self.order_items
            .iter()
            .filter(|item| item.order_id == order_id)
            .cloned()
            .collect()
    }

    fn with_items(&self, order: &Order) -> Order {
        Order {
            items: self.items_for(order.id),
            ..order.clone()
        }
    }
}

/// In-memory store implementation for tests and local runs.
///
/// A transaction holds an exclusive lock over the whole state and works on
/// a private copy, so transactions are fully serialized.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
    hooks: Arc<TestHooks>,
}

#[derive(Debug, Default)]
struct TestHooks {
    fail_commit: AtomicBool,
    commit_delay_ms: AtomicU64,
    reserve_delay_ms: AtomicU64,
    // one-shot: zeroed inside the next transaction's locked state
    sell_out: Mutex<Option<ProductId>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent commit fail until reset.
    pub fn set_fail_on_commit(&self, fail: bool) {
        self.hooks.fail_commit.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent commit stall for `delay` before applying.
    pub fn set_commit_delay(&self, delay: Duration) {
        self.hooks
            .commit_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Makes every subsequent reservation stall for `delay` inside its
    /// transaction.
    pub fn set_reserve_delay(&self, delay: Duration) {
        self.hooks
            .reserve_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Sets the product's stock to zero at the start of the next transaction.
    ///
    /// Stands in for a concurrent checkout that commits between a caller's
    /// stock pre-check and its reservation.
    pub async fn sell_out_on_next_begin(&self, product_id: ProductId) {
        *self.hooks.sell_out.lock().await = Some(product_id);
    }

    /// Returns the total number of orders across all users.
    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    /// Inserts an order header directly, bypassing any transaction.
    ///
    /// Used by tests to provoke order-number collisions.
    pub async fn seed_order(&self, order: NewOrder) -> Result<Order> {
        let mut state = self.state.lock().await;
        insert_order(&mut state, order)
    }
}

fn add_quantity(current: u32, extra: u32) -> Result<u32> {
    current
        .checked_add(extra)
        .ok_or(StoreError::OutOfRange {
            field: "quantity",
            value: i64::from(current) + i64::from(extra),
        })
}

fn insert_order(state: &mut MemoryState, order: NewOrder) -> Result<Order> {
    if state
        .orders
        .iter()
        .any(|existing| existing.order_number == order.order_number)
    {
        tracing::warn!(order_number = %order.order_number, "order number already taken");
        return Err(StoreError::DuplicateOrderNumber(order.order_number));
    }

    let now = Utc::now();
    let total = order.total();
    let record = Order {
        id: order.id,
        user_id: order.user_id,
        order_number: order.order_number,
        status: OrderStatus::Pending,
        subtotal: order.subtotal,
        tax: order.tax,
        shipping: order.shipping,
        total,
        shipping_address: order.shipping_address,
        billing_address: order.billing_address,
        notes: order.notes,
        created_at: now,
        updated_at: now,
        items: Vec::new(),
    };
    state.orders.push(record.clone());
    Ok(record)
}

#[async_trait]
impl Store for InMemoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<InMemoryTx> {
        let mut guard = self.state.clone().lock_owned().await;
        if let Some(product_id) = self.hooks.sell_out.lock().await.take()
            && let Some(product) = guard.products.get_mut(&product_id)
        {
            product.quantity = 0;
        }
        let working = guard.clone();
        Ok(InMemoryTx {
            guard,
            working,
            hooks: self.hooks.clone(),
        })
    }

    async fn insert_product(&self, product: NewProduct) -> Result<Product> {
        let record = Product {
            id: ProductId::new(),
            name: product.name,
            sku: product.sku,
            price: product.price,
            quantity: product.quantity,
            is_active: product.is_active,
            created_at: Utc::now(),
        };
        self.state
            .lock()
            .await
            .products
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        Ok(self.state.lock().await.products.get(&product_id).cloned())
    }

    async fn delete_product(&self, product_id: ProductId) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.products.remove(&product_id).is_none() {
            return Ok(false);
        }
        state.cart_lines.retain(|line| line.product_id != product_id);
        for item in &mut state.order_items {
            if item.product_id == Some(product_id) {
                item.product_id = None;
            }
        }
        Ok(true)
    }

    async fn cart_snapshot(&self, user_id: UserId) -> Result<Vec<CartSnapshotLine>> {
        Ok(self.state.lock().await.snapshot(user_id))
    }

    async fn add_to_cart(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartLine> {
        let mut state = self.state.lock().await;
        if !state.products.contains_key(&product_id) {
            return Err(StoreError::ProductNotFound(product_id));
        }

        let now = Utc::now();
        if let Some(line) = state
            .cart_lines
            .iter_mut()
            .find(|line| line.user_id == user_id && line.product_id == product_id)
        {
            line.quantity = add_quantity(line.quantity, quantity)?;
            line.updated_at = now;
            return Ok(line.clone());
        }

        let line = CartLine {
            id: CartLineId::new(),
            user_id,
            product_id,
            quantity,
            created_at: now,
            updated_at: now,
        };
        state.cart_lines.push(line.clone());
        Ok(line)
    }

    async fn get_cart_line(
        &self,
        user_id: UserId,
        line_id: CartLineId,
    ) -> Result<Option<CartLine>> {
        Ok(self
            .state
            .lock()
            .await
            .cart_lines
            .iter()
            .find(|line| line.id == line_id && line.user_id == user_id)
            .cloned())
    }

    async fn set_cart_line_quantity(
        &self,
        user_id: UserId,
        line_id: CartLineId,
        quantity: u32,
    ) -> Result<Option<CartLine>> {
        let mut state = self.state.lock().await;
        Ok(state
            .cart_lines
            .iter_mut()
            .find(|line| line.id == line_id && line.user_id == user_id)
            .map(|line| {
                line.quantity = quantity;
                line.updated_at = Utc::now();
                line.clone()
            }))
    }

    async fn delete_cart_line(&self, user_id: UserId, line_id: CartLineId) -> Result<bool> {
        let mut state = self.state.lock().await;
        let before = state.cart_lines.len();
        state
            .cart_lines
            .retain(|line| !(line.id == line_id && line.user_id == user_id));
        Ok(state.cart_lines.len() < before)
    }

    async fn clear_cart(&self, user_id: UserId) -> Result<u64> {
        Ok(self.state.lock().await.clear_cart(user_id))
    }

    async fn list_orders(
        &self,
        user_id: UserId,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Order>, u64)> {
        let state = self.state.lock().await;
        let mine: Vec<&Order> = state
            .orders
            .iter()
            .rev()
            .filter(|order| order.user_id == user_id)
            .collect();
        let total = mine.len() as u64;
        let page = mine
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|order| state.with_items(order))
            .collect();
        Ok((page, total))
    }

    async fn find_order(&self, user_id: UserId, order_id: OrderId) -> Result<Option<Order>> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .iter()
            .find(|order| order.id == order_id && order.user_id == user_id)
            .map(|order| state.with_items(order)))
    }

    async fn set_order_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Option<StatusChange>> {
        let mut state = self.state.lock().await;
        let Some(order) = state.orders.iter_mut().find(|order| order.id == order_id) else {
            return Ok(None);
        };
        let previous = order.status;
        order.status = status;
        order.updated_at = Utc::now();
        let order = order.clone();
        Ok(Some(StatusChange {
            previous,
            order: state.with_items(&order),
        }))
    }
}

/// Transaction over an [`InMemoryStore`].
pub struct InMemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    hooks: Arc<TestHooks>,
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn reserve(&mut self, product_id: ProductId, quantity: u32) -> Result<()> {
        let delay = self.hooks.reserve_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        match self.working.products.get_mut(&product_id) {
            Some(product) if product.is_active && product.quantity >= quantity => {
                product.quantity -= quantity;
                Ok(())
            }
            _ => Err(StoreError::InsufficientStock { product_id }),
        }
    }

    async fn release(&mut self, product_id: ProductId, quantity: u32) -> Result<bool> {
        match self.working.products.get_mut(&product_id) {
            Some(product) => {
                product.quantity = add_quantity(product.quantity, quantity)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order> {
        insert_order(&mut self.working, order)
    }

    async fn insert_order_item(
        &mut self,
        order_id: OrderId,
        item: NewOrderItem,
    ) -> Result<OrderItem> {
        let subtotal = item.subtotal();
        let record = OrderItem {
            id: OrderItemId::new(),
            order_id,
            product_id: Some(item.product_id),
            product_name: item.product_name,
            product_sku: item.product_sku,
            quantity: item.quantity,
            unit_price: item.unit_price,
            subtotal,
            created_at: Utc::now(),
        };
        self.working.order_items.push(record.clone());
        Ok(record)
    }

    async fn clear_cart(&mut self, user_id: UserId) -> Result<u64> {
        Ok(self.working.clear_cart(user_id))
    }

    async fn lock_order(&mut self, user_id: UserId, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self
            .working
            .orders
            .iter()
            .find(|order| order.id == order_id && order.user_id == user_id)
            .cloned())
    }

    async fn order_items(&mut self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        Ok(self.working.items_for(order_id))
    }

    async fn update_order_status(&mut self, order_id: OrderId, status: OrderStatus) -> Result<()> {
        if let Some(order) = self
            .working
            .orders
            .iter_mut()
            .find(|order| order.id == order_id)
        {
            order.status = status;
            order.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let delay = self.hooks.commit_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.hooks.fail_commit.load(Ordering::SeqCst) {
            tracing::warn!("in-memory commit failed by test hook, discarding writes");
            return Err(StoreError::CommitFailed(
                "injected commit failure".to_string(),
            ));
        }
        let InMemoryTx {
            mut guard, working, ..
        } = self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Address, Money};

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

    fn new_order(user_id: UserId, number: &str) -> NewOrder {
        NewOrder {
            id: OrderId::new(),
            user_id,
            order_number: number.to_string(),
            subtotal: Money::from_cents(1000),
            tax: Money::zero(),
            shipping: Money::zero(),
            shipping_address: address(),
            billing_address: address(),
            notes: None,
        }
    }

    async fn product(store: &InMemoryStore, quantity: u32) -> Product {
        store
            .insert_product(NewProduct::new(
                "Widget",
                "SKU-001",
                Money::from_cents(1000),
                quantity,
            ))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn reserve_decrements_and_guards() {
        let store = InMemoryStore::new();
        let product = product(&store, 5).await;

        let mut tx = store.begin().await.unwrap();
        tx.reserve(product.id, 3).await.unwrap();
        let err = tx.reserve(product.id, 3).await.unwrap_err();
        assert!(matches!(err, StoreError::InsufficientStock { product_id } if product_id == product.id));
        tx.reserve(product.id, 2).await.unwrap();
        tx.commit().await.unwrap();

        let after = store.get_product(product.id).await.unwrap().unwrap();
        assert_eq!(after.quantity, 0);
    }

    #[tokio::test]
    async fn reserve_rejects_inactive_and_missing_products() {
        let store = InMemoryStore::new();
        let inactive = store
            .insert_product(NewProduct::new("Old", "SKU-OLD", Money::from_cents(100), 10).inactive())
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.reserve(inactive.id, 1).await.is_err());
        assert!(tx.reserve(ProductId::new(), 1).await.is_err());
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = InMemoryStore::new();
        let product = product(&store, 5).await;
        let user = UserId::new();
        store.add_to_cart(user, product.id, 1).await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            tx.reserve(product.id, 5).await.unwrap();
            tx.insert_order(new_order(user, "ORD-1")).await.unwrap();
            tx.clear_cart(user).await.unwrap();
        }

        assert_eq!(store.get_product(product.id).await.unwrap().unwrap().quantity, 5);
        assert_eq!(store.order_count().await, 0);
        assert_eq!(store.cart_snapshot(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_commit_discards_writes() {
        let store = InMemoryStore::new();
        let product = product(&store, 5).await;
        store.set_fail_on_commit(true);

        let mut tx = store.begin().await.unwrap();
        tx.release(product.id, 10).await.unwrap();
        assert!(matches!(tx.commit().await, Err(StoreError::CommitFailed(_))));

        assert_eq!(store.get_product(product.id).await.unwrap().unwrap().quantity, 5);
    }

    #[tokio::test]
    async fn release_of_missing_product_is_noop() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(!tx.release(ProductId::new(), 3).await.unwrap());
    }

    #[tokio::test]
    async fn quantity_overflow_is_an_error() {
        let store = InMemoryStore::new();
        let product = product(&store, u32::MAX).await;
        let user = UserId::new();

        store.add_to_cart(user, product.id, u32::MAX).await.unwrap();
        let err = store.add_to_cart(user, product.id, 1).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::OutOfRange { field: "quantity", .. }
        ));
        assert_eq!(store.cart_snapshot(user).await.unwrap()[0].quantity, u32::MAX);

        let mut tx = store.begin().await.unwrap();
        let err = tx.release(product.id, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::OutOfRange { .. }));
    }

    #[tokio::test]
    async fn sell_out_applies_to_the_next_transaction_only() {
        let store = InMemoryStore::new();
        let product = product(&store, 5).await;
        store.sell_out_on_next_begin(product.id).await;

        let mut tx = store.begin().await.unwrap();
        assert!(matches!(
            tx.reserve(product.id, 1).await,
            Err(StoreError::InsufficientStock { .. })
        ));
        drop(tx);
        assert_eq!(store.get_product(product.id).await.unwrap().unwrap().quantity, 0);

        let mut tx = store.begin().await.unwrap();
        tx.release(product.id, 2).await.unwrap();
        tx.reserve(product.id, 2).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_order_number_is_rejected() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        store.seed_order(new_order(user, "ORD-DUP")).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = tx.insert_order(new_order(user, "ORD-DUP")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateOrderNumber(n) if n == "ORD-DUP"));
    }

    #[tokio::test]
    async fn add_to_cart_merges_lines() {
        let store = InMemoryStore::new();
        let product = product(&store, 5).await;
        let user = UserId::new();

        let first = store.add_to_cart(user, product.id, 1).await.unwrap();
        let second = store.add_to_cart(user, product.id, 2).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.quantity, 3);
        assert_eq!(store.cart_snapshot(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deleting_product_nulls_item_reference() {
        let store = InMemoryStore::new();
        let product = product(&store, 5).await;
        let user = UserId::new();

        let mut tx = store.begin().await.unwrap();
        let order = tx.insert_order(new_order(user, "ORD-2")).await.unwrap();
        tx.insert_order_item(
            order.id,
            NewOrderItem {
                product_id: product.id,
                product_name: product.name.clone(),
                product_sku: product.sku.clone(),
                quantity: 1,
                unit_price: product.price,
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert!(store.delete_product(product.id).await.unwrap());

        let order = store.find_order(user, order.id).await.unwrap().unwrap();
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].product_id, None);
        assert_eq!(order.items[0].product_name, "Widget");
    }

    #[tokio::test]
    async fn orders_are_scoped_to_user() {
        let store = InMemoryStore::new();
        let owner = UserId::new();
        let order = store.seed_order(new_order(owner, "ORD-3")).await.unwrap();

        assert!(store.find_order(owner, order.id).await.unwrap().is_some());
        assert!(store.find_order(UserId::new(), order.id).await.unwrap().is_none());

        let mut tx = store.begin().await.unwrap();
        assert!(tx.lock_order(UserId::new(), order.id).await.unwrap().is_none());
    }
}
