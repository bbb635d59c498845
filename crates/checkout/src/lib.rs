//! Checkout core for the storefront.
//!
//! Turns a user's cart into an order in one atomic unit:
//! 1. read the cart snapshot and pre-check stock
//! 2. insert the order and its item snapshots
//! 3. reserve inventory with a guarded decrement per line
//! 4. clear the cart and commit
//!
//! Cancellation releases exactly what the order reserved, inside a
//! transaction that also checks and flips the status.

pub mod cart;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod order_number;
pub mod pagination;

pub use cart::{CartService, CartView};
pub use config::CheckoutConfig;
pub use coordinator::{CheckoutCoordinator, OrderTotals, PlaceOrder};
pub use error::CheckoutError;
pub use pagination::{PageRequest, Paginated};
