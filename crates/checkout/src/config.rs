//! Checkout tuning knobs.

use std::time::Duration;

/// Limits applied to the placement and cancellation transactions.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// Upper bound for one transaction, from begin to commit. An expired
    /// transaction is dropped and therefore rolled back.
    pub transaction_timeout: Duration,

    /// How many order numbers to try before giving up on a placement.
    pub order_number_attempts: u32,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            transaction_timeout: Duration::from_secs(5),
            order_number_attempts: 5,
        }
    }
}
