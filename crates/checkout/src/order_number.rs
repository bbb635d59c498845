//! Order number generation.
//!
//! Format: `ORD-<yyyymmddHHMMSS>-<8 uppercase alphanumerics>`. The store's
//! unique constraint is authoritative; callers retry on a collision.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;

const PREFIX: &str = "ORD";
const SUFFIX_LEN: usize = 8;

/// Generates a fresh order number for the current time.
pub fn generate() -> String {
    generate_at(Utc::now())
}

/// Generates an order number stamped with `now`.
pub fn generate_at(now: DateTime<Utc>) -> String {
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();

    format!("{PREFIX}-{}-{suffix}", now.format("%Y%m%d%H%M%S"))
}
