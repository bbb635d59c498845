//! Page requests and paginated results.

use serde::{Deserialize, Serialize};

/// A 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    pub const DEFAULT_PER_PAGE: u32 = 15;
    pub const MAX_PER_PAGE: u32 = 100;

    /// Creates a page request, clamping out-of-range values.
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, Self::MAX_PER_PAGE),
        }
    }

    pub fn first() -> Self {
        Self::new(1, Self::DEFAULT_PER_PAGE)
    }

    /// Number of rows to skip.
    pub fn offset(&self) -> u32 {
        (self.page - 1).saturating_mul(self.per_page)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::first()
    }
}

/// One page of results plus the totals needed to navigate.
#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub current_page: u32,
    pub per_page: u32,
    pub total: u64,
    pub last_page: u32,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, request: PageRequest, total: u64) -> Self {
        let pages = total.div_ceil(u64::from(request.per_page)).max(1);
        Self {
            data,
            current_page: request.page,
            per_page: request.per_page,
            total,
            last_page: u32::try_from(pages).unwrap_or(u32::MAX),
        }
    }
}
