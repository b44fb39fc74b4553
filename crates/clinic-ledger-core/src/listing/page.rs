//! Response envelope for paginated listings.

use serde::{Deserialize, Serialize};

/// One page of results plus navigation metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: u64,
    /// `ceil(total_count / limit)`; zero when there are no rows
    pub total_pages: u64,
    pub current_page: u32,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total_count: u64, page: u32, limit: u32) -> Self {
        let limit = u64::from(limit.max(1));
        let total_pages = total_count.div_ceil(limit);
        Self {
            items,
            total_count,
            total_pages,
            current_page: page,
            has_next_page: u64::from(page) < total_pages,
            has_previous_page: page > 1,
        }
    }

    /// Transform the items, keeping the metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total_count: self.total_count,
            total_pages: self.total_pages,
            current_page: self.current_page,
            has_next_page: self.has_next_page,
            has_previous_page: self.has_previous_page,
        }
    }
}
