//! Order listing queries and pagination.

use common::UserId;
use serde::{Deserialize, Serialize};

use crate::order::OrderStatus;

/// Largest page size a caller may request.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Default page size.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Filter and paging for listing a user's orders, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderQuery {
    pub user_id: UserId,
    pub status: Option<OrderStatus>,
    /// 1-based page number.
    pub page: u32,
    pub limit: u32,
}

impl OrderQuery {
    /// Creates a query for the first page with the default page size.
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id,
            status: None,
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
        }
    }

    /// Filters by status.
    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets page and limit, clamping both into their valid ranges.
    pub fn paged(mut self, page: u32, limit: u32) -> Self {
        self.page = page.max(1);
        self.limit = limit.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Number of rows to skip.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

/// One page of results with pagination metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, query: &OrderQuery, total: u64) -> Self {
        Self {
            items,
            page: query.page,
            limit: query.limit,
            total,
        }
    }

    /// Total number of pages.
    pub fn pages(&self) -> u64 {
        self.total.div_ceil(u64::from(self.limit.max(1)))
    }

    pub fn has_next(&self) -> bool {
        u64::from(self.page) * u64::from(self.limit) < self.total
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paged_clamps() {
        let query = OrderQuery::for_user(UserId::new()).paged(0, 1000);
        assert_eq!(query.page, 1);
        assert_eq!(query.limit, MAX_PAGE_SIZE);
        assert_eq!(query.offset(), 0);
    }

    #[test]
    fn test_offset() {
        let query = OrderQuery::for_user(UserId::new()).paged(3, 10);
        assert_eq!(query.offset(), 20);
    }

    #[test]
    fn test_page_metadata() {
        let query = OrderQuery::for_user(UserId::new()).paged(2, 10);
        let page: Page<u8> = Page::new(vec![0; 10], &query, 25);
        assert_eq!(page.pages(), 3);
        assert!(page.has_next());
        assert!(page.has_prev());

        let last = OrderQuery::for_user(UserId::new()).paged(3, 10);
        let page: Page<u8> = Page::new(vec![0; 5], &last, 25);
        assert!(!page.has_next());
    }
}
