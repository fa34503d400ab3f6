//! Pagination types for storage queries.

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::result::StorageResult;

use super::sorting::{SortDirection, SortField};

/// Default page size.
const DEFAULT_PAGE_SIZE: u32 = 25;

/// Request parameters for paginated queries.
///
/// Job queries are ordered by `updated_at`; requesting any other sort
/// field fails with [`StorageError::InvalidArgument`] at the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRequest {
    /// Number of items to skip.
    #[serde(default)]
    pub offset: u64,
    /// Maximum number of items to return.
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Field and direction to order by.
    #[serde(default = "default_order")]
    pub order: SortField,
}

impl PageRequest {
    /// Create a new page request.
    pub fn new(offset: u64, limit: u32, order: SortField) -> Self {
        Self {
            offset,
            limit,
            order,
        }
    }

    /// Page of jobs ordered by `updated_at` ascending.
    pub fn ascending_on_updated_at(offset: u64, limit: u32) -> Self {
        Self::new(offset, limit, SortField::asc(SortField::UPDATED_AT))
    }

    /// Page of jobs ordered by `updated_at` descending.
    pub fn descending_on_updated_at(offset: u64, limit: u32) -> Self {
        Self::new(offset, limit, SortField::desc(SortField::UPDATED_AT))
    }

    /// Return the direction when ordering on `updated_at`, or an
    /// invalid-argument error for any other sort field.
    pub fn updated_at_direction(&self) -> StorageResult<SortDirection> {
        if self.order.field == SortField::UPDATED_AT {
            Ok(self.order.direction)
        } else {
            Err(StorageError::invalid_argument(format!(
                "unsupported sorting: {}:{}",
                self.order.field,
                self.order.direction.as_sql()
            )))
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::ascending_on_updated_at(0, DEFAULT_PAGE_SIZE)
    }
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_order() -> SortField {
    SortField::asc(SortField::UPDATED_AT)
}

/// One page of results plus the total count behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T: serde::Serialize> {
    /// The items on this page.
    pub items: Vec<T>,
    /// Total number of items across all pages.
    pub total: u64,
    /// Offset this page started at.
    pub offset: u64,
    /// Limit the page was requested with.
    pub limit: u32,
    /// Whether more items exist beyond this page.
    pub has_next: bool,
}

impl<T: serde::Serialize> Page<T> {
    /// Create a new page.
    pub fn new(items: Vec<T>, total: u64, request: &PageRequest) -> Self {
        let has_next = request.offset + (items.len() as u64) < total;
        Self {
            items,
            total,
            offset: request.offset,
            limit: request.limit,
            has_next,
        }
    }

    /// Create an empty page.
    pub fn empty(request: &PageRequest) -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            offset: request.offset,
            limit: request.limit,
            has_next: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_updated_at_direction() {
        let request = PageRequest::descending_on_updated_at(0, 10);
        assert_eq!(
            request.updated_at_direction().expect("supported"),
            SortDirection::Desc
        );

        let request = PageRequest::new(0, 10, SortField::asc("created_at"));
        let err = request.updated_at_direction().expect_err("unsupported");
        assert!(matches!(err, StorageError::InvalidArgument(_)));
    }

    #[test]
    fn test_page_has_next() {
        let request = PageRequest::ascending_on_updated_at(0, 2);
        let page = Page::new(vec![1, 2], 5, &request);
        assert!(page.has_next);

        let request = PageRequest::ascending_on_updated_at(4, 2);
        let page = Page::new(vec![5], 5, &request);
        assert!(!page.has_next);
    }
}
