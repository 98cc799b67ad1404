//! # Pagination
//!
//! Deterministic slicing of a full result set. Out-of-range pages are an
//! error, never clamped.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE: usize = 1;
pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaginationError {
    #[error("Invalid page: {page} is out of range (1..={pages})")]
    InvalidPage { page: usize, pages: usize },

    #[error("Page size must be a positive integer")]
    InvalidPageSize,
}

/// Optional paging parameters as they arrive on a request.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

impl PageParams {
    /// `(page, page_size)` with defaults filled in.
    pub fn resolve(&self, default_page_size: usize) -> (usize, usize) {
        (
            self.page.unwrap_or(DEFAULT_PAGE),
            self.page_size.unwrap_or(default_page_size),
        )
    }
}

/// One page of results plus the pre-pagination total.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub total: usize,
    pub items: Vec<T>,
}

/// Number of pages for `total` items. An empty set still has page 1.
pub fn page_count(total: usize, page_size: usize) -> usize {
    if total == 0 {
        1
    } else {
        total.div_ceil(page_size)
    }
}

/// Return `items[(page-1)*page_size .. page*page_size]`.
pub fn paginate<T>(items: Vec<T>, page: usize, page_size: usize) -> Result<Page<T>, PaginationError> {
    if page_size == 0 {
        return Err(PaginationError::InvalidPageSize);
    }

    let total = items.len();
    let pages = page_count(total, page_size);
    if page == 0 || page > pages {
        return Err(PaginationError::InvalidPage { page, pages });
    }

    let items = items
        .into_iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .collect();

    Ok(Page { total, items })
}
