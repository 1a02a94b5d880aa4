//! Data store modules backed by SQLite

pub mod catalog;
pub mod db;
pub mod documents;
pub mod items;
pub mod kits;
pub mod lifecycle;
pub mod logs;
pub mod technical;
pub mod uid;
pub mod users;

pub use db::{Database, StoreError};

use serde::Serialize;

/// Page sizes offered to clients
pub const PAGE_SIZES: [u32; 5] = [5, 10, 25, 50, 100];
const DEFAULT_PAGE_SIZE: u32 = 10;

/// Requested page, as sent by the client
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    /// Lenient parsing: a non-numeric page is page 1, an unknown size is the default
    pub fn parse(page: Option<&str>, page_size: Option<&str>) -> Self {
        let page = page
            .and_then(|p| p.trim().parse::<u32>().ok())
            .filter(|p| *p > 0)
            .unwrap_or(1);
        let page_size = page_size
            .and_then(|s| s.trim().parse::<u32>().ok())
            .filter(|s| PAGE_SIZES.contains(s))
            .unwrap_or(DEFAULT_PAGE_SIZE);
        Self { page, page_size }
    }

    /// Clamp to the last page for `total` rows; returns (page, num_pages, offset)
    pub fn resolve(&self, total: u64) -> (u32, u32, u64) {
        let size = self.page_size.max(1) as u64;
        let num_pages = total.div_ceil(size).max(1) as u32;
        let page = self.page.min(num_pages);
        let offset = (page as u64 - 1) * size;
        (page, num_pages, offset)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// One page of results
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub num_pages: u32,
    pub total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_request_is_lenient() {
        let req = PageRequest::parse(Some("abc"), Some("7"));
        assert_eq!(req.page, 1);
        assert_eq!(req.page_size, 10);

        let req = PageRequest::parse(Some("3"), Some("25"));
        assert_eq!((req.page, req.page_size), (3, 25));
    }

    #[test]
    fn page_past_the_end_is_last_page() {
        let req = PageRequest::parse(Some("9"), Some("5"));
        assert_eq!(req.resolve(12), (3, 3, 10));
        assert_eq!(req.resolve(0), (1, 1, 0));
    }
}
