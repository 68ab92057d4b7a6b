use serde::Serialize;

use crate::error::{Error, Result};

pub const DEFAULT_PAGE_SIZE: u64 = 100;

/// Largest offset or size a SQL `LIMIT`/`OFFSET` can carry.
const MAX_ROWS: u64 = i64::MAX as u64;

/// 1-based page selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u64,
    size: u64,
}

impl PageRequest {
    pub fn new(page: u64, size: u64) -> Result<Self> {
        if page == 0 {
            return Err(Error::InvalidPage("page starts at 1"));
        }
        if size == 0 {
            return Err(Error::InvalidPage("size must be positive"));
        }
        if size > MAX_ROWS {
            return Err(Error::InvalidPage("size is too large"));
        }
        match (page - 1).checked_mul(size) {
            Some(offset) if offset <= MAX_ROWS => Ok(Self { page, size }),
            _ => Err(Error::InvalidPage("page is too large")),
        }
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1) * self.size
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u64,
    pub size: u64,
    pub total_items: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total_items: u64) -> Self {
        Self {
            items,
            page: request.page,
            size: request.size,
            total_items,
            total_pages: total_items.div_ceil(request.size),
        }
    }

    /// `Link` header value for this page, relative to `base_url`.
    pub fn link_header(&self, base_url: &str) -> String {
        let last = self.total_pages.max(1);
        let link = |page: u64, rel: &str| {
            format!("<{base_url}?page={page}&size={}>; rel=\"{rel}\"", self.size)
        };

        let mut links = Vec::with_capacity(4);
        if self.page < self.total_pages {
            links.push(link(self.page + 1, "next"));
        }
        if self.page > 1 && self.page <= self.total_pages {
            links.push(link(self.page - 1, "prev"));
        }
        links.push(link(1, "first"));
        links.push(link(last, "last"));
        links.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "http://localhost/api/volumes/backup";

    fn page(number: u64, size: u64, total: u64) -> Page<u64> {
        let request = PageRequest::new(number, size).unwrap();
        let items = (request.offset()..total).take(size as usize).collect();
        Page::new(items, request, total)
    }

    #[test]
    fn offset_and_total_pages() {
        let request = PageRequest::new(3, 2).unwrap();
        assert_eq!(request.offset(), 4);
        assert_eq!(page(1, 2, 5).total_pages, 3);
        assert_eq!(page(1, 2, 4).total_pages, 2);
        assert_eq!(page(1, 2, 0).total_pages, 0);
    }

    #[test]
    fn zero_page_or_size_is_rejected() {
        assert!(matches!(PageRequest::new(0, 10), Err(Error::InvalidPage(_))));
        assert!(matches!(PageRequest::new(1, 0), Err(Error::InvalidPage(_))));
    }

    #[test]
    fn huge_page_is_rejected_not_overflowed() {
        assert!(matches!(
            PageRequest::new(u64::MAX, 2),
            Err(Error::InvalidPage(_))
        ));
        assert!(matches!(
            PageRequest::new(1, u64::MAX),
            Err(Error::InvalidPage(_))
        ));

        let last = PageRequest::new(i64::MAX as u64 / 2 + 1, 2).unwrap();
        assert_eq!(last.offset(), i64::MAX as u64 - 1);
        assert!(PageRequest::new(i64::MAX as u64 / 2 + 2, 2).is_err());
    }

    #[test]
    fn first_page_links() {
        assert_eq!(
            page(1, 2, 5).link_header(BASE),
            format!(
                "<{BASE}?page=2&size=2>; rel=\"next\", <{BASE}?page=1&size=2>; rel=\"first\", <{BASE}?page=3&size=2>; rel=\"last\""
            )
        );
    }

    #[test]
    fn middle_page_links() {
        let header = page(2, 2, 5).link_header(BASE);
        assert!(header.contains("page=3&size=2>; rel=\"next\""));
        assert!(header.contains("page=1&size=2>; rel=\"prev\""));
        assert!(header.contains("page=3&size=2>; rel=\"last\""));
    }

    #[test]
    fn last_page_has_single_item_and_no_next() {
        let last = page(3, 2, 5);
        assert_eq!(last.items.len(), 1);
        let header = last.link_header(BASE);
        assert!(!header.contains("rel=\"next\""));
        assert!(header.contains("page=2&size=2>; rel=\"prev\""));
    }

    #[test]
    fn page_past_the_end_is_empty_but_links_to_last() {
        let beyond = page(4, 2, 5);
        assert!(beyond.items.is_empty());
        let header = beyond.link_header(BASE);
        assert!(header.contains("page=3&size=2>; rel=\"last\""));
        assert!(!header.contains("rel=\"next\""));
        assert!(!header.contains("rel=\"prev\""));
    }

    #[test]
    fn empty_listing_links_to_page_one() {
        let empty = page(1, 10, 0);
        assert_eq!(
            empty.link_header(BASE),
            format!("<{BASE}?page=1&size=10>; rel=\"first\", <{BASE}?page=1&size=10>; rel=\"last\"")
        );
    }
}
