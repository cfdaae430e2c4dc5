use serde::{Deserialize, Serialize};

pub(crate) const DEFAULT_PAGE_SIZE: i64 = 10;
pub(crate) const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Deserialize)]
pub(crate) struct PageQuery {
    #[serde(default = "default_page")]
    pub(crate) page: i64,
    #[serde(default = "default_page_size")]
    pub(crate) page_size: i64,
}

impl PageQuery {
    /// Page numbers start at 1; the size is clamped to `1..=MAX_PAGE_SIZE`.
    pub(crate) fn normalized(&self) -> (i64, i64) {
        (self.page.max(1), self.page_size.clamp(1, MAX_PAGE_SIZE))
    }
}

const fn default_page() -> i64 {
    1
}

const fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

#[derive(Debug, Serialize)]
pub(crate) struct PaginatedResponse<T> {
    pub(crate) items: Vec<T>,
    pub(crate) total_count: i64,
    pub(crate) page: i64,
    pub(crate) page_size: i64,
}
