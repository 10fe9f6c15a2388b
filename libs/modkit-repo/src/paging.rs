use serde::{Deserialize, Serialize};

/// 1-based page selector. A `page_size` of zero disables paging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageRequest {
    pub page_index: u64,
    pub page_size: u64,
}

impl PageRequest {
    #[must_use]
    pub fn new(page_index: u64, page_size: u64) -> Self {
        Self {
            page_index,
            page_size,
        }
    }

    /// First `n` rows.
    #[must_use]
    pub fn limit(n: u64) -> Self {
        Self::new(1, n)
    }

    #[must_use]
    pub fn unpaged() -> Self {
        Self::new(1, 0)
    }

    #[must_use]
    pub fn is_paged(&self) -> bool {
        self.page_size > 0
    }

    /// Page 0 is read as page 1.
    #[must_use]
    pub fn effective_index(&self) -> u64 {
        self.page_index.max(1)
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        (self.effective_index() - 1).saturating_mul(self.page_size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page_index: u64,
    pub page_size: u64,
    pub total: u64,
}

impl<T> Page<T> {
    #[must_use]
    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            return u64::from(self.total > 0);
        }
        self.total.div_ceil(self.page_size)
    }

    #[must_use]
    pub fn has_next(&self) -> bool {
        self.page_index < self.total_pages()
    }

    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page_index: self.page_index,
            page_size: self.page_size,
            total: self.total,
        }
    }
}
