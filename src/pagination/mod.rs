// Pagination module.
// Cursor encoding plus the page view handed to table callers.

pub mod cursor;

pub use cursor::{PaginationCursor, SortDirection};

/// One fetched page together with the cursor that produced it.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: T,
    pub cursor: PaginationCursor,
}

impl<T> Page<T> {
    pub fn new(items: T, cursor: PaginationCursor) -> Self {
        Self { items, cursor }
    }

    /// Whether more pages follow; unknown until the item count arrives.
    pub fn has_more(&self) -> Option<bool> {
        self.cursor
            .total_pages()
            .map(|pages| u64::from(self.cursor.page()) < pages)
    }
}
