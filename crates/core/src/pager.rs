use crate::sql_text::paged_query_sql;

pub const DEFAULT_PAGE_SIZE: usize = 100;

/// What the presentation layer needs to draw navigation controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagerState {
    pub current_page: usize,
    pub total_pages: usize,
    pub has_previous: bool,
    pub has_next: bool,
    pub total_rows: u64,
    pub page_size: usize,
}

/// Page bookkeeping for one base query.
///
/// Holds `1 <= current_page <= total_pages` and
/// `total_pages == max(1, ceil(total_rows / page_size))` after every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pager {
    page_size: usize,
    current_page: usize,
    total_rows: u64,
}

impl Default for Pager {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl Pager {
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            current_page: 1,
            total_rows: 0,
        }
    }

    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    #[must_use]
    pub fn current_page(&self) -> usize {
        self.current_page
    }

    #[must_use]
    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    #[must_use]
    pub fn total_pages(&self) -> usize {
        let page_size = self.page_size as u64;
        let pages = self.total_rows.div_ceil(page_size).max(1);
        usize::try_from(pages).unwrap_or(usize::MAX)
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        (self.current_page - 1).saturating_mul(self.page_size)
    }

    #[must_use]
    pub fn has_previous(&self) -> bool {
        self.current_page > 1
    }

    #[must_use]
    pub fn has_next(&self) -> bool {
        self.current_page < self.total_pages()
    }

    #[must_use]
    pub fn state(&self) -> PagerState {
        PagerState {
            current_page: self.current_page,
            total_pages: self.total_pages(),
            has_previous: self.has_previous(),
            has_next: self.has_next(),
            total_rows: self.total_rows,
            page_size: self.page_size,
        }
    }

    #[must_use]
    pub fn page_query(&self, base_query: &str) -> String {
        paged_query_sql(base_query, self.page_size, self.offset())
    }

    pub fn set_total_rows(&mut self, total_rows: u64) {
        self.total_rows = total_rows;
        self.clamp();
    }

    /// Changes the page size and returns to the first page. Zero is ignored.
    pub fn set_page_size(&mut self, page_size: usize) -> bool {
        if page_size == 0 {
            return false;
        }
        self.page_size = page_size;
        self.current_page = 1;
        true
    }

    pub fn go_to(&mut self, page: usize) {
        self.current_page = page.clamp(1, self.total_pages());
    }

    pub fn reset(&mut self) {
        self.current_page = 1;
    }

    #[must_use]
    pub fn next(&mut self) -> bool {
        if !self.has_next() {
            return false;
        }
        self.current_page += 1;
        true
    }

    #[must_use]
    pub fn previous(&mut self) -> bool {
        if !self.has_previous() {
            return false;
        }
        self.current_page -= 1;
        true
    }

    /// [`Pager::state`] with `delta` uncommitted rows folded into
    /// `total_rows` only. The paging fields keep describing the committed
    /// result, which is what navigation moves through.
    #[must_use]
    pub fn state_with_pending(&self, delta: i64) -> PagerState {
        PagerState {
            total_rows: self.total_rows.saturating_add_signed(delta),
            ..self.state()
        }
    }

    fn clamp(&mut self) {
        self.current_page = self.current_page.clamp(1, self.total_pages());
    }
}
