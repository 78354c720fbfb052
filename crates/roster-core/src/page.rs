/// Position within a paginated list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub page_number: u32,
    pub page_size: u32,
    pub total_items: u64,
}

impl PageInfo {
    pub fn new(page_number: u32, page_size: u32, total_items: u64) -> Self {
        Self {
            page_number: page_number.max(1),
            page_size,
            total_items,
        }
    }

    pub fn total_pages(&self) -> u32 {
        total_pages(self.total_items, self.page_size)
    }

    /// Clamps a requested page into `[1, total_pages]`. An empty list still
    /// has page 1.
    pub fn clamp(&self, requested: u32) -> u32 {
        requested.clamp(1, self.total_pages().max(1))
    }

    /// How many rows page `page_number` holds given the total.
    pub fn items_on_page(&self, page_number: u32) -> u64 {
        let size = u64::from(self.page_size);
        let skipped = u64::from(page_number.saturating_sub(1)) * size;
        self.total_items.saturating_sub(skipped).min(size)
    }

    pub fn has_next(&self) -> bool {
        self.page_number < self.total_pages()
    }

    pub fn has_previous(&self) -> bool {
        self.page_number > 1
    }
}

pub fn total_pages(total_items: u64, page_size: u32) -> u32 {
    if page_size == 0 {
        return 0;
    }
    let pages = total_items.div_ceil(u64::from(page_size));
    u32::try_from(pages).unwrap_or(u32::MAX)
}
