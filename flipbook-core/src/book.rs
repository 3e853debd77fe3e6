/// Read-only view of the book the pages belong to.
pub trait BookContext {
    fn current_page(&self) -> usize;
    fn page_count(&self) -> usize;
    /// Pages currently facing the viewer: one at the covers, two otherwise.
    fn active_pages(&self) -> Vec<usize>;
    /// Pages topmost in the stack during a flip gesture.
    fn top_pages(&self) -> Vec<usize>;
    /// True while a page turn is in progress.
    fn is_processing(&self) -> bool;

    fn is_active_page(&self, index: usize) -> bool {
        self.active_pages().contains(&index)
    }
}

/// The pages facing the viewer when `page` is the current page.
pub fn facing_pages(page: usize, page_count: usize) -> Vec<usize> {
    if page == 0 || page + 1 >= page_count {
        vec![page]
    } else {
        vec![page, page + 1]
    }
}

/// Plain book state for hosts that track page turns themselves.
#[derive(Debug, Clone)]
pub struct BookState {
    current: usize,
    page_count: usize,
    active: Vec<usize>,
    top: Vec<usize>,
    processing: bool,
}

impl BookState {
    pub fn new(page_count: usize) -> Self {
        Self {
            current: 0,
            page_count,
            active: facing_pages(0, page_count),
            top: Vec::new(),
            processing: false,
        }
    }

    /// Jumps to `page`, clamped to the book, and resets the facing pages.
    pub fn turn_to(&mut self, page: usize) {
        let page = page.min(self.page_count.saturating_sub(1));
        self.current = page;
        self.active = facing_pages(page, self.page_count);
        self.top.clear();
    }

    pub fn set_active_pages(&mut self, active: Vec<usize>) {
        self.active = active;
    }

    pub fn set_top_pages(&mut self, top: Vec<usize>) {
        self.top = top;
    }

    pub fn set_processing(&mut self, processing: bool) {
        self.processing = processing;
    }
}

impl BookContext for BookState {
    fn current_page(&self) -> usize {
        self.current
    }

    fn page_count(&self) -> usize {
        self.page_count
    }

    fn active_pages(&self) -> Vec<usize> {
        self.active.clone()
    }

    fn top_pages(&self) -> Vec<usize> {
        self.top.clone()
    }

    fn is_processing(&self) -> bool {
        self.processing
    }
}
