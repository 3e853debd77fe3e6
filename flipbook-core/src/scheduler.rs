//! Single-slot render scheduling.
//!
//! Rendering shares one off-screen surface, so at most one page renders at a
//! time. Each tick picks one queued page: a top-of-stack page beats an active
//! page, which beats the oldest queued page. The oldest page is only picked
//! when the device class allows rendering pages nobody is looking at.

use std::collections::VecDeque;

use crate::backend::Generation;
use crate::book::BookContext;
use crate::config::BookConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueItem {
    pub index: usize,
    pub generation: Generation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Top,
    Active,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub item: QueueItem,
    pub priority: Priority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulePolicy {
    pub render_while_flipping: bool,
    pub render_inactive_pages: bool,
    pub render_inactive_pages_on_mobile: bool,
}

impl SchedulePolicy {
    pub fn from_config(config: &BookConfig) -> Self {
        Self {
            render_while_flipping: config.render_while_flipping,
            render_inactive_pages: config.render_inactive_pages,
            render_inactive_pages_on_mobile: config.render_inactive_pages_on_mobile,
        }
    }

    fn renders_inactive(&self, mobile: bool) -> bool {
        if mobile {
            self.render_inactive_pages_on_mobile
        } else {
            self.render_inactive_pages
        }
    }
}

#[derive(Debug)]
pub struct RenderScheduler {
    policy: SchedulePolicy,
    queue: VecDeque<QueueItem>,
    in_flight: Option<QueueItem>,
}

impl RenderScheduler {
    pub fn new(policy: SchedulePolicy) -> Self {
        Self {
            policy,
            queue: VecDeque::new(),
            in_flight: None,
        }
    }

    pub fn policy(&self) -> SchedulePolicy {
        self.policy
    }

    /// Appends `index` unless it is already queued.
    pub fn enqueue(&mut self, index: usize, generation: Generation) {
        if self.queue.iter().any(|item| item.index == index) {
            return;
        }
        self.queue.push_back(QueueItem { index, generation });
    }

    pub fn remove(&mut self, index: usize) {
        self.queue.retain(|item| item.index != index);
    }

    pub fn queued(&self) -> Vec<usize> {
        self.queue.iter().map(|item| item.index).collect()
    }

    pub fn is_queued(&self, index: usize) -> bool {
        self.queue.iter().any(|item| item.index == index)
    }

    pub fn in_flight(&self) -> Option<QueueItem> {
        self.in_flight
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Chooses the page to render this tick, without changing any state.
    pub fn select(&self, book: &dyn BookContext, mobile: bool) -> Option<Candidate> {
        if self.in_flight.is_some() {
            return None;
        }
        if !self.policy.render_while_flipping && book.is_processing() {
            return None;
        }

        let top_pages = book.top_pages();
        let mut active = None;
        for item in &self.queue {
            if top_pages.contains(&item.index) {
                return Some(Candidate {
                    item: *item,
                    priority: Priority::Top,
                });
            }
            if active.is_none() && book.is_active_page(item.index) {
                active = Some(*item);
            }
        }

        if let Some(item) = active {
            return Some(Candidate {
                item,
                priority: Priority::Active,
            });
        }

        if self.policy.renders_inactive(mobile) {
            return self.queue.front().map(|item| Candidate {
                item: *item,
                priority: Priority::Fallback,
            });
        }
        None
    }

    /// Moves `item` from the queue into the render slot.
    pub fn begin(&mut self, item: QueueItem) {
        self.remove(item.index);
        self.in_flight = Some(item);
    }

    /// Frees the slot if `index`/`generation` currently holds it.
    pub fn finish(&mut self, index: usize, generation: Generation) -> bool {
        match self.in_flight {
            Some(item) if item.index == index && item.generation == generation => {
                self.in_flight = None;
                true
            }
            _ => false,
        }
    }

    /// Drops every trace of `index`, freeing the slot if it held it.
    pub fn forget(&mut self, index: usize) {
        self.remove(index);
        if matches!(self.in_flight, Some(item) if item.index == index) {
            self.in_flight = None;
        }
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.in_flight = None;
    }
}
