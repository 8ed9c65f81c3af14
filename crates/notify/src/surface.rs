//! Notification surface: query/command layer for the dropdown and the
//! full notifications page.
//!
//! Holds only UI state (dropdown open, current page, last error). Everything
//! else is read from the store.

use campuslink_protocol::Notification;
use tokio::sync::watch;

use crate::store::{NotificationApi, NotificationStore, StoreError};

/// Counts above this render as "99+"
pub const BADGE_CAP: usize = 99;

/// Badge text for an unread count; nothing when there is nothing unread.
pub fn badge_label(count: usize) -> Option<String> {
    match count {
        0 => None,
        n if n > BADGE_CAP => Some(format!("{BADGE_CAP}+")),
        n => Some(n.to_string()),
    }
}

/// One page of the full list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<Notification>,
    /// Zero-based
    pub index: usize,
    pub total_pages: usize,
}

impl Page {
    pub fn has_next(&self) -> bool {
        self.index + 1 < self.total_pages
    }

    pub fn has_prev(&self) -> bool {
        self.index > 0
    }
}

pub struct NotificationSurface<A> {
    store: NotificationStore<A>,
    open: bool,
    page: usize,
    page_size: usize,
    dropdown_limit: usize,
    last_error: Option<String>,
}

impl<A: NotificationApi> NotificationSurface<A> {
    pub fn new(store: NotificationStore<A>, dropdown_limit: usize, page_size: usize) -> Self {
        Self {
            store,
            open: false,
            page: 0,
            page_size: page_size.max(1),
            dropdown_limit,
            last_error: None,
        }
    }

    pub fn store(&self) -> &NotificationStore<A> {
        &self.store
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn toggle(&mut self) {
        self.open = !self.open;
    }

    pub fn close(&mut self) {
        self.open = false;
    }

    /// Pointer pressed somewhere; an open dropdown closes when it was outside.
    pub fn on_pointer_down(&mut self, inside_dropdown: bool) {
        if self.open && !inside_dropdown {
            self.open = false;
        }
    }

    /// Containing layouts watch this to keep their badge in sync
    pub fn watch_unread(&self) -> watch::Receiver<usize> {
        self.store.subscribe_unread()
    }

    pub fn unread_count(&self) -> usize {
        self.store.unread_count()
    }

    pub fn badge(&self) -> Option<String> {
        badge_label(self.unread_count())
    }

    /// "Mark all read" is only offered while something is unread
    pub fn can_mark_all(&self) -> bool {
        self.unread_count() > 0
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub async fn dropdown_items(&self) -> Vec<Notification> {
        let mut items = self.store.entries().await;
        items.truncate(self.dropdown_limit);
        items
    }

    /// Current page of the full list. The page index is clamped when the
    /// list has shrunk underneath it.
    pub async fn current_page(&mut self) -> Page {
        let entries = self.store.entries().await;
        let total_pages = entries.len().div_ceil(self.page_size).max(1);
        self.page = self.page.min(total_pages - 1);
        let items = entries
            .into_iter()
            .skip(self.page * self.page_size)
            .take(self.page_size)
            .collect();
        Page {
            items,
            index: self.page,
            total_pages,
        }
    }

    pub fn set_page(&mut self, index: usize) {
        self.page = index;
    }

    pub fn next_page(&mut self) {
        self.page += 1;
    }

    pub fn prev_page(&mut self) {
        self.page = self.page.saturating_sub(1);
    }

    pub async fn refresh(&mut self) -> Result<(), StoreError> {
        let result = self.store.refresh().await.map(|_| ());
        self.record(result)
    }

    pub async fn mark_read(&mut self, id: i64) -> Result<(), StoreError> {
        let result = self.store.mark_read(id).await;
        self.record(result)
    }

    pub async fn mark_all_read(&mut self) -> Result<(), StoreError> {
        let result = self.store.mark_all_read().await;
        self.record(result)
    }

    fn record(&mut self, result: Result<(), StoreError>) -> Result<(), StoreError> {
        match &result {
            Ok(()) => self.last_error = None,
            Err(e) => self.last_error = Some(e.to_string()),
        }
        result
    }
}
