//! The published feed and the warm-resume slot.
use std::sync::{Arc, Mutex, PoisonError};

use super::types::{FeedItem, GroupTag};

/// Feed as last published to the consumer.
///
/// Publishing swaps the whole list; readers holding an older `Arc` keep a
/// consistent snapshot. `version` increases on every publish.
#[derive(Debug, Clone, Default)]
pub struct FeedState {
    items: Arc<Vec<FeedItem>>,
    version: u64,
}

/// A run of consecutive items sharing one group tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub tag: GroupTag,
    pub start: usize,
    pub len: usize,
}

impl FeedState {
    pub fn items(&self) -> &Arc<Vec<FeedItem>> {
        &self.items
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn publish(&mut self, items: Vec<FeedItem>) {
        self.items = Arc::new(items);
        self.version += 1;
    }

    /// Restore a previously saved snapshot without building a new list.
    pub fn restore(&mut self, items: Arc<Vec<FeedItem>>) {
        self.items = items;
        self.version += 1;
    }

    /// In-place edit of the published list, for overlay patches.
    /// Clones the list only when a reader still holds the old snapshot.
    pub fn edit<R>(&mut self, f: impl FnOnce(&mut Vec<FeedItem>) -> R) -> R {
        let result = f(Arc::make_mut(&mut self.items));
        self.version += 1;
        result
    }

    /// Section boundaries; each section's tag is its header.
    /// `Ungrouped` runs produce no section.
    pub fn sections(&self) -> Vec<Section> {
        let mut sections: Vec<Section> = Vec::new();
        for (index, item) in self.items.iter().enumerate() {
            if item.group == GroupTag::Ungrouped {
                continue;
            }
            match sections.last_mut() {
                Some(last) if last.tag == item.group && last.start + last.len == index => last.len += 1,
                _ => sections.push(Section {
                    tag: item.group,
                    start: index,
                    len: 1,
                }),
            }
        }
        sections
    }
}

/// Last known feed, kept across engine teardown for a warm restart.
#[derive(Debug, Clone, Default)]
pub struct WarmCache {
    slot: Arc<Mutex<Option<Arc<Vec<FeedItem>>>>>,
}

impl WarmCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&self, items: Arc<Vec<FeedItem>>) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(items);
    }

    pub fn take(&self) -> Option<Arc<Vec<FeedItem>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Drop the snapshot, e.g. on a low-memory signal.
    pub fn clear(&self) {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }
}
