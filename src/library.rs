//! Library-side collaborators: update notifications and the mutation store.
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::feed::{ChapterId, MangaId, MangaRef};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryEvent {
    UpdateStarted,
    /// `None` when the whole update run ended; `Some` after one manga
    /// received new chapters.
    UpdateFinished(Option<MangaRef>),
}

/// Broadcasts library update progress to any number of engines.
#[derive(Debug, Clone)]
pub struct LibraryUpdates {
    events: broadcast::Sender<LibraryEvent>,
}

impl Default for LibraryUpdates {
    fn default() -> Self {
        Self::new()
    }
}

impl LibraryUpdates {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LibraryEvent> {
        self.events.subscribe()
    }

    pub fn started(&self) {
        let _ = self.events.send(LibraryEvent::UpdateStarted);
    }

    pub fn manga_updated(&self, manga: MangaRef) {
        let _ = self.events.send(LibraryEvent::UpdateFinished(Some(manga)));
    }

    pub fn finished(&self) {
        let _ = self.events.send(LibraryEvent::UpdateFinished(None));
    }
}

/// Writes the engine performs on behalf of the user.
#[async_trait]
pub trait LibraryStore: Send + Sync {
    /// Write a chapter's read flag together with its page position.
    async fn set_chapter_progress(
        &self,
        chapter_id: ChapterId,
        read: bool,
        last_page_read: i32,
        pages_left: i32,
    ) -> anyhow::Result<()>;

    /// Remove the history entry of one chapter.
    async fn reset_history(&self, chapter_id: ChapterId) -> anyhow::Result<()>;

    /// Remove every history entry of a manga.
    async fn reset_manga_history(&self, manga_id: MangaId) -> anyhow::Result<()>;

    async fn delete_all_history(&self) -> anyhow::Result<()>;
}
