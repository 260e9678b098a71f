//! In-memory download queue.
//!
//! Models queue state and its notifications without doing any I/O. A worker
//! (or a test) drives progress with [`DownloadQueue::set_progress`].
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{DownloadEvent, DownloadManager, DownloadStatus, QueueEntry};
use crate::feed::{ChapterId, ChapterRef, MangaId, MangaRef};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct QueueInner {
    entries: Vec<QueueEntry>,
    downloaded: HashSet<(MangaId, ChapterId)>,
    paused: bool,
}

pub struct DownloadQueue {
    inner: Mutex<QueueInner>,
    events: broadcast::Sender<DownloadEvent>,
}

impl Default for DownloadQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadQueue {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Mutex::new(QueueInner {
                paused: true,
                ..QueueInner::default()
            }),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: DownloadEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Record progress for a queued chapter. Reaching 100 moves it to disk.
    pub fn set_progress(&self, chapter_id: ChapterId, progress: u8) {
        let entry = {
            let mut inner = self.lock();
            let Some(index) = inner.entries.iter().position(|e| e.chapter_id == chapter_id) else {
                return;
            };
            if progress >= 100 {
                let mut entry = inner.entries.remove(index);
                entry.status = DownloadStatus::Downloaded;
                entry.progress = 100;
                inner.downloaded.insert((entry.manga_id, entry.chapter_id));
                entry
            } else {
                let entry = &mut inner.entries[index];
                entry.status = DownloadStatus::Downloading;
                entry.progress = progress;
                *entry
            }
        };
        tracing::trace!(chapter_id, progress, "Download progress");
        self.notify(DownloadEvent::Updated(entry));
        if entry.status == DownloadStatus::Downloaded {
            self.notify(DownloadEvent::QueueChanged);
        }
    }

    /// Mark a chapter as already on disk.
    pub fn mark_downloaded(&self, manga_id: MangaId, chapter_id: ChapterId) {
        self.lock().downloaded.insert((manga_id, chapter_id));
    }

    pub fn pause(&self) {
        self.set_running(false);
    }

    pub fn resume(&self) {
        self.set_running(true);
    }

    fn set_running(&self, running: bool) {
        let changed = {
            let mut inner = self.lock();
            let changed = inner.paused == running;
            inner.paused = !running;
            changed
        };
        if changed {
            tracing::debug!(running, "Download worker state changed");
            self.notify(DownloadEvent::RunningChanged(running));
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}

#[async_trait]
impl DownloadManager for DownloadQueue {
    fn queue_snapshot(&self) -> Vec<QueueEntry> {
        self.lock().entries.clone()
    }

    fn is_chapter_downloaded(&self, chapter: &ChapterRef, manga: &MangaRef) -> bool {
        chapter
            .id
            .is_some_and(|id| self.lock().downloaded.contains(&(manga.id, id)))
    }

    fn is_paused(&self) -> bool {
        self.lock().paused
    }

    fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.events.subscribe()
    }

    async fn enqueue(&self, manga: &MangaRef, chapters: &[ChapterRef]) {
        let added = {
            let mut inner = self.lock();
            let mut added = 0usize;
            for id in chapters.iter().filter_map(|c| c.id) {
                let queued = inner.entries.iter().any(|e| e.chapter_id == id);
                if queued || inner.downloaded.contains(&(manga.id, id)) {
                    continue;
                }
                inner.entries.push(QueueEntry {
                    chapter_id: id,
                    manga_id: manga.id,
                    status: DownloadStatus::Queued,
                    progress: 0,
                });
                added += 1;
            }
            added
        };
        if added > 0 {
            tracing::debug!(manga_id = manga.id, added, "Chapters queued for download");
            self.notify(DownloadEvent::QueueChanged);
        }
    }

    async fn start_now(&self, chapter_id: ChapterId) {
        let moved = {
            let mut inner = self.lock();
            match inner.entries.iter().position(|e| e.chapter_id == chapter_id) {
                Some(index) => {
                    let entry = inner.entries.remove(index);
                    inner.entries.insert(0, entry);
                    true
                }
                None => false,
            }
        };
        if moved {
            self.notify(DownloadEvent::QueueChanged);
            self.resume();
        }
    }

    async fn delete_chapters(&self, manga: &MangaRef, chapters: &[ChapterRef]) {
        let ids: HashSet<ChapterId> = chapters.iter().filter_map(|c| c.id).collect();
        {
            let mut inner = self.lock();
            inner.entries.retain(|e| !ids.contains(&e.chapter_id));
            inner.downloaded.retain(|(m, c)| *m != manga.id || !ids.contains(c));
        }
        tracing::debug!(manga_id = manga.id, count = ids.len(), "Deleted downloaded chapters");
        self.notify(DownloadEvent::QueueChanged);
    }
}
