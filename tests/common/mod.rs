//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Local, TimeZone};
use tokio::sync::{mpsc, Semaphore};

use recents::app::{App, AppEvent, Collaborators, FeedConsumer};
use recents::download::{DownloadQueue, QueueEntry};
use recents::feed::{
    ChapterRef, FeedItem, FetchRequest, HistoryRecord, MangaId, MangaRef, MemorySource, PagePolicy, QuerySource,
    RawRow, SourceError, WarmCache,
};
use recents::library::LibraryStore;
use recents::preferences::RecentsPreferences;

// ============================================================================
// Row Builders
// ============================================================================

pub fn manga(id: i64, title: &str) -> MangaRef {
    MangaRef {
        id,
        title: Arc::from(title),
        source: 1,
        local: false,
        excluded_scanlators: Vec::new(),
    }
}

pub fn chapter(manga_id: i64, id: i64, number: f32) -> ChapterRef {
    ChapterRef {
        id: Some(id),
        name: Arc::from(format!("Chapter {}", number)),
        chapter_number: number,
        ..ChapterRef::placeholder(manga_id)
    }
}

/// Local wall-clock time as epoch milliseconds.
pub fn millis_on(year: i32, month: u32, day: u32, hour: u32) -> i64 {
    Local
        .with_ymd_and_hms(year, month, day, hour, 0, 0)
        .earliest()
        .map(|dt| dt.timestamp_millis())
        .unwrap_or_default()
}

pub fn history_row(manga: MangaRef, chapter: ChapterRef, history_id: i64, last_read: i64) -> RawRow {
    RawRow {
        manga,
        chapter,
        history: HistoryRecord {
            id: Some(history_id),
            last_read,
            time_read: 0,
        },
    }
}

pub fn update_row(manga: MangaRef, chapter: ChapterRef) -> RawRow {
    let last_read = chapter.date_fetch;
    RawRow {
        manga,
        chapter,
        history: HistoryRecord {
            id: None,
            last_read,
            time_read: 0,
        },
    }
}

pub fn addition_row(manga: MangaRef, date_added: i64) -> RawRow {
    let chapter = ChapterRef::placeholder(manga.id);
    RawRow {
        manga,
        chapter,
        history: HistoryRecord {
            id: None,
            last_read: date_added,
            time_read: 0,
        },
    }
}

// ============================================================================
// Collaborator Doubles
// ============================================================================

/// A feed published to the consumer.
#[derive(Debug, Clone)]
pub struct Shown {
    pub items: Arc<Vec<FeedItem>>,
    pub has_new_items: bool,
    pub scroll_to_top: bool,
}

#[derive(Debug, Default)]
pub struct Recorded {
    pub shown: Vec<Shown>,
    pub single_updates: Vec<QueueEntry>,
    pub refreshing: Vec<bool>,
    pub running: Vec<bool>,
}

/// Consumer that records every call for later inspection.
#[derive(Clone, Default)]
pub struct RecordingConsumer {
    pub log: Arc<Mutex<Recorded>>,
}

impl RecordingConsumer {
    pub fn last_titles(&self) -> Vec<String> {
        let log = self.log.lock().unwrap();
        log.shown
            .last()
            .map(|s| s.items.iter().map(|i| i.manga.title.to_string()).collect())
            .unwrap_or_default()
    }

    pub fn shown_count(&self) -> usize {
        self.log.lock().unwrap().shown.len()
    }
}

impl FeedConsumer for RecordingConsumer {
    fn show_feed(&mut self, items: Arc<Vec<FeedItem>>, has_new_items: bool, scroll_to_top: bool) {
        self.log.lock().unwrap().shown.push(Shown {
            items,
            has_new_items,
            scroll_to_top,
        });
    }

    fn update_single_chapter_download(&mut self, entry: &QueueEntry) {
        self.log.lock().unwrap().single_updates.push(*entry);
    }

    fn set_refreshing(&mut self, refreshing: bool) {
        self.log.lock().unwrap().refreshing.push(refreshing);
    }

    fn update_download_status(&mut self, running: bool) {
        self.log.lock().unwrap().running.push(running);
    }
}

/// Library store that records mutations.
#[derive(Default)]
pub struct RecordingStore {
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl LibraryStore for RecordingStore {
    async fn set_chapter_progress(
        &self,
        chapter_id: i64,
        read: bool,
        last_page_read: i32,
        pages_left: i32,
    ) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("progress {} {} {} {}", chapter_id, read, last_page_read, pages_left));
        Ok(())
    }

    async fn reset_history(&self, chapter_id: i64) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(format!("reset {}", chapter_id));
        Ok(())
    }

    async fn reset_manga_history(&self, manga_id: MangaId) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(format!("reset_manga {}", manga_id));
        Ok(())
    }

    async fn delete_all_history(&self) -> anyhow::Result<()> {
        anyhow::bail!("history is read-only here")
    }
}

/// Wraps a [`MemorySource`]; every fetch waits for a permit when gated.
pub struct GatedSource {
    pub inner: MemorySource,
    pub gate: Semaphore,
}

impl GatedSource {
    pub fn new(inner: MemorySource) -> Self {
        Self {
            inner,
            gate: Semaphore::new(0),
        }
    }

    pub fn release(&self, fetches: usize) {
        self.gate.add_permits(fetches);
    }
}

#[async_trait]
impl QuerySource for GatedSource {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<RawRow>, SourceError> {
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| SourceError::Backend(anyhow::anyhow!(e)))?;
        permit.forget();
        self.inner.fetch(request).await
    }

    async fn chapters_for_manga(&self, manga_id: MangaId) -> Result<Vec<ChapterRef>, SourceError> {
        self.inner.chapters_for_manga(manga_id).await
    }
}

// ============================================================================
// Engine Harness
// ============================================================================

pub struct Harness {
    pub app: App,
    pub events: mpsc::Receiver<AppEvent>,
    pub consumer: RecordingConsumer,
    pub downloads: Arc<DownloadQueue>,
    pub store: Arc<RecordingStore>,
    pub warm_cache: WarmCache,
}

pub fn harness(source: Arc<dyn QuerySource>, prefs: RecentsPreferences) -> Harness {
    harness_with_cache(source, prefs, WarmCache::new())
}

pub fn harness_with_cache(source: Arc<dyn QuerySource>, prefs: RecentsPreferences, warm_cache: WarmCache) -> Harness {
    let consumer = RecordingConsumer::default();
    let downloads = Arc::new(DownloadQueue::new());
    let store = Arc::new(RecordingStore::default());
    let (event_tx, events) = mpsc::channel(32);
    let app = App::new(
        Collaborators {
            source,
            downloads: downloads.clone(),
            store: store.clone(),
            warm_cache: warm_cache.clone(),
        },
        Box::new(consumer.clone()),
        prefs,
        PagePolicy::default(),
        event_tx,
    );
    Harness {
        app,
        events,
        consumer,
        downloads,
        store,
        warm_cache,
    }
}

impl Harness {
    /// Apply background events until no aggregation is in flight.
    pub async fn settle(&mut self) {
        while self.app.is_loading() {
            let event = self.events.recv().await.expect("event channel closed");
            recents::events::handle_app_event(&mut self.app, event);
        }
    }

    /// Apply exactly one background event.
    pub async fn next_event(&mut self) -> AppEvent {
        self.events.recv().await.expect("event channel closed")
    }
}
