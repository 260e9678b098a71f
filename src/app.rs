//! The recents engine: owns the published feed and drives aggregation.
//!
//! `App` is the single owner of [`FeedState`], [`PaginationState`], the
//! query and the preferences. Aggregation passes run in spawned tasks and
//! report back through [`AppEvent`]s; the engine publishes a result only if
//! it still belongs to the newest request. Mutations run as separate tasks
//! and schedule a fresh pass once they land.
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::download::{
    apply_overlay, apply_update, effective_status, is_download_visible, DisplayStatus, DownloadEvent,
    DownloadInfo, DownloadManager, DownloadStatus, QueueEntry,
};
use crate::events::catch_task_panic;
use crate::feed::{
    recent_manga, run_aggregation, AggregationOutcome, AggregationRequest, ChapterId, ChapterRef, Checkpoint,
    FeedItem, FeedState, MangaId, MangaRef, PagePolicy, PaginationState, QuerySource, ViewMode, WarmCache,
};
use crate::library::{LibraryEvent, LibraryStore};
use crate::preferences::RecentsPreferences;

// ============================================================================
// Consumer Contract
// ============================================================================

/// Whatever displays the feed.
pub trait FeedConsumer: Send {
    fn show_feed(&mut self, items: Arc<Vec<FeedItem>>, has_new_items: bool, scroll_to_top: bool);

    fn update_single_chapter_download(&mut self, entry: &QueueEntry);

    fn set_refreshing(&mut self, refreshing: bool);

    /// The download worker started or stopped.
    fn update_download_status(&mut self, running: bool);
}

/// Events from background tasks
#[derive(Debug)]
pub enum AppEvent {
    /// An aggregation pass finished.
    ///
    /// Fields:
    /// - `generation`: Generation counter when the pass was spawned
    /// - `query`: Query captured when the pass was spawned
    /// - `outcome`: The draft feed and updated pagination state
    Aggregated {
        generation: u64,
        query: String,
        outcome: AggregationOutcome,
    },
    /// A mutation reached the library store or the download queue.
    MutationApplied { action: &'static str },
    MutationFailed { action: &'static str, error: String },
    /// A background task panicked.
    TaskPanicked { task: &'static str, error: String },
}

/// Shared collaborators the engine is built on.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn QuerySource>,
    pub downloads: Arc<dyn DownloadManager>,
    pub store: Arc<dyn LibraryStore>,
    pub warm_cache: WarmCache,
}

// ============================================================================
// Engine State
// ============================================================================

pub struct App {
    source: Arc<dyn QuerySource>,
    downloads: Arc<dyn DownloadManager>,
    store: Arc<dyn LibraryStore>,
    warm_cache: WarmCache,
    consumer: Box<dyn FeedConsumer>,
    event_tx: mpsc::Sender<AppEvent>,

    feed: FeedState,
    pagination: PaginationState,
    prefs: RecentsPreferences,
    policy: PagePolicy,
    query: String,

    /// Generation of the newest aggregation request.
    ///
    /// Shared with running passes, which compare it against their own
    /// generation at every checkpoint. Results tagged with an older
    /// generation are never published.
    generation: Arc<AtomicU64>,

    /// Handle of the in-flight aggregation task, aborted when superseded.
    aggregation_handle: Option<JoinHandle<()>>,
    is_loading: bool,
    refreshing: bool,

    /// Chapters checked in a multi-selection.
    selection: HashSet<ChapterId>,
}

impl App {
    pub fn new(
        collaborators: Collaborators,
        consumer: Box<dyn FeedConsumer>,
        prefs: RecentsPreferences,
        policy: PagePolicy,
        event_tx: mpsc::Sender<AppEvent>,
    ) -> Self {
        let Collaborators {
            source,
            downloads,
            store,
            warm_cache,
        } = collaborators;
        Self {
            source,
            downloads,
            store,
            warm_cache,
            consumer,
            event_tx,
            feed: FeedState::default(),
            pagination: PaginationState::default(),
            prefs,
            policy,
            query: String::new(),
            generation: Arc::new(AtomicU64::new(0)),
            aggregation_handle: None,
            is_loading: false,
            refreshing: false,
            selection: HashSet::new(),
        }
    }

    pub fn feed(&self) -> &FeedState {
        &self.feed
    }

    pub fn pagination(&self) -> &PaginationState {
        &self.pagination
    }

    pub fn preferences(&self) -> &RecentsPreferences {
        &self.prefs
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn view_mode(&self) -> ViewMode {
        self.prefs.view_mode
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing
    }

    pub fn subscribe_downloads(&self) -> broadcast::Receiver<DownloadEvent> {
        self.downloads.subscribe()
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Show the warm-resume snapshot if there is one, then load fresh data.
    pub fn start(&mut self) {
        if let Some(items) = self.warm_cache.take() {
            tracing::debug!(items = items.len(), "Restoring feed from warm cache");
            self.feed.restore(items);
            self.refresh_overlay();
            self.consumer.show_feed(Arc::clone(self.feed.items()), false, false);
        }
        self.spawn_aggregation(false);
    }

    /// Reload from the start, covering every page already loaded.
    pub fn refresh(&mut self) {
        self.spawn_aggregation(false);
    }

    pub fn set_query(&mut self, query: &str) {
        let query = query.trim();
        if query == self.query {
            return;
        }
        self.query = query.to_string();
        self.reset_pagination();
        self.spawn_aggregation(false);
    }

    /// Load the next page. Returns `false` when nothing was requested.
    pub fn request_next_page(&mut self) -> bool {
        if self.pagination.finished || self.is_loading {
            return false;
        }
        self.spawn_aggregation(true);
        true
    }

    pub fn set_view_mode(&mut self, mode: ViewMode) {
        if mode == self.prefs.view_mode {
            return;
        }
        self.prefs.view_mode = mode;
        self.reset_pagination();
        self.spawn_aggregation(false);
    }

    pub fn apply_preferences(&mut self, prefs: RecentsPreferences) {
        if prefs == self.prefs {
            return;
        }
        let resets = self.prefs.resets_pagination(&prefs);
        self.prefs = prefs;
        if resets {
            self.reset_pagination();
        }
        self.spawn_aggregation(false);
    }

    /// Recently read manga, independent of the visible feed.
    pub async fn recent_manga(&self, include_read: bool, amount: Option<usize>) -> Vec<(MangaRef, i64)> {
        recent_manga(self.source.as_ref(), include_read, amount, &self.policy).await
    }

    /// Drop the warm-resume snapshot.
    pub fn on_low_memory(&mut self) {
        self.warm_cache.clear();
    }

    fn reset_pagination(&mut self) {
        self.pagination.reset();
        self.pagination.scroll_to_top = true;
    }

    /// Spawn an aggregation task, superseding any in-flight one.
    fn spawn_aggregation(&mut self, append: bool) {
        if let Some(handle) = self.aggregation_handle.take() {
            handle.abort();
            tracing::debug!("Aborted previous aggregation task");
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        let checkpoint = Checkpoint::new(Arc::clone(&self.generation), generation);
        let query = self.query.clone();
        let request = AggregationRequest {
            query: query.clone(),
            view_mode: self.prefs.view_mode,
            prefs: self.prefs.clone(),
            append,
            pagination: self.pagination,
            current: Arc::clone(self.feed.items()),
            threshold: None,
        };
        let source = Arc::clone(&self.source);
        let policy = self.policy;
        let tx = self.event_tx.clone();
        self.is_loading = true;

        tracing::debug!(
            generation,
            query = %query,
            view_mode = %self.prefs.view_mode,
            append,
            offset = self.pagination.offset,
            "Spawning aggregation task"
        );

        self.aggregation_handle = Some(tokio::spawn(async move {
            let event =
                match catch_task_panic(run_aggregation(source.as_ref(), request, &policy, &checkpoint)).await {
                    Ok(Some(outcome)) => AppEvent::Aggregated {
                        generation,
                        query,
                        outcome,
                    },
                    Ok(None) => return,
                    Err(error) => AppEvent::TaskPanicked {
                        task: "aggregation",
                        error,
                    },
                };
            if let Err(e) = tx.send(event).await {
                tracing::warn!(error = %e, "Failed to send aggregation result (receiver dropped)");
            }
        }));
    }

    // ========================================================================
    // Publishing
    // ========================================================================

    /// Publish a finished pass if it is still the newest request.
    /// Returns whether the feed was replaced.
    pub(crate) fn publish(&mut self, generation: u64, query: &str, outcome: AggregationOutcome) -> bool {
        let current = self.generation.load(Ordering::SeqCst);
        if generation != current {
            tracing::debug!(generation, current, "Discarding stale aggregation result");
            return false;
        }
        if query != self.query {
            tracing::debug!(query = %query, current = %self.query, "Discarding result for old query");
            return false;
        }

        let AggregationOutcome {
            mut items,
            has_new_items,
            pagination,
            attempts,
        } = outcome;
        apply_overlay(&mut items, self.downloads.as_ref());

        let scroll_to_top = self.pagination.scroll_to_top;
        self.pagination = pagination;
        self.pagination.scroll_to_top = false;
        self.feed.publish(items);
        self.is_loading = false;
        self.aggregation_handle = None;

        tracing::debug!(
            generation,
            items = self.feed.len(),
            attempts,
            finished = self.pagination.finished,
            "Published feed"
        );
        self.consumer
            .show_feed(Arc::clone(self.feed.items()), has_new_items, scroll_to_top);
        true
    }

    pub(crate) fn task_failed(&mut self, task: &'static str, error: &str) {
        tracing::error!(task, error = %error, "Background task panicked");
        if task == "aggregation" {
            self.is_loading = false;
            self.aggregation_handle = None;
        }
    }

    // ========================================================================
    // Collaborator Notifications
    // ========================================================================

    pub fn on_download_event(&mut self, event: DownloadEvent) {
        match event {
            DownloadEvent::Updated(entry) => {
                if self.feed.edit(|items| apply_update(items, &entry)) {
                    self.consumer.update_single_chapter_download(&entry);
                }
            }
            DownloadEvent::QueueChanged => {
                self.refresh_overlay();
                self.consumer.show_feed(Arc::clone(self.feed.items()), false, false);
            }
            DownloadEvent::RunningChanged(running) => {
                self.consumer.update_download_status(running);
            }
        }
    }

    /// Re-read the whole queue, e.g. after missing notifications.
    pub fn resync_downloads(&mut self) {
        self.refresh_overlay();
        self.consumer.show_feed(Arc::clone(self.feed.items()), false, false);
        self.consumer.update_download_status(!self.downloads.is_paused());
    }

    fn refresh_overlay(&mut self) {
        let downloads = Arc::clone(&self.downloads);
        self.feed.edit(|items| apply_overlay(items, downloads.as_ref()));
    }

    pub fn on_library_event(&mut self, event: LibraryEvent) {
        match event {
            LibraryEvent::UpdateStarted => self.set_refreshing(true),
            LibraryEvent::UpdateFinished(None) => self.set_refreshing(false),
            LibraryEvent::UpdateFinished(Some(manga)) => {
                tracing::debug!(manga_id = manga.id, "Library update brought new chapters");
                self.refresh();
            }
        }
    }

    fn set_refreshing(&mut self, refreshing: bool) {
        self.refreshing = refreshing;
        self.consumer.set_refreshing(refreshing);
    }

    // ========================================================================
    // Selection
    // ========================================================================

    pub fn toggle_selection(&mut self, chapter_id: ChapterId) -> bool {
        if !self.selection.remove(&chapter_id) {
            self.selection.insert(chapter_id);
            return true;
        }
        false
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Download slot as it should be drawn, or `None` when hidden.
    pub fn display_status(&self, manga: &MangaRef, chapter: &ChapterRef, info: &DownloadInfo) -> Option<DisplayStatus> {
        if !is_download_visible(self.prefs.show_downloads, chapter.read, info.status, manga.local) {
            return None;
        }
        let checked = chapter.id.is_some_and(|id| self.selection.contains(&id));
        Some(effective_status(info.status, checked))
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Mark a chapter read or unread.
    ///
    /// Marking read keeps the chapter's page position. Marking unread writes
    /// `last_page_read` and `pages_left` (0 when absent), which lets an undo
    /// restore the position the chapter had before.
    pub fn mark_chapter_read(
        &mut self,
        chapter: &ChapterRef,
        read: bool,
        last_page_read: Option<i32>,
        pages_left: Option<i32>,
    ) {
        let Some(chapter_id) = chapter.id else {
            return;
        };
        let store = Arc::clone(&self.store);
        let (last_page, pages_left) = if read {
            (chapter.last_page_read, chapter.pages_left)
        } else {
            (last_page_read.unwrap_or(0), pages_left.unwrap_or(0))
        };
        self.spawn_mutation("mark_chapter_read", async move {
            store
                .set_chapter_progress(chapter_id, read, last_page, pages_left)
                .await
        });
    }

    /// Forget the history entry an item was built from.
    pub fn remove_from_history(&mut self, item: &FeedItem) {
        let Some(chapter_id) = item.anchor else {
            return;
        };
        let store = Arc::clone(&self.store);
        self.spawn_mutation("remove_from_history", async move { store.reset_history(chapter_id).await });
    }

    pub fn remove_all_from_history(&mut self, manga_id: MangaId) {
        let store = Arc::clone(&self.store);
        self.spawn_mutation("remove_all_from_history", async move {
            store.reset_manga_history(manga_id).await
        });
    }

    pub fn delete_all_history(&mut self) {
        let store = Arc::clone(&self.store);
        self.spawn_mutation("delete_all_history", async move { store.delete_all_history().await });
    }

    /// Delete a downloaded chapter. Bookmarked chapters are kept unless the
    /// preference allows removing them. Returns whether a delete was issued.
    pub fn delete_chapter(&mut self, manga: &MangaRef, chapter: &ChapterRef) -> bool {
        let Some(chapter_id) = chapter.id else {
            return false;
        };
        if chapter.bookmark && !self.prefs.remove_bookmarked_on_delete {
            tracing::debug!(chapter_id, "Keeping bookmarked chapter");
            return false;
        }

        let entry = QueueEntry {
            chapter_id,
            manga_id: manga.id,
            status: DownloadStatus::NotDownloaded,
            progress: 0,
        };
        if self.feed.edit(|items| apply_update(items, &entry)) {
            self.consumer.update_single_chapter_download(&entry);
        }

        let downloads = Arc::clone(&self.downloads);
        let manga = manga.clone();
        let chapter = chapter.clone();
        self.spawn_mutation("delete_chapter", async move {
            downloads.delete_chapters(&manga, &[chapter]).await;
            Ok(())
        });
        true
    }

    pub fn download_chapter(&mut self, manga: &MangaRef, chapter: &ChapterRef) {
        if chapter.is_placeholder() {
            return;
        }
        let downloads = Arc::clone(&self.downloads);
        let manga = manga.clone();
        let chapter = chapter.clone();
        self.spawn_mutation("download_chapter", async move {
            downloads.enqueue(&manga, &[chapter]).await;
            Ok(())
        });
    }

    pub fn start_download_now(&mut self, chapter_id: ChapterId) {
        let downloads = Arc::clone(&self.downloads);
        self.spawn_mutation("start_download_now", async move {
            downloads.start_now(chapter_id).await;
            Ok(())
        });
    }

    fn spawn_mutation<F>(&self, action: &'static str, work: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let tx = self.event_tx.clone();
        tracing::debug!(action, "Spawning mutation task");
        tokio::spawn(async move {
            let event = match catch_task_panic(work).await {
                Ok(Ok(())) => AppEvent::MutationApplied { action },
                Ok(Err(e)) => AppEvent::MutationFailed {
                    action,
                    error: format!("{:#}", e),
                },
                Err(error) => AppEvent::TaskPanicked { task: action, error },
            };
            if let Err(e) = tx.send(event).await {
                tracing::warn!(error = %e, action, "Failed to send mutation result (receiver dropped)");
            }
        });
    }
}

// ============================================================================
// Resource Cleanup
// ============================================================================

/// Keeps the last feed for a warm restart and stops the in-flight pass.
impl Drop for App {
    fn drop(&mut self) {
        if !self.feed.is_empty() {
            self.warm_cache.save(Arc::clone(self.feed.items()));
        }
        if let Some(handle) = self.aggregation_handle.take() {
            handle.abort();
            tracing::debug!("Aborted aggregation task on App drop");
        }
    }
}
