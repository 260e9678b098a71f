//! In-memory [`QuerySource`] holding prepared rows per view mode.
//!
//! Used for embedding the engine without a database and for tests. Rows are
//! served in the order they were stored; the title filter and the fetch
//! window are applied on every call.
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::source::{FetchRequest, QuerySource, SourceError};
use super::types::{ChapterRef, MangaId, RawRow};
use super::view::ViewMode;

#[derive(Default)]
pub struct MemorySource {
    rows: Mutex<HashMap<ViewMode, Vec<RawRow>>>,
    chapters: Mutex<HashMap<MangaId, Vec<ChapterRef>>>,
    fetches: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(self, mode: ViewMode, rows: Vec<RawRow>) -> Self {
        self.set_rows(mode, rows);
        self
    }

    pub fn with_chapters(self, manga_id: MangaId, chapters: Vec<ChapterRef>) -> Self {
        self.set_chapters(manga_id, chapters);
        self
    }

    /// Replace the rows served for `mode`. GroupAll and UngroupAll share
    /// rows when only one of them is set.
    pub fn set_rows(&self, mode: ViewMode, rows: Vec<RawRow>) {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(mode, rows);
    }

    pub fn set_chapters(&self, manga_id: MangaId, chapters: Vec<ChapterRef>) {
        self.chapters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(manga_id, chapters);
    }

    /// Number of `fetch` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuerySource for MemorySource {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<RawRow>, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let stored = rows.get(&request.view_mode).or_else(|| match request.view_mode {
            ViewMode::GroupAll => rows.get(&ViewMode::UngroupAll),
            ViewMode::UngroupAll => rows.get(&ViewMode::GroupAll),
            _ => None,
        });
        let Some(stored) = stored else {
            return Ok(Vec::new());
        };

        let needle = request.query.to_lowercase();
        let (limit, offset) = request.window();
        Ok(stored
            .iter()
            .filter(|row| needle.is_empty() || row.manga.title.to_lowercase().contains(&needle))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn chapters_for_manga(&self, manga_id: MangaId) -> Result<Vec<ChapterRef>, SourceError> {
        Ok(self
            .chapters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&manga_id)
            .cloned()
            .unwrap_or_default())
    }
}
