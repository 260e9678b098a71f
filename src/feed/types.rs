use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{Local, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};

use crate::download::DownloadInfo;

pub type MangaId = i64;
pub type ChapterId = i64;

// ============================================================================
// Library Entities
// ============================================================================

/// A manga as seen by the feed engine. Never mutated by aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MangaRef {
    pub id: MangaId,
    pub title: Arc<str>,
    pub source: i64,
    /// Stored on the device rather than backed by a remote source.
    pub local: bool,
    /// Scanlator labels hidden for this manga.
    #[serde(default)]
    pub excluded_scanlators: Vec<String>,
}

impl MangaRef {
    /// Whether a chapter survives this manga's scanlator filter.
    ///
    /// Joint releases ("A & B") are kept as long as one of the groups is
    /// not excluded.
    pub fn accepts(&self, chapter: &ChapterRef) -> bool {
        if self.excluded_scanlators.is_empty() {
            return true;
        }
        let Some(label) = chapter.scanlator.as_deref() else {
            return true;
        };
        label
            .split(" & ")
            .map(str::trim)
            .any(|group| !self.excluded_scanlators.iter().any(|ex| ex == group))
    }
}

/// A chapter row. `id == None` marks the placeholder that stands in for a
/// newly added manga without chapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterRef {
    pub id: Option<ChapterId>,
    pub manga_id: MangaId,
    pub name: Arc<str>,
    /// Non-positive values mean the source number could not be recognized.
    pub chapter_number: f32,
    pub scanlator: Option<Arc<str>>,
    pub read: bool,
    pub bookmark: bool,
    pub last_page_read: i32,
    pub pages_left: i32,
    /// Milliseconds since the epoch.
    pub date_fetch: i64,
    /// Milliseconds since the epoch.
    pub date_upload: i64,
    /// Last-read time copied from history while grouping history rows.
    #[serde(default)]
    pub date_read: Option<i64>,
}

impl ChapterRef {
    pub fn placeholder(manga_id: MangaId) -> Self {
        Self {
            id: None,
            manga_id,
            name: Arc::from(""),
            chapter_number: -1.0,
            scanlator: None,
            read: false,
            bookmark: false,
            last_page_read: 0,
            pages_left: 0,
            date_fetch: 0,
            date_upload: 0,
            date_read: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.id.is_none()
    }

    /// Ascending reading order: chapter number, then upload time, then id.
    ///
    /// Unrecognized numbers sort before every recognized one. The key is a
    /// total order so slices can be sorted with it safely.
    pub fn reading_order(a: &ChapterRef, b: &ChapterRef) -> Ordering {
        a.chapter_number
            .total_cmp(&b.chapter_number)
            .then(a.date_upload.cmp(&b.date_upload))
            .then(a.id.cmp(&b.id))
    }
}

/// Reading history attached to a row. For rows that are not history rows the
/// query source leaves `id` empty and stores the row's relevance timestamp
/// (fetch time, date added) in `last_read`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: Option<i64>,
    pub last_read: i64,
    pub time_read: i64,
}

/// One (manga, chapter, history) join row as returned by a query source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    pub manga: MangaRef,
    pub chapter: ChapterRef,
    pub history: HistoryRecord,
}

// ============================================================================
// Day Buckets
// ============================================================================

/// Local calendar day of a timestamp. Non-positive timestamps all land in
/// `Unknown`, which never merges with a dated bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DayKey {
    Unknown,
    Day(NaiveDate),
}

impl DayKey {
    pub fn of(timestamp_ms: i64) -> Self {
        if timestamp_ms <= 0 {
            return DayKey::Unknown;
        }
        match Local.timestamp_millis_opt(timestamp_ms).earliest() {
            Some(dt) => DayKey::Day(dt.date_naive()),
            None => DayKey::Unknown,
        }
    }
}

// ============================================================================
// Feed Items
// ============================================================================

/// Section an item is rendered under. Consecutive items sharing a tag form
/// one section and the tag doubles as that section's header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupTag {
    NewAdditions,
    NewChapters,
    ContinueReading,
    Day(DayKey),
    Ungrouped,
}

/// Key used to keep pages free of duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DedupKey {
    Manga(MangaId),
    Chapter(ChapterId),
}

/// One row of the published feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub manga: MangaRef,
    /// The chapter shown for this item after primary resolution.
    pub chapter: ChapterRef,
    pub history: HistoryRecord,
    /// Chapter id of the raw row the item was built from.
    pub anchor: Option<ChapterId>,
    pub extras: Vec<ChapterRef>,
    pub group: GroupTag,
    pub download: DownloadInfo,
    pub extra_downloads: Vec<DownloadInfo>,
}

impl FeedItem {
    pub fn new(manga: MangaRef, chapter: ChapterRef, history: HistoryRecord, anchor: Option<ChapterId>) -> Self {
        let download = DownloadInfo::for_chapter(chapter.id);
        Self {
            manga,
            chapter,
            history,
            anchor,
            extras: Vec::new(),
            group: GroupTag::Ungrouped,
            download,
            extra_downloads: Vec::new(),
        }
    }

    /// Placeholders have no chapter to key on and fall back to the manga.
    pub fn dedup_key(&self, by_manga: bool) -> DedupKey {
        match self.anchor {
            Some(anchor) if !by_manga => DedupKey::Chapter(anchor),
            _ => DedupKey::Manga(self.manga.id),
        }
    }

    /// Whether `chapter_id` is the primary chapter or one of the extras.
    pub fn covers(&self, chapter_id: ChapterId) -> bool {
        self.chapter.id == Some(chapter_id) || self.extras.iter().any(|c| c.id == Some(chapter_id))
    }

    /// Drop extras that repeat the primary chapter or each other.
    pub fn normalize_extras(&mut self) {
        let primary = self.chapter.id;
        let mut seen = std::collections::HashSet::with_capacity(self.extras.len());
        self.extras
            .retain(|c| c.id.is_some() && c.id != primary && seen.insert(c.id));
    }
}
