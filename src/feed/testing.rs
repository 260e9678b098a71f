//! Row builders shared by the unit tests.
use std::sync::Arc;

use chrono::{Local, TimeZone};

use super::types::{ChapterRef, HistoryRecord, MangaRef, RawRow};

pub fn manga(id: i64) -> MangaRef {
    manga_titled(id, &format!("Manga {}", id))
}

pub fn manga_titled(id: i64, title: &str) -> MangaRef {
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

/// A fetched-chapter row: no history, relevance = fetch time.
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

/// A newly added manga row with no chapter.
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
