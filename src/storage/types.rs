use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::feed::{ChapterRef, HistoryRecord, MangaRef, RawRow};
use crate::util::sanitize_title;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another instance of the application has locked the database
    #[error("Another instance of recents appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY, SQLITE_LOCKED and SQLITE_CANTOPEN all surface as one of these.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("database is locked")
        || lower.contains("database table is locked")
        || lower.contains("sqlite_busy")
        || lower.contains("sqlite_locked")
        || lower.contains("unable to open database file")
}

// ============================================================================
// Insert Types
// ============================================================================

/// A manga to insert into the library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewManga {
    pub title: String,
    #[serde(default)]
    pub source: i64,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub local: bool,
    /// Milliseconds since the epoch.
    #[serde(default)]
    pub date_added: i64,
    #[serde(default)]
    pub excluded_scanlators: Vec<String>,
}

/// A chapter to insert. `manga_id` refers to an existing library row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewChapter {
    #[serde(default)]
    pub manga_id: i64,
    pub name: String,
    #[serde(default = "unknown_number")]
    pub chapter_number: f32,
    #[serde(default)]
    pub scanlator: Option<String>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub bookmark: bool,
    #[serde(default)]
    pub last_page_read: i32,
    #[serde(default)]
    pub pages_left: i32,
    #[serde(default)]
    pub date_fetch: i64,
    #[serde(default)]
    pub date_upload: i64,
}

fn unknown_number() -> f32 {
    -1.0
}

// ============================================================================
// Row Types
// ============================================================================

/// One row of a recents query: manga columns, optional chapter columns
/// (absent for new additions) and history columns.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RecentDbRow {
    pub m_id: i64,
    pub m_title: String,
    pub m_source: i64,
    pub m_local: bool,
    pub m_excluded: String,
    pub c_id: Option<i64>,
    pub c_name: Option<String>,
    pub c_number: Option<f64>,
    pub c_scanlator: Option<String>,
    pub c_read: Option<bool>,
    pub c_bookmark: Option<bool>,
    pub c_last_page_read: Option<i64>,
    pub c_pages_left: Option<i64>,
    pub c_date_fetch: Option<i64>,
    pub c_date_upload: Option<i64>,
    pub h_id: Option<i64>,
    pub h_last_read: i64,
    pub h_time_read: i64,
}

impl RecentDbRow {
    pub(crate) fn into_raw_row(self) -> RawRow {
        let manga = MangaRef {
            id: self.m_id,
            title: Arc::from(sanitize_title(&self.m_title)),
            source: self.m_source,
            local: self.m_local,
            excluded_scanlators: parse_excluded(&self.m_excluded),
        };
        let chapter = match self.c_id {
            Some(id) => ChapterRef {
                id: Some(id),
                manga_id: self.m_id,
                name: Arc::from(sanitize_title(self.c_name.as_deref().unwrap_or_default())),
                chapter_number: self.c_number.unwrap_or(-1.0) as f32,
                scanlator: self.c_scanlator.map(Arc::from),
                read: self.c_read.unwrap_or(false),
                bookmark: self.c_bookmark.unwrap_or(false),
                last_page_read: clamp_i32(self.c_last_page_read.unwrap_or(0)),
                pages_left: clamp_i32(self.c_pages_left.unwrap_or(0)),
                date_fetch: self.c_date_fetch.unwrap_or(0),
                date_upload: self.c_date_upload.unwrap_or(0),
                date_read: None,
            },
            None => ChapterRef::placeholder(self.m_id),
        };
        RawRow {
            manga,
            chapter,
            history: HistoryRecord {
                id: self.h_id,
                last_read: self.h_last_read,
                time_read: self.h_time_read,
            },
        }
    }
}

/// A chapter row for per-manga chapter lookups.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ChapterDbRow {
    pub id: i64,
    pub manga_id: i64,
    pub name: String,
    pub chapter_number: f64,
    pub scanlator: Option<String>,
    pub read: bool,
    pub bookmark: bool,
    pub last_page_read: i64,
    pub pages_left: i64,
    pub date_fetch: i64,
    pub date_upload: i64,
}

impl ChapterDbRow {
    pub(crate) fn into_chapter(self) -> ChapterRef {
        ChapterRef {
            id: Some(self.id),
            manga_id: self.manga_id,
            name: Arc::from(sanitize_title(&self.name)),
            chapter_number: self.chapter_number as f32,
            scanlator: self.scanlator.map(Arc::from),
            read: self.read,
            bookmark: self.bookmark,
            last_page_read: clamp_i32(self.last_page_read),
            pages_left: clamp_i32(self.pages_left),
            date_fetch: self.date_fetch,
            date_upload: self.date_upload,
            date_read: None,
        }
    }
}

/// Excluded scanlators are stored as a JSON array. A malformed value hides
/// nothing rather than failing the whole query.
fn parse_excluded(raw: &str) -> Vec<String> {
    match serde_json::from_str(raw) {
        Ok(list) => list,
        Err(e) => {
            tracing::warn!(value = %raw, error = %e, "Malformed excluded scanlator list, ignoring");
            Vec::new()
        }
    }
}

fn clamp_i32(value: i64) -> i32 {
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(c_id: Option<i64>) -> RecentDbRow {
        RecentDbRow {
            m_id: 3,
            m_title: "Title\u{7}".to_string(),
            m_source: 1,
            m_local: false,
            m_excluded: r#"["Bad Scans"]"#.to_string(),
            c_id,
            c_name: c_id.map(|_| "Ch. 1".to_string()),
            c_number: c_id.map(|_| 1.0),
            c_scanlator: None,
            c_read: c_id.map(|_| true),
            c_bookmark: c_id.map(|_| false),
            c_last_page_read: c_id.map(|_| 4),
            c_pages_left: c_id.map(|_| 0),
            c_date_fetch: c_id.map(|_| 100),
            c_date_upload: c_id.map(|_| 90),
            h_id: None,
            h_last_read: 500,
            h_time_read: 0,
        }
    }

    #[test]
    fn test_missing_chapter_becomes_placeholder() {
        let raw = row(None).into_raw_row();
        assert!(raw.chapter.is_placeholder());
        assert_eq!(raw.chapter.manga_id, 3);
        assert_eq!(raw.history.last_read, 500);
    }

    #[test]
    fn test_chapter_columns_and_title_sanitized() {
        let raw = row(Some(8)).into_raw_row();
        assert_eq!(raw.chapter.id, Some(8));
        assert!(raw.chapter.read);
        assert_eq!(raw.chapter.last_page_read, 4);
        assert_eq!(&*raw.manga.title, "Title");
        assert_eq!(raw.manga.excluded_scanlators, vec!["Bad Scans".to_string()]);
    }

    #[test]
    fn test_malformed_excluded_list_hides_nothing() {
        assert!(parse_excluded("not json").is_empty());
        assert!(parse_excluded("[]").is_empty());
    }

    #[test]
    fn test_lock_messages_detected() {
        assert!(is_lock_message("error returned from database: database is locked"));
        assert!(is_lock_message("SQLITE_BUSY"));
        assert!(!is_lock_message("no such table: manga"));
    }
}
