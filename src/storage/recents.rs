use async_trait::async_trait;

use super::schema::Database;
use super::types::{ChapterDbRow, RecentDbRow};
use crate::feed::{ChapterRef, FetchRequest, MangaId, QuerySource, RawRow, SourceError, ViewMode};

// ============================================================================
// Recents Queries
// ============================================================================
//
// Every query returns the RecentDbRow column set, ordered by h_last_read
// descending with id tie-breakers so that LIMIT/OFFSET pages are stable.

/// Read history: one row per chapter with a live history entry.
const HISTORY_QUERY: &str = r#"
    SELECT m.id AS m_id, m.title AS m_title, m.source AS m_source, m.local AS m_local,
           m.excluded_scanlators AS m_excluded,
           c.id AS c_id, c.name AS c_name, c.chapter_number AS c_number,
           c.scanlator AS c_scanlator, c.read AS c_read, c.bookmark AS c_bookmark,
           c.last_page_read AS c_last_page_read, c.pages_left AS c_pages_left,
           c.date_fetch AS c_date_fetch, c.date_upload AS c_date_upload,
           h.id AS h_id, h.last_read AS h_last_read, h.time_read AS h_time_read
    FROM history h
    JOIN chapters c ON c.id = h.chapter_id
    JOIN manga m ON m.id = c.manga_id
    WHERE h.last_read > 0 AND m.title LIKE ? ESCAPE '\'
    ORDER BY h_last_read DESC, h_id DESC
    LIMIT ? OFFSET ?
"#;

/// Chapters fetched for followed manga after they were added. The fetch time
/// stands in for the history timestamp.
const UPDATES_QUERY: &str = r#"
    SELECT m.id AS m_id, m.title AS m_title, m.source AS m_source, m.local AS m_local,
           m.excluded_scanlators AS m_excluded,
           c.id AS c_id, c.name AS c_name, c.chapter_number AS c_number,
           c.scanlator AS c_scanlator, c.read AS c_read, c.bookmark AS c_bookmark,
           c.last_page_read AS c_last_page_read, c.pages_left AS c_pages_left,
           c.date_fetch AS c_date_fetch, c.date_upload AS c_date_upload,
           NULL AS h_id, c.date_fetch AS h_last_read, 0 AS h_time_read
    FROM chapters c
    JOIN manga m ON m.id = c.manga_id
    WHERE m.favorite = 1
      AND c.date_fetch > m.date_added
      AND (? OR c.read = 0)
      AND m.title LIKE ? ESCAPE '\'
    ORDER BY h_last_read DESC, c_id DESC
    LIMIT ? OFFSET ?
"#;

/// History, new chapters and new additions in one relevance-ordered stream.
///
/// - history: the most recently read chapter of each manga
/// - new chapters: fetched after the manga was added and never opened
/// - new additions: followed manga nobody has read yet, as chapterless rows
const ALL_TYPES_QUERY: &str = r#"
    SELECT * FROM (
        SELECT m.id AS m_id, m.title AS m_title, m.source AS m_source, m.local AS m_local,
               m.excluded_scanlators AS m_excluded,
               c.id AS c_id, c.name AS c_name, c.chapter_number AS c_number,
               c.scanlator AS c_scanlator, c.read AS c_read, c.bookmark AS c_bookmark,
               c.last_page_read AS c_last_page_read, c.pages_left AS c_pages_left,
               c.date_fetch AS c_date_fetch, c.date_upload AS c_date_upload,
               h.id AS h_id, h.last_read AS h_last_read, h.time_read AS h_time_read
        FROM history h
        JOIN chapters c ON c.id = h.chapter_id
        JOIN manga m ON m.id = c.manga_id
        WHERE h.last_read > 0
          AND m.title LIKE ? ESCAPE '\'
          AND h.id = (
              SELECT h2.id FROM history h2
              JOIN chapters c2 ON c2.id = h2.chapter_id
              WHERE c2.manga_id = m.id AND h2.last_read > 0
              ORDER BY h2.last_read DESC, h2.id DESC
              LIMIT 1
          )

        UNION ALL

        SELECT m.id, m.title, m.source, m.local, m.excluded_scanlators,
               c.id, c.name, c.chapter_number, c.scanlator, c.read, c.bookmark,
               c.last_page_read, c.pages_left, c.date_fetch, c.date_upload,
               NULL, c.date_fetch, 0
        FROM chapters c
        JOIN manga m ON m.id = c.manga_id
        LEFT JOIN history h ON h.chapter_id = c.id
        WHERE m.favorite = 1
          AND c.date_fetch > m.date_added
          AND h.id IS NULL
          AND (? OR c.read = 0)
          AND m.title LIKE ? ESCAPE '\'

        UNION ALL

        SELECT m.id, m.title, m.source, m.local, m.excluded_scanlators,
               NULL, NULL, NULL, NULL, NULL, NULL, NULL, NULL, NULL, NULL,
               NULL, m.date_added, 0
        FROM manga m
        WHERE m.favorite = 1
          AND m.date_added > 0
          AND m.title LIKE ? ESCAPE '\'
          AND NOT EXISTS (
              SELECT 1 FROM chapters c3
              JOIN history h3 ON h3.chapter_id = c3.id
              WHERE c3.manga_id = m.id AND h3.last_read > 0
          )
    )
    ORDER BY h_last_read DESC, m_id DESC, c_id DESC
    LIMIT ? OFFSET ?
"#;

const CHAPTERS_QUERY: &str = r#"
    SELECT id, manga_id, name, chapter_number, scanlator, read, bookmark,
           last_page_read, pages_left, date_fetch, date_upload
    FROM chapters
    WHERE manga_id = ?
"#;

/// `LIKE` pattern matching `query` anywhere in the title.
fn title_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for ch in query.trim().chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl Database {
    async fn recent_rows(&self, request: &FetchRequest) -> anyhow::Result<Vec<RawRow>> {
        let (limit, offset) = request.window();
        let pattern = title_pattern(&request.query);

        let rows: Vec<RecentDbRow> = match request.view_mode {
            ViewMode::OnlyHistory => {
                sqlx::query_as(HISTORY_QUERY)
                    .bind(&pattern)
                    .bind(to_i64(limit))
                    .bind(to_i64(offset))
                    .fetch_all(&self.pool)
                    .await?
            }
            ViewMode::OnlyUpdates => {
                sqlx::query_as(UPDATES_QUERY)
                    .bind(request.include_read)
                    .bind(&pattern)
                    .bind(to_i64(limit))
                    .bind(to_i64(offset))
                    .fetch_all(&self.pool)
                    .await?
            }
            ViewMode::GroupAll | ViewMode::UngroupAll => {
                sqlx::query_as(ALL_TYPES_QUERY)
                    .bind(&pattern)
                    .bind(request.include_read)
                    .bind(&pattern)
                    .bind(&pattern)
                    .bind(to_i64(limit))
                    .bind(to_i64(offset))
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        tracing::trace!(
            view = %request.view_mode,
            limit,
            offset,
            rows = rows.len(),
            "Fetched recents rows"
        );
        Ok(rows.into_iter().map(RecentDbRow::into_raw_row).collect())
    }

    pub async fn get_chapters_for_manga(&self, manga_id: MangaId) -> anyhow::Result<Vec<ChapterRef>> {
        let rows: Vec<ChapterDbRow> = sqlx::query_as(CHAPTERS_QUERY)
            .bind(manga_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(ChapterDbRow::into_chapter).collect())
    }
}

#[async_trait]
impl QuerySource for Database {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<RawRow>, SourceError> {
        Ok(self.recent_rows(request).await?)
    }

    async fn chapters_for_manga(&self, manga_id: MangaId) -> Result<Vec<ChapterRef>, SourceError> {
        Ok(self.get_chapters_for_manga(manga_id).await?)
    }
}
