use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use sqlx::SqliteExecutor;

use super::schema::Database;
use super::types::{NewChapter, NewManga};
use crate::feed::{ChapterId, MangaId};
use crate::library::LibraryStore;

// ============================================================================
// Library Import
// ============================================================================

/// JSON library dump accepted by `--import`.
#[derive(Debug, Deserialize)]
pub struct LibraryDump {
    #[serde(default)]
    pub manga: Vec<DumpManga>,
}

#[derive(Debug, Deserialize)]
pub struct DumpManga {
    #[serde(flatten)]
    pub info: NewManga,
    #[serde(default)]
    pub chapters: Vec<DumpChapter>,
}

/// A chapter plus its optional history entry. `manga_id` is ignored.
#[derive(Debug, Deserialize)]
pub struct DumpChapter {
    #[serde(flatten)]
    pub chapter: NewChapter,
    #[serde(default)]
    pub last_read: Option<i64>,
    #[serde(default)]
    pub time_read: i64,
}

async fn insert_manga_with<'e, E: SqliteExecutor<'e>>(executor: E, manga: &NewManga) -> Result<MangaId> {
    let excluded = serde_json::to_string(&manga.excluded_scanlators)?;
    let result = sqlx::query(
        r#"
        INSERT INTO manga (source, title, favorite, local, date_added, excluded_scanlators)
        VALUES (?, ?, ?, ?, ?, ?)
    "#,
    )
    .bind(manga.source)
    .bind(&manga.title)
    .bind(manga.favorite)
    .bind(manga.local)
    .bind(manga.date_added)
    .bind(excluded)
    .execute(executor)
    .await?;
    Ok(result.last_insert_rowid())
}

async fn insert_chapter_with<'e, E: SqliteExecutor<'e>>(executor: E, chapter: &NewChapter) -> Result<ChapterId> {
    let result = sqlx::query(
        r#"
        INSERT INTO chapters (manga_id, name, chapter_number, scanlator, read, bookmark,
                              last_page_read, pages_left, date_fetch, date_upload)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    "#,
    )
    .bind(chapter.manga_id)
    .bind(&chapter.name)
    .bind(f64::from(chapter.chapter_number))
    .bind(chapter.scanlator.as_deref())
    .bind(chapter.read)
    .bind(chapter.bookmark)
    .bind(chapter.last_page_read)
    .bind(chapter.pages_left)
    .bind(chapter.date_fetch)
    .bind(chapter.date_upload)
    .execute(executor)
    .await?;
    Ok(result.last_insert_rowid())
}

async fn record_history_with<'e, E: SqliteExecutor<'e>>(
    executor: E,
    chapter_id: ChapterId,
    last_read: i64,
    time_read: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO history (chapter_id, last_read, time_read)
        VALUES (?, ?, ?)
        ON CONFLICT(chapter_id) DO UPDATE SET
            last_read = excluded.last_read,
            time_read = history.time_read + excluded.time_read
    "#,
    )
    .bind(chapter_id)
    .bind(last_read)
    .bind(time_read)
    .execute(executor)
    .await?;
    Ok(())
}

impl Database {
    // ========================================================================
    // Library Operations
    // ========================================================================

    pub async fn insert_manga(&self, manga: &NewManga) -> Result<MangaId> {
        insert_manga_with(&self.pool, manga).await
    }

    pub async fn insert_chapter(&self, chapter: &NewChapter) -> Result<ChapterId> {
        insert_chapter_with(&self.pool, chapter).await
    }

    /// Record a read of `chapter_id` at `last_read` (ms). Reading time
    /// accumulates across reads of the same chapter.
    pub async fn record_history(&self, chapter_id: ChapterId, last_read: i64, time_read: i64) -> Result<()> {
        record_history_with(&self.pool, chapter_id, last_read, time_read).await
    }

    /// Import a whole library dump in one transaction. Returns the number of
    /// manga and chapters inserted.
    pub async fn import_library(&self, dump: &LibraryDump) -> Result<(usize, usize)> {
        let mut tx = self.pool.begin().await?;
        let mut chapters = 0;

        for entry in &dump.manga {
            let manga_id = insert_manga_with(&mut *tx, &entry.info)
                .await
                .with_context(|| format!("Failed to import manga '{}'", entry.info.title))?;
            for dumped in &entry.chapters {
                let chapter = NewChapter {
                    manga_id,
                    ..dumped.chapter.clone()
                };
                let chapter_id = insert_chapter_with(&mut *tx, &chapter).await?;
                if let Some(last_read) = dumped.last_read.filter(|&t| t > 0) {
                    record_history_with(&mut *tx, chapter_id, last_read, dumped.time_read).await?;
                }
                chapters += 1;
            }
        }

        tx.commit().await?;
        tracing::info!(manga = dump.manga.len(), chapters, "Imported library");
        Ok((dump.manga.len(), chapters))
    }
}

// ============================================================================
// Mutations
// ============================================================================

#[async_trait]
impl LibraryStore for Database {
    async fn set_chapter_progress(
        &self,
        chapter_id: ChapterId,
        read: bool,
        last_page_read: i32,
        pages_left: i32,
    ) -> Result<()> {
        sqlx::query("UPDATE chapters SET read = ?, last_page_read = ?, pages_left = ? WHERE id = ?")
            .bind(read)
            .bind(last_page_read)
            .bind(pages_left)
            .bind(chapter_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reset_history(&self, chapter_id: ChapterId) -> Result<()> {
        sqlx::query("UPDATE history SET last_read = 0, time_read = 0 WHERE chapter_id = ?")
            .bind(chapter_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reset_manga_history(&self, manga_id: MangaId) -> Result<()> {
        sqlx::query(
            "UPDATE history SET last_read = 0, time_read = 0 \
             WHERE chapter_id IN (SELECT id FROM chapters WHERE manga_id = ?)",
        )
        .bind(manga_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_all_history(&self) -> Result<()> {
        let result = sqlx::query("DELETE FROM history").execute(&self.pool).await?;
        tracing::info!(rows = result.rows_affected(), "Deleted all reading history");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FetchRequest, QuerySource, ViewMode};

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn history_request() -> FetchRequest {
        FetchRequest {
            query: String::new(),
            view_mode: ViewMode::OnlyHistory,
            include_read: true,
            cursor: 0,
            append: false,
            limit: 50,
        }
    }

    const DUMP: &str = r#"{
        "manga": [
            {
                "title": "Alpha",
                "favorite": true,
                "date_added": 1000,
                "excluded_scanlators": ["Bad Scans"],
                "chapters": [
                    { "name": "Chapter 1", "chapter_number": 1.0, "read": true, "last_read": 5000, "time_read": 30 },
                    { "name": "Chapter 2", "chapter_number": 2.0, "date_fetch": 6000 }
                ]
            },
            { "title": "Beta" }
        ]
    }"#;

    #[tokio::test]
    async fn test_import_library() {
        let db = test_db().await;
        let dump: LibraryDump = serde_json::from_str(DUMP).unwrap();
        let (manga, chapters) = db.import_library(&dump).await.unwrap();
        assert_eq!((manga, chapters), (2, 2));

        let rows = db.fetch(&history_request()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(&*rows[0].chapter.name, "Chapter 1");
        assert_eq!(rows[0].history.time_read, 30);
        assert_eq!(rows[0].manga.excluded_scanlators, vec!["Bad Scans".to_string()]);
    }

    #[tokio::test]
    async fn test_record_history_accumulates_time() {
        let db = test_db().await;
        let dump: LibraryDump = serde_json::from_str(DUMP).unwrap();
        db.import_library(&dump).await.unwrap();
        let rows = db.fetch(&history_request()).await.unwrap();
        let chapter_id = rows[0].chapter.id.unwrap();

        db.record_history(chapter_id, 9000, 20).await.unwrap();
        let rows = db.fetch(&history_request()).await.unwrap();
        assert_eq!(rows[0].history.last_read, 9000);
        assert_eq!(rows[0].history.time_read, 50);
    }

    #[tokio::test]
    async fn test_chapter_progress_and_history_reset() {
        let db = test_db().await;
        let dump: LibraryDump = serde_json::from_str(DUMP).unwrap();
        db.import_library(&dump).await.unwrap();
        let manga_id = db.fetch(&history_request()).await.unwrap()[0].manga.id;
        let chapters = db.chapters_for_manga(manga_id).await.unwrap();
        let second = chapters.iter().find(|c| c.chapter_number == 2.0).unwrap();

        db.set_chapter_progress(second.id.unwrap(), true, 12, 4).await.unwrap();
        let chapters = db.chapters_for_manga(manga_id).await.unwrap();
        let second = chapters.iter().find(|c| c.chapter_number == 2.0).unwrap();
        assert!(second.read);
        assert_eq!((second.last_page_read, second.pages_left), (12, 4));

        db.reset_manga_history(manga_id).await.unwrap();
        assert!(db.fetch(&history_request()).await.unwrap().is_empty());
        let totals: Vec<(i64, i64)> = sqlx::query_as("SELECT last_read, time_read FROM history")
            .fetch_all(&db.pool)
            .await
            .unwrap();
        assert_eq!(totals, vec![(0, 0)]);
    }

    #[tokio::test]
    async fn test_reset_history_clears_time_read() {
        let db = test_db().await;
        let dump: LibraryDump = serde_json::from_str(DUMP).unwrap();
        db.import_library(&dump).await.unwrap();
        let chapter_id = db.fetch(&history_request()).await.unwrap()[0].chapter.id.unwrap();

        db.reset_history(chapter_id).await.unwrap();
        let (last_read, time_read): (i64, i64) =
            sqlx::query_as("SELECT last_read, time_read FROM history WHERE chapter_id = ?")
                .bind(chapter_id)
                .fetch_one(&db.pool)
                .await
                .unwrap();
        assert_eq!((last_read, time_read), (0, 0));

        // A later read starts the total over
        db.record_history(chapter_id, 9000, 20).await.unwrap();
        let rows = db.fetch(&history_request()).await.unwrap();
        assert_eq!(rows[0].history.time_read, 20);
    }

    #[tokio::test]
    async fn test_delete_all_history() {
        let db = test_db().await;
        let dump: LibraryDump = serde_json::from_str(DUMP).unwrap();
        db.import_library(&dump).await.unwrap();

        db.delete_all_history().await.unwrap();
        let remaining: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM history")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(remaining.0, 0);
    }
}
