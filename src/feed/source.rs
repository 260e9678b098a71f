use async_trait::async_trait;
use thiserror::Error;

use super::types::{ChapterRef, MangaId, RawRow};
use super::view::ViewMode;

/// Failure reported by a query source adapter.
///
/// The aggregation core never surfaces these; a failed fetch is logged and
/// treated as an empty batch.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("query source failed: {0}")]
    Backend(#[from] anyhow::Error),
}

/// One batch request against a [`QuerySource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Title filter; empty matches everything.
    pub query: String,
    pub view_mode: ViewMode,
    /// Include rows whose chapter is already read.
    pub include_read: bool,
    /// Number of rows already consumed by earlier pages.
    pub cursor: usize,
    /// `true`: up to `limit` rows after `cursor`.
    /// `false`: rows from the start, up to `max(cursor, limit)` of them.
    pub append: bool,
    pub limit: usize,
}

impl FetchRequest {
    /// `(limit, offset)` window this request covers.
    pub fn window(&self) -> (usize, usize) {
        if self.append {
            (self.limit, self.cursor)
        } else {
            (self.limit.max(self.cursor), 0)
        }
    }
}

/// Read-only provider of raw (manga, chapter, history) rows.
///
/// Rows must come back ordered by relevance (`history.last_read`)
/// descending. Returning fewer rows than the window allows is the only
/// "no more data" signal.
#[async_trait]
pub trait QuerySource: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<RawRow>, SourceError>;

    /// Every chapter of a manga, in any order.
    async fn chapters_for_manga(&self, manga_id: MangaId) -> Result<Vec<ChapterRef>, SourceError>;
}
