//! Chooses the chapter actually shown for each candidate.
//!
//! A history row pointing at a finished chapter is not useful on its own;
//! the reader wants the next chapter to read. Likewise a freshly fetched
//! chapter should surface the first unread chapter of the same update batch.
//! Both lookups need the manga's full chapter list, which is fetched through
//! the query source and memoized for the rest of the pass.
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use super::grouper::Candidate;
use super::source::QuerySource;
use super::types::{ChapterRef, MangaId, MangaRef};
use super::view::{ChapterOrder, Pipeline, ViewMode};

const CHAPTER_CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(64) {
    Some(size) => size,
    None => unreachable!(),
};

/// Inputs shared by every resolution in one pass.
pub struct ResolveContext<'a> {
    pub pipeline: Pipeline,
    pub view_mode: ViewMode,
    pub query: &'a str,
    pub show_read: bool,
    /// Chapters fetched this close together count as one update.
    pub same_update_window_ms: i64,
    /// Manga already present in the feed being extended.
    pub known_manga: &'a HashSet<MangaId>,
}

impl ResolveContext<'_> {
    /// Whether a row without a better chapter is kept with its own chapter.
    fn keeps_unresolved(&self) -> bool {
        !self.query.is_empty()
            || matches!(self.view_mode, ViewMode::OnlyHistory | ViewMode::OnlyUpdates)
    }
}

/// A candidate paired with the chapter it will show.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub candidate: Candidate,
    pub shown: ChapterRef,
}

pub struct Resolver<'s, S: ?Sized> {
    source: &'s S,
    chapters: LruCache<MangaId, Arc<Vec<ChapterRef>>>,
}

impl<'s, S: QuerySource + ?Sized> Resolver<'s, S> {
    pub fn new(source: &'s S) -> Self {
        Self {
            source,
            chapters: LruCache::new(CHAPTER_CACHE_SIZE),
        }
    }

    async fn chapters(&mut self, manga: &MangaRef) -> Arc<Vec<ChapterRef>> {
        if let Some(chapters) = self.chapters.get(&manga.id) {
            return Arc::clone(chapters);
        }
        let chapters = match self.source.chapters_for_manga(manga.id).await {
            Ok(chapters) => chapters,
            Err(e) => {
                tracing::warn!(manga_id = manga.id, error = %e, "Chapter lookup failed, resolving without it");
                Vec::new()
            }
        };
        let chapters: Arc<Vec<ChapterRef>> =
            Arc::new(chapters.into_iter().filter(|c| manga.accepts(c)).collect());
        self.chapters.put(manga.id, Arc::clone(&chapters));
        chapters
    }

    /// Earliest unread chapter in reading order.
    pub async fn next_unread(&mut self, manga: &MangaRef) -> Option<ChapterRef> {
        let chapters = self.chapters(manga).await;
        chapters
            .iter()
            .filter(|c| !c.read)
            .min_by(|a, b| ChapterRef::reading_order(a, b))
            .cloned()
    }

    /// Latest unread chapter fetched within `window_ms` of `anchor`.
    pub async fn first_updated(
        &mut self,
        manga: &MangaRef,
        anchor: &ChapterRef,
        window_ms: i64,
    ) -> Option<ChapterRef> {
        let chapters = self.chapters(manga).await;
        let mut sorted: Vec<&ChapterRef> = chapters.iter().collect();
        sorted.sort_by(|a, b| ChapterOrder::ReadingDesc.compare(a, b));
        sorted
            .into_iter()
            .find(|c| !c.read && (c.date_fetch - anchor.date_fetch).abs() <= window_ms)
            .cloned()
    }

    /// Resolve every candidate, dropping the ones left with nothing to show.
    pub async fn resolve_all(&mut self, candidates: Vec<Candidate>, ctx: &ResolveContext<'_>) -> Vec<Resolved> {
        let mut resolved = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if let Some(r) = self.resolve(candidate, ctx).await {
                resolved.push(r);
            }
        }
        resolved
    }

    async fn resolve(&mut self, mut candidate: Candidate, ctx: &ResolveContext<'_>) -> Option<Resolved> {
        let pipeline = ctx.pipeline;
        let own = &candidate.chapter;
        let show_own = ctx.show_read && !own.is_placeholder();

        let shown = if !pipeline.resolves_primary() {
            Some(own.clone())
        } else if (own.read && !pipeline.is_updates()) || own.is_placeholder() {
            let next = match self.next_unread(&candidate.manga).await {
                Some(next) => Some(next),
                None if show_own => Some(own.clone()),
                None => None,
            };
            if pipeline.is_history() && next.is_some() && ctx.known_manga.contains(&candidate.manga.id) {
                Some(candidate.chapter.clone())
            } else {
                next.map(|mut next| {
                    if pipeline.is_history() && next.id.is_some() && next.id != candidate.chapter.id {
                        next.date_read = candidate.chapter.date_read;
                        candidate.extras.insert(0, candidate.chapter.clone());
                    }
                    next
                })
            }
        } else if candidate.history.id.is_none() && !pipeline.is_updates() {
            match self
                .first_updated(&candidate.manga, own, ctx.same_update_window_ms)
                .await
            {
                Some(chapter) => Some(chapter),
                None if show_own => Some(own.clone()),
                None => None,
            }
        } else {
            Some(own.clone())
        };

        let shown = match shown {
            Some(chapter) => chapter,
            None if candidate.chapter.is_placeholder() || ctx.keeps_unresolved() => {
                candidate.chapter.clone()
            }
            None => {
                tracing::trace!(manga_id = candidate.manga.id, "Dropping row with nothing to show");
                return None;
            }
        };
        Some(Resolved { candidate, shown })
    }
}
