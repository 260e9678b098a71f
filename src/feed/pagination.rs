//! Fetch-until-full pagination over a [`QuerySource`].
//!
//! One call to [`run_aggregation`] is one user-visible request (first page,
//! refresh or next page). It keeps fetching batches in append mode until
//! the expanded item count reaches the threshold or the retry ceiling is
//! exceeded, and returns the whole draft feed for the engine to publish.
//!
//! Every batch goes through the same stages:
//!
//! 1. fetch raw rows (errors count as an empty batch)
//! 2. group them by (manga, day), folding into the draft when appending
//! 3. drop candidates whose dedup key is already present
//! 4. resolve the shown chapter
//! 5. tag and order the new items, then replace or extend the draft
//!
//! The pass checks its [`Checkpoint`] between stages and returns `None`
//! as soon as a newer request has superseded it.
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::grouper::group_rows;
use super::merger::{assemble, SectionLimits};
use super::resolve::{ResolveContext, Resolver};
use super::source::{FetchRequest, QuerySource};
use super::types::{DedupKey, FeedItem, MangaId, MangaRef};
use super::view::{Pipeline, ViewMode};
use crate::preferences::RecentsPreferences;

const HOUR_MS: i64 = 60 * 60 * 1000;

// ============================================================================
// Policy and State
// ============================================================================

/// Tunable limits of the pagination loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePolicy {
    /// Expanded count a page must reach before it is considered full.
    pub page_size: usize,
    /// Rows requested per batch for paginated views.
    pub endless_limit: usize,
    /// Append retries allowed after the first attempt.
    pub max_retries: u32,
    pub same_update_window_ms: i64,
    pub sections: SectionLimits,
}

impl Default for PagePolicy {
    fn default() -> Self {
        Self {
            page_size: 25,
            endless_limit: 50,
            max_retries: 5,
            same_update_window_ms: 12 * HOUR_MS,
            sections: SectionLimits::default(),
        }
    }
}

impl PagePolicy {
    fn batch_limit(&self, pipeline: Pipeline) -> usize {
        if pipeline.is_paginated() {
            self.endless_limit
        } else {
            self.page_size
        }
    }
}

/// Cursor bookkeeping carried between requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaginationState {
    /// Raw rows consumed so far for the current query.
    pub offset: usize,
    pub retry: u32,
    /// Expanded count accumulated by the last request.
    pub item_count: usize,
    /// No further page will produce rows.
    pub finished: bool,
    /// The next publish should scroll the consumer back to the top.
    pub scroll_to_top: bool,
}

impl PaginationState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_first_page(&self) -> bool {
        self.offset == 0
    }
}

/// Handle a pass uses to ask whether it is still the newest request.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    current: Arc<AtomicU64>,
    generation: u64,
}

impl Checkpoint {
    pub fn new(current: Arc<AtomicU64>, generation: u64) -> Self {
        Self { current, generation }
    }

    /// A checkpoint nothing can supersede.
    pub fn detached() -> Self {
        Self::new(Arc::new(AtomicU64::new(0)), 0)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }
}

// ============================================================================
// Aggregation Pass
// ============================================================================

/// Everything a pass needs, captured when the request starts.
#[derive(Debug, Clone)]
pub struct AggregationRequest {
    pub query: String,
    pub view_mode: ViewMode,
    pub prefs: RecentsPreferences,
    /// Extend the published feed instead of replacing it.
    pub append: bool,
    pub pagination: PaginationState,
    /// Feed published when the request started.
    pub current: Arc<Vec<FeedItem>>,
    /// Expanded count to reach; `None` means one page.
    pub threshold: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct AggregationOutcome {
    pub items: Vec<FeedItem>,
    /// At least one attempt contributed new items.
    pub has_new_items: bool,
    pub pagination: PaginationState,
    pub attempts: usize,
}

/// Run one request to completion, or `None` once superseded.
pub async fn run_aggregation<S: QuerySource + ?Sized>(
    source: &S,
    request: AggregationRequest,
    policy: &PagePolicy,
    checkpoint: &Checkpoint,
) -> Option<AggregationOutcome> {
    let AggregationRequest {
        query,
        view_mode,
        prefs,
        append,
        mut pagination,
        current,
        threshold,
    } = request;
    pagination.finished = false;

    let pipeline = Pipeline::select(view_mode, &query, &prefs);
    let by_manga = pipeline.dedups_by_manga();
    let show_read = prefs.show_read_everywhere || !query.is_empty();
    let limit = policy.batch_limit(pipeline);
    let threshold = threshold.unwrap_or(policy.page_size);

    let mut draft: Vec<FeedItem> = if append { current.as_ref().clone() } else { Vec::new() };
    let mut paging = append;
    let mut resolver = Resolver::new(source);
    let mut retry = 0u32;
    let mut count = 0usize;
    let mut has_new_items = false;
    let mut attempts = 0usize;

    loop {
        if retry > policy.max_retries {
            tracing::debug!(attempts, count, "Retry ceiling reached, feed finished");
            pagination.finished = true;
            break;
        }
        if !checkpoint.is_current() {
            tracing::debug!(generation = checkpoint.generation(), "Aggregation superseded before fetch");
            return None;
        }

        let first_page = pagination.is_first_page();
        let fetch = FetchRequest {
            query: query.clone(),
            view_mode,
            include_read: show_read,
            cursor: pagination.offset,
            append: paging,
            limit,
        };
        attempts += 1;
        let rows = match source.fetch(&fetch).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, view_mode = %view_mode, "Query source failed, treating batch as empty");
                Vec::new()
            }
        };
        if !checkpoint.is_current() {
            tracing::debug!(generation = checkpoint.generation(), "Aggregation superseded after fetch");
            return None;
        }

        let consumed = rows.len();
        if consumed < fetch.window().0 {
            pagination.finished = true;
        }
        if first_page || paging {
            pagination.offset += consumed;
        }

        let grouped = group_rows(rows, pipeline, paging.then_some(draft.as_mut_slice()));
        let merged = grouped.merged;

        let mut seen: HashSet<DedupKey> = if paging {
            draft.iter().map(|item| item.dedup_key(by_manga)).collect()
        } else {
            HashSet::new()
        };
        let candidates: Vec<_> = grouped
            .candidates
            .into_iter()
            .filter(|c| seen.insert(c.dedup_key(by_manga)))
            .collect();

        let known_manga: HashSet<MangaId> = if paging {
            draft.iter().map(|item| item.manga.id).collect()
        } else {
            HashSet::new()
        };
        let ctx = ResolveContext {
            pipeline,
            view_mode,
            query: &query,
            show_read,
            same_update_window_ms: policy.same_update_window_ms,
            known_manga: &known_manga,
        };
        let resolved = resolver.resolve_all(candidates, &ctx).await;
        if !checkpoint.is_current() {
            tracing::debug!(generation = checkpoint.generation(), "Aggregation superseded after resolve");
            return None;
        }

        let new_items = assemble(resolved, pipeline, &policy.sections, policy.same_update_window_ms);
        count += new_items.len() + new_items.iter().map(|i| i.extras.len()).sum::<usize>() + merged;
        has_new_items |= !new_items.is_empty();
        tracing::debug!(
            attempt = attempts,
            consumed,
            new_items = new_items.len(),
            count,
            offset = pagination.offset,
            "Aggregation batch processed"
        );

        if paging {
            draft.extend(new_items);
        } else {
            draft = new_items;
        }

        if !pipeline.is_paginated() {
            pagination.finished = true;
            break;
        }
        if count >= threshold {
            break;
        }
        retry += 1;
        paging = true;
    }

    pagination.retry = retry.min(policy.max_retries);
    pagination.item_count = count;
    Some(AggregationOutcome {
        items: draft,
        has_new_items,
        pagination,
        attempts,
    })
}

/// Manga from the mixed feed paired with each row's relevance time.
///
/// Runs one unpaged pass over the mixed feed; used by widgets and shortcuts
/// that want "what was I reading" without touching the visible feed. Rows
/// without a history entry (fresh chapters) are listed too, timed by their
/// fetch date.
pub async fn recent_manga<S: QuerySource + ?Sized>(
    source: &S,
    include_read: bool,
    amount: Option<usize>,
    policy: &PagePolicy,
) -> Vec<(MangaRef, i64)> {
    let threshold = match amount {
        Some(amount) => amount + amount / 2,
        None if include_read => policy.endless_limit,
        None => policy.page_size,
    };
    let prefs = RecentsPreferences {
        show_read_everywhere: include_read,
        ..RecentsPreferences::default()
    };
    let request = AggregationRequest {
        query: String::new(),
        view_mode: ViewMode::UngroupAll,
        prefs,
        append: false,
        pagination: PaginationState::default(),
        current: Arc::new(Vec::new()),
        threshold: Some(threshold),
    };
    let Some(outcome) = run_aggregation(source, request, policy, &Checkpoint::detached()).await else {
        return Vec::new();
    };

    let mut recent: Vec<(MangaRef, i64)> = outcome
        .items
        .into_iter()
        .map(|item| (item.manga, item.history.last_read))
        .collect();
    if let Some(amount) = amount {
        recent.truncate(amount);
    }
    recent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::memory::MemorySource;
    use crate::feed::testing::{addition_row, chapter, history_row, manga, update_row};
    use crate::feed::types::{ChapterRef, RawRow};

    fn request(mode: ViewMode, append: bool, current: Vec<FeedItem>, pagination: PaginationState) -> AggregationRequest {
        AggregationRequest {
            query: String::new(),
            view_mode: mode,
            prefs: RecentsPreferences::default(),
            append,
            pagination,
            current: Arc::new(current),
            threshold: None,
        }
    }

    fn history_rows(range: std::ops::Range<i64>) -> Vec<RawRow> {
        range
            .map(|i| history_row(manga(i), chapter(i, i * 100, 1.0), i, 1_000_000 - i))
            .collect()
    }

    #[tokio::test]
    async fn test_empty_source_takes_six_attempts() {
        let source = MemorySource::new();
        let outcome = run_aggregation(
            &source,
            request(ViewMode::OnlyHistory, false, Vec::new(), PaginationState::default()),
            &PagePolicy::default(),
            &Checkpoint::detached(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.attempts, 6);
        assert_eq!(source.fetch_count(), 6);
        assert!(outcome.items.is_empty());
        assert!(outcome.pagination.finished);
        assert_eq!(outcome.pagination.retry, 5);
        assert!(!outcome.has_new_items);
    }

    #[tokio::test]
    async fn test_full_page_needs_one_attempt() {
        let source = MemorySource::new().with_rows(ViewMode::OnlyHistory, history_rows(1..120));
        let mut prefs_request = request(ViewMode::OnlyHistory, false, Vec::new(), PaginationState::default());
        prefs_request.prefs.group_chapters_history = false;
        let outcome = run_aggregation(&source, prefs_request, &PagePolicy::default(), &Checkpoint::detached())
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.items.len(), 50);
        assert_eq!(outcome.pagination.offset, 50);
        assert!(!outcome.pagination.finished);
    }

    #[tokio::test]
    async fn test_next_page_appends_from_cursor() {
        let source = MemorySource::new().with_rows(ViewMode::OnlyHistory, history_rows(1..80));
        let policy = PagePolicy::default();
        let mut first = request(ViewMode::OnlyHistory, false, Vec::new(), PaginationState::default());
        first.prefs.group_chapters_history = false;
        let page1 = run_aggregation(&source, first.clone(), &policy, &Checkpoint::detached())
            .await
            .unwrap();

        let mut next = first;
        next.append = true;
        next.pagination = page1.pagination;
        next.current = Arc::new(page1.items);
        let page2 = run_aggregation(&source, next, &policy, &Checkpoint::detached())
            .await
            .unwrap();

        assert_eq!(page2.items.len(), 79);
        assert_eq!(page2.pagination.offset, 79);
        assert!(page2.pagination.finished);
        let unique: HashSet<_> = page2.items.iter().map(|i| i.anchor).collect();
        assert_eq!(unique.len(), 79);
    }

    #[tokio::test]
    async fn test_dashboard_is_single_attempt() {
        let rows = vec![
            history_row(manga(1), chapter(1, 10, 1.0), 1, 500),
            update_row(manga(2), chapter(2, 20, 1.0)),
            addition_row(manga(3), 100),
        ];
        let source = MemorySource::new()
            .with_rows(ViewMode::GroupAll, rows)
            .with_chapters(2, vec![chapter(2, 20, 1.0)]);
        let outcome = run_aggregation(
            &source,
            request(ViewMode::GroupAll, false, Vec::new(), PaginationState::default()),
            &PagePolicy::default(),
            &Checkpoint::detached(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.items.len(), 3);
        assert!(outcome.pagination.finished);
    }

    #[tokio::test]
    async fn test_superseded_pass_returns_none() {
        let source = MemorySource::new().with_rows(ViewMode::OnlyHistory, history_rows(1..10));
        let generation = Arc::new(AtomicU64::new(1));
        let checkpoint = Checkpoint::new(Arc::clone(&generation), 1);
        generation.store(2, Ordering::SeqCst);

        let outcome = run_aggregation(
            &source,
            request(ViewMode::OnlyHistory, false, Vec::new(), PaginationState::default()),
            &PagePolicy::default(),
            &checkpoint,
        )
        .await;
        assert!(outcome.is_none());
        assert_eq!(source.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_recent_manga_lists_every_feed_row() {
        let fresh = ChapterRef {
            date_fetch: 850,
            ..chapter(2, 20, 1.0)
        };
        let rows = vec![
            history_row(manga(1), chapter(1, 10, 1.0), 1, 900),
            update_row(manga(2), fresh),
            history_row(manga(3), chapter(3, 30, 1.0), 3, 800),
        ];
        let source = MemorySource::new().with_rows(ViewMode::UngroupAll, rows);
        let recent = recent_manga(&source, true, Some(5), &PagePolicy::default()).await;
        let ids: Vec<_> = recent.iter().map(|(m, at)| (m.id, *at)).collect();
        assert_eq!(ids, vec![(1, 900), (2, 850), (3, 800)]);
    }

    #[tokio::test]
    async fn test_recent_manga_truncates_to_amount() {
        let source = MemorySource::new().with_rows(ViewMode::UngroupAll, history_rows(1..6));
        let recent = recent_manga(&source, true, Some(2), &PagePolicy::default()).await;
        let ids: Vec<_> = recent.iter().map(|(m, _)| m.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
