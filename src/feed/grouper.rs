//! Collapses raw rows into one candidate per (manga, day) bucket.
use std::collections::HashMap;

use super::types::{ChapterId, ChapterRef, DayKey, DedupKey, FeedItem, HistoryRecord, MangaId, MangaRef, RawRow};
use super::view::Pipeline;

/// A feed row before primary resolution and ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub manga: MangaRef,
    pub chapter: ChapterRef,
    pub history: HistoryRecord,
    pub extras: Vec<ChapterRef>,
}

impl Candidate {
    pub fn from_row(row: RawRow) -> Self {
        Self {
            manga: row.manga,
            chapter: row.chapter,
            history: row.history,
            extras: Vec::new(),
        }
    }

    /// Chapter id of the row this candidate stands for.
    pub fn anchor(&self) -> Option<ChapterId> {
        self.chapter.id
    }

    /// Same key the resulting [`FeedItem`] will carry.
    pub fn dedup_key(&self, by_manga: bool) -> DedupKey {
        match self.chapter.id {
            Some(id) if !by_manga => DedupKey::Chapter(id),
            _ => DedupKey::Manga(self.manga.id),
        }
    }
}

/// Output of one grouping step.
#[derive(Debug, Default)]
pub struct Grouped {
    pub candidates: Vec<Candidate>,
    /// Rows filtered out or folded into items that were already published.
    pub merged: usize,
}

impl Grouped {
    /// Candidates plus their extras plus merged-away rows.
    pub fn expanded_len(&self) -> usize {
        self.candidates.len()
            + self.candidates.iter().map(|c| c.extras.len()).sum::<usize>()
            + self.merged
    }
}

/// Group a batch of raw rows according to `pipeline`.
///
/// Pipelines that do not group by day pass every row through untouched.
/// `existing` is the draft of the feed being extended; when given, a bucket
/// whose (manga, day) key matches a published item is folded into that
/// item's extras rather than producing a second item.
pub fn group_rows(
    rows: Vec<RawRow>,
    pipeline: Pipeline,
    mut existing: Option<&mut [FeedItem]>,
) -> Grouped {
    if !pipeline.groups_by_day() {
        return Grouped {
            candidates: rows.into_iter().map(Candidate::from_row).collect(),
            merged: 0,
        };
    }

    let mut order: Vec<(MangaId, DayKey)> = Vec::new();
    let mut buckets: HashMap<(MangaId, DayKey), Vec<RawRow>> = HashMap::new();
    for row in rows {
        let day = DayKey::of(pipeline.bucket_timestamp(&row).unwrap_or(0));
        let key = (row.manga.id, day);
        buckets
            .entry(key)
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(row);
    }

    let mut grouped = Grouped::default();
    for key in order {
        let Some(bucket) = buckets.remove(&key) else {
            continue;
        };
        let manga = bucket[0].manga.clone();
        let total = bucket.len();
        let chapters: Vec<ChapterRef> = bucket
            .iter()
            .map(|row| {
                let mut chapter = row.chapter.clone();
                if pipeline.is_history() {
                    chapter.date_read = Some(row.history.last_read);
                }
                chapter
            })
            .filter(|chapter| manga.accepts(chapter))
            .collect();
        grouped.merged += total - chapters.len();
        if chapters.is_empty() {
            continue;
        }

        if let Some(items) = existing.as_deref_mut() {
            if let Some(item) = items
                .iter_mut()
                .find(|item| item.manga.id == key.0 && pipeline.item_day(item) == Some(key.1))
            {
                grouped.merged += chapters.len();
                extend_extras(item, chapters, pipeline);
                continue;
            }
        }

        let (primary, extras) = split_primary(chapters, pipeline);
        let candidate = if pipeline.is_history() {
            let history = bucket
                .iter()
                .find(|row| row.chapter.id == primary.id)
                .map(|row| row.history)
                .unwrap_or_default();
            Candidate {
                manga,
                chapter: primary,
                history,
                extras,
            }
        } else {
            let history = HistoryRecord {
                id: None,
                last_read: primary.date_fetch,
                time_read: 0,
            };
            Candidate {
                manga,
                chapter: primary,
                history,
                extras,
            }
        };
        grouped.candidates.push(candidate);
    }

    grouped
}

/// Pick the primary chapter of a bucket and arrange the rest.
///
/// The first unread chapter in comparator order wins. With everything read,
/// history keeps the most recently read chapter and the other pipelines the
/// earliest one.
pub fn split_primary(mut chapters: Vec<ChapterRef>, pipeline: Pipeline) -> (ChapterRef, Vec<ChapterRef>) {
    let reverse_read = pipeline.reverse_read_extras();
    if chapters.len() == 1 {
        let primary = chapters.remove(0);
        return (primary, Vec::new());
    }

    let order = pipeline.chapter_order();
    chapters.sort_by(|a, b| order.compare(a, b));
    let index = chapters
        .iter()
        .position(|c| !c.read)
        .unwrap_or(if reverse_read { chapters.len() - 1 } else { 0 });
    let primary = chapters.remove(index);
    (primary, arrange_extras(chapters, reverse_read))
}

/// Unread extras first in comparator order, then read extras.
fn arrange_extras(sorted: Vec<ChapterRef>, reverse_read: bool) -> Vec<ChapterRef> {
    let (mut arranged, mut read): (Vec<_>, Vec<_>) = sorted.into_iter().partition(|c| !c.read);
    if reverse_read {
        read.reverse();
    }
    arranged.extend(read);
    arranged
}

fn extend_extras(item: &mut FeedItem, chapters: Vec<ChapterRef>, pipeline: Pipeline) {
    let order = pipeline.chapter_order();
    let mut all = std::mem::take(&mut item.extras);
    all.extend(chapters);
    all.sort_by(|a, b| order.compare(a, b));
    item.extras = arrange_extras(all, pipeline.reverse_read_extras());
    item.normalize_extras();
}
