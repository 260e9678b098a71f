//! Ranks resolved candidates into the order the feed is shown in.
use std::cmp::Reverse;

use serde::{Deserialize, Serialize};

use super::resolve::Resolved;
use super::types::{DayKey, FeedItem, GroupTag};
use super::view::Pipeline;

/// Caps for the dashboard sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SectionLimits {
    pub new_chapters: usize,
    /// Shared by new chapters and continue reading.
    pub continue_reading_total: usize,
    pub new_additions: usize,
}

impl Default for SectionLimits {
    fn default() -> Self {
        Self {
            new_chapters: 4,
            continue_reading_total: 9,
            new_additions: 4,
        }
    }
}

/// Turn a resolved candidate into a feed item with clean extras.
pub fn into_item(resolved: Resolved) -> FeedItem {
    let Resolved { candidate, shown } = resolved;
    let anchor = candidate.anchor();
    let mut item = FeedItem::new(candidate.manga, shown, candidate.history, anchor);
    item.extras = candidate.extras;
    item.normalize_extras();
    item
}

/// Build, tag and order the items of one batch.
pub fn assemble(
    resolved: Vec<Resolved>,
    pipeline: Pipeline,
    limits: &SectionLimits,
    same_update_window_ms: i64,
) -> Vec<FeedItem> {
    let items: Vec<FeedItem> = resolved.into_iter().map(into_item).collect();
    match pipeline {
        Pipeline::Sections => sections(items, limits, same_update_window_ms),
        Pipeline::Flat { .. } | Pipeline::History { .. } => by_relevance(items),
        Pipeline::Updates { sort_by_fetch, .. } => by_day(items, sort_by_fetch),
    }
}

// ============================================================================
// Dashboard
// ============================================================================

fn sections(items: Vec<FeedItem>, limits: &SectionLimits, window_ms: i64) -> Vec<FeedItem> {
    let mut new_chapters = Vec::new();
    let mut continue_reading = Vec::new();
    let mut additions = Vec::new();
    for item in items {
        if item.anchor.is_none() {
            additions.push(item);
        } else if item.history.id.is_none() {
            new_chapters.push(item);
        } else {
            continue_reading.push(item);
        }
    }

    let mut new_chapters = rank_new_chapters(new_chapters, window_ms);
    new_chapters.truncate(limits.new_chapters);

    continue_reading.sort_by_key(|item| Reverse(item.history.last_read));
    continue_reading.truncate(limits.continue_reading_total.saturating_sub(new_chapters.len()));

    additions.sort_by_key(|item| Reverse(item.history.last_read));
    additions.truncate(limits.new_additions);

    let mut groups: Vec<(GroupTag, Vec<FeedItem>)> = [
        (GroupTag::NewChapters, new_chapters),
        (GroupTag::ContinueReading, continue_reading),
        (GroupTag::NewAdditions, additions),
    ]
    .into_iter()
    .filter(|(_, items)| !items.is_empty())
    .collect();
    groups.sort_by_key(|(_, items)| Reverse(most_recent(items)));

    groups
        .into_iter()
        .flat_map(|(tag, items)| {
            items.into_iter().map(move |mut item| {
                item.group = tag;
                item
            })
        })
        .collect()
}

fn most_recent(items: &[FeedItem]) -> i64 {
    items.iter().map(|item| item.history.last_read).max().unwrap_or(0)
}

/// Newest fetch first; chapters from the same update run newest upload first.
fn rank_new_chapters(mut items: Vec<FeedItem>, window_ms: i64) -> Vec<FeedItem> {
    items.sort_by_key(|item| Reverse(item.chapter.date_fetch));

    let mut ranked = Vec::with_capacity(items.len());
    let mut cluster: Vec<FeedItem> = Vec::new();
    for item in items {
        let starts_new = cluster
            .first()
            .is_some_and(|head| head.chapter.date_fetch - item.chapter.date_fetch > window_ms);
        if starts_new {
            cluster.sort_by_key(|item| Reverse(item.chapter.date_upload));
            ranked.append(&mut cluster);
        }
        cluster.push(item);
    }
    cluster.sort_by_key(|item| Reverse(item.chapter.date_upload));
    ranked.append(&mut cluster);
    ranked
}

// ============================================================================
// Lists
// ============================================================================

fn by_relevance(mut items: Vec<FeedItem>) -> Vec<FeedItem> {
    items.sort_by_key(|item| Reverse(item.history.last_read));
    for item in &mut items {
        item.group = GroupTag::Ungrouped;
    }
    items
}

fn by_day(mut items: Vec<FeedItem>, sort_by_fetch: bool) -> Vec<FeedItem> {
    for item in &mut items {
        item.group = GroupTag::Day(DayKey::of(item.history.last_read));
    }
    items.sort_by_key(|item| {
        let day = match item.group {
            GroupTag::Day(day) => day,
            _ => DayKey::Unknown,
        };
        let ts = if sort_by_fetch {
            item.chapter.date_fetch
        } else {
            item.chapter.date_upload
        };
        (Reverse(day), Reverse(ts))
    });
    items
}
