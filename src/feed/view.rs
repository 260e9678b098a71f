//! View modes and the per-pass pipeline they select.
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::types::{ChapterRef, DayKey, RawRow};
use crate::preferences::RecentsPreferences;

/// How the recents screen is organized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    #[default]
    GroupAll,
    UngroupAll,
    OnlyHistory,
    OnlyUpdates,
}

impl ViewMode {
    pub const ALL: [ViewMode; 4] = [
        ViewMode::GroupAll,
        ViewMode::UngroupAll,
        ViewMode::OnlyHistory,
        ViewMode::OnlyUpdates,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ViewMode::GroupAll => "group_all",
            ViewMode::UngroupAll => "ungroup_all",
            ViewMode::OnlyHistory => "only_history",
            ViewMode::OnlyUpdates => "only_updates",
        }
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViewMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        ViewMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == normalized)
            .ok_or_else(|| format!("unknown view mode '{}'", s))
    }
}

// ============================================================================
// Chapter Ordering
// ============================================================================

/// Comparator used to pick a bucket's primary chapter and order its extras.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterOrder {
    /// Most recently read first.
    LastReadDesc,
    /// Latest chapter in reading order first.
    ReadingDesc,
}

impl ChapterOrder {
    pub fn compare(self, a: &ChapterRef, b: &ChapterRef) -> Ordering {
        match self {
            ChapterOrder::LastReadDesc => b
                .date_read
                .unwrap_or(0)
                .cmp(&a.date_read.unwrap_or(0))
                .then(b.id.cmp(&a.id)),
            ChapterOrder::ReadingDesc => ChapterRef::reading_order(b, a),
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Grouping, dedup and ranking rules for one aggregation pass.
///
/// Chosen once from the view mode, the query and the preferences; every
/// stage dispatches on it instead of re-reading the mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipeline {
    /// Dashboard of new chapters, continue reading and new additions.
    Sections,
    /// One flat relevance-ordered list of mixed rows.
    Flat { by_manga: bool },
    History { grouped: bool },
    Updates { grouped: bool, sort_by_fetch: bool },
}

impl Pipeline {
    pub fn select(mode: ViewMode, query: &str, prefs: &RecentsPreferences) -> Self {
        match mode {
            ViewMode::GroupAll if query.is_empty() => Pipeline::Sections,
            ViewMode::GroupAll | ViewMode::UngroupAll => Pipeline::Flat {
                by_manga: query.is_empty(),
            },
            ViewMode::OnlyHistory => Pipeline::History {
                grouped: prefs.group_chapters_history,
            },
            ViewMode::OnlyUpdates => Pipeline::Updates {
                grouped: prefs.collapse_grouped_updates,
                sort_by_fetch: prefs.sort_by_fetched_time,
            },
        }
    }

    /// Whether the dedup key is the manga id (otherwise the anchor chapter id).
    pub fn dedups_by_manga(self) -> bool {
        match self {
            Pipeline::Sections => true,
            Pipeline::Flat { by_manga } => by_manga,
            Pipeline::History { .. } | Pipeline::Updates { .. } => false,
        }
    }

    /// The dashboard is a single fixed-size pass; everything else pages.
    pub fn is_paginated(self) -> bool {
        !matches!(self, Pipeline::Sections)
    }

    pub fn groups_by_day(self) -> bool {
        matches!(
            self,
            Pipeline::History { grouped: true } | Pipeline::Updates { grouped: true, .. }
        )
    }

    /// Bucket key timestamp when rows are collapsed per (manga, day).
    pub fn bucket_timestamp(self, row: &RawRow) -> Option<i64> {
        match self {
            Pipeline::History { grouped: true } => Some(row.history.last_read),
            Pipeline::Updates { grouped: true, .. } => Some(row.chapter.date_fetch),
            _ => None,
        }
    }

    /// Bucket day of an already published item, for append-time merging.
    pub fn item_day(self, item: &super::types::FeedItem) -> Option<DayKey> {
        match self {
            Pipeline::History { grouped: true } => Some(DayKey::of(item.history.last_read)),
            Pipeline::Updates { grouped: true, .. } => Some(DayKey::of(item.chapter.date_fetch)),
            _ => None,
        }
    }

    pub fn chapter_order(self) -> ChapterOrder {
        match self {
            Pipeline::History { .. } => ChapterOrder::LastReadDesc,
            _ => ChapterOrder::ReadingDesc,
        }
    }

    /// Read extras run oldest-first everywhere except history, where they
    /// keep the most-recently-read-first order.
    pub fn reverse_read_extras(self) -> bool {
        !matches!(self, Pipeline::History { .. })
    }

    /// Whether the shown chapter may differ from the row's chapter.
    pub fn resolves_primary(self) -> bool {
        match self {
            Pipeline::Sections | Pipeline::Flat { .. } => true,
            Pipeline::History { grouped } => grouped,
            Pipeline::Updates { .. } => false,
        }
    }

    pub fn is_history(self) -> bool {
        matches!(self, Pipeline::History { .. })
    }

    pub fn is_updates(self) -> bool {
        matches!(self, Pipeline::Updates { .. })
    }
}
