//! Feed aggregation core.
//!
//! Merges reading history, newly fetched chapters and newly added manga into
//! one ordered, deduplicated feed that can be loaded a page at a time.
//!
//! # Architecture
//!
//! - [`source`] - the [`QuerySource`] trait rows are read through
//! - [`grouper`] - (manga, day) buckets with a primary chapter and extras
//! - [`resolve`] - picks the chapter shown for each bucket
//! - [`merger`] - dashboard sections, relevance lists and day lists
//! - [`pagination`] - the fetch-until-full loop and its cursor state
//! - [`state`] - the published [`FeedState`] and the [`WarmCache`]
//!
//! # Example
//!
//! ```ignore
//! use recents::feed::{run_aggregation, AggregationRequest, Checkpoint, PagePolicy};
//!
//! let outcome = run_aggregation(&source, request, &PagePolicy::default(), &Checkpoint::detached()).await;
//! ```

pub mod grouper;
pub mod memory;
pub mod merger;
pub mod pagination;
pub mod resolve;
pub mod source;
pub mod state;
mod types;
mod view;

#[cfg(test)]
pub(crate) mod testing;

pub use memory::MemorySource;
pub use merger::SectionLimits;
pub use pagination::{
    recent_manga, run_aggregation, AggregationOutcome, AggregationRequest, Checkpoint, PagePolicy,
    PaginationState,
};
pub use source::{FetchRequest, QuerySource, SourceError};
pub use state::{FeedState, Section, WarmCache};
pub use types::{
    ChapterId, ChapterRef, DayKey, DedupKey, FeedItem, GroupTag, HistoryRecord, MangaId, MangaRef, RawRow,
};
pub use view::{ChapterOrder, Pipeline, ViewMode};
