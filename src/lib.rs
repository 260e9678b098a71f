//! Recents feed engine.
//!
//! Merges reading history, newly fetched chapters and newly added library
//! entries into one paginated, deduplicated feed, annotated with download
//! status. Aggregation runs in background tasks; the newest request always
//! wins and stale results are dropped.
//!
//! - [`feed`] - grouping, resolution, merging and pagination
//! - [`download`] - download queue contract and status overlay
//! - [`app`] - the engine that owns the published feed
//! - [`events`] - the loop that feeds task results and notifications back in
//! - [`storage`] - SQLite query source and library store

pub mod app;
pub mod config;
pub mod download;
pub mod events;
pub mod feed;
pub mod library;
pub mod preferences;
pub mod storage;
pub mod util;
