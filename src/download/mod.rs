//! Download queue contract and the status overlay applied to feed items.
//!
//! The engine never downloads anything itself. It reads the queue through
//! [`DownloadManager`], annotates feed items with what it finds, and patches
//! single entries as [`DownloadEvent`]s arrive.

mod overlay;
mod queue;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::feed::{ChapterId, ChapterRef, MangaId, MangaRef};

pub use overlay::{apply_overlay, apply_update};
pub use queue::DownloadQueue;

// ============================================================================
// Status
// ============================================================================

/// Download progress of one chapter, ordered from nothing to on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    #[default]
    NotDownloaded,
    Queued,
    Downloading,
    Downloaded,
}

/// What the consumer renders in the download slot of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayStatus {
    /// The row is part of a multi-selection.
    Checked,
    Status(DownloadStatus),
}

pub fn effective_status(status: DownloadStatus, checked: bool) -> DisplayStatus {
    if checked {
        DisplayStatus::Checked
    } else {
        DisplayStatus::Status(status)
    }
}

/// Download state attached to a feed item or one of its extras.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadInfo {
    pub chapter_id: Option<ChapterId>,
    pub status: DownloadStatus,
    /// Percent, 0..=100; meaningful while downloading.
    pub progress: u8,
}

impl DownloadInfo {
    pub fn for_chapter(chapter_id: Option<ChapterId>) -> Self {
        Self {
            chapter_id,
            ..Self::default()
        }
    }
}

/// One entry of the download queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    pub chapter_id: ChapterId,
    pub manga_id: MangaId,
    pub status: DownloadStatus,
    pub progress: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    /// Status or progress of a single entry changed.
    Updated(QueueEntry),
    /// Entries were added or removed.
    QueueChanged,
    /// The worker started or stopped.
    RunningChanged(bool),
}

// ============================================================================
// Manager Contract
// ============================================================================

#[async_trait]
pub trait DownloadManager: Send + Sync {
    fn queue_snapshot(&self) -> Vec<QueueEntry>;

    fn is_chapter_downloaded(&self, chapter: &ChapterRef, manga: &MangaRef) -> bool;

    fn is_paused(&self) -> bool;

    fn subscribe(&self) -> broadcast::Receiver<DownloadEvent>;

    async fn enqueue(&self, manga: &MangaRef, chapters: &[ChapterRef]);

    /// Move a chapter to the front of the queue and start the worker.
    async fn start_now(&self, chapter_id: ChapterId);

    async fn delete_chapters(&self, manga: &MangaRef, chapters: &[ChapterRef]);
}

// ============================================================================
// Visibility
// ============================================================================

/// Which rows show their download status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowDownloads {
    None,
    OnlyUnread,
    OnlyDownloaded,
    UnreadOrDownloaded,
    #[default]
    All,
}

impl ShowDownloads {
    pub const ALL: [ShowDownloads; 5] = [
        ShowDownloads::None,
        ShowDownloads::OnlyUnread,
        ShowDownloads::OnlyDownloaded,
        ShowDownloads::UnreadOrDownloaded,
        ShowDownloads::All,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ShowDownloads::None => "none",
            ShowDownloads::OnlyUnread => "only_unread",
            ShowDownloads::OnlyDownloaded => "only_downloaded",
            ShowDownloads::UnreadOrDownloaded => "unread_or_downloaded",
            ShowDownloads::All => "all",
        }
    }
}

impl fmt::Display for ShowDownloads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShowDownloads {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        ShowDownloads::ALL
            .into_iter()
            .find(|policy| policy.as_str() == normalized)
            .ok_or_else(|| format!("unknown download visibility '{}'", s))
    }
}

/// Whether a row's download status is shown. Local manga never show it.
/// Only chapters already on disk count as downloaded for the policy.
pub fn is_download_visible(policy: ShowDownloads, read: bool, status: DownloadStatus, local: bool) -> bool {
    if local {
        return false;
    }
    let downloaded = status == DownloadStatus::Downloaded;
    match policy {
        ShowDownloads::None => false,
        ShowDownloads::OnlyUnread => !read,
        ShowDownloads::OnlyDownloaded => downloaded,
        ShowDownloads::UnreadOrDownloaded => !read || downloaded,
        ShowDownloads::All => true,
    }
}
