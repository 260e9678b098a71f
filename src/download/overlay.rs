use std::collections::HashMap;

use super::{DownloadInfo, DownloadManager, DownloadStatus, QueueEntry};
use crate::feed::{ChapterId, ChapterRef, FeedItem, MangaRef};

/// Annotate every item and its extras with the current queue state.
///
/// A chapter already on disk reports `Downloaded` whatever the queue says.
pub fn apply_overlay(items: &mut [FeedItem], manager: &dyn DownloadManager) {
    let queue: HashMap<ChapterId, QueueEntry> = manager
        .queue_snapshot()
        .into_iter()
        .map(|entry| (entry.chapter_id, entry))
        .collect();

    for item in items.iter_mut() {
        item.download = status_of(&item.chapter, &item.manga, &queue, manager);
        item.extra_downloads = item
            .extras
            .iter()
            .map(|chapter| status_of(chapter, &item.manga, &queue, manager))
            .collect();
    }
}

fn status_of(
    chapter: &ChapterRef,
    manga: &MangaRef,
    queue: &HashMap<ChapterId, QueueEntry>,
    manager: &dyn DownloadManager,
) -> DownloadInfo {
    let Some(id) = chapter.id else {
        return DownloadInfo::for_chapter(None);
    };
    if manager.is_chapter_downloaded(chapter, manga) {
        return DownloadInfo {
            chapter_id: Some(id),
            status: DownloadStatus::Downloaded,
            progress: 100,
        };
    }
    match queue.get(&id) {
        Some(entry) => DownloadInfo {
            chapter_id: Some(id),
            status: entry.status,
            progress: entry.progress,
        },
        None => DownloadInfo::for_chapter(Some(id)),
    }
}

/// Patch the primary or extra matching `entry`. Returns whether anything
/// changed.
pub fn apply_update(items: &mut [FeedItem], entry: &QueueEntry) -> bool {
    let info = DownloadInfo {
        chapter_id: Some(entry.chapter_id),
        status: entry.status,
        progress: entry.progress,
    };
    let mut changed = false;
    for item in items.iter_mut().filter(|item| item.manga.id == entry.manga_id) {
        if item.chapter.id == Some(entry.chapter_id) && item.download != info {
            item.download = info;
            changed = true;
        }
        if item.extra_downloads.len() != item.extras.len() {
            item.extra_downloads = item.extras.iter().map(|c| DownloadInfo::for_chapter(c.id)).collect();
        }
        for (chapter, slot) in item.extras.iter().zip(item.extra_downloads.iter_mut()) {
            if chapter.id == Some(entry.chapter_id) && *slot != info {
                *slot = info;
                changed = true;
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::DownloadQueue;
    use crate::feed::testing::{chapter, manga};
    use crate::feed::HistoryRecord;

    fn item_with_extras() -> FeedItem {
        let mut item = FeedItem::new(manga(1), chapter(1, 10, 1.0), HistoryRecord::default(), Some(10));
        item.extras = vec![chapter(1, 11, 2.0), chapter(1, 12, 3.0)];
        item
    }

    #[tokio::test]
    async fn test_overlay_marks_primary_and_extras() {
        let queue = DownloadQueue::new();
        queue.enqueue(&manga(1), &[chapter(1, 11, 2.0)]).await;
        queue.mark_downloaded(1, 12);

        let mut items = vec![item_with_extras()];
        apply_overlay(&mut items, &queue);

        assert_eq!(items[0].download.status, DownloadStatus::NotDownloaded);
        let statuses: Vec<_> = items[0].extra_downloads.iter().map(|d| d.status).collect();
        assert_eq!(statuses, vec![DownloadStatus::Queued, DownloadStatus::Downloaded]);
    }

    #[test]
    fn test_single_update_patches_extra() {
        let mut items = vec![item_with_extras()];
        let entry = QueueEntry {
            chapter_id: 12,
            manga_id: 1,
            status: DownloadStatus::Downloading,
            progress: 40,
        };
        assert!(apply_update(&mut items, &entry));
        assert_eq!(items[0].extra_downloads[1].progress, 40);
        assert!(!apply_update(&mut items, &entry));
    }

    #[test]
    fn test_update_for_other_manga_is_ignored() {
        let mut items = vec![item_with_extras()];
        let entry = QueueEntry {
            chapter_id: 10,
            manga_id: 2,
            status: DownloadStatus::Queued,
            progress: 0,
        };
        assert!(!apply_update(&mut items, &entry));
    }
}
