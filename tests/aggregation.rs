mod common;

use std::collections::HashSet;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use common::*;
use recents::feed::{
    run_aggregation, AggregationOutcome, AggregationRequest, Checkpoint, DayKey, GroupTag, MemorySource, PagePolicy,
    PaginationState, RawRow, ViewMode,
};
use recents::preferences::RecentsPreferences;

fn request(view_mode: ViewMode, prefs: RecentsPreferences) -> AggregationRequest {
    AggregationRequest {
        query: String::new(),
        view_mode,
        prefs: RecentsPreferences { view_mode, ..prefs },
        append: false,
        pagination: PaginationState::default(),
        current: Arc::new(Vec::new()),
        threshold: None,
    }
}

fn block_on_pass(source: &MemorySource, request: AggregationRequest, policy: &PagePolicy) -> AggregationOutcome {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(run_aggregation(source, request, policy, &Checkpoint::detached()))
        .unwrap()
}

/// History rows from (manga, chapter suffix, minutes ago) triples, newest first.
fn history_rows(reads: &[(i64, i64, i64)]) -> Vec<RawRow> {
    let now = millis_on(2024, 6, 15, 23);
    let mut rows: Vec<RawRow> = reads
        .iter()
        .enumerate()
        .map(|(index, &(manga_id, suffix, minutes_ago))| {
            history_row(
                manga(manga_id, &format!("Manga {}", manga_id)),
                chapter(manga_id, manga_id * 100 + suffix, suffix as f32),
                index as i64 + 1,
                now - minutes_ago * 60_000,
            )
        })
        .collect();
    rows.sort_by_key(|row| std::cmp::Reverse(row.history.last_read));
    rows
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_mixed_feed_has_one_item_per_manga(
        reads in prop::collection::vec((1i64..8, 1i64..20, 0i64..600), 0..80)
    ) {
        let source = MemorySource::new().with_rows(ViewMode::UngroupAll, history_rows(&reads));
        let outcome = block_on_pass(
            &source,
            request(ViewMode::UngroupAll, RecentsPreferences::default()),
            &PagePolicy::default(),
        );

        let mut seen = HashSet::new();
        for item in &outcome.items {
            prop_assert!(seen.insert(item.manga.id), "manga {} listed twice", item.manga.id);
        }
    }

    #[test]
    fn prop_history_never_repeats_a_chapter(
        reads in prop::collection::vec((1i64..8, 1i64..20, 0i64..3000), 0..80)
    ) {
        let prefs = RecentsPreferences {
            group_chapters_history: false,
            ..RecentsPreferences::default()
        };
        let source = MemorySource::new().with_rows(ViewMode::OnlyHistory, history_rows(&reads));
        let outcome = block_on_pass(&source, request(ViewMode::OnlyHistory, prefs), &PagePolicy::default());

        let mut seen = HashSet::new();
        for item in &outcome.items {
            prop_assert!(seen.insert(item.anchor), "chapter {:?} listed twice", item.anchor);
        }
    }

    #[test]
    fn prop_grouping_is_idempotent(
        reads in prop::collection::vec((1i64..8, 1i64..20, 0i64..3000), 0..80)
    ) {
        let source = MemorySource::new().with_rows(ViewMode::OnlyHistory, history_rows(&reads));
        let policy = PagePolicy::default();
        let first = block_on_pass(&source, request(ViewMode::OnlyHistory, RecentsPreferences::default()), &policy);
        let second = block_on_pass(&source, request(ViewMode::OnlyHistory, RecentsPreferences::default()), &policy);
        prop_assert_eq!(first.items, second.items);
    }

    #[test]
    fn prop_next_page_never_repeats_a_manga(
        reads in prop::collection::vec((1i64..90, 1i64..5, 0i64..6000), 0..160)
    ) {
        let source = MemorySource::new().with_rows(ViewMode::UngroupAll, history_rows(&reads));
        let policy = PagePolicy {
            page_size: 10,
            endless_limit: 20,
            ..PagePolicy::default()
        };
        let first = block_on_pass(&source, request(ViewMode::UngroupAll, RecentsPreferences::default()), &policy);
        let mut items = first.items.clone();
        if !first.pagination.finished {
            let next = AggregationRequest {
                append: true,
                pagination: first.pagination,
                current: Arc::new(first.items.clone()),
                ..request(ViewMode::UngroupAll, RecentsPreferences::default())
            };
            let second = block_on_pass(&source, next, &policy);
            prop_assert!(second.items.starts_with(&first.items));
            items = second.items;
        }

        let mut seen = HashSet::new();
        for item in &items {
            prop_assert!(seen.insert(item.manga.id), "manga {} listed twice", item.manga.id);
        }
    }

    #[test]
    fn prop_pass_always_terminates(
        rows in 0i64..120,
        page_size in 1usize..40,
        endless_limit in 1usize..60,
        max_retries in 0u32..6,
    ) {
        let reads: Vec<_> = (0..rows).map(|i| (i + 1, 1, i)).collect();
        let source = MemorySource::new().with_rows(ViewMode::OnlyHistory, history_rows(&reads));
        let policy = PagePolicy {
            page_size,
            endless_limit,
            max_retries,
            ..PagePolicy::default()
        };
        let outcome = block_on_pass(
            &source,
            request(ViewMode::OnlyHistory, RecentsPreferences::default()),
            &policy,
        );

        prop_assert!(outcome.attempts <= max_retries as usize + 1);
        prop_assert_eq!(source.fetch_count(), outcome.attempts);
        if outcome.pagination.item_count < page_size {
            prop_assert!(outcome.pagination.finished);
        }
    }
}

#[tokio::test]
async fn test_history_collapses_same_day_reads() {
    let day1 = |hour| millis_on(2024, 5, 1, hour);
    let rows = vec![
        history_row(manga(1, "Alpha"), chapter(1, 13, 3.0), 3, millis_on(2024, 5, 2, 9)),
        history_row(manga(1, "Alpha"), chapter(1, 12, 2.0), 2, day1(12)),
        history_row(manga(1, "Alpha"), chapter(1, 11, 1.0), 1, day1(10)),
    ];
    let source = MemorySource::new().with_rows(ViewMode::OnlyHistory, rows);
    let outcome = run_aggregation(
        &source,
        request(ViewMode::OnlyHistory, RecentsPreferences::default()),
        &PagePolicy::default(),
        &Checkpoint::detached(),
    )
    .await
    .unwrap();

    let shape: Vec<_> = outcome
        .items
        .iter()
        .map(|item| {
            (
                item.chapter.id,
                item.extras.iter().map(|c| c.id).collect::<Vec<_>>(),
            )
        })
        .collect();
    assert_eq!(shape, vec![(Some(13), vec![]), (Some(12), vec![Some(11)])]);
    assert_eq!(outcome.pagination.item_count, 3);
}

#[tokio::test]
async fn test_updates_are_tagged_by_day() {
    let fetched = |day, hour| {
        let mut c = chapter(1, i64::from(day) * 10 + i64::from(hour), f32::from(day as u8));
        c.date_fetch = millis_on(2024, 5, day, hour);
        c.date_upload = c.date_fetch;
        c
    };
    let rows = vec![
        update_row(manga(1, "Alpha"), fetched(3, 8)),
        update_row(manga(2, "Beta"), {
            let mut c = fetched(3, 7);
            c.manga_id = 2;
            c.id = Some(99);
            c
        }),
        update_row(manga(1, "Alpha"), fetched(2, 8)),
    ];
    let source = MemorySource::new().with_rows(ViewMode::OnlyUpdates, rows);
    let outcome = run_aggregation(
        &source,
        request(ViewMode::OnlyUpdates, RecentsPreferences::default()),
        &PagePolicy::default(),
        &Checkpoint::detached(),
    )
    .await
    .unwrap();

    let day = |d| GroupTag::Day(DayKey::of(millis_on(2024, 5, d, 8)));
    let tags: Vec<_> = outcome.items.iter().map(|i| (i.manga.id, i.group)).collect();
    assert_eq!(tags, vec![(1, day(3)), (2, day(3)), (1, day(2))]);
}
