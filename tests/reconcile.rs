//! Integration tests for the channel reconciliation lifecycle:
//! identity, idempotence, first-sync suppression, expiration, and the
//! per-status cache behavior.
//!
//! Tests that need durability across a reopen use a temp directory;
//! everything else runs on in-memory stores.

use orrery::channel::{Channel, ChannelConfig};
use orrery::feed::{FetchOutcome, FetchStatus, ParsedEntry, ParsedFeed};
use orrery::store::{cache_file_name, Timestamp};

const FEED_URL: &str = "https://example.com/feed.xml";

fn ts(secs: i64) -> Timestamp {
    Timestamp::from_unix(secs).unwrap()
}

fn entry(id: &str, title: &str, published: i64) -> ParsedEntry {
    ParsedEntry::new()
        .with_text("id", id)
        .with_text("title", title)
        .with_date("published", ts(published))
}

fn fresh_outcome(entries: Vec<ParsedEntry>) -> FetchOutcome {
    FetchOutcome {
        status: FetchStatus::Fresh,
        http_status: Some(200),
        etag: Some("\"etag-1\"".into()),
        last_modified: None,
        feed: ParsedFeed {
            fields: Vec::new(),
            entries,
        },
    }
}

async fn memory_channel() -> Channel {
    Channel::open_in_memory(ChannelConfig::new(FEED_URL))
        .await
        .unwrap()
}

// ============================================================================
// Merge & idempotence
// ============================================================================

#[tokio::test]
async fn first_update_creates_items_in_reverse_order() {
    let mut channel = memory_channel().await;
    let entries = vec![
        entry("a", "Newest", 3_000),
        entry("b", "Middle", 2_000),
        entry("c", "Oldest", 1_000),
    ];
    channel.update_entries(&entries, ts(10_000), 0, false);

    assert_eq!(channel.len(), 3);
    assert_eq!(channel.next_order(), 3);
    // Feed order is newest-first, so creation order counts up from the
    // bottom of the list.
    assert_eq!(channel.get_item("c").unwrap().order(), 1);
    assert_eq!(channel.get_item("b").unwrap().order(), 2);
    assert_eq!(channel.get_item("a").unwrap().order(), 3);
}

#[tokio::test]
async fn reapplying_identical_entries_changes_nothing() {
    let mut channel = memory_channel().await;
    let entries = vec![
        entry("a", "Newest", 3_000),
        entry("b", "Middle", 2_000),
        entry("c", "Oldest", 1_000),
    ];
    channel.update_entries(&entries, ts(10_000), 0, false);
    let orders: Vec<u64> = ["a", "b", "c"]
        .iter()
        .map(|id| channel.get_item(id).unwrap().order())
        .collect();
    let dates: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|id| channel.get_item(id).unwrap().date())
        .collect();

    channel.update_entries(&entries, ts(20_000), 0, false);

    assert_eq!(channel.len(), 3);
    assert_eq!(channel.next_order(), 3);
    for (i, id) in ["a", "b", "c"].iter().enumerate() {
        let item = channel.get_item(id).unwrap();
        assert_eq!(item.order(), orders[i], "order of {id} drifted");
        assert_eq!(item.date(), dates[i], "date of {id} drifted");
        assert!(!item.hidden());
    }
}

#[tokio::test]
async fn entries_without_any_identity_are_dropped() {
    let mut channel = memory_channel().await;
    let entries = vec![
        ParsedEntry::new().with_date("published", ts(1_000)),
        entry("good", "Kept", 2_000),
    ];
    channel.update_entries(&entries, ts(10_000), 0, false);
    assert_eq!(channel.len(), 1);
    assert!(channel.has_item("good"));
}

#[tokio::test]
async fn update_shifts_the_reconciliation_clock() {
    let mut channel = memory_channel().await;
    channel.update_entries(&[entry("a", "One", 1_000)], ts(10_000), 0, false);
    assert_eq!(channel.updated(), Some(ts(10_000)));
    assert_eq!(channel.last_updated(), None);

    channel.update_entries(&[entry("a", "One", 1_000)], ts(20_000), 0, false);
    assert_eq!(channel.updated(), Some(ts(20_000)));
    assert_eq!(channel.last_updated(), Some(ts(10_000)));
}

#[tokio::test]
async fn future_claims_clamp_to_the_fetch_time() {
    let mut channel = memory_channel().await;
    let now = ts(1_000_000);
    let tomorrow = 1_000_000 + 86_400;
    channel.update_entries(&[entry("a", "From the future", tomorrow)], now, 0, false);
    assert_eq!(channel.get_item("a").unwrap().date(), Some(now));
}

// ============================================================================
// First-sync suppression
// ============================================================================

#[tokio::test]
async fn first_sync_hides_the_backlog_beyond_the_threshold() {
    let mut channel = memory_channel().await;
    let entries: Vec<ParsedEntry> = (1..=15)
        .map(|i| entry(&format!("e{i}"), &format!("Entry {i}"), 100_000 - i))
        .collect();
    channel.update_entries(&entries, ts(200_000), 10, false);

    let hidden = (1..=15)
        .filter(|i| channel.get_item(&format!("e{i}")).unwrap().hidden())
        .count();
    assert_eq!(hidden, 5);
    // the last five in feed order — the oldest-arriving — are hidden
    for i in 11..=15 {
        assert!(channel.get_item(&format!("e{i}")).unwrap().hidden());
    }
    for i in 1..=10 {
        assert!(!channel.get_item(&format!("e{i}")).unwrap().hidden());
    }
    assert_eq!(channel.next_order(), 15);
}

#[tokio::test]
async fn later_syncs_hide_nothing() {
    let mut channel = memory_channel().await;
    channel.update_entries(&[entry("seed", "Seed", 1_000)], ts(10_000), 10, false);

    let entries: Vec<ParsedEntry> = (1..=15)
        .map(|i| entry(&format!("n{i}"), &format!("New {i}"), 20_000 - i))
        .collect();
    channel.update_entries(&entries, ts(30_000), 10, false);

    assert!((1..=15).all(|i| !channel.get_item(&format!("n{i}")).unwrap().hidden()));
}

#[tokio::test]
async fn zero_threshold_disables_suppression() {
    let mut channel = memory_channel().await;
    let entries: Vec<ParsedEntry> = (1..=15)
        .map(|i| entry(&format!("e{i}"), &format!("Entry {i}"), 100_000 - i))
        .collect();
    channel.update_entries(&entries, ts(200_000), 0, false);
    assert!((1..=15).all(|i| !channel.get_item(&format!("e{i}")).unwrap().hidden()));
}

// ============================================================================
// Expiration
// ============================================================================

#[tokio::test]
async fn items_missing_from_the_feed_expire() {
    let mut channel = memory_channel().await;
    channel.update_entries(
        &[
            entry("a", "A", 3_000),
            entry("b", "B", 2_000),
            entry("c", "C", 1_000),
        ],
        ts(10_000),
        0,
        false,
    );

    channel.update_entries(
        &[entry("a", "A", 3_000), entry("c", "C", 1_000)],
        ts(20_000),
        0,
        false,
    );

    assert_eq!(channel.len(), 2);
    assert!(channel.has_item("a"));
    assert!(!channel.has_item("b"));
    assert!(channel.has_item("c"));
}

#[tokio::test]
async fn a_recent_window_does_not_expire_older_history() {
    let mut channel = memory_channel().await;
    channel.update_entries(
        &[
            entry("a", "A", 3_000),
            entry("b", "B", 2_000),
            entry("c", "C", 1_000),
        ],
        ts(10_000),
        0,
        false,
    );

    // Feed now serves only its newest item; the sweep stops once every
    // feed id has been matched, so b and c survive.
    channel.update_entries(&[entry("a", "A", 3_000)], ts(20_000), 0, false);

    assert_eq!(channel.len(), 3);
}

#[tokio::test]
async fn retain_all_keeps_dropped_items() {
    let mut channel = memory_channel().await;
    channel.update_entries(
        &[
            entry("a", "A", 3_000),
            entry("b", "B", 2_000),
            entry("c", "C", 1_000),
        ],
        ts(10_000),
        0,
        false,
    );

    channel.update_entries(
        &[entry("a", "A", 3_000), entry("c", "C", 1_000)],
        ts(20_000),
        0,
        true,
    );

    assert_eq!(channel.len(), 3);
    assert!(channel.has_item("b"));
}

#[tokio::test]
async fn expired_items_are_cleared_from_the_store() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut channel = Channel::open(dir.path(), ChannelConfig::new(FEED_URL))
            .await
            .unwrap();
        channel.update_entries(
            &[
                entry("a", "A", 3_000),
                entry("b", "B", 2_000),
                entry("c", "C", 1_000),
            ],
            ts(10_000),
            0,
            false,
        );
        channel.persist().await.unwrap();

        channel.update_entries(
            &[entry("a", "A", 3_000), entry("c", "C", 1_000)],
            ts(20_000),
            0,
            false,
        );
        channel.persist().await.unwrap();
    }

    let reopened = Channel::open(dir.path(), ChannelConfig::new(FEED_URL))
        .await
        .unwrap();
    assert_eq!(reopened.len(), 2);
    assert!(!reopened.has_item("b"));
    assert!(reopened.get_item("a").is_some());
}

// ============================================================================
// Durability
// ============================================================================

#[tokio::test]
async fn a_persisted_channel_reloads_in_full() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut channel = Channel::open(dir.path(), ChannelConfig::new(FEED_URL))
            .await
            .unwrap();
        let outcome = fresh_outcome(vec![
            entry("a", "Newest", 3_000),
            entry("b", "Oldest", 1_000),
        ]);
        channel.apply(outcome, ts(10_000), 0).await.unwrap();
    }

    let reopened = Channel::open(dir.path(), ChannelConfig::new(FEED_URL))
        .await
        .unwrap();
    assert_eq!(reopened.len(), 2);
    assert_eq!(reopened.updated(), Some(ts(10_000)));
    assert_eq!(reopened.etag(), Some("\"etag-1\""));
    assert_eq!(reopened.http_status(), Some(200));
    let a = reopened.get_item("a").unwrap();
    assert_eq!(a.text("title"), Some("Newest"));
    assert_eq!(a.order(), 2);
    assert_eq!(a.date(), Some(ts(3_000)));
}

// ============================================================================
// Status handling
// ============================================================================

#[tokio::test]
async fn timeouts_and_errors_leave_the_cache_untouched() {
    let mut channel = memory_channel().await;
    channel.update_entries(&[entry("a", "A", 1_000)], ts(10_000), 0, false);

    for status in [FetchStatus::Timeout, FetchStatus::Error { status: 503 }] {
        channel
            .apply(FetchOutcome::bare(status, Some(503)), ts(20_000), 0)
            .await
            .unwrap();
    }

    assert_eq!(channel.len(), 1);
    assert_eq!(channel.updated(), Some(ts(10_000)));
}

#[tokio::test]
async fn unchanged_does_no_work() {
    let mut channel = memory_channel().await;
    channel.update_entries(&[entry("a", "A", 1_000)], ts(10_000), 0, false);
    channel
        .apply(
            FetchOutcome::bare(FetchStatus::Unchanged, Some(304)),
            ts(20_000),
            0,
        )
        .await
        .unwrap();
    assert_eq!(channel.updated(), Some(ts(10_000)));
}

#[tokio::test]
async fn gone_persists_and_marks_the_channel() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut channel = Channel::open(dir.path(), ChannelConfig::new(FEED_URL))
            .await
            .unwrap();
        channel
            .apply(fresh_outcome(vec![entry("a", "A", 1_000)]), ts(10_000), 0)
            .await
            .unwrap();
        channel
            .apply(
                FetchOutcome::bare(FetchStatus::Gone, Some(410)),
                ts(20_000),
                0,
            )
            .await
            .unwrap();
        assert!(channel.is_gone());
    }

    // The mark survives, so later runs skip the fetch but keep history
    let reopened = Channel::open(dir.path(), ChannelConfig::new(FEED_URL))
        .await
        .unwrap();
    assert!(reopened.is_gone());
    assert_eq!(reopened.len(), 1);
}

#[tokio::test]
async fn a_moved_feed_repoints_and_links_its_cache() {
    let dir = tempfile::tempdir().unwrap();
    let new_url = "https://example.org/feed.xml";
    {
        let mut channel = Channel::open(dir.path(), ChannelConfig::new(FEED_URL))
            .await
            .unwrap();
        channel
            .apply(fresh_outcome(vec![entry("a", "A", 1_000)]), ts(10_000), 0)
            .await
            .unwrap();

        let mut moved = fresh_outcome(vec![entry("a", "A", 1_000), entry("b", "B", 900)]);
        moved.status = FetchStatus::Moved {
            url: new_url.into(),
        };
        moved.http_status = Some(301);
        channel.apply(moved, ts(20_000), 0).await.unwrap();

        assert_eq!(channel.url(), new_url);
        assert_eq!(channel.configured_url(), FEED_URL);
        assert!(channel.feed_information().contains("formerly"));
        assert!(dir.path().join(cache_file_name(new_url)).exists());
    }

    // Reopening under the configured URL keeps the moved identity
    let reopened = Channel::open(dir.path(), ChannelConfig::new(FEED_URL))
        .await
        .unwrap();
    assert_eq!(reopened.url(), new_url);
    assert_eq!(reopened.len(), 2);
}
