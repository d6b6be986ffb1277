//! End-to-end archive runs against the scripted source

use super::common::{
    config, date, hourly_resource, layout, shard_files, FakeSource, MetadataReply,
};
use std::sync::Arc;
use std::time::Duration;
use tabular_archiver::archive::ArchiveLock;
use tabular_archiver::archiver::{ArchiveError, Archiver, RunConfig};
use tabular_archiver::{Entity, Granularity};
use tempfile::TempDir;

#[tokio::test(start_paused = true)]
async fn test_month_run_writes_one_shard_per_entity() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let source = Arc::new(FakeSource::with_stations(10, date(2000, 1, 1)));

    let cfg = config(root)
        .with_date_range(date(2024, 1, 1), date(2024, 1, 31))
        .with_granularity(Granularity::Month)
        .with_group_size(5);
    let summary = Archiver::new(cfg, source.clone()).run().await.unwrap();

    assert_eq!(summary.total_work_items, 2);
    assert_eq!(summary.checked, 2);
    assert_eq!(summary.downloaded, 2);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.shards_written, 10);
    assert!(summary.is_complete());

    let calls = source.fetch_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].entity_ids, vec!["1", "2", "3", "4", "5"]);
    assert_eq!(calls[1].entity_ids, vec!["6", "7", "8", "9", "10"]);
    assert_eq!(calls[0].start, "2024-01-01T00:00");
    assert_eq!(calls[0].end, "2024-01-31T23:59");

    let layout = layout(root);
    for id in 1..=10 {
        let shard = layout.shard_path(&id.to_string(), date(2024, 1, 1));
        assert!(shard.exists(), "missing shard for entity {id}");
    }
    assert_eq!(shard_files(root).len(), 10);

    // Combined artifacts are transient
    let leftovers: Vec<_> = std::fs::read_dir(layout.batch_dir()).unwrap().collect();
    assert!(leftovers.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_second_run_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let cfg = config(root)
        .with_date_range(date(2024, 1, 1), date(2024, 3, 31))
        .with_group_size(3);

    let first = Archiver::new(cfg.clone(), FakeSource::with_stations(7, date(2000, 1, 1)));
    let summary = first.run().await.unwrap();
    assert_eq!(summary.total_work_items, 9);
    assert_eq!(summary.downloaded, 9);

    let second = Archiver::new(cfg, FakeSource::with_stations(7, date(2000, 1, 1)));
    let summary = second.run().await.unwrap();
    assert_eq!(summary.downloaded, 0);
    assert_eq!(summary.skipped, summary.total_work_items);
    assert!(second.source().fetch_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_missing_shard_is_refetched_alone() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let cfg = config(root)
        .with_date_range(date(2024, 1, 1), date(2024, 3, 31))
        .with_group_size(2);

    let first = Archiver::new(cfg.clone(), FakeSource::with_stations(4, date(2000, 1, 1)));
    assert_eq!(first.run().await.unwrap().downloaded, 6);

    // Lose entity 3's February shard
    let lost = layout(root).shard_path("3", date(2024, 2, 1));
    std::fs::remove_file(&lost).unwrap();

    let second = Archiver::new(cfg, FakeSource::with_stations(4, date(2000, 1, 1)));
    let summary = second.run().await.unwrap();
    assert_eq!(summary.downloaded, 1);
    assert_eq!(summary.skipped, 5);
    assert!(summary.is_complete());

    let calls = second.source().fetch_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].entity_ids, vec!["3", "4"]);
    assert_eq!(calls[0].start, "2024-02-01T00:00");
    assert_eq!(calls[0].end, "2024-02-29T23:59");
    assert!(lost.exists());
}

#[tokio::test(start_paused = true)]
async fn test_start_defaults_to_earliest_valid_from() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let source = FakeSource::new(vec![
        tabular_archiver::Entity::new("a", date(2024, 12, 20)),
        tabular_archiver::Entity::new("b", date(2024, 12, 28)),
    ]);

    let cfg = config(root).with_granularity(Granularity::Week);
    let archiver = Archiver::new(cfg, source);
    let summary = archiver.run().await.unwrap();

    // 2024-12-20 .. 2024-12-31 (pinned today) in weeks: 20-26, 27-31
    assert_eq!(summary.total_work_items, 2);
    let calls = archiver.source().fetch_calls();
    assert_eq!(calls[0].start, "2024-12-20T00:00");
    assert_eq!(calls[1].end, "2024-12-31T23:59");
}

#[tokio::test(start_paused = true)]
async fn test_entity_subset_filters_resolved_list() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let cfg = config(root)
        .with_date_range(date(2024, 5, 1), date(2024, 5, 3))
        .with_entities(vec!["4".to_string(), "2".to_string(), "404".to_string()]);

    let archiver = Archiver::new(cfg, FakeSource::with_stations(6, date(2000, 1, 1)));
    let summary = archiver.run().await.unwrap();

    assert_eq!(summary.total_work_items, 1);
    let calls = archiver.source().fetch_calls();
    assert_eq!(calls[0].entity_ids, vec!["2", "4"]);
    assert_eq!(shard_files(root).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_day_granularity_writes_daily_shards() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let cfg = config(root)
        .with_date_range(date(2024, 2, 27), date(2024, 3, 2))
        .with_granularity(Granularity::Day);

    let summary = Archiver::new(cfg, FakeSource::with_stations(2, date(2000, 1, 1)))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.total_work_items, 5);
    assert_eq!(summary.shards_written, 10);
    assert!(layout(root).shard_path("2", date(2024, 2, 29)).exists());
}

#[tokio::test(start_paused = true)]
async fn test_locked_archive_is_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let _held = ArchiveLock::try_acquire(root).unwrap();

    let cfg = config(root).with_date_range(date(2024, 1, 1), date(2024, 1, 31));
    let archiver = Archiver::new(cfg, FakeSource::with_stations(2, date(2000, 1, 1)));
    let err = archiver.run().await.unwrap_err();

    assert!(matches!(err, ArchiveError::Locked(_)));
    assert!(archiver.source().metadata_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_lock_spans_every_resource_under_the_root() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let held = ArchiveLock::try_acquire(root).unwrap();

    // Another resource shares root/batches, so it must wait too
    let hourly = RunConfig::new(hourly_resource(), vec!["tl".to_string()], root)
        .with_date_range(date(2024, 1, 1), date(2024, 1, 1))
        .with_today(date(2024, 12, 31));
    let archiver = Archiver::new(hourly.clone(), FakeSource::with_stations(1, date(2000, 1, 1)));
    assert!(matches!(archiver.run().await, Err(ArchiveError::Locked(_))));
    assert!(archiver.source().metadata_calls().is_empty());

    drop(held);
    let archiver = Archiver::new(hourly, FakeSource::with_stations(1, date(2000, 1, 1)));
    assert_eq!(archiver.run().await.unwrap().downloaded, 1);
}

#[tokio::test(start_paused = true)]
async fn test_buckets_before_an_entity_starts_are_not_refetched() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let entities = vec![
        Entity::new("a", date(2024, 1, 1)),
        Entity::new("b", date(2024, 3, 1)),
    ];

    // Start defaults to the earliest valid_from, so Jan and Feb have no rows for "b"
    let cfg = config(root)
        .with_end(date(2024, 3, 31))
        .with_group_size(2);

    let first = Archiver::new(cfg.clone(), FakeSource::new(entities.clone()));
    let summary = first.run().await.unwrap();
    assert_eq!(summary.total_work_items, 3);
    assert_eq!(summary.downloaded, 3);
    assert!(!layout(root).shard_path("b", date(2024, 1, 1)).exists());
    assert!(layout(root).shard_path("b", date(2024, 3, 1)).exists());

    for _ in 0..2 {
        let rerun = Archiver::new(cfg.clone(), FakeSource::new(entities.clone()));
        let summary = rerun.run().await.unwrap();
        assert_eq!(summary.downloaded, 0);
        assert_eq!(summary.skipped, 3);
        assert!(rerun.source().fetch_calls().is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn test_invalid_date_range_is_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();

    // Explicit inverted range: rejected before any request
    let cfg = config(root).with_date_range(date(2024, 2, 1), date(2024, 1, 1));
    let archiver = Archiver::new(cfg, FakeSource::with_stations(2, date(2000, 1, 1)));
    assert!(matches!(
        archiver.run().await,
        Err(ArchiveError::InvalidDateRange { .. })
    ));
    assert!(archiver.source().metadata_calls().is_empty());

    // Derived start after explicit end
    let cfg = config(root).with_end(date(2024, 1, 1));
    let archiver = Archiver::new(cfg, FakeSource::with_stations(2, date(2024, 6, 1)));
    assert!(matches!(
        archiver.run().await,
        Err(ArchiveError::InvalidDateRange { .. })
    ));
    assert!(archiver.source().fetch_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_metadata_retries_then_aborts() {
    let temp_dir = TempDir::new().unwrap();
    let source = FakeSource::with_stations(2, date(2000, 1, 1))
        .script_metadata([MetadataReply::Error; 5]);

    let cfg = config(temp_dir.path()).with_date_range(date(2024, 1, 1), date(2024, 1, 2));
    let archiver = Archiver::new(cfg, source);
    let err = archiver.run().await.unwrap_err();

    match err {
        ArchiveError::MetadataFetch {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts, 5);
            assert!(last_error.contains("503"));
        }
        other => panic!("expected metadata failure, got {other:?}"),
    }

    let calls = archiver.source().metadata_calls();
    assert_eq!(calls.len(), 5);
    let gaps: Vec<u64> = calls.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect();
    assert_eq!(gaps, vec![30, 60, 90, 120]);
    assert!(archiver.source().fetch_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_empty_metadata_counts_as_failure() {
    let temp_dir = TempDir::new().unwrap();
    let source = FakeSource::with_stations(1, date(2000, 1, 1))
        .script_metadata([MetadataReply::Empty]);

    let cfg = config(temp_dir.path()).with_date_range(date(2024, 1, 1), date(2024, 1, 1));
    let archiver = Archiver::new(cfg, source);
    let summary = archiver.run().await.unwrap();

    assert_eq!(summary.downloaded, 1);
    let calls = archiver.source().metadata_calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1] - calls[0] >= Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_subset_yields_empty_plan() {
    let temp_dir = TempDir::new().unwrap();
    let cfg = config(temp_dir.path()).with_entities(vec!["nope".to_string()]);

    let archiver = Archiver::new(cfg, FakeSource::with_stations(3, date(2000, 1, 1)));
    let summary = archiver.run().await.unwrap();

    assert_eq!(summary.total_work_items, 0);
    assert!(summary.is_complete());
    assert!(archiver.source().fetch_calls().is_empty());
}
