//! End-to-end runs against in-memory sources
//!
//! Every test works in its own temporary output directory; nothing here
//! touches the network.

use std::path::Path;
use std::sync::Arc;

use cumulus_collect::{CollectConfig, collect, resume};
use cumulus_core::{CancelFlag, Field, Query, RetryPolicy, SourceTag};
use cumulus_sources::Source;
use cumulus_sources::mock::{MockItem, MockSource};
use cumulus_store::{
    DownloadOptions, Layout, LogEvent, MergedArchive, MetadataStore, RunLog, RunState, RunStatus,
    SourceStatus,
};
use serde_json::json;

fn config(dir: &Path) -> CollectConfig {
    CollectConfig {
        output_dir: dir.to_path_buf(),
        retry: RetryPolicy::immediate(2),
        ..CollectConfig::default()
    }
}

fn sources<const N: usize>(mocks: [&Arc<MockSource>; N]) -> Vec<Arc<dyn Source>> {
    mocks
        .into_iter()
        .map(|m| Arc::clone(m) as Arc<dyn Source>)
        .collect()
}

fn store(dir: &Path) -> MetadataStore {
    MetadataStore::new(Layout::new(dir))
}

#[test]
fn n_items_yield_n_records() {
    let dir = tempfile::tempdir().unwrap();
    let met = Arc::new(MockSource::numbered(SourceTag::Met, 25).with_page_size(10));

    let summary = collect(&config(dir.path()), &sources([&met]), vec![Query::new("cloud")]).unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.collected(), 25);
    let records = store(dir.path()).load_all().unwrap();
    assert_eq!(records.len(), 25);
    for stored in &records {
        assert_eq!(stored.record.source, SourceTag::Met);
        assert!(matches!(stored.record.title, Field::Known(_)));
        assert!(stored.record.creator.is_unknown());
        assert_eq!(stored.files.len(), 1);
        let path = Layout::new(dir.path()).resolve(&stored.files["primary"].path);
        assert!(path.is_file());
    }
    assert_eq!(met.downloads(), 25);
}

#[test]
fn saint_cloud_is_excluded() {
    let dir = tempfile::tempdir().unwrap();
    let met = Arc::new(MockSource::new(
        SourceTag::Met,
        vec![
            MockItem::titled("1001", "Cloud Study"),
            MockItem::titled("1002", "Saint-Cloud Gardens"),
            MockItem::titled("1003", "Storm Clouds over the Bay"),
        ],
    ));
    let query = Query::new("cloud").exclude("saint-cloud");

    let summary = collect(&config(dir.path()), &sources([&met]), vec![query]).unwrap();

    let met_progress = &summary.sources[&SourceTag::Met];
    assert_eq!(met_progress.collected, 2);
    assert_eq!(met_progress.excluded, 1);
    let ids: Vec<_> = store(dir.path())
        .load_all()
        .unwrap()
        .into_iter()
        .map(|s| s.record.object_id)
        .collect();
    assert_eq!(ids, ["1001", "1003"]);
}

#[test]
fn malformed_payloads_are_kept_with_unknown_fields() {
    let dir = tempfile::tempdir().unwrap();
    let europeana = Arc::new(MockSource::new(
        SourceTag::Europeana,
        vec![
            MockItem::titled("a", "Cumulus"),
            MockItem::raw(json!({"title": {"en": 5}, "creator": null, "images": "x"})),
        ],
    ));

    let summary =
        collect(&config(dir.path()), &sources([&europeana]), vec![Query::new("cloud")]).unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    let progress = &summary.sources[&SourceTag::Europeana];
    assert_eq!((progress.collected, progress.failed), (2, 0));

    let records = store(dir.path()).load_all().unwrap();
    let malformed = records
        .iter()
        .find(|s| s.record.object_id.starts_with("h-"))
        .unwrap();
    assert!(malformed.record.title.is_unknown());
    assert!(malformed.record.creator.is_unknown());
    assert!(malformed.record.date.is_unknown());
    assert!(malformed.record.images.is_empty());
    assert!(malformed.files.is_empty());
    assert_eq!(malformed.record.original["images"], "x");
}

#[test]
fn ids_differing_only_in_unsafe_characters_stay_distinct() {
    let dir = tempfile::tempdir().unwrap();
    let europeana = Arc::new(MockSource::new(
        SourceTag::Europeana,
        vec![
            MockItem::titled("/2021/item:1", "Cloud over dunes"),
            MockItem::titled("_2021_item_1", "Cloud over the sea"),
        ],
    ));

    let summary =
        collect(&config(dir.path()), &sources([&europeana]), vec![Query::new("cloud")]).unwrap();

    let progress = &summary.sources[&SourceTag::Europeana];
    assert_eq!((progress.collected, progress.skipped), (2, 0));
    let archive = MergedArchive::from_store(&store(dir.path())).unwrap();
    assert_eq!(archive.len(), 2);
    let paths: std::collections::BTreeSet<_> =
        archive.images().map(|image| image.file.path.clone()).collect();
    assert_eq!(paths.len(), 2);
    assert_eq!(europeana.downloads(), 2);
}

#[test]
fn resume_refetches_nothing_before_the_cursor() {
    let dir = tempfile::tempdir().unwrap();
    let first_cancel = CancelFlag::new();
    let interrupted = Arc::new(
        MockSource::numbered(SourceTag::Met, 10)
            .with_page_size(2)
            .cancel_at(4, first_cancel.clone()),
    );
    let first = CollectConfig {
        cancel: first_cancel,
        ..config(dir.path())
    };
    let summary = collect(&first, &sources([&interrupted]), vec![Query::new("cloud")]).unwrap();
    assert_eq!(summary.status, RunStatus::Aborted);
    let cursor = &summary.sources[&SourceTag::Met];
    assert_eq!(cursor.status, SourceStatus::Cancelled);
    assert_eq!(cursor.next_item, 5);

    let fresh = Arc::new(MockSource::numbered(SourceTag::Met, 10).with_page_size(2));
    let resumed = resume(&config(dir.path()), &sources([&fresh]), &summary.run_id).unwrap();

    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(resumed.sources[&SourceTag::Met].collected, 10);
    for k in 0..5 {
        assert_eq!(fresh.item_fetches(k), 0, "item {k} fetched again");
    }
    for k in 5..10 {
        assert_eq!(fresh.item_fetches(k), 1);
    }
    // Pages 2, 3 and 4 only
    assert_eq!(fresh.page_requests(), 3);

    let layout = Layout::new(dir.path());
    let entries = RunLog::read(&layout, &summary.run_id).unwrap();
    let resumed_at = entries
        .iter()
        .position(|e| matches!(e.event, LogEvent::RunStarted { resumed: true }))
        .unwrap();
    let resumed_indices: Vec<_> = entries[resumed_at..]
        .iter()
        .filter_map(|e| match &e.event {
            LogEvent::Item { index, .. } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(resumed_indices, [5, 6, 7, 8, 9]);
}

#[test]
fn authentication_failure_gives_partial() {
    let dir = tempfile::tempdir().unwrap();
    let met = Arc::new(MockSource::numbered(SourceTag::Met, 3));
    let harvard = Arc::new(MockSource::numbered(SourceTag::Harvard, 3).unauthorized());

    let summary = collect(
        &config(dir.path()),
        &sources([&met, &harvard]),
        vec![Query::new("cloud")],
    )
    .unwrap();

    assert_eq!(summary.status, RunStatus::Partial);
    assert_eq!(summary.sources[&SourceTag::Met].status, SourceStatus::Exhausted);
    assert_eq!(summary.sources[&SourceTag::Met].collected, 3);
    let failed = &summary.sources[&SourceTag::Harvard];
    assert_eq!(failed.status, SourceStatus::Failed);
    assert!(failed.last_error.as_deref().unwrap().contains("authentication"));
    // Credentials are never retried
    assert_eq!(harvard.page_requests(), 1);

    let state = RunState::load(&Layout::new(dir.path()), &summary.run_id).unwrap();
    assert_eq!(state.status, RunStatus::Partial);
}

#[test]
fn precancelled_run_is_aborted_with_cursor_intact() {
    let dir = tempfile::tempdir().unwrap();
    let met = Arc::new(MockSource::numbered(SourceTag::Met, 4));
    let cfg = config(dir.path());
    cfg.cancel.cancel();

    let summary = collect(&cfg, &sources([&met]), vec![Query::new("cloud")]).unwrap();

    assert_eq!(summary.status, RunStatus::Aborted);
    let cursor = &summary.sources[&SourceTag::Met];
    assert_eq!((cursor.query_idx, cursor.next_item), (0, 0));
    assert_eq!(met.page_requests(), 0);
    assert!(store(dir.path()).load_all().unwrap().is_empty());

    let state = RunState::load(&Layout::new(dir.path()), &summary.run_id).unwrap();
    assert_eq!(state.status, RunStatus::Aborted);
    assert!(state.status.is_resumable());

    let resumed = resume(&config(dir.path()), &sources([&met]), &summary.run_id).unwrap();
    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(resumed.collected(), 4);
}

#[test]
fn existing_images_are_not_downloaded_again() {
    let dir = tempfile::tempdir().unwrap();
    let first = Arc::new(MockSource::numbered(SourceTag::Met, 3));
    collect(&config(dir.path()), &sources([&first]), vec![Query::new("cloud")]).unwrap();
    assert_eq!(first.downloads(), 3);

    // Lose the metadata but keep the image files
    std::fs::remove_dir_all(dir.path().join("metadata")).unwrap();

    let second = Arc::new(MockSource::numbered(SourceTag::Met, 3));
    let summary =
        collect(&config(dir.path()), &sources([&second]), vec![Query::new("cloud")]).unwrap();

    assert_eq!(summary.collected(), 3);
    assert_eq!(second.downloads(), 0);
    for stored in store(dir.path()).load_all().unwrap() {
        assert_eq!(stored.files["primary"].bytes, {
            let url = &stored.record.images["primary"];
            format!("mock image {url}").len() as u64
        });
    }
}

#[test]
fn stored_items_are_skipped_on_a_new_run() {
    let dir = tempfile::tempdir().unwrap();
    let first = Arc::new(MockSource::numbered(SourceTag::Met, 4));
    collect(&config(dir.path()), &sources([&first]), vec![Query::new("cloud")]).unwrap();

    let second = Arc::new(MockSource::numbered(SourceTag::Met, 4));
    let summary =
        collect(&config(dir.path()), &sources([&second]), vec![Query::new("cloud")]).unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.sources[&SourceTag::Met].skipped, 4);
    assert_eq!(second.total_item_fetches(), 0);
}

#[test]
fn failed_images_are_fetched_on_the_next_run() {
    let dir = tempfile::tempdir().unwrap();
    // One attempt plus two retries, all failing
    let flaky = Arc::new(MockSource::numbered(SourceTag::Met, 1).fail_downloads(3));
    let first = collect(&config(dir.path()), &sources([&flaky]), vec![Query::new("cloud")]).unwrap();
    assert_eq!(first.status, RunStatus::Completed);
    assert_eq!(flaky.downloads(), 3);
    let stored = store(dir.path()).read(SourceTag::Met, "obj-0").unwrap().unwrap();
    assert_eq!(stored.missing_labels().collect::<Vec<_>>(), ["primary"]);

    let healthy = Arc::new(MockSource::numbered(SourceTag::Met, 1));
    let second =
        collect(&config(dir.path()), &sources([&healthy]), vec![Query::new("cloud")]).unwrap();

    let progress = &second.sources[&SourceTag::Met];
    assert_eq!((progress.collected, progress.skipped, progress.images), (0, 1, 1));
    assert_eq!(healthy.total_item_fetches(), 0);
    assert_eq!(healthy.downloads(), 1);
    let stored = store(dir.path()).read(SourceTag::Met, "obj-0").unwrap().unwrap();
    assert!(stored.missing_labels().next().is_none());
    assert!(Layout::new(dir.path()).resolve(&stored.files["primary"].path).is_file());

    // Nothing left to fetch
    let idle = Arc::new(MockSource::numbered(SourceTag::Met, 1));
    collect(&config(dir.path()), &sources([&idle]), vec![Query::new("cloud")]).unwrap();
    assert_eq!(idle.downloads(), 0);
}

#[test]
fn image_options_limit_downloads() {
    let dir = tempfile::tempdir().unwrap();
    let met = Arc::new(MockSource::new(
        SourceTag::Met,
        vec![MockItem::titled("a", "Nimbus").with_image("small", "mock://a/small.jpg")],
    ));
    let cfg = CollectConfig {
        download: DownloadOptions {
            images: true,
            labels: Some(["small".to_string()].into()),
        },
        ..config(dir.path())
    };
    collect(&cfg, &sources([&met]), vec![Query::new("cloud")]).unwrap();

    let stored = store(dir.path()).read(SourceTag::Met, "a").unwrap().unwrap();
    assert_eq!(stored.files.keys().collect::<Vec<_>>(), ["small"]);
    assert_eq!(stored.missing_labels().collect::<Vec<_>>(), ["primary"]);
    assert_eq!(met.downloads(), 1);

    let dir = tempfile::tempdir().unwrap();
    let met = Arc::new(MockSource::numbered(SourceTag::Met, 2));
    let cfg = CollectConfig {
        download: DownloadOptions {
            images: false,
            labels: None,
        },
        ..config(dir.path())
    };
    let summary = collect(&cfg, &sources([&met]), vec![Query::new("cloud")]).unwrap();
    assert_eq!(summary.collected(), 2);
    assert_eq!(met.downloads(), 0);
}

#[test]
fn failed_items_do_not_fail_the_source() {
    let dir = tempfile::tempdir().unwrap();
    let met = Arc::new(MockSource::numbered(SourceTag::Met, 4).fail_item(2, 100));

    let summary = collect(&config(dir.path()), &sources([&met]), vec![Query::new("cloud")]).unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    let progress = &summary.sources[&SourceTag::Met];
    assert_eq!((progress.collected, progress.failed), (3, 1));
    // One attempt plus two retries
    assert_eq!(met.item_fetches(2), 3);

    let entries = RunLog::read(&Layout::new(dir.path()), &summary.run_id).unwrap();
    let failed = entries.iter().find_map(|e| match &e.event {
        LogEvent::Item {
            outcome,
            object_id,
            detail,
            ..
        } if outcome == "failed" => Some((object_id.clone(), detail.clone())),
        _ => None,
    });
    let (object_id, detail) = failed.unwrap();
    assert_eq!(object_id.as_deref(), Some("obj-2"));
    assert!(detail.unwrap().contains("503"));
}

#[test]
fn page_failure_ends_the_source() {
    let dir = tempfile::tempdir().unwrap();
    let met = Arc::new(MockSource::numbered(SourceTag::Met, 6).with_page_size(2).fail_page(1));
    let smithsonian = Arc::new(MockSource::numbered(SourceTag::Smithsonian, 2));

    let summary = collect(
        &config(dir.path()),
        &sources([&met, &smithsonian]),
        vec![Query::new("cloud")],
    )
    .unwrap();

    assert_eq!(summary.status, RunStatus::Partial);
    let met_progress = &summary.sources[&SourceTag::Met];
    assert_eq!(met_progress.status, SourceStatus::Failed);
    assert_eq!(met_progress.next_item, 2);
    assert_eq!(summary.sources[&SourceTag::Smithsonian].collected, 2);
}

#[test]
fn queries_run_in_order_and_share_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let met = Arc::new(MockSource::numbered(SourceTag::Met, 3));

    let summary = collect(
        &config(dir.path()),
        &sources([&met]),
        vec![Query::new("cloud"), Query::new("sky")],
    )
    .unwrap();

    let progress = &summary.sources[&SourceTag::Met];
    assert_eq!(progress.collected, 3);
    // The second query sees the same items, already stored
    assert_eq!(progress.skipped, 3);
    assert_eq!(progress.query_idx, 1);
    assert_eq!(met.total_item_fetches(), 3);
}

#[test]
fn storage_failure_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    // A file where the source's metadata directory should go
    std::fs::create_dir_all(dir.path().join("metadata")).unwrap();
    std::fs::write(dir.path().join("metadata").join("met_museum"), b"in the way").unwrap();
    let met = Arc::new(MockSource::numbered(SourceTag::Met, 3));

    let err = collect(&config(dir.path()), &sources([&met]), vec![Query::new("cloud")]).unwrap_err();
    assert!(format!("{err:#}").contains("failed to store"));

    let state = RunState::latest(&Layout::new(dir.path())).unwrap().unwrap();
    assert_eq!(state.status, RunStatus::Failed);
    assert_eq!(state.sources[&SourceTag::Met].collected, 0);
}

#[test]
fn collected_run_merges_into_archive() {
    let dir = tempfile::tempdir().unwrap();
    let met = Arc::new(MockSource::numbered(SourceTag::Met, 2));
    let harvard = Arc::new(MockSource::numbered(SourceTag::Harvard, 2).inline());
    collect(
        &config(dir.path()),
        &sources([&met, &harvard]),
        vec![Query::new("cloud")],
    )
    .unwrap();

    let archive = MergedArchive::from_store(&store(dir.path())).unwrap();
    // Same object ids from two sources stay distinct
    assert_eq!(archive.len(), 4);
    assert_eq!(archive.counts()[&SourceTag::Harvard], 2);
    assert_eq!(archive.images().count(), 4);
}

#[test]
fn completed_run_resumes_as_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let met = Arc::new(MockSource::numbered(SourceTag::Met, 2));
    let summary = collect(&config(dir.path()), &sources([&met]), vec![Query::new("cloud")]).unwrap();

    let again = Arc::new(MockSource::numbered(SourceTag::Met, 2));
    let resumed = resume(&config(dir.path()), &sources([&again]), &summary.run_id).unwrap();
    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(again.page_requests(), 0);
}

#[test]
fn resume_needs_the_run_sources() {
    let dir = tempfile::tempdir().unwrap();
    let harvard = Arc::new(MockSource::numbered(SourceTag::Harvard, 2).unauthorized());
    let summary =
        collect(&config(dir.path()), &sources([&harvard]), vec![Query::new("cloud")]).unwrap();
    // No source finished, so the run failed rather than partially succeeded
    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(
        RunState::load(&Layout::new(dir.path()), &summary.run_id).unwrap().status,
        RunStatus::Failed
    );

    let met = Arc::new(MockSource::numbered(SourceTag::Met, 2));
    let err = resume(&config(dir.path()), &sources([&met]), &summary.run_id).unwrap_err();
    assert!(err.to_string().contains("harvard"));
}
