//! Per-source worker: walks the record stream, downloads images, and reports
//! every item to the coordinator. Workers never write run state themselves.

use std::collections::BTreeMap;
use std::sync::mpsc::SyncSender;

use cumulus_core::{Attempt, FetchError, Query, Record, SourceTag, retry_with_backoff};
use cumulus_sources::{ItemOutcome, RecordStream, Source, SourceContext};
use cumulus_store::layout::extension_for;
use cumulus_store::{DownloadOptions, MetadataStore, SourceStatus, StoredFile};

/// Message from a worker to the coordinator.
#[derive(Debug)]
pub enum WorkerEvent {
    QueryStarted {
        source: SourceTag,
        query_idx: usize,
        from: usize,
    },
    Item {
        source: SourceTag,
        query_idx: usize,
        index: usize,
        outcome: ItemOutcome,
        /// Image files on disk for a collected item, by label
        files: BTreeMap<String, StoredFile>,
    },
    ImageFailed {
        source: SourceTag,
        object_id: String,
        label: String,
        error: FetchError,
    },
    Finished {
        source: SourceTag,
        status: SourceStatus,
        error: Option<FetchError>,
    },
}

/// Everything one worker thread needs, borrowed from the runner.
pub struct SourceWorker<'a> {
    pub source: &'a dyn Source,
    pub queries: &'a [Query],
    pub ctx: SourceContext,
    pub store: &'a MetadataStore,
    pub download: &'a DownloadOptions,
    /// `(query_idx, next_item)` to start from
    pub cursor: (usize, usize),
}

impl SourceWorker<'_> {
    /// Collect until the source is exhausted, fails, or the run is cancelled.
    pub fn run(self, tx: SyncSender<WorkerEvent>) {
        let source = self.source.tag();
        let (status, error) = match self.collect(&tx) {
            Ok(status) => (status, None),
            Err(e) => (SourceStatus::Failed, Some(e)),
        };
        // The coordinator may already be gone after a storage failure
        let _ = tx.send(WorkerEvent::Finished {
            source,
            status,
            error,
        });
    }

    fn collect(&self, tx: &SyncSender<WorkerEvent>) -> Result<SourceStatus, FetchError> {
        let tag = self.source.tag();
        let known = |id: &str| self.store.contains(tag, id);
        let (start_query, start_item) = self.cursor;

        for (query_idx, query) in self.queries.iter().enumerate().skip(start_query) {
            let from = if query_idx == start_query { start_item } else { 0 };
            if self.ctx.cancel.is_cancelled() {
                return Ok(SourceStatus::Cancelled);
            }
            let started = WorkerEvent::QueryStarted {
                source: tag,
                query_idx,
                from,
            };
            if tx.send(started).is_err() {
                return Ok(SourceStatus::Cancelled);
            }

            let mut stream = RecordStream::new(self.source, query, &self.ctx)
                .starting_at(from)
                .skip_known(&known);
            loop {
                if self.ctx.cancel.is_cancelled() {
                    log::info!("{tag}: cancelled before item {}", stream.position());
                    return Ok(SourceStatus::Cancelled);
                }
                let Some(next) = stream.next() else {
                    break;
                };
                let (index, outcome) = next?;
                let files = match &outcome {
                    ItemOutcome::Collected(record) => {
                        self.download_images(record, &BTreeMap::new(), tx)?
                    }
                    ItemOutcome::AlreadyStored { object_id } => self.recover_images(object_id, tx)?,
                    _ => BTreeMap::new(),
                };
                let item = WorkerEvent::Item {
                    source: tag,
                    query_idx,
                    index,
                    outcome,
                    files,
                };
                if tx.send(item).is_err() {
                    return Ok(SourceStatus::Cancelled);
                }
            }
        }
        Ok(SourceStatus::Exhausted)
    }

    /// Images a stored item is still missing, fetched again. Only the new
    /// files are returned; the coordinator adds them to the document.
    fn recover_images(
        &self,
        object_id: &str,
        tx: &SyncSender<WorkerEvent>,
    ) -> Result<BTreeMap<String, StoredFile>, FetchError> {
        let stored = match self.store.read(self.source.tag(), object_id) {
            Ok(Some(stored)) => stored,
            Ok(None) => return Ok(BTreeMap::new()),
            Err(e) => {
                log::warn!("{}: cannot read stored {object_id}: {e:#}", self.source.tag());
                return Ok(BTreeMap::new());
            }
        };
        if stored.missing_labels().next().is_none() {
            return Ok(BTreeMap::new());
        }
        self.download_images(&stored.record, &stored.files, tx)
    }

    /// Fetch every wanted resolution of `record` not already in `have`.
    /// Files already on disk are hashed, not fetched again. Only storage
    /// errors are returned.
    fn download_images(
        &self,
        record: &Record,
        have: &BTreeMap<String, StoredFile>,
        tx: &SyncSender<WorkerEvent>,
    ) -> Result<BTreeMap<String, StoredFile>, FetchError> {
        let layout = self.store.layout();
        let mut files = BTreeMap::new();

        for (label, url) in &record.images {
            if !self.download.wants(label) || have.contains_key(label) {
                continue;
            }
            let dest = layout.image_path(record.source, &record.object_id, label, extension_for(url));
            if !dest.is_file() {
                let what = format!("{} image {}/{label}", record.source, record.object_id);
                let attempt = retry_with_backoff(&what, &self.ctx.retry, || {
                    self.ctx.limiter.wait();
                    self.source.download(url, &dest)
                });
                let error = match attempt {
                    Attempt::Done(_) => None,
                    Attempt::Fatal(e @ FetchError::Storage(_)) => return Err(e),
                    Attempt::Recoverable(e) | Attempt::Fatal(e) => Some(e),
                };
                if let Some(error) = error {
                    let _ = tx.send(WorkerEvent::ImageFailed {
                        source: record.source,
                        object_id: record.object_id.clone(),
                        label: label.clone(),
                        error,
                    });
                    continue;
                }
            }
            files.insert(label.clone(), StoredFile::from_disk(layout, &dest)?);
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cumulus_core::CancelFlag;
    use cumulus_sources::mock::{MockItem, MockSource};
    use cumulus_store::Layout;
    use std::sync::mpsc;

    fn run_worker(
        source: &MockSource,
        store: &MetadataStore,
        ctx: SourceContext,
        cursor: (usize, usize),
    ) -> Vec<WorkerEvent> {
        let queries = vec![Query::new("cloud")];
        let download = DownloadOptions::default();
        let (tx, rx) = mpsc::sync_channel(64);
        let worker = SourceWorker {
            source,
            queries: &queries,
            ctx,
            store,
            download: &download,
            cursor,
        };
        std::thread::scope(|s| {
            s.spawn(move || worker.run(tx));
        });
        rx.iter().collect()
    }

    #[test]
    fn reports_items_then_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(Layout::new(dir.path()));
        let source = MockSource::numbered(SourceTag::Met, 3);
        let events = run_worker(&source, &store, SourceContext::immediate(0), (0, 0));

        assert!(matches!(events[0], WorkerEvent::QueryStarted { from: 0, .. }));
        let items: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::Item { index, files, .. } => Some((*index, files.len())),
                _ => None,
            })
            .collect();
        assert_eq!(items, [(0, 1), (1, 1), (2, 1)]);
        assert!(matches!(
            events.last(),
            Some(WorkerEvent::Finished {
                status: SourceStatus::Exhausted,
                error: None,
                ..
            })
        ));
        // Workers write images but never metadata
        assert!(!store.contains(SourceTag::Met, "obj-0"));
        assert_eq!(source.downloads(), 3);
    }

    #[test]
    fn broken_image_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(Layout::new(dir.path()));
        let source = MockSource::new(
            SourceTag::Met,
            vec![MockItem::titled("a", "Cirrus").with_image("large", "mock://broken/a.jpg")],
        );
        let events = run_worker(&source, &store, SourceContext::immediate(1), (0, 0));

        assert!(events.iter().any(|e| matches!(
            e,
            WorkerEvent::ImageFailed { label, .. } if label == "large"
        )));
        let files = events.iter().find_map(|e| match e {
            WorkerEvent::Item { files, .. } => Some(files),
            _ => None,
        });
        assert_eq!(files.unwrap().keys().collect::<Vec<_>>(), ["primary"]);
    }

    #[test]
    fn cancelled_before_start_sends_only_finished() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(Layout::new(dir.path()));
        let source = MockSource::numbered(SourceTag::Met, 3);
        let ctx = SourceContext::immediate(0);
        ctx.cancel.cancel();
        let events = run_worker(&source, &store, ctx, (0, 0));

        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            WorkerEvent::Finished {
                status: SourceStatus::Cancelled,
                ..
            }
        ));
        assert_eq!(source.page_requests(), 0);
    }

    #[test]
    fn in_flight_item_completes_after_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(Layout::new(dir.path()));
        let flag = CancelFlag::new();
        let source = MockSource::numbered(SourceTag::Met, 5).cancel_at(1, flag.clone());
        let mut ctx = SourceContext::immediate(0);
        ctx.cancel = flag;
        let events = run_worker(&source, &store, ctx, (0, 0));

        let indices: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::Item { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, [0, 1]);
        assert_eq!(source.item_fetches(2), 0);
    }
}
