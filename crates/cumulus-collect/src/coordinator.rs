//! Single writer for a run: metadata documents, `run.json` and `log.jsonl`.
//!
//! Workers report over a channel; the coordinator applies each event in
//! arrival order. A collected item's metadata is written before its cursor
//! advances, so a crash can at worst re-examine one item.

use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;

use anyhow::{Context, Result};
use cumulus_core::progress::fmt_num;
use cumulus_core::{CancelFlag, FetchError, SourceTag};
use cumulus_sources::ItemOutcome;
use cumulus_store::{
    Layout, LogEvent, MetadataStore, RunLog, RunState, RunStatus, SourceProgress, SourceStatus,
    StoredFile, StoredRecord,
};
use indicatif::ProgressBar;

use crate::worker::WorkerEvent;

pub struct Coordinator<'a> {
    state: RunState,
    layout: &'a Layout,
    store: &'a MetadataStore,
    log: RunLog,
    cancel: CancelFlag,
    lines: BTreeMap<SourceTag, ProgressBar>,
}

impl<'a> Coordinator<'a> {
    pub fn new(
        state: RunState,
        store: &'a MetadataStore,
        log: RunLog,
        cancel: CancelFlag,
        lines: BTreeMap<SourceTag, ProgressBar>,
    ) -> Self {
        Self {
            state,
            layout: store.layout(),
            store,
            log,
            cancel,
            lines,
        }
    }

    /// Apply events until every worker has hung up.
    ///
    /// On a storage failure the run is cancelled and the error returned; the
    /// receiver is dropped so blocked workers wake up and exit.
    pub fn drain(&mut self, rx: Receiver<WorkerEvent>) -> Result<()> {
        for event in rx.iter() {
            if let Err(e) = self.apply(event) {
                self.cancel.cancel();
                return Err(e);
            }
        }
        Ok(())
    }

    fn apply(&mut self, event: WorkerEvent) -> Result<()> {
        match event {
            WorkerEvent::QueryStarted {
                source,
                query_idx,
                from,
            } => {
                let progress = self.progress_mut(source);
                progress.status = SourceStatus::Running;
                progress.query_idx = query_idx;
                progress.next_item = from;
                let query = self
                    .state
                    .queries
                    .get(query_idx)
                    .map(|q| q.keyword().to_string())
                    .unwrap_or_default();
                log::debug!("{source}: query '{query}' from item {from}");
                self.log.append(
                    Some(source),
                    LogEvent::QueryStarted {
                        query,
                        query_idx,
                        from,
                    },
                )?;
                self.save()?;
            }
            WorkerEvent::Item {
                source,
                query_idx,
                index,
                outcome,
                files,
            } => {
                let event = self.record_item(source, query_idx, index, outcome, files)?;
                self.save()?;
                self.log.append(Some(source), event)?;
                self.refresh_line(source);
            }
            WorkerEvent::ImageFailed {
                source,
                object_id,
                label,
                error,
            } => {
                log::warn!("{source}: image {object_id}/{label}: {error}");
                self.log.append(
                    Some(source),
                    LogEvent::ImageFailed {
                        object_id,
                        label,
                        error: error.to_string(),
                    },
                )?;
            }
            WorkerEvent::Finished {
                source,
                status,
                error,
            } => return self.finish_source(source, status, error),
        }
        Ok(())
    }

    /// Persist a collected item and advance the cursor past `index`.
    fn record_item(
        &mut self,
        source: SourceTag,
        query_idx: usize,
        index: usize,
        outcome: ItemOutcome,
        files: BTreeMap<String, StoredFile>,
    ) -> Result<LogEvent> {
        let object_id = outcome.object_id().map(str::to_string);
        let (label, detail) = match outcome {
            ItemOutcome::Collected(record) => {
                if self.store.contains(source, &record.object_id) {
                    self.progress_mut(source).skipped += 1;
                    ("skipped", None)
                } else {
                    let stored = StoredRecord {
                        record,
                        files,
                        annotations: BTreeMap::new(),
                    };
                    self.store.write(&stored).with_context(|| {
                        format!("failed to store {source}/{}", stored.record.object_id)
                    })?;
                    let progress = self.progress_mut(source);
                    progress.collected += 1;
                    progress.images += stored.files.len();
                    ("collected", None)
                }
            }
            ItemOutcome::Excluded { term, .. } => {
                self.progress_mut(source).excluded += 1;
                ("excluded", Some(term))
            }
            ItemOutcome::Rejected { reason, .. } => {
                self.progress_mut(source).rejected += 1;
                ("rejected", Some(reason))
            }
            ItemOutcome::AlreadyStored { object_id } => {
                let recovered = self.add_files(source, &object_id, files)?;
                let progress = self.progress_mut(source);
                progress.skipped += 1;
                progress.images += recovered;
                let detail = (recovered > 0).then(|| format!("{recovered} images recovered"));
                ("skipped", detail)
            }
            ItemOutcome::Failed { error, .. } => {
                log::warn!(
                    "{source}: item {index} ({}) failed: {error}",
                    object_id.as_deref().unwrap_or("?")
                );
                self.progress_mut(source).failed += 1;
                ("failed", Some(error.to_string()))
            }
        };

        let progress = self.progress_mut(source);
        progress.query_idx = query_idx;
        progress.next_item = index + 1;

        Ok(LogEvent::Item {
            query_idx,
            index,
            object_id,
            outcome: label.to_string(),
            detail,
        })
    }

    /// Add late image files to a stored document; returns how many.
    fn add_files(
        &self,
        source: SourceTag,
        object_id: &str,
        files: BTreeMap<String, StoredFile>,
    ) -> Result<usize> {
        if files.is_empty() {
            return Ok(0);
        }
        let Some(mut stored) = self.store.read(source, object_id)? else {
            return Ok(0);
        };
        let added = files.len();
        stored.files.extend(files);
        self.store
            .write(&stored)
            .with_context(|| format!("failed to store {source}/{object_id}"))?;
        Ok(added)
    }

    fn finish_source(
        &mut self,
        source: SourceTag,
        status: SourceStatus,
        error: Option<FetchError>,
    ) -> Result<()> {
        let progress = self.progress_mut(source);
        progress.status = status;
        progress.last_error = error.as_ref().map(ToString::to_string);
        let summary = format!(
            "{status}: {} collected, {} failed",
            fmt_num(progress.collected),
            fmt_num(progress.failed)
        );

        match &error {
            Some(e) => log::error!("{source}: {status} at item {}: {e}", progress.next_item),
            None if status == SourceStatus::Cancelled => {
                log::warn!("{source}: cancelled at item {}", progress.next_item)
            }
            None => log::info!("{source}: {summary}"),
        }
        if let Some(line) = self.lines.get(&source) {
            line.finish_with_message(summary);
        }

        self.log.append(
            Some(source),
            LogEvent::SourceFinished {
                status,
                error: error.as_ref().map(ToString::to_string),
            },
        )?;
        self.save()?;

        if let Some(e @ FetchError::Storage(_)) = error {
            return Err(anyhow::Error::new(e).context(format!("{source}: storage failure")));
        }
        Ok(())
    }

    /// Close the run: settle its status, persist it and log the outcome.
    pub fn finish(mut self, drained: Result<()>) -> Result<RunState> {
        for progress in self.state.sources.values_mut() {
            if matches!(progress.status, SourceStatus::Running | SourceStatus::Pending)
                && drained.is_err()
            {
                progress.status = SourceStatus::Cancelled;
            }
        }
        for line in self.lines.values() {
            if !line.is_finished() {
                line.abandon();
            }
        }

        let (status, error) = match &drained {
            Ok(()) => (self.state.settle(), None),
            Err(e) => (RunStatus::Failed, Some(format!("{e:#}"))),
        };
        self.state.status = status;
        let closed = self
            .save()
            .and_then(|()| {
                self.log
                    .append(None, LogEvent::RunFinished { status, error })
                    .map_err(Into::into)
            });

        match (drained, closed) {
            (Err(e), Err(secondary)) => {
                log::error!("could not record failure of run {}: {secondary:#}", self.state.run_id);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(self.state),
        }
    }

    fn progress_mut(&mut self, source: SourceTag) -> &mut SourceProgress {
        self.state.sources.entry(source).or_default()
    }

    fn save(&mut self) -> Result<()> {
        self.state.touch();
        self.state
            .save(self.layout)
            .context("failed to save run state")
    }

    fn refresh_line(&self, source: SourceTag) {
        let (Some(line), Some(progress)) = (self.lines.get(&source), self.state.sources.get(&source))
        else {
            return;
        };
        line.set_message(format!(
            "query {} item {}: {} collected, {} excluded, {} skipped, {} failed",
            progress.query_idx + 1,
            fmt_num(progress.next_item),
            fmt_num(progress.collected),
            fmt_num(progress.excluded),
            fmt_num(progress.skipped),
            fmt_num(progress.failed),
        ));
    }
}
