//! Run orchestration: one scoped worker thread per source, one coordinator

use std::collections::BTreeMap;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail, ensure};
use cumulus_core::progress::fmt_num;
use cumulus_core::{Query, SourceTag};
use cumulus_sources::Source;
use cumulus_store::{
    Layout, LogEvent, MetadataStore, RunLog, RunState, RunStatus, SourceProgress, SourceStatus,
};

use crate::config::CollectConfig;
use crate::coordinator::Coordinator;
use crate::worker::SourceWorker;

/// Events buffered between workers and the coordinator
const CHANNEL_CAPACITY: usize = 256;

/// Start a new run of `queries` against every source in `sources`.
pub fn collect(
    config: &CollectConfig,
    sources: &[Arc<dyn Source>],
    queries: Vec<Query>,
) -> Result<RunSummary> {
    ensure!(!queries.is_empty(), "no query terms given");
    ensure!(!sources.is_empty(), "no sources selected");

    let layout = Layout::new(&config.output_dir);
    let tags: Vec<SourceTag> = sources.iter().map(|s| s.tag()).collect();
    let mut state = RunState::new(queries, config.download.clone(), &tags);
    state
        .create(&layout)
        .context("failed to create run state")?;

    log::info!(
        "Starting run {} ({} queries, sources: {})",
        state.run_id,
        state.queries.len(),
        tags.iter().map(|t| t.name()).collect::<Vec<_>>().join(", ")
    );
    execute(config, sources, state, false)
}

/// Continue run `run_id` from every unfinished source's cursor.
pub fn resume(
    config: &CollectConfig,
    sources: &[Arc<dyn Source>],
    run_id: &str,
) -> Result<RunSummary> {
    let layout = Layout::new(&config.output_dir);
    let mut state = RunState::load(&layout, run_id)?;
    if !state.status.is_resumable() {
        log::info!("Run {run_id} is already {}; nothing to resume", state.status);
        return Ok(RunSummary::new(&state, Duration::ZERO));
    }

    let missing: Vec<_> = state
        .unfinished()
        .filter(|tag| !sources.iter().any(|s| s.tag() == *tag))
        .map(SourceTag::name)
        .collect();
    if !missing.is_empty() {
        bail!(
            "run {run_id} needs sources that are not configured: {}",
            missing.join(", ")
        );
    }

    for progress in state.sources.values_mut() {
        if progress.status != SourceStatus::Exhausted {
            progress.status = SourceStatus::Pending;
            progress.last_error = None;
        }
    }
    log::info!(
        "Resuming run {run_id} (was {}): {}",
        state.status,
        state
            .sources
            .iter()
            .filter(|(_, p)| p.status == SourceStatus::Pending)
            .map(|(tag, p)| format!("{tag} at query {} item {}", p.query_idx, p.next_item))
            .collect::<Vec<_>>()
            .join(", ")
    );
    execute(config, sources, state, true)
}

fn execute(
    config: &CollectConfig,
    sources: &[Arc<dyn Source>],
    mut state: RunState,
    resumed: bool,
) -> Result<RunSummary> {
    let start = Instant::now();
    let layout = Layout::new(&config.output_dir);
    let store = MetadataStore::new(layout.clone());

    let mut log = RunLog::open(&layout, &state.run_id)?;
    log.append(None, LogEvent::RunStarted { resumed })?;
    state.status = RunStatus::Running;
    state.touch();
    state.save(&layout)?;

    let queries = state.queries.clone();
    let download = state.download.clone();
    let workers: Vec<SourceWorker<'_>> = state
        .unfinished()
        .filter_map(|tag| sources.iter().find(|s| s.tag() == tag))
        .map(|source| {
            let progress = &state.sources[&source.tag()];
            SourceWorker {
                source: source.as_ref(),
                queries: &queries,
                ctx: config.source_context(source.as_ref()),
                store: &store,
                download: &download,
                cursor: (progress.query_idx, progress.next_item),
            }
        })
        .collect();
    let lines: BTreeMap<_, _> = workers
        .iter()
        .map(|w| {
            let tag = w.source.tag();
            (tag, config.progress.source_line(tag.name()))
        })
        .collect();

    let mut coordinator = Coordinator::new(state, &store, log, config.cancel.clone(), lines);
    let (tx, rx) = mpsc::sync_channel(CHANNEL_CAPACITY);
    let drained = thread::scope(|s| {
        let spawned = workers.into_iter().try_for_each(|worker| {
            let tx = tx.clone();
            thread::Builder::new()
                .name(format!("collect-{}", worker.source.tag()))
                .spawn_scoped(s, move || worker.run(tx))
                .map(drop)
                .context("failed to spawn worker thread")
        });
        drop(tx);
        match spawned {
            Ok(()) => coordinator.drain(rx),
            Err(e) => {
                // Started workers stop at their next item once rx is gone
                config.cancel.cancel();
                drop(rx);
                Err(e)
            }
        }
    });

    let state = coordinator.finish(drained)?;
    let summary = RunSummary::new(&state, start.elapsed());
    summary.log();
    Ok(summary)
}

/// Outcome of one `collect` or `resume` call.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub sources: BTreeMap<SourceTag, SourceProgress>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn new(state: &RunState, elapsed: Duration) -> Self {
        Self {
            run_id: state.run_id.clone(),
            status: state.status,
            sources: state.sources.clone(),
            elapsed,
        }
    }

    /// Records written across all sources
    pub fn collected(&self) -> usize {
        self.sources.values().map(|p| p.collected).sum()
    }

    pub fn log(&self) {
        log::info!("=== Collection Summary ===");
        log::info!("Run {}: {}", self.run_id, self.status);
        for (tag, p) in &self.sources {
            log::info!(
                "{:<14} {:<9} {} collected, {} excluded, {} rejected, {} skipped, {} failed, {} images",
                tag.name(),
                p.status.to_string(),
                fmt_num(p.collected),
                fmt_num(p.excluded),
                fmt_num(p.rejected),
                fmt_num(p.skipped),
                fmt_num(p.failed),
                fmt_num(p.images),
            );
            if let Some(error) = &p.last_error {
                log::info!("{:<14} last error: {error}", "");
            }
        }
        log::info!("Time: {:.1}s", self.elapsed.as_secs_f64());
        if self.status.is_resumable() && self.status != RunStatus::Running {
            log::info!("Continue with `cumulus resume {}`", self.run_id);
        }
    }
}
