//! `cumulus collect` and `cumulus resume`

use std::collections::BTreeSet;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use clap::Args;
use cumulus_collect::{CollectConfig, RunSummary};
use cumulus_core::progress::fmt_num;
use cumulus_core::{CancelFlag, Query, SharedProgress, SourceTag};
use cumulus_sources::Source;
use cumulus_store::{RunState, RunStatus};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct CollectArgs {
    /// Search terms, one query each (comma-separated; default: [query] terms)
    #[arg(short, long, value_delimiter = ',')]
    pub terms: Vec<String>,

    /// Exclusion terms applied to every query (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Sources to query (comma-separated; default: every usable source)
    #[arg(short, long, value_delimiter = ',', value_parser = parse_source)]
    pub sources: Vec<SourceTag>,

    /// Items examined per source and term
    #[arg(short = 'n', long)]
    pub max: Option<usize>,

    /// Store metadata only
    #[arg(long)]
    pub no_images: bool,

    /// Resolution labels to download (comma-separated; default: all)
    #[arg(long, value_delimiter = ',')]
    pub labels: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ResumeArgs {
    /// Run to resume (default: the latest run)
    pub run_id: Option<String>,
}

fn parse_source(s: &str) -> Result<SourceTag, String> {
    match SourceTag::from_name(s.trim()) {
        Some(SourceTag::Manual) => {
            Err("manual records are added with `cumulus manual import`".to_string())
        }
        Some(tag) => Ok(tag),
        None => Err(format!(
            "unknown source '{s}' (expected one of: {})",
            SourceTag::institutions()
                .iter()
                .map(|t| t.name())
                .collect::<Vec<_>>()
                .join(", ")
        )),
    }
}

/// One query per term, each carrying every exclusion and the per-source cap.
fn build_queries(terms: &[String], exclude: &[String], max: Option<usize>) -> Vec<Query> {
    terms
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|term| {
            let query = Query::new(term).exclude_all(exclude.iter().map(|e| e.trim()));
            match max {
                Some(n) => query.default_limit(n),
                None => query,
            }
        })
        .collect()
}

fn build_sources(config: &Config, tags: &[SourceTag]) -> Vec<Arc<dyn Source>> {
    tags.iter()
        .filter_map(|&tag| cumulus_sources::build(tag, &config.settings_for(tag)))
        .map(Arc::from)
        .collect()
}

/// First signal: cancel between items. Second signal: exit immediately.
fn setup_signal_handler(cancel: &CancelFlag) -> Result<()> {
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        let flag: Arc<AtomicBool> = cancel.as_atomic();
        // SAFETY: AtomicBool::swap and process::exit are async-signal-safe
        unsafe {
            signal_hook::low_level::register(signal, move || {
                if flag.swap(true, Ordering::Relaxed) {
                    std::process::exit(130);
                }
            })
        }
        .with_context(|| format!("failed to register handler for signal {signal}"))?;
    }
    Ok(())
}

fn collect_config(config: &Config, progress: &SharedProgress) -> Result<CollectConfig> {
    let cancel = CancelFlag::new();
    setup_signal_handler(&cancel)?;
    Ok(CollectConfig {
        output_dir: config.output.dir.clone(),
        retry: config.retry_policy(),
        rates: config.rates(),
        download: config.download_options(),
        cancel,
        progress: Arc::clone(progress),
    })
}

pub fn collect(args: CollectArgs, config: &Config, progress: &SharedProgress) -> Result<ExitCode> {
    let terms = if args.terms.is_empty() {
        &config.query.terms
    } else {
        &args.terms
    };
    let exclude = if args.exclude.is_empty() {
        &config.query.exclude
    } else {
        &args.exclude
    };
    let queries = build_queries(terms, exclude, args.max.or(config.query.max_results));
    if queries.is_empty() {
        bail!("no search terms: pass --terms or set [query] terms");
    }

    let tags = if args.sources.is_empty() {
        config.default_sources()
    } else {
        args.sources.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
    };
    let sources = build_sources(config, &tags);

    let mut collect_config = collect_config(config, progress)?;
    if args.no_images {
        collect_config.download.images = false;
    }
    if !args.labels.is_empty() {
        collect_config.download.labels = Some(args.labels.iter().cloned().collect());
    }

    log::info!("Collecting into {}", config.output.dir.display());
    let summary = cumulus_collect::collect(&collect_config, &sources, queries)?;
    Ok(report(&summary))
}

pub fn resume(args: ResumeArgs, config: &Config, progress: &SharedProgress) -> Result<ExitCode> {
    let layout = super::layout(config);
    let run_id = match args.run_id {
        Some(id) => id,
        None => RunState::latest(&layout)?
            .map(|run| run.run_id)
            .with_context(|| format!("no runs under {}", layout.runs_dir().display()))?,
    };
    let state = RunState::load(&layout, &run_id)?;
    let tags: Vec<_> = state.sources.keys().copied().collect();
    let sources = build_sources(config, &tags);

    let collect_config = collect_config(config, progress)?;
    let summary = cumulus_collect::resume(&collect_config, &sources, &run_id)?;
    Ok(report(&summary))
}

/// Print the per-source table and map the run status to an exit code.
fn report(summary: &RunSummary) -> ExitCode {
    let mut table = super::table(&[
        "Source",
        "Status",
        "Cursor",
        "Collected",
        "Excluded",
        "Rejected",
        "Skipped",
        "Failed",
        "Images",
    ]);
    for (tag, p) in &summary.sources {
        table.add_row(vec![
            tag.name().to_string(),
            p.status.to_string(),
            format!("q{}#{}", p.query_idx, p.next_item),
            fmt_num(p.collected),
            fmt_num(p.excluded),
            fmt_num(p.rejected),
            fmt_num(p.skipped),
            fmt_num(p.failed),
            fmt_num(p.images),
        ]);
    }
    eprintln!("\n{table}");
    for (tag, p) in &summary.sources {
        if let Some(error) = &p.last_error {
            eprintln!("  {tag}: {error}");
        }
    }
    eprintln!(
        "Run {} {} in {:.1}s",
        summary.run_id,
        summary.status,
        summary.elapsed.as_secs_f64()
    );

    ExitCode::from(exit_status(summary))
}

/// Exit status for a finished run: 0 with something kept, 130 on cancel,
/// 2 when nothing finished.
fn exit_status(summary: &RunSummary) -> u8 {
    match summary.status {
        RunStatus::Completed => 0,
        RunStatus::Partial => {
            log::warn!(
                "some sources failed; fix the cause and run `cumulus resume {}`",
                summary.run_id
            );
            0
        }
        RunStatus::Aborted => 130,
        RunStatus::Failed => {
            log::error!(
                "no source finished; fix the cause and run `cumulus resume {}`",
                summary.run_id
            );
            2
        }
        RunStatus::Running => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries_per_term_with_shared_exclusions() {
        let queries = build_queries(
            &["cloud".into(), " ".into(), "sky".into()],
            &["saint-cloud".into()],
            Some(50),
        );
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[1].keyword(), "sky");
        assert_eq!(queries[0].exclusions(), ["saint-cloud"]);
        assert_eq!(queries[0].limit_for(SourceTag::Harvard), Some(50));
    }

    fn summary(status: RunStatus) -> RunSummary {
        RunSummary {
            run_id: "20260101T000000Z-0a1b2c3d".into(),
            status,
            sources: Default::default(),
            elapsed: std::time::Duration::ZERO,
        }
    }

    #[test]
    fn exit_codes_follow_run_status() {
        assert_eq!(exit_status(&summary(RunStatus::Completed)), 0);
        assert_eq!(exit_status(&summary(RunStatus::Partial)), 0);
        assert_eq!(exit_status(&summary(RunStatus::Aborted)), 130);
        assert_eq!(exit_status(&summary(RunStatus::Failed)), 2);
    }

    #[test]
    fn source_names_parse() {
        assert_eq!(parse_source("met"), Ok(SourceTag::Met));
        assert_eq!(parse_source("cooper_hewitt"), Ok(SourceTag::CooperHewitt));
        assert!(parse_source("manual").is_err());
        assert!(parse_source("louvre").unwrap_err().contains("smithsonian"));
    }
}
