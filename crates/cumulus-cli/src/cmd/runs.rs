//! `cumulus runs` - list runs and their cursors

use std::process::ExitCode;

use anyhow::Result;
use comfy_table::{Cell, Color};
use cumulus_core::progress::fmt_num;
use cumulus_store::{RunState, RunStatus};

use crate::config::Config;

fn status_color(status: RunStatus) -> Color {
    match status {
        RunStatus::Completed => Color::Green,
        RunStatus::Partial | RunStatus::Aborted => Color::Yellow,
        RunStatus::Failed => Color::Red,
        RunStatus::Running => Color::Blue,
    }
}

pub fn run(config: &Config) -> Result<ExitCode> {
    let layout = super::layout(config);
    let runs = RunState::list(&layout)?;
    if runs.is_empty() {
        eprintln!("No runs under {}.", layout.runs_dir().display());
        return Ok(ExitCode::SUCCESS);
    }

    let mut table = super::table(&[
        "Run", "Status", "Created", "Queries", "Source", "State", "Cursor", "Collected", "Failed",
    ]);
    for run in &runs {
        let queries = run
            .queries
            .iter()
            .map(|q| q.keyword())
            .collect::<Vec<_>>()
            .join(", ");
        for (i, (tag, p)) in run.sources.iter().enumerate() {
            let (id, status, created, queries) = if i == 0 {
                (
                    Cell::new(&run.run_id),
                    Cell::new(run.status).fg(status_color(run.status)),
                    Cell::new(run.created_at.format("%Y-%m-%d %H:%M")),
                    Cell::new(&queries),
                )
            } else {
                (Cell::new(""), Cell::new(""), Cell::new(""), Cell::new(""))
            };
            let state = match &p.last_error {
                Some(e) => format!("{} ({e})", p.status),
                None => p.status.to_string(),
            };
            table.add_row(vec![
                id,
                status,
                created,
                queries,
                Cell::new(tag.name()),
                Cell::new(state),
                Cell::new(format!("q{}#{}", p.query_idx, p.next_item)),
                Cell::new(fmt_num(p.collected)),
                Cell::new(fmt_num(p.failed)),
            ]);
        }
    }
    eprintln!("\n{table}");
    Ok(ExitCode::SUCCESS)
}
