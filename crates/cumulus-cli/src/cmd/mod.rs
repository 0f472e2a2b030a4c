pub mod archive;
pub mod collect;
pub mod manual;
pub mod runs;
pub mod validate;

use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use cumulus_core::SourceTag;
use cumulus_store::Layout;

use crate::config::Config;

/// Table with the house style and a cyan header row
pub fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h).fg(Color::Cyan))
                .collect::<Vec<_>>(),
        );
    table
}

/// Print a key-value summary table on stderr
pub fn print_summary(title: &str, rows: &[(&str, String)]) {
    let mut table = table(&[title, "Value"]);
    for (label, value) in rows {
        table.add_row(vec![Cell::new(label), Cell::new(value)]);
    }
    eprintln!("\n{table}");
}

pub fn layout(config: &Config) -> Layout {
    Layout::new(&config.output.dir)
}

pub fn show_config(config: &Config) {
    let mut table = table(&["Setting", "Value"]);
    table.add_row(vec![
        "Output directory".to_string(),
        config.output.dir.display().to_string(),
    ]);
    table.add_row(vec![
        "Read timeout".to_string(),
        format!("{}s", config.http.read_timeout),
    ]);
    table.add_row(vec![
        "Retries".to_string(),
        format!(
            "{} (backoff {}ms x 2^n)",
            config.http.max_retries, config.http.backoff_base_ms
        ),
    ]);
    table.add_row(vec![
        "Terms".to_string(),
        or_dash(config.query.terms.join(", ")),
    ]);
    table.add_row(vec![
        "Exclude".to_string(),
        or_dash(config.query.exclude.join(", ")),
    ]);
    table.add_row(vec![
        "Max results".to_string(),
        config
            .query
            .max_results
            .map_or_else(|| "unlimited".to_string(), |n| n.to_string()),
    ]);
    table.add_row(vec![
        "Images".to_string(),
        match (&config.download.images, &config.download.labels) {
            (false, _) => "off".to_string(),
            (true, None) => "all labels".to_string(),
            (true, Some(labels)) => labels.join(", "),
        },
    ]);

    let rates = config.rates();
    for &tag in SourceTag::institutions() {
        let settings = config.settings_for(tag);
        let key = if !cumulus_sources::requires_key(tag) {
            "not needed"
        } else if settings.api_key.is_some() {
            "configured"
        } else {
            "not set"
        };
        let mut value = format!("key {key}");
        if let Some(rate) = rates.get(&tag) {
            value.push_str(&format!(", {rate} req/s"));
        }
        if let Some(url) = &settings.base_url {
            value.push_str(&format!(", {url}"));
        }
        table.add_row(vec![tag.name().to_string(), value]);
    }

    eprintln!("\n{table}");
}

fn or_dash(s: String) -> String {
    if s.is_empty() { "-".to_string() } else { s }
}
