//! Europeana Search API. Items come back in full; `start` is 1-based.

use std::time::Duration;

use cumulus_core::{FetchError, Query, Record, SourceTag, get_json, http_client};
use serde_json::Value;

use crate::normalize::{first_text, number, object_id, text, texts, url};
use crate::source::{Hit, SearchPage, Source, SourceSettings};

pub const BASE_URL: &str = "https://api.europeana.eu/record/v2";

const PAGE_SIZE: usize = 100;

/// `start`/`rows` paging stops here; deeper results need cursor paging
const MAX_RESULTS: usize = 1000;

pub struct EuropeanaSource {
    base_url: String,
    settings: SourceSettings,
}

impl EuropeanaSource {
    pub fn new(settings: &SourceSettings) -> Self {
        Self {
            base_url: settings.base_url_or(BASE_URL),
            settings: settings.clone(),
        }
    }
}

fn parse_page(body: Value) -> Result<SearchPage, FetchError> {
    if body.get("success").and_then(Value::as_bool) == Some(false) {
        let message = text(&body, "/error")
            .as_known()
            .cloned()
            .unwrap_or_else(|| "request failed".into());
        return Err(FetchError::Schema(format!("europeana: {message}")));
    }
    let total = number(&body, "/totalResults").map(|n| (n as usize).min(MAX_RESULTS));
    let hits = match body {
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => items.into_iter().map(Hit::Full).collect(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    Ok(SearchPage { hits, total })
}

impl Source for EuropeanaSource {
    fn tag(&self) -> SourceTag {
        SourceTag::Europeana
    }

    fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    fn requests_per_second(&self) -> f64 {
        2.0
    }

    fn timeout(&self) -> Duration {
        self.settings.timeout
    }

    fn fetch_page(&self, query: &Query, page: usize) -> Result<SearchPage, FetchError> {
        let key = self.settings.require_key(self.tag())?;
        if page * PAGE_SIZE >= MAX_RESULTS {
            log::debug!("europeana: page {page} is past the {MAX_RESULTS}-result window");
            return Ok(SearchPage {
                hits: Vec::new(),
                total: Some(MAX_RESULTS),
            });
        }
        let start = (page * PAGE_SIZE + 1).to_string();
        let rows = PAGE_SIZE.to_string();
        let body = get_json(
            http_client()
                .get(format!("{}/search.json", self.base_url))
                .query(&[
                    ("wskey", key),
                    ("query", query.keyword()),
                    ("media", "true"),
                    ("thumbnail", "true"),
                    ("reusability", "open"),
                    ("start", start.as_str()),
                    ("rows", rows.as_str()),
                ])
                .timeout(self.settings.timeout),
        )?;
        parse_page(body)
    }

    fn normalize(&self, raw: &Value) -> Record {
        let id = object_id(raw, "/id").trim_start_matches('/').to_string();
        let mut record = Record::new(SourceTag::Europeana, id, raw.clone());
        record.title = text(raw, "/title");
        record.creator = text(raw, "/dcCreator");
        record.date = first_text(raw, &["/year", "/timestamp_created"]);
        record.medium = first_text(raw, &["/dcFormat", "/type"]);
        record.collection = first_text(raw, &["/dataProvider", "/provider"]);
        record.rights = text(raw, "/rights");
        record.tags = texts(raw, "/dcSubject")
            .into_iter()
            .chain(texts(raw, "/edmConceptPrefLabel"))
            .collect();

        if let Some(u) = url(raw, "/edmIsShownBy/0") {
            record.images.insert("full".into(), u);
        }
        if let Some(u) = url(raw, "/edmPreview/0") {
            record.images.insert("preview".into(), u);
        }
        record
    }
}
