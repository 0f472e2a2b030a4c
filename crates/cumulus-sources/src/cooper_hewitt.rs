//! Cooper Hewitt, Smithsonian Design Museum REST API
//! (`cooperhewitt.search.objects`).
//!
//! The API answers HTTP 200 with `"stat": "error"` on failures, including a
//! bad access token, so the envelope is checked before the objects.

use std::time::Duration;

use cumulus_core::{FetchError, Field, Query, Record, SourceTag, get_json, http_client};
use serde_json::Value;

use crate::normalize::{first_text, number, object_id, text, texts_by_key, url_of};
use crate::source::{Hit, SearchPage, Source, SourceSettings};

pub const BASE_URL: &str = "https://api.collection.cooperhewitt.org/rest";

const PAGE_SIZE: usize = 100;

/// Image size codes mapped to resolution labels, largest first
const SIZES: &[(&str, &str)] = &[("b", "large"), ("z", "medium"), ("n", "small")];

pub struct CooperHewittSource {
    base_url: String,
    settings: SourceSettings,
}

impl CooperHewittSource {
    pub fn new(settings: &SourceSettings) -> Self {
        Self {
            base_url: settings.base_url_or(BASE_URL),
            settings: settings.clone(),
        }
    }
}

fn parse_page(body: Value) -> Result<SearchPage, FetchError> {
    if body.get("stat").and_then(Value::as_str) != Some("ok") {
        let message = text(&body, "/error/message")
            .as_known()
            .cloned()
            .unwrap_or_else(|| "request failed".into());
        if message.to_lowercase().contains("token") {
            return Err(FetchError::Authentication {
                status: None,
                message,
            });
        }
        return Err(FetchError::Schema(format!("cooper_hewitt: {message}")));
    }
    let total = number(&body, "/total").map(|n| n as usize);
    let hits = match body {
        Value::Object(mut map) => match map.remove("objects") {
            Some(Value::Array(objects)) => objects.into_iter().map(Hit::Full).collect(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    Ok(SearchPage { hits, total })
}

impl Source for CooperHewittSource {
    fn tag(&self) -> SourceTag {
        SourceTag::CooperHewitt
    }

    fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    fn timeout(&self) -> Duration {
        self.settings.timeout
    }

    fn fetch_page(&self, query: &Query, page: usize) -> Result<SearchPage, FetchError> {
        let token = self.settings.require_key(self.tag())?;
        let page_no = (page + 1).to_string();
        let per_page = PAGE_SIZE.to_string();
        let body = get_json(
            http_client()
                .get(format!("{}/", self.base_url))
                .query(&[
                    ("method", "cooperhewitt.search.objects"),
                    ("access_token", token),
                    ("query", query.keyword()),
                    ("has_images", "1"),
                    ("page", page_no.as_str()),
                    ("per_page", per_page.as_str()),
                ])
                .timeout(self.settings.timeout),
        )?;
        parse_page(body)
    }

    fn normalize(&self, raw: &Value) -> Record {
        let mut record = Record::new(SourceTag::CooperHewitt, object_id(raw, "/id"), raw.clone());
        record.title = first_text(raw, &["/title", "/title_raw"]);
        record.creator = texts_by_key(raw, "/participants", "person_name")
            .into_iter()
            .next()
            .into();
        record.date = text(raw, "/date");
        record.medium = text(raw, "/medium");
        record.collection = first_text(raw, &["/department", "/department_id"]);
        record.rights = match raw.get("has_no_known_copyright") {
            Some(Value::Number(n)) if n.as_u64() == Some(1) => {
                Field::Known("No known copyright".into())
            }
            _ => text(raw, "/creditline"),
        };
        record.tags = [text(raw, "/type"), text(raw, "/period_name")]
            .into_iter()
            .filter_map(|f| f.as_known().cloned())
            .collect();

        // First image only; every size of it becomes one label.
        if let Some(image) = raw
            .get("images")
            .and_then(Value::as_array)
            .and_then(|images| images.first())
        {
            for (code, label) in SIZES {
                if let Some(u) = url_of(image.pointer(&format!("/{code}/url"))) {
                    record.images.insert((*label).to_string(), u);
                }
            }
        }
        record
    }
}
