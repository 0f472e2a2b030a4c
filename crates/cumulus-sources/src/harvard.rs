//! Harvard Art Museums API (`/object`). Search pages carry full records.

use std::time::Duration;

use cumulus_core::{FetchError, Field, Query, Record, SourceTag, get_json, http_client};
use serde_json::Value;

use crate::normalize::{first_text, number, object_id, text, texts_by_key, url, url_of};
use crate::source::{Hit, SearchPage, Source, SourceSettings};

pub const BASE_URL: &str = "https://api.harvardartmuseums.org";

const PAGE_SIZE: usize = 100;
const MAX_IMAGES: usize = 5;

pub struct HarvardSource {
    base_url: String,
    settings: SourceSettings,
}

impl HarvardSource {
    pub fn new(settings: &SourceSettings) -> Self {
        Self {
            base_url: settings.base_url_or(BASE_URL),
            settings: settings.clone(),
        }
    }
}

fn parse_page(body: Value) -> Result<SearchPage, FetchError> {
    let total = number(&body, "/info/totalrecords").map(|n| n as usize);
    let records = match body {
        Value::Object(mut map) => map.remove("records"),
        _ => None,
    };
    let hits = match records {
        Some(Value::Array(records)) => records.into_iter().map(Hit::Full).collect(),
        None | Some(Value::Null) => Vec::new(),
        Some(_) => return Err(FetchError::Schema("harvard: records is not a list".into())),
    };
    Ok(SearchPage { hits, total })
}

impl Source for HarvardSource {
    fn tag(&self) -> SourceTag {
        SourceTag::Harvard
    }

    fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    fn timeout(&self) -> Duration {
        self.settings.timeout
    }

    fn fetch_page(&self, query: &Query, page: usize) -> Result<SearchPage, FetchError> {
        let key = self.settings.require_key(self.tag())?;
        let page_no = (page + 1).to_string();
        let size = PAGE_SIZE.to_string();
        let body = get_json(
            http_client()
                .get(format!("{}/object", self.base_url))
                .query(&[
                    ("apikey", key),
                    ("q", query.keyword()),
                    ("hasimage", "1"),
                    ("page", page_no.as_str()),
                    ("size", size.as_str()),
                ])
                .timeout(self.settings.timeout),
        )?;
        parse_page(body)
    }

    fn normalize(&self, raw: &Value) -> Record {
        let mut record = Record::new(SourceTag::Harvard, object_id(raw, "/id"), raw.clone());
        record.title = text(raw, "/title");
        record.creator = creator(raw);
        record.date = text(raw, "/dated");
        record.medium = first_text(raw, &["/medium", "/technique"]);
        record.collection = first_text(raw, &["/division", "/department"]);
        record.rights = first_text(raw, &["/copyright", "/creditline"]);
        record.tags = [
            text(raw, "/classification"),
            text(raw, "/culture"),
            text(raw, "/period"),
        ]
        .into_iter()
        .filter_map(|f| f.as_known().cloned())
        .chain(texts_by_key(raw, "/worktypes", "worktype"))
        .collect();

        if let Some(u) = url(raw, "/primaryimageurl") {
            record.images.insert("primary".into(), u);
        }
        let images = raw
            .get("images")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for (i, u) in images
            .iter()
            .filter_map(|img| url_of(img.get("baseimageurl")))
            .take(MAX_IMAGES)
            .enumerate()
        {
            record.images.insert(format!("image_{}", i + 1), u);
        }
        record
    }
}

/// First person with an artist role, else the first person listed.
fn creator(raw: &Value) -> Field<String> {
    let people = raw
        .get("people")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let artist = people.iter().find(|p| {
        p.get("role")
            .and_then(Value::as_str)
            .is_some_and(|r| r.eq_ignore_ascii_case("artist"))
    });
    artist
        .or(people.first())
        .map(|p| text(p, "/name"))
        .unwrap_or_default()
}
