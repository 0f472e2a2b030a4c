//! The Metropolitan Museum of Art Collection API.
//!
//! Search returns only object ids, so every item is a reference resolved
//! through `/objects/{id}`. The id list for a keyword is fetched once and
//! paged locally.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cumulus_core::{FetchError, Field, Query, Record, SourceTag, get_json, http_client};
use serde_json::Value;

use crate::normalize::{number, text, texts_by_key, url, url_of};
use crate::source::{Hit, SearchPage, Source, SourceSettings};

pub const BASE_URL: &str = "https://collectionapi.metmuseum.org/public/collection/v1";

const PAGE_SIZE: usize = 100;
const MAX_ADDITIONAL_IMAGES: usize = 5;

pub struct MetSource {
    base_url: String,
    timeout: Duration,
    ids: Mutex<HashMap<String, Arc<Vec<String>>>>,
}

impl MetSource {
    pub fn new(settings: &SourceSettings) -> Self {
        Self {
            base_url: settings.base_url_or(BASE_URL),
            timeout: settings.timeout,
            ids: Mutex::new(HashMap::new()),
        }
    }

    /// All matching object ids for `keyword`, cached after the first call.
    fn search_ids(&self, keyword: &str) -> Result<Arc<Vec<String>>, FetchError> {
        if let Some(ids) = self.lock_ids().get(keyword) {
            return Ok(Arc::clone(ids));
        }
        let body = get_json(
            http_client()
                .get(format!("{}/search", self.base_url))
                .query(&[("q", keyword), ("hasImages", "true")])
                .timeout(self.timeout),
        )?;
        let ids = Arc::new(parse_search(&body)?);
        log::debug!("met_museum: {} ids for '{keyword}'", ids.len());
        self.lock_ids()
            .insert(keyword.to_string(), Arc::clone(&ids));
        Ok(ids)
    }

    fn lock_ids(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Vec<String>>>> {
        self.ids.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// `objectIDs` is `null` when nothing matches.
fn parse_search(body: &Value) -> Result<Vec<String>, FetchError> {
    match body.get("objectIDs") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(ids)) => Ok(ids
            .iter()
            .filter_map(|id| match id {
                Value::Number(n) => Some(n.to_string()),
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                _ => None,
            })
            .collect()),
        Some(other) => Err(FetchError::Schema(format!(
            "met_museum: objectIDs is not a list: {other}"
        ))),
    }
}

impl Source for MetSource {
    fn tag(&self) -> SourceTag {
        SourceTag::Met
    }

    fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    fn requests_per_second(&self) -> f64 {
        10.0
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn fetch_page(&self, query: &Query, page: usize) -> Result<SearchPage, FetchError> {
        let ids = self.search_ids(query.keyword())?;
        let hits = ids
            .iter()
            .skip(page * PAGE_SIZE)
            .take(PAGE_SIZE)
            .map(|id| Hit::Ref(id.clone()))
            .collect();
        Ok(SearchPage {
            hits,
            total: Some(ids.len()),
        })
    }

    fn fetch_item(&self, hit: Hit) -> Result<Value, FetchError> {
        match hit {
            Hit::Full(raw) => Ok(raw),
            Hit::Ref(id) => get_json(
                http_client()
                    .get(format!("{}/objects/{id}", self.base_url))
                    .timeout(self.timeout),
            ),
        }
    }

    fn normalize(&self, raw: &Value) -> Record {
        let id = number(raw, "/objectID")
            .map(|n| n.to_string())
            .unwrap_or_else(|| crate::normalize::object_id(raw, "/objectID"));
        let mut record = Record::new(SourceTag::Met, id, raw.clone());
        record.title = text(raw, "/title");
        record.creator = text(raw, "/artistDisplayName");
        record.date = text(raw, "/objectDate");
        record.medium = text(raw, "/medium");
        record.collection = text(raw, "/department");
        record.rights = rights(raw);
        record.tags = texts_by_key(raw, "/tags", "term")
            .into_iter()
            .chain(text(raw, "/classification").as_known().cloned())
            .collect();

        if let Some(u) = url(raw, "/primaryImage") {
            record.images.insert("primary".into(), u);
        }
        if let Some(u) = url(raw, "/primaryImageSmall") {
            record.images.insert("small".into(), u);
        }
        let additional = raw
            .get("additionalImages")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for (i, u) in additional
            .iter()
            .filter_map(|v| url_of(Some(v)))
            .take(MAX_ADDITIONAL_IMAGES)
            .enumerate()
        {
            record.images.insert(format!("additional_{}", i + 1), u);
        }
        record
    }
}

fn rights(raw: &Value) -> Field<String> {
    match raw.get("isPublicDomain").and_then(Value::as_bool) {
        Some(true) => Field::Known("Public Domain".into()),
        _ => text(raw, "/rightsAndReproduction"),
    }
}
