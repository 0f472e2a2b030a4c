//! Rijksmuseum collection API.
//!
//! Search results are summaries; the detail call (`/collection/{objectNumber}`)
//! carries dating and materials, so hits are resolved one by one.

use std::time::Duration;

use cumulus_core::{FetchError, Field, Query, Record, SourceTag, get_json, http_client};
use serde_json::Value;

use crate::normalize::{first_text, number, object_id, text, texts, url};
use crate::source::{Hit, SearchPage, Source, SourceSettings};

pub const BASE_URL: &str = "https://www.rijksmuseum.nl/api/en";

const PAGE_SIZE: usize = 100;

pub struct RijksmuseumSource {
    base_url: String,
    settings: SourceSettings,
}

impl RijksmuseumSource {
    pub fn new(settings: &SourceSettings) -> Self {
        Self {
            base_url: settings.base_url_or(BASE_URL),
            settings: settings.clone(),
        }
    }
}

fn parse_page(body: &Value) -> Result<SearchPage, FetchError> {
    let total = number(body, "/count").map(|n| n as usize);
    let hits = match body.get("artObjects") {
        Some(Value::Array(objects)) => objects
            .iter()
            .map(|o| match text(o, "/objectNumber") {
                Field::Known(number) => Hit::Ref(number),
                Field::Unknown => Hit::Full(o.clone()),
            })
            .collect(),
        None | Some(Value::Null) => Vec::new(),
        Some(_) => {
            return Err(FetchError::Schema(
                "rijksmuseum: artObjects is not a list".into(),
            ));
        }
    };
    Ok(SearchPage { hits, total })
}

impl Source for RijksmuseumSource {
    fn tag(&self) -> SourceTag {
        SourceTag::Rijksmuseum
    }

    fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    fn timeout(&self) -> Duration {
        self.settings.timeout
    }

    fn fetch_page(&self, query: &Query, page: usize) -> Result<SearchPage, FetchError> {
        let key = self.settings.require_key(self.tag())?;
        let p = (page + 1).to_string();
        let ps = PAGE_SIZE.to_string();
        let body = get_json(
            http_client()
                .get(format!("{}/collection", self.base_url))
                .query(&[
                    ("key", key),
                    ("q", query.keyword()),
                    ("format", "json"),
                    ("imgonly", "True"),
                    ("p", p.as_str()),
                    ("ps", ps.as_str()),
                ])
                .timeout(self.settings.timeout),
        )?;
        parse_page(&body)
    }

    fn fetch_item(&self, hit: Hit) -> Result<Value, FetchError> {
        let object_number = match hit {
            Hit::Full(raw) => return Ok(raw),
            Hit::Ref(id) => id,
        };
        let key = self.settings.require_key(self.tag())?;
        let mut body = get_json(
            http_client()
                .get(format!("{}/collection/{object_number}", self.base_url))
                .query(&[("key", key), ("format", "json")])
                .timeout(self.settings.timeout),
        )?;
        match body.get_mut("artObject").map(Value::take) {
            Some(obj @ Value::Object(_)) => Ok(obj),
            _ => Err(FetchError::Schema(format!(
                "rijksmuseum: no artObject for {object_number}"
            ))),
        }
    }

    fn normalize(&self, raw: &Value) -> Record {
        let mut record = Record::new(
            SourceTag::Rijksmuseum,
            object_id(raw, "/objectNumber"),
            raw.clone(),
        );
        record.title = first_text(raw, &["/title", "/longTitle"]);
        record.creator = first_text(raw, &["/principalOrFirstMaker", "/principalMaker"]);
        record.date = first_text(raw, &["/dating/presentingDate", "/dating/sortingDate"]);
        record.medium = first_text(raw, &["/physicalMedium", "/materials"]);
        record.collection = text(raw, "/objectCollection");
        record.rights = text(raw, "/copyrightHolder");
        record.tags = texts(raw, "/objectTypes")
            .into_iter()
            .chain(texts(raw, "/techniques"))
            .collect();

        if let Some(u) = url(raw, "/webImage/url") {
            record.images.insert("full".into(), u);
        }
        if let Some(u) = url(raw, "/headerImage/url") {
            record.images.insert("thumbnail".into(), u);
        }
        record
    }
}
