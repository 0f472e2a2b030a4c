//! Smithsonian Open Access API (`/search`). `start` is 0-based.
//!
//! Rows from the natural-history units (`NMNH*`) are specimens rather than
//! artworks and are rejected, as are rows without a downloadable image.

use std::time::Duration;

use cumulus_core::{FetchError, Field, Query, Record, SourceTag, get_json, http_client};
use serde_json::Value;

use crate::normalize::{first_text, number, object_id, text, text_of, texts};
use crate::source::{Hit, SearchPage, Source, SourceSettings};

pub const BASE_URL: &str = "https://api.si.edu/openaccess/api/v1.0";

const PAGE_SIZE: usize = 100;
const IDS_HOST: &str = "https://ids.si.edu";

pub struct SmithsonianSource {
    base_url: String,
    settings: SourceSettings,
}

impl SmithsonianSource {
    pub fn new(settings: &SourceSettings) -> Self {
        Self {
            base_url: settings.base_url_or(BASE_URL),
            settings: settings.clone(),
        }
    }
}

fn parse_page(mut body: Value) -> Result<SearchPage, FetchError> {
    let total = number(&body, "/response/rowCount").map(|n| n as usize);
    let hits = match body.pointer_mut("/response/rows").map(Value::take) {
        Some(Value::Array(rows)) => rows.into_iter().map(Hit::Full).collect(),
        None | Some(Value::Null) => Vec::new(),
        Some(_) => {
            return Err(FetchError::Schema(
                "smithsonian: response.rows is not a list".into(),
            ));
        }
    };
    Ok(SearchPage { hits, total })
}

/// Media entry served by the image delivery service, with an absolute URL.
fn downloadable_media(raw: &Value) -> Option<(&Value, String)> {
    raw.pointer("/content/descriptiveNonRepeating/online_media/media")?
        .as_array()?
        .iter()
        .find_map(|media| {
            let content = text_of(media.get("content")).as_known()?.clone();
            let served = ["deliveryService", "ids", "iiif"]
                .iter()
                .any(|marker| content.contains(marker));
            served.then(|| (media, absolute(content)))
        })
}

fn absolute(url: String) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url
    } else {
        format!("{IDS_HOST}/{}", url.trim_start_matches('/'))
    }
}

impl Source for SmithsonianSource {
    fn tag(&self) -> SourceTag {
        SourceTag::Smithsonian
    }

    fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    fn timeout(&self) -> Duration {
        self.settings.timeout
    }

    fn fetch_page(&self, query: &Query, page: usize) -> Result<SearchPage, FetchError> {
        let key = self.settings.require_key(self.tag())?;
        let q = format!("{} AND online_media_type:Images", query.keyword());
        let start = (page * PAGE_SIZE).to_string();
        let rows = PAGE_SIZE.to_string();
        let body = get_json(
            http_client()
                .get(format!("{}/search", self.base_url))
                .query(&[
                    ("api_key", key),
                    ("q", q.as_str()),
                    ("start", start.as_str()),
                    ("rows", rows.as_str()),
                ])
                .timeout(self.settings.timeout),
        )?;
        parse_page(body)
    }

    fn normalize(&self, raw: &Value) -> Record {
        let mut record = Record::new(SourceTag::Smithsonian, object_id(raw, "/id"), raw.clone());
        record.title = first_text(raw, &["/title", "/content/descriptiveNonRepeating/title/content"]);
        record.creator = text(raw, "/content/freetext/name/0/content");
        record.date = text(raw, "/content/freetext/date/0/content");
        record.medium = text(raw, "/content/freetext/physicalDescription/0/content");
        record.collection = first_text(
            raw,
            &["/content/descriptiveNonRepeating/data_source", "/unitCode"],
        );
        record.tags = texts(raw, "/content/indexedStructured/topic")
            .into_iter()
            .chain(texts(raw, "/content/indexedStructured/object_type"))
            .collect();

        let media = downloadable_media(raw);
        record.rights = media
            .as_ref()
            .map(|(m, _)| text(m, "/usage/access"))
            .unwrap_or_default()
            .or(text(raw, "/content/descriptiveNonRepeating/metadata_usage/access"));
        if let Some((m, full)) = media {
            record.images.insert("full".into(), full);
            if let Field::Known(thumb) = text(m, "/thumbnail") {
                record.images.insert("thumbnail".into(), absolute(thumb));
            }
        }
        record
    }

    fn reject(&self, raw: &Value) -> Option<String> {
        if let Field::Known(unit) = text(raw, "/unitCode") {
            if unit.contains("NMNH") {
                return Some(format!("natural history unit {unit}"));
            }
        }
        if downloadable_media(raw).is_none() {
            return Some("no downloadable image".into());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(unit: &str) -> Value {
        json!({
            "id": "edanmdm-saam_1929.6.104",
            "title": "Study of Clouds",
            "unitCode": unit,
            "content": {
                "descriptiveNonRepeating": {
                    "data_source": "Smithsonian American Art Museum",
                    "metadata_usage": {"access": "CC0"},
                    "online_media": {"media": [{
                        "type": "Images",
                        "content": "https://ids.si.edu/ids/deliveryService?id=SAAM-1929.6.104_1",
                        "thumbnail": "https://ids.si.edu/ids/deliveryService?id=SAAM-1929.6.104_1&max=200",
                        "usage": {"access": "CC0"}
                    }]}
                },
                "freetext": {
                    "name": [{"label": "Artist", "content": "Thomas Moran"}],
                    "date": [{"label": "Date", "content": "1879"}],
                    "physicalDescription": [{"label": "Medium", "content": "watercolor on paper"}]
                },
                "indexedStructured": {"topic": ["Landscape", "Cloud"]}
            }
        })
    }

    #[test]
    fn normalizes_row() {
        let source = SmithsonianSource::new(&SourceSettings::default());
        let record = source.normalize(&row("SAAM"));
        assert_eq!(record.object_id, "edanmdm-saam_1929.6.104");
        assert_eq!(record.creator, Field::Known("Thomas Moran".into()));
        assert_eq!(record.medium, Field::Known("watercolor on paper".into()));
        assert_eq!(record.rights, Field::Known("CC0".into()));
        assert_eq!(
            record.collection,
            Field::Known("Smithsonian American Art Museum".into())
        );
        assert!(record.images.contains_key("full"));
        assert!(record.images.contains_key("thumbnail"));
        assert_eq!(source.reject(&row("SAAM")), None);
    }

    #[test]
    fn rejects_natural_history_and_imageless_rows() {
        let source = SmithsonianSource::new(&SourceSettings::default());
        let reason = source.reject(&row("NMNHBIRDS")).unwrap();
        assert!(reason.contains("NMNHBIRDS"));

        let bare = json!({"id": "x", "unitCode": "NPG", "content": {}});
        assert_eq!(source.reject(&bare).as_deref(), Some("no downloadable image"));
        assert!(source.normalize(&bare).images.is_empty());
    }

    #[test]
    fn relative_media_urls_resolve_to_ids_host() {
        assert_eq!(
            absolute("/ids/deliveryService?id=X".into()),
            "https://ids.si.edu/ids/deliveryService?id=X"
        );
    }

    #[test]
    fn page_parsing() {
        let page = parse_page(json!({"status": 200, "response": {"rows": [{"id": "a"}], "rowCount": 41}})).unwrap();
        assert_eq!(page.total, Some(41));
        assert_eq!(page.hits.len(), 1);
    }
}
