//! In-memory source for tests: scripted items, failures and request counters.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use cumulus_core::{CancelFlag, FetchError, Query, Record, SourceTag};
use serde_json::{Value, json};

use crate::normalize;
use crate::source::{Hit, SearchPage, Source};

/// One scripted item.
#[derive(Debug, Clone)]
pub struct MockItem {
    payload: Value,
    reject: Option<String>,
}

impl MockItem {
    /// Item with an id, a title and one `primary` image
    pub fn titled(id: &str, title: &str) -> Self {
        Self::raw(json!({
            "id": id,
            "title": title,
            "images": {"primary": format!("mock://{id}/primary.jpg")},
        }))
    }

    pub fn raw(payload: Value) -> Self {
        Self {
            payload,
            reject: None,
        }
    }

    /// Make the source's own filter drop this item
    pub fn rejected(mut self, reason: &str) -> Self {
        self.reject = Some(reason.to_string());
        self
    }

    pub fn with_image(mut self, label: &str, url: &str) -> Self {
        if let Some(images) = self.payload.get_mut("images").and_then(Value::as_object_mut) {
            images.insert(label.to_string(), Value::String(url.to_string()));
        } else if let Some(obj) = self.payload.as_object_mut() {
            let mut images = serde_json::Map::new();
            images.insert(label.to_string(), Value::String(url.to_string()));
            obj.insert("images".into(), Value::Object(images));
        }
        self
    }

    fn id(&self) -> String {
        normalize::object_id(&self.payload, "/id")
    }
}

/// Scripted source. Hits are references by default, so every item costs a
/// second request the way the Met's search-then-fetch does.
#[derive(Debug)]
pub struct MockSource {
    tag: SourceTag,
    items: Vec<MockItem>,
    page_size: usize,
    inline: bool,
    unauthorized: bool,
    page_failures: HashSet<usize>,
    item_failures: HashMap<usize, usize>,
    cancel_at: Option<(usize, CancelFlag)>,
    download_failures: usize,
    page_requests: AtomicUsize,
    item_fetches: Vec<AtomicUsize>,
    downloads: AtomicUsize,
}

impl MockSource {
    pub fn new(tag: SourceTag, items: Vec<MockItem>) -> Self {
        let item_fetches = items.iter().map(|_| AtomicUsize::new(0)).collect();
        Self {
            tag,
            items,
            page_size: 100,
            inline: false,
            unauthorized: false,
            page_failures: HashSet::new(),
            item_failures: HashMap::new(),
            cancel_at: None,
            download_failures: 0,
            page_requests: AtomicUsize::new(0),
            item_fetches,
            downloads: AtomicUsize::new(0),
        }
    }

    /// `n` items `obj-0..obj-n`, each titled "Cloud study i"
    pub fn numbered(tag: SourceTag, n: usize) -> Self {
        let items = (0..n)
            .map(|i| MockItem::titled(&format!("obj-{i}"), &format!("Cloud study {i}")))
            .collect();
        Self::new(tag, items)
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Return full payloads in search pages instead of references
    pub fn inline(mut self) -> Self {
        self.inline = true;
        self
    }

    /// Every request answers 401
    pub fn unauthorized(mut self) -> Self {
        self.unauthorized = true;
        self
    }

    /// Page `page` always answers 503
    pub fn fail_page(mut self, page: usize) -> Self {
        self.page_failures.insert(page);
        self
    }

    /// The first `times` fetches of item `index` answer 503
    pub fn fail_item(mut self, index: usize, times: usize) -> Self {
        self.item_failures.insert(index, times);
        self
    }

    /// Cancel `flag` while item `index` is being fetched
    pub fn cancel_at(mut self, index: usize, flag: CancelFlag) -> Self {
        self.cancel_at = Some((index, flag));
        self
    }

    /// The first `times` downloads answer 503
    pub fn fail_downloads(mut self, times: usize) -> Self {
        self.download_failures = times;
        self
    }

    pub fn page_requests(&self) -> usize {
        self.page_requests.load(Ordering::SeqCst)
    }

    /// How many times item `index` was resolved
    pub fn item_fetches(&self, index: usize) -> usize {
        self.item_fetches
            .get(index)
            .map_or(0, |c| c.load(Ordering::SeqCst))
    }

    pub fn total_item_fetches(&self) -> usize {
        self.item_fetches
            .iter()
            .map(|c| c.load(Ordering::SeqCst))
            .sum()
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    fn unavailable() -> FetchError {
        FetchError::Network {
            status: Some(503),
            message: "Service Unavailable".into(),
        }
    }

    fn check_auth(&self) -> Result<(), FetchError> {
        if self.unauthorized {
            return Err(FetchError::Authentication {
                status: Some(401),
                message: "Unauthorized".into(),
            });
        }
        Ok(())
    }
}

impl Source for MockSource {
    fn tag(&self) -> SourceTag {
        self.tag
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn requests_per_second(&self) -> f64 {
        0.0
    }

    fn fetch_page(&self, _query: &Query, page: usize) -> Result<SearchPage, FetchError> {
        self.page_requests.fetch_add(1, Ordering::SeqCst);
        self.check_auth()?;
        if self.page_failures.contains(&page) {
            return Err(Self::unavailable());
        }
        let hits = self
            .items
            .iter()
            .skip(page * self.page_size)
            .take(self.page_size)
            .map(|item| {
                if self.inline {
                    Hit::Full(item.payload.clone())
                } else {
                    Hit::Ref(item.id())
                }
            })
            .collect();
        Ok(SearchPage {
            hits,
            total: Some(self.items.len()),
        })
    }

    fn fetch_item(&self, hit: Hit) -> Result<Value, FetchError> {
        let id = match hit {
            Hit::Full(raw) => return Ok(raw),
            Hit::Ref(id) => id,
        };
        self.check_auth()?;
        let index = self
            .items
            .iter()
            .position(|item| item.id() == id)
            .ok_or_else(|| FetchError::Network {
                status: Some(404),
                message: format!("no object {id}"),
            })?;
        let attempt = self.item_fetches[index].fetch_add(1, Ordering::SeqCst);
        if let Some((at, flag)) = &self.cancel_at {
            if *at == index {
                flag.cancel();
            }
        }
        if self.item_failures.get(&index).is_some_and(|&n| attempt < n) {
            return Err(Self::unavailable());
        }
        Ok(self.items[index].payload.clone())
    }

    fn normalize(&self, raw: &Value) -> Record {
        let mut record = Record::new(self.tag, normalize::object_id(raw, "/id"), raw.clone());
        record.title = normalize::text(raw, "/title");
        record.creator = normalize::text(raw, "/creator");
        record.date = normalize::text(raw, "/date");
        record.medium = normalize::text(raw, "/medium");
        record.collection = normalize::text(raw, "/collection");
        record.rights = normalize::text(raw, "/rights");
        record.tags = normalize::texts(raw, "/tags").into_iter().collect();
        if let Some(images) = raw.get("images").and_then(Value::as_object) {
            for (label, url) in images {
                if let Some(url) = url.as_str() {
                    record.images.insert(label.clone(), url.to_string());
                }
            }
        }
        record
    }

    fn reject(&self, raw: &Value) -> Option<String> {
        self.items
            .iter()
            .find(|item| &item.payload == raw)
            .and_then(|item| item.reject.clone())
    }

    /// Writes a small fake image; URLs containing `broken` answer 404.
    fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        if self.downloads.fetch_add(1, Ordering::SeqCst) < self.download_failures {
            return Err(Self::unavailable());
        }
        if url.contains("broken") {
            return Err(FetchError::Network {
                status: Some(404),
                message: "Not Found".into(),
            });
        }
        let body = format!("mock image {url}");
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(FetchError::Storage)?;
        }
        std::fs::write(dest, body.as_bytes()).map_err(FetchError::Storage)?;
        Ok(body.len() as u64)
    }
}
