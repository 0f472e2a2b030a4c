//! The adapter contract every institution implements

use std::path::Path;
use std::time::Duration;

use cumulus_core::{CancelFlag, FetchError, Query, RateLimiter, Record, RetryPolicy, SourceTag};
use serde_json::Value;

/// Per-request timeout when the configuration gives none
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// One entry of a search page.
#[derive(Debug, Clone, PartialEq)]
pub enum Hit {
    /// The search response already carries the full payload
    Full(Value),
    /// Only an id; the payload needs a second request
    Ref(String),
}

impl Hit {
    /// Source-scoped id, when known before resolving
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Ref(id) => Some(id),
            Self::Full(_) => None,
        }
    }
}

/// One page of search results in the API's native order.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub hits: Vec<Hit>,
    /// Total matches reported by the API, if any
    pub total: Option<usize>,
}

/// Connection settings for one adapter.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout: Duration,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl SourceSettings {
    pub fn with_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            ..Self::default()
        }
    }

    /// Base URL override, falling back to the adapter's public endpoint
    pub fn base_url_or(&self, default: &str) -> String {
        self.base_url
            .as_deref()
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    }

    /// The credential, or an authentication error naming the config key to set
    pub fn require_key(&self, tag: SourceTag) -> Result<&str, FetchError> {
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(FetchError::Authentication {
                status: None,
                message: format!("no API key configured (set sources.{tag}.api_key)"),
            }),
        }
    }
}

/// Run-scoped pacing, retry and cancellation for one source.
///
/// Owned by the coordinator and lent to the worker; adapters never see it.
#[derive(Debug)]
pub struct SourceContext {
    pub limiter: RateLimiter,
    pub retry: RetryPolicy,
    pub cancel: CancelFlag,
}

impl SourceContext {
    pub fn new(limiter: RateLimiter, retry: RetryPolicy, cancel: CancelFlag) -> Self {
        Self {
            limiter,
            retry,
            cancel,
        }
    }

    /// No pacing, no backoff sleeps (tests)
    pub fn immediate(max_retries: u32) -> Self {
        Self::new(
            RateLimiter::unlimited(),
            RetryPolicy::immediate(max_retries),
            CancelFlag::new(),
        )
    }
}

/// An institution's collection API.
///
/// Implementations issue single requests and map responses; pacing, retries
/// and pagination bookkeeping live in [`crate::RecordStream`].
pub trait Source: Send + Sync {
    fn tag(&self) -> SourceTag;

    /// Items per search page; the stream relies on it to locate item `k`
    fn page_size(&self) -> usize;

    /// Default pacing when the configuration gives none
    fn requests_per_second(&self) -> f64 {
        1.0
    }

    /// Time allowed for a response to start
    fn timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }

    /// Fetch search page `page` (0-based) for `query`.
    fn fetch_page(&self, query: &Query, page: usize) -> Result<SearchPage, FetchError>;

    /// Resolve a hit into its full payload.
    fn fetch_item(&self, hit: Hit) -> Result<Value, FetchError> {
        match hit {
            Hit::Full(raw) => Ok(raw),
            Hit::Ref(id) => Err(FetchError::Schema(format!(
                "{} cannot resolve object {id}",
                self.tag()
            ))),
        }
    }

    /// Map a raw payload onto the common record shape. Must be pure.
    fn normalize(&self, raw: &Value) -> Record;

    /// Source-specific reason to drop an item, checked before exclusions
    fn reject(&self, _raw: &Value) -> Option<String> {
        None
    }

    /// Download one image file.
    fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        cumulus_core::download_to(url, dest, self.timeout())
    }
}

/// What became of one item.
#[derive(Debug)]
pub enum ItemOutcome {
    Collected(Record),
    /// Matched an exclusion term of the query
    Excluded { record: Record, term: String },
    /// Dropped by the adapter's own filter
    Rejected { record: Record, reason: String },
    /// Already in the metadata store; not resolved again
    AlreadyStored { object_id: String },
    /// Recoverable failure after retries; the source carries on
    Failed {
        object_id: Option<String>,
        error: FetchError,
    },
}

impl ItemOutcome {
    pub fn object_id(&self) -> Option<&str> {
        match self {
            Self::Collected(record)
            | Self::Excluded { record, .. }
            | Self::Rejected { record, .. } => Some(&record.object_id),
            Self::AlreadyStored { object_id } => Some(object_id),
            Self::Failed { object_id, .. } => object_id.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_authentication_error() {
        let settings = SourceSettings::default();
        let err = settings.require_key(SourceTag::Harvard).unwrap_err();
        assert!(matches!(err, FetchError::Authentication { status: None, .. }));
        assert!(err.to_string().contains("sources.harvard.api_key"));

        let blank = SourceSettings::with_key("  ");
        assert!(blank.require_key(SourceTag::Harvard).is_err());
        let ok = SourceSettings::with_key("abc");
        assert_eq!(ok.require_key(SourceTag::Harvard).unwrap(), "abc");
    }

    #[test]
    fn base_url_override_drops_trailing_slash() {
        let mut settings = SourceSettings::default();
        assert_eq!(settings.base_url_or("https://a.example/v1"), "https://a.example/v1");
        settings.base_url = Some("http://127.0.0.1:8080/".into());
        assert_eq!(settings.base_url_or("https://a.example/v1"), "http://127.0.0.1:8080");
    }

    #[test]
    fn only_refs_expose_ids_up_front() {
        assert_eq!(Hit::Ref("42".into()).id(), Some("42"));
        assert_eq!(Hit::Full(serde_json::json!({"id": 42})).id(), None);
    }
}
