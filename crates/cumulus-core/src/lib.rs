//! Cumulus Core - common infrastructure for the image collection pipeline
//!
//! This crate provides the normalized record model, the error taxonomy,
//! retry and rate-limit primitives, and the HTTP plumbing shared by
//! every source adapter.

pub mod error;
pub mod hash;
pub mod http;
pub mod logging;
pub mod progress;
pub mod query;
pub mod rate_limit;
pub mod record;
pub mod retry;
pub mod shutdown;

// Re-exports for convenience
pub use error::{FetchError, Severity, StorageError};
pub use http::{SHARED_RUNTIME, download_to, get_json, http_client};
pub use logging::{IndicatifLogger, init_logging};
pub use progress::{ProgressContext, SharedProgress};
pub use query::Query;
pub use rate_limit::RateLimiter;
pub use record::{Field, Record, RecordKey, SourceTag, UNKNOWN};
pub use retry::{Attempt, RetryPolicy, retry_with_backoff};
pub use shutdown::CancelFlag;
