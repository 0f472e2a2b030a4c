//! Run-scoped configuration for the collection coordinator

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use cumulus_core::{CancelFlag, ProgressContext, RateLimiter, RetryPolicy, SharedProgress, SourceTag};
use cumulus_sources::{Source, SourceContext};
use cumulus_store::DownloadOptions;

/// Pipeline configuration
#[derive(Clone)]
pub struct CollectConfig {
    /// Output directory holding metadata, images and runs
    pub output_dir: PathBuf,
    pub retry: RetryPolicy,
    /// Requests per second per source, overriding the adapter default
    pub rates: BTreeMap<SourceTag, f64>,
    /// Image options for new runs; a resumed run keeps its own
    pub download: DownloadOptions,
    pub cancel: CancelFlag,
    pub progress: SharedProgress,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./cumulus-output"),
            retry: RetryPolicy::default(),
            rates: BTreeMap::new(),
            download: DownloadOptions::default(),
            cancel: CancelFlag::new(),
            progress: Arc::new(ProgressContext::hidden()),
        }
    }
}

impl CollectConfig {
    /// Pacing, retry and cancellation handed to one source's worker.
    pub fn source_context(&self, source: &dyn Source) -> SourceContext {
        let rate = self
            .rates
            .get(&source.tag())
            .copied()
            .unwrap_or_else(|| source.requests_per_second());
        SourceContext::new(
            RateLimiter::per_second(rate),
            self.retry,
            self.cancel.clone(),
        )
    }
}
