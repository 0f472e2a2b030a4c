//! Cooperative run cancellation via atomic flag

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Run-scoped cancellation flag.
///
/// Cloned into every worker; set by the SIGINT/SIGTERM handler or by the
/// coordinator itself when a run-fatal error occurs. Workers check it between
/// items, so an in-flight item always completes.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Underlying flag, for signal handlers
    pub fn as_atomic(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}
