//! Cumulus Collect - collection run coordinator
//!
//! Runs one worker thread per source. Workers walk their record streams,
//! download images and report each item over a channel; the coordinator is
//! the only writer of metadata documents and run state.
//!
//! # Example
//!
//! ```no_run
//! use cumulus_collect::{CollectConfig, collect};
//! use cumulus_core::{Query, SourceTag};
//! use cumulus_sources::SourceSettings;
//! use std::sync::Arc;
//!
//! let sources: Vec<_> = [SourceTag::Met]
//!     .iter()
//!     .filter_map(|&tag| cumulus_sources::build(tag, &SourceSettings::default()))
//!     .map(Arc::from)
//!     .collect();
//! let query = Query::new("cloud").exclude("saint-cloud");
//! let summary = collect(&CollectConfig::default(), &sources, vec![query]).expect("run failed");
//! println!("{} records ({})", summary.collected(), summary.status);
//! ```

pub mod config;
pub mod coordinator;
pub mod runner;
pub mod worker;

pub use config::CollectConfig;
pub use runner::{RunSummary, collect, resume};
