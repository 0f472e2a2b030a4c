//! Cumulus Store - on-disk metadata, run state and the merged archive
//!
//! Everything lives under one output directory; see [`layout`] for the tree.

pub mod annotate;
pub mod archive;
pub mod export;
pub mod layout;
pub mod manual;
pub mod metadata;
pub mod run;
pub mod validate;

pub use archive::{ArchivedImage, MergedArchive};
pub use export::ExportFormat;
pub use layout::Layout;
pub use metadata::{MetadataStore, StoredFile, StoredRecord};
pub use run::{
    DownloadOptions, LogEntry, LogEvent, RunLog, RunState, RunStatus, SourceProgress,
    SourceStatus,
};
pub use validate::{ValidationReport, validate};
