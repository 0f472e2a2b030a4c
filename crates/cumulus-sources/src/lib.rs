//! Cumulus Sources - institution adapters and the restartable record stream

pub mod cooper_hewitt;
pub mod europeana;
pub mod harvard;
pub mod met;
pub mod mock;
pub mod normalize;
pub mod registry;
pub mod rijksmuseum;
pub mod smithsonian;
pub mod source;
pub mod stream;

pub use registry::{build, requires_key};
pub use source::{
    DEFAULT_TIMEOUT, Hit, ItemOutcome, SearchPage, Source, SourceContext, SourceSettings,
};
pub use stream::{KnownFn, RecordStream};
