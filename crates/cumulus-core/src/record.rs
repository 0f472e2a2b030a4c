//! Normalized record model shared by every source and the archive

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Marker rendered for fields a source did not (or could not) provide.
pub const UNKNOWN: &str = "unknown";

/// Institution a record was collected from.
///
/// `Manual` is the synthetic tag for locally curated additions; it never
/// collides with an institutional tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    #[serde(rename = "met_museum")]
    Met,
    Harvard,
    Rijksmuseum,
    CooperHewitt,
    Europeana,
    Smithsonian,
    Manual,
}

impl SourceTag {
    /// Parse CLI/config name into tag
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "met_museum" | "met" => Some(Self::Met),
            "harvard" => Some(Self::Harvard),
            "rijksmuseum" | "rijks" => Some(Self::Rijksmuseum),
            "cooper_hewitt" => Some(Self::CooperHewitt),
            "europeana" => Some(Self::Europeana),
            "smithsonian" => Some(Self::Smithsonian),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }

    /// Stable name used in paths, logs and persisted documents
    pub fn name(self) -> &'static str {
        match self {
            Self::Met => "met_museum",
            Self::Harvard => "harvard",
            Self::Rijksmuseum => "rijksmuseum",
            Self::CooperHewitt => "cooper_hewitt",
            Self::Europeana => "europeana",
            Self::Smithsonian => "smithsonian",
            Self::Manual => "manual",
        }
    }

    /// Every institutional source (excludes `Manual`)
    pub fn institutions() -> &'static [SourceTag] {
        &[
            Self::Met,
            Self::Harvard,
            Self::Rijksmuseum,
            Self::CooperHewitt,
            Self::Europeana,
            Self::Smithsonian,
        ]
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A descriptive attribute that is either known or explicitly unknown.
///
/// Serializes as `{"known": value}` or the bare string `"unknown"`, so a
/// literal value of "unknown" stays distinguishable from the marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field<T> {
    Known(T),
    Unknown,
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Self::Unknown
    }
}

impl<T> Field<T> {
    pub fn as_known(&self) -> Option<&T> {
        match self {
            Self::Known(v) => Some(v),
            Self::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// Keep `self` if known, otherwise fall back to `other`
    pub fn or(self, other: Field<T>) -> Field<T> {
        match self {
            Self::Known(_) => self,
            Self::Unknown => other,
        }
    }
}

impl<T> From<Option<T>> for Field<T> {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Self::Unknown, Self::Known)
    }
}

impl<T: fmt::Display> fmt::Display for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(v) => write!(f, "{v}"),
            Self::Unknown => f.write_str(UNKNOWN),
        }
    }
}

/// Dedup key: unique within a merged archive
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub source: SourceTag,
    pub object_id: String,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.object_id)
    }
}

/// One item retrieved from one institution (or added by hand)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub source: SourceTag,
    pub object_id: String,
    pub title: Field<String>,
    pub creator: Field<String>,
    pub date: Field<String>,
    pub medium: Field<String>,
    pub tags: BTreeSet<String>,
    pub collection: Field<String>,
    pub rights: Field<String>,
    /// Resolution label → URL
    pub images: BTreeMap<String, String>,
    /// Untouched source payload, including fields the schema does not model
    pub original: serde_json::Value,
}

impl Record {
    /// Record with every descriptive field unknown
    pub fn new(source: SourceTag, object_id: impl Into<String>, original: serde_json::Value) -> Self {
        Self {
            source,
            object_id: object_id.into(),
            title: Field::Unknown,
            creator: Field::Unknown,
            date: Field::Unknown,
            medium: Field::Unknown,
            tags: BTreeSet::new(),
            collection: Field::Unknown,
            rights: Field::Unknown,
            images: BTreeMap::new(),
            original,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            source: self.source,
            object_id: self.object_id.clone(),
        }
    }

    /// Lowercased text used for exclusion matching
    pub fn search_text(&self) -> String {
        let mut text = self.original.to_string();
        if let Some(title) = self.title.as_known() {
            text.push(' ');
            text.push_str(title);
        }
        text.to_lowercase()
    }
}
