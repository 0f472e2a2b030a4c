//! Keyword queries with exclusion terms and per-source limits

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::record::{Record, SourceTag};

/// A keyword search issued against one or more sources.
///
/// Built once through the consuming builder methods and read through
/// getters afterwards; a run persists its queries verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    keyword: String,
    exclude: Vec<String>,
    limits: BTreeMap<SourceTag, usize>,
    default_limit: Option<usize>,
}

impl Query {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            exclude: Vec::new(),
            limits: BTreeMap::new(),
            default_limit: None,
        }
    }

    /// Add an exclusion term (matched case-insensitively)
    pub fn exclude(mut self, term: impl Into<String>) -> Self {
        let term = term.into().trim().to_lowercase();
        if !term.is_empty() && !self.exclude.contains(&term) {
            self.exclude.push(term);
        }
        self
    }

    pub fn exclude_all<I, S>(self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        terms.into_iter().fold(self, Query::exclude)
    }

    /// Cap on items examined for one source
    pub fn limit(mut self, source: SourceTag, max: usize) -> Self {
        self.limits.insert(source, max);
        self
    }

    /// Cap applied to sources without an explicit limit
    pub fn default_limit(mut self, max: usize) -> Self {
        self.default_limit = Some(max);
        self
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    pub fn exclusions(&self) -> &[String] {
        &self.exclude
    }

    pub fn limit_for(&self, source: SourceTag) -> Option<usize> {
        self.limits.get(&source).copied().or(self.default_limit)
    }

    /// First exclusion term found in the record, if any
    pub fn excluded_term(&self, record: &Record) -> Option<&str> {
        if self.exclude.is_empty() {
            return None;
        }
        let text = record.search_text();
        self.exclude
            .iter()
            .find(|term| text.contains(term.as_str()))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Field;
    use serde_json::json;

    fn record(title: &str) -> Record {
        let mut r = Record::new(SourceTag::Met, "1", json!({"title": title}));
        r.title = Field::Known(title.to_string());
        r
    }

    #[test]
    fn exclusion_is_case_insensitive() {
        let q = Query::new("cloud").exclude("Saint-Cloud");
        assert_eq!(q.excluded_term(&record("SAINT-CLOUD Gardens")), Some("saint-cloud"));
        assert_eq!(q.excluded_term(&record("Cloud Study")), None);
    }

    #[test]
    fn exclusion_terms_deduplicated_and_trimmed() {
        let q = Query::new("cloud").exclude_all([" st cloud ", "st cloud", ""]);
        assert_eq!(q.exclusions(), &["st cloud".to_string()]);
    }

    #[test]
    fn limits_fall_back_to_default() {
        let q = Query::new("sky")
            .limit(SourceTag::Harvard, 5)
            .default_limit(50);
        assert_eq!(q.limit_for(SourceTag::Harvard), Some(5));
        assert_eq!(q.limit_for(SourceTag::Met), Some(50));
        assert_eq!(Query::new("sky").limit_for(SourceTag::Met), None);
    }

    #[test]
    fn query_persists_verbatim() {
        let q = Query::new("fog").exclude("fogg museum").limit(SourceTag::Europeana, 10);
        let s = serde_json::to_string(&q).unwrap();
        let back: Query = serde_json::from_str(&s).unwrap();
        assert_eq!(back, q);
    }
}
