use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Reserved separator between a tag key and value in the `key:value` composite encoding
/// used by the vector index's tag filters (spec §4.6).
pub const TAG_SEPARATOR: char = ':';

/// A multimap string→string: one key may hold many values (spec §3, `DocumentUpload.tags`).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagSet(BTreeMap<String, Vec<String>>);

impl TagSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key/value pair, validating that neither contains the reserved separator
    /// (spec §8 boundary: "Filter with tag key containing the reserved separator → Validation
    /// error at import time").
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<(), AppError> {
        let key = key.into();
        let value = value.into();
        if key.contains(TAG_SEPARATOR) || value.contains(TAG_SEPARATOR) {
            return Err(AppError::Validation(format!(
                "tag key/value must not contain the reserved separator '{TAG_SEPARATOR}'"
            )));
        }
        self.0.entry(key).or_default().push(value);
        Ok(())
    }

    #[must_use]
    pub fn values(&self, key: &str) -> &[String] {
        self.0.get(key).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.values(key).iter().any(|v| v == value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .flat_map(|(k, values)| values.iter().map(move |v| (k.as_str(), v.as_str())))
    }

    /// Render every (key, value) pair using the `key:value` composite encoding.
    #[must_use]
    pub fn to_composite(&self) -> Vec<String> {
        self.iter()
            .map(|(k, v)| format!("{k}{TAG_SEPARATOR}{v}"))
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A single ANDed equality filter: a set of `(key, value)` pairs. A list of `TagFilter`s is
/// ORed (spec §4.6). Empty filters are dropped by the caller before being evaluated.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagFilter(Vec<(String, String)>);

impl TagFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether every equality in this filter is satisfied by `tags`.
    #[must_use]
    pub fn matches(&self, tags: &TagSet) -> bool {
        self.0.iter().all(|(key, value)| tags.contains(key, value))
    }
}

/// A list of `TagFilter`s, ORed together. An empty list matches everything.
#[must_use]
pub fn any_filter_matches(filters: &[TagFilter], tags: &TagSet) -> bool {
    let nonempty: Vec<&TagFilter> = filters.iter().filter(|f| !f.is_empty()).collect();
    if nonempty.is_empty() {
        return true;
    }
    nonempty.iter().any(|f| f.matches(tags))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_rejects_reserved_separator_in_key() {
        let mut tags = TagSet::new();
        assert!(tags.insert("user:name", "Taylor").is_err());
    }

    #[test]
    fn insert_rejects_reserved_separator_in_value() {
        let mut tags = TagSet::new();
        assert!(tags.insert("user", "Taylor:Swift").is_err());
    }

    #[test]
    fn multimap_holds_many_values_per_key() {
        let mut tags = TagSet::new();
        tags.insert("topic", "physics").unwrap();
        tags.insert("topic", "energy").unwrap();
        assert_eq!(tags.values("topic"), &["physics", "energy"]);
    }

    #[test]
    fn filter_matches_is_and_of_equalities() {
        let mut tags = TagSet::new();
        tags.insert("user", "Taylor").unwrap();
        tags.insert("type", "news").unwrap();

        let filter = TagFilter::new().with("user", "Taylor").with("type", "news");
        assert!(filter.matches(&tags));

        let filter_miss = TagFilter::new().with("user", "Blake");
        assert!(!filter_miss.matches(&tags));
    }

    #[test]
    fn empty_filter_list_matches_everything() {
        let tags = TagSet::new();
        assert!(any_filter_matches(&[], &tags));
    }

    #[test]
    fn filter_list_is_ored() {
        let mut tags = TagSet::new();
        tags.insert("user", "Taylor").unwrap();

        let filters = vec![
            TagFilter::new().with("user", "Blake"),
            TagFilter::new().with("user", "Taylor"),
        ];
        assert!(any_filter_matches(&filters, &tags));
    }
}
