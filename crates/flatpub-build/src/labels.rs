//! Image descriptor label lookup
//!
//! Labels may be spelled with their current key or a legacy alias
//! (`Name`, `Version`, `Release`). Lookup returns the key actually found.

use crate::error::{BuildError, Result};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelType {
    Name,
    Version,
    Release,
}

impl LabelType {
    /// Candidate keys, preferred spelling first
    pub fn keys(self) -> &'static [&'static str] {
        match self {
            LabelType::Name => &["name", "Name"],
            LabelType::Version => &["version", "Version"],
            LabelType::Release => &["release", "Release"],
        }
    }
}

impl fmt::Display for LabelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keys()[0])
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Labels<'a> {
    labels: &'a BTreeMap<String, String>,
}

impl<'a> Labels<'a> {
    pub fn new(labels: &'a BTreeMap<String, String>) -> Self {
        Self { labels }
    }

    pub fn get_name_and_value(&self, label_type: LabelType) -> Result<(&'a str, &'a str)> {
        label_type
            .keys()
            .iter()
            .find_map(|key| self.labels.get_key_value(*key))
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .ok_or_else(|| BuildError::MissingLabel(label_type.to_string()))
    }

    pub fn value(&self, label_type: LabelType) -> Result<&'a str> {
        self.get_name_and_value(label_type).map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_canonical_key() {
        let map = labels(&[("name", "myapp"), ("version", "1.0"), ("release", "3")]);
        let labels = Labels::new(&map);
        assert_eq!(
            labels.get_name_and_value(LabelType::Name).unwrap(),
            ("name", "myapp")
        );
        assert_eq!(labels.value(LabelType::Release).unwrap(), "3");
    }

    #[test]
    fn test_legacy_alias() {
        let map = labels(&[("Name", "legacy"), ("Version", "2")]);
        let labels = Labels::new(&map);
        assert_eq!(
            labels.get_name_and_value(LabelType::Name).unwrap(),
            ("Name", "legacy")
        );
        assert_eq!(labels.value(LabelType::Version).unwrap(), "2");
    }

    #[test]
    fn test_canonical_wins_over_alias() {
        let map = labels(&[("Name", "old"), ("name", "new")]);
        assert_eq!(Labels::new(&map).value(LabelType::Name).unwrap(), "new");
    }

    #[test]
    fn test_missing_label() {
        let map = labels(&[("name", "myapp")]);
        let err = Labels::new(&map).value(LabelType::Release).unwrap_err();
        assert!(matches!(err, BuildError::MissingLabel(ref l) if l == "release"));
    }
}
