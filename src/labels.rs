//! Class label tables.
//!
//! A label table is an ordered list of class names where the index is the
//! class id. Tables are typically loaded from a single delimited string
//! (`"person;bicycle;car"`) or from a file containing one.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Ordered class labels, indexed by class id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// Parse a delimited label string. Entries are trimmed; empty entries
    /// are kept so indices stay aligned with the class ids the model emits.
    pub fn from_delimited(s: &str, delimiter: char) -> Self {
        let labels = s
            .split(delimiter)
            .map(|entry| entry.trim().to_string())
            .collect();
        Self { labels }
    }

    /// Load a table from a file holding one semicolon-delimited line.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading label table {}", path.display()))?;
        Ok(Self::from_delimited(contents.trim_end(), ';'))
    }

    /// Label for a class id, if one is known.
    pub fn get(&self, class_id: i32) -> Option<&str> {
        if class_id < 0 {
            return None;
        }
        self.labels.get(class_id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.labels
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.labels.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_semicolon_delimited_labels() {
        let table = LabelTable::from_delimited("person;bicycle;car", ';');

        assert_eq!(table.len(), 3);
        assert_eq!(table.get(0), Some("person"));
        assert_eq!(table.get(2), Some("car"));
    }

    #[test]
    fn trims_whitespace_around_entries() {
        let table = LabelTable::from_delimited("cat ; dog", ';');

        assert_eq!(table.get(1), Some("dog"));
    }

    #[test]
    fn out_of_range_ids_have_no_label() {
        let table = LabelTable::from_delimited("only", ';');

        assert_eq!(table.get(5), None);
        assert_eq!(table.get(-1), None);
    }

    #[test]
    fn empty_entries_preserve_index_alignment() {
        let table = LabelTable::from_delimited("a;;c", ';');

        assert_eq!(table.len(), 3);
        assert_eq!(table.get(1), Some(""));
        assert_eq!(table.get(2), Some("c"));
    }
}
