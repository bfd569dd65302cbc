//! Label to uid mapping persisted next to the index, one uid per line.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::error::SearchError;

/// Dense label ↔ uid mapping; label `N` is the `N`-th uid pushed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelMap {
    uids: Vec<String>,
    labels: HashMap<String, usize>,
}

impl LabelMap {
    /// Empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the next label to `uid`.
    pub fn push(&mut self, uid: impl Into<String>) -> Result<usize, SearchError> {
        let uid = uid.into();
        let label = self.uids.len();
        if self.labels.contains_key(&uid) {
            return Err(SearchError::integrity(format!("uid {uid} mapped twice")));
        }
        self.labels.insert(uid.clone(), label);
        self.uids.push(uid);
        Ok(label)
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.uids.len()
    }

    /// True when no labels are assigned.
    pub fn is_empty(&self) -> bool {
        self.uids.is_empty()
    }

    /// Uid for `label`.
    pub fn uid(&self, label: usize) -> Option<&str> {
        self.uids.get(label).map(String::as_str)
    }

    /// Label for `uid`.
    pub fn label(&self, uid: &str) -> Option<usize> {
        self.labels.get(uid).copied()
    }

    /// Writes one uid per line in label order.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
        let mut writer = BufWriter::new(file);
        for uid in &self.uids {
            writeln!(writer, "{uid}")?;
        }
        writer
            .flush()
            .with_context(|| format!("failed to write {:?}", path))?;
        Ok(())
    }

    /// Reads a file written by [`LabelMap::write_to`].
    pub fn read_from(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
        let mut map = Self::new();
        for line in BufReader::new(file).lines() {
            let line = line.with_context(|| format!("failed to read {:?}", path))?;
            let uid = line.trim_end_matches('\r');
            if uid.is_empty() {
                return Err(SearchError::integrity(format!(
                    "{:?} has a blank line at label {}",
                    path,
                    map.len()
                ))
                .into());
            }
            map.push(uid)?;
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.txt");
        let mut map = LabelMap::new();
        for uid in ["ug7v899j", "02tnwd4m", "ejv2xln0"] {
            map.push(uid).unwrap();
        }
        map.write_to(&path).unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "ug7v899j\n02tnwd4m\nejv2xln0\n"
        );
        let loaded = LabelMap::read_from(&path).unwrap();
        assert_eq!(loaded, map);
        assert_eq!(loaded.uid(1), Some("02tnwd4m"));
        assert_eq!(loaded.label("ejv2xln0"), Some(2));
        assert_eq!(loaded.uid(3), None);
    }

    #[test]
    fn duplicate_uids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.txt");
        std::fs::write(&path, "a\nb\na\n").unwrap();
        let err = LabelMap::read_from(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SearchError>(),
            Some(SearchError::Integrity(_))
        ));
    }
}
