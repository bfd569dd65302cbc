//! Offline inputs for the ANN build: SPECTER embeddings and article metadata.
//!
//! Both tables are keyed by `cord_uid` and iterate in first-seen order. A
//! repeated uid replaces the stored value without moving it.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::error::SearchError;

/// Insertion-ordered map with overwrite-in-place semantics.
#[derive(Debug, Clone)]
struct OrderedTable<V> {
    keys: Vec<String>,
    values: Vec<V>,
    positions: HashMap<String, usize>,
}

impl<V> Default for OrderedTable<V> {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            values: Vec::new(),
            positions: HashMap::new(),
        }
    }
}

impl<V> OrderedTable<V> {
    fn insert(&mut self, key: String, value: V) {
        match self.positions.get(&key) {
            Some(&pos) => self.values[pos] = value,
            None => {
                self.positions.insert(key.clone(), self.keys.len());
                self.keys.push(key);
                self.values.push(value);
            }
        }
    }

    fn get(&self, key: &str) -> Option<&V> {
        self.positions.get(key).map(|&pos| &self.values[pos])
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.keys.iter().map(String::as_str).zip(self.values.iter())
    }
}

/// Document embeddings keyed by uid, all of one dimension.
#[derive(Debug, Clone)]
pub struct EmbeddingTable {
    dimension: usize,
    rows: OrderedTable<Vec<f32>>,
}

impl EmbeddingTable {
    /// Empty table for vectors of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            rows: OrderedTable::default(),
        }
    }

    /// Reads a headerless `uid,v1,...,vD` CSV file.
    pub fn from_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("failed to open {:?}", path))?;
        let mut table: Option<Self> = None;
        for record in reader.records() {
            let record = record.with_context(|| format!("failed to read {:?}", path))?;
            let line = record.position().map_or(0, |pos| pos.line());
            let (uid, vector) = parse_embedding_row(&record)
                .with_context(|| format!("{:?} line {line}", path))?;
            let table = table.get_or_insert_with(|| Self::new(vector.len()));
            table
                .insert(uid, vector)
                .with_context(|| format!("{:?} line {line}", path))?;
        }
        let table = table.unwrap_or_else(|| Self::new(0));
        debug!(rows = table.len(), dimension = table.dimension, "loaded embeddings");
        Ok(table)
    }

    /// Adds or replaces the vector for `uid`.
    pub fn insert(&mut self, uid: impl Into<String>, vector: Vec<f32>) -> Result<(), SearchError> {
        if vector.len() != self.dimension {
            return Err(SearchError::Integrity(format!(
                "vector has {} components, expected {}",
                vector.len(),
                self.dimension
            )));
        }
        self.rows.insert(uid.into(), vector);
        Ok(())
    }

    /// Vector component count.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Distinct uids.
    pub fn len(&self) -> usize {
        self.rows.keys.len()
    }

    /// True when no rows were loaded.
    pub fn is_empty(&self) -> bool {
        self.rows.keys.is_empty()
    }

    /// Vector stored for `uid`.
    pub fn get(&self, uid: &str) -> Option<&[f32]> {
        self.rows.get(uid).map(Vec::as_slice)
    }

    /// Rows in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.rows.iter().map(|(uid, v)| (uid, v.as_slice()))
    }
}

fn parse_embedding_row(record: &csv::StringRecord) -> Result<(String, Vec<f32>)> {
    let uid = record.get(0).unwrap_or_default();
    anyhow::ensure!(!uid.is_empty(), "row has no uid");
    let vector = record
        .iter()
        .skip(1)
        .map(|field| {
            field
                .parse::<f32>()
                .with_context(|| format!("invalid component {field:?} for {uid}"))
        })
        .collect::<Result<Vec<_>>>()?;
    anyhow::ensure!(!vector.is_empty(), "row for {uid} has no components");
    Ok((uid.to_string(), vector))
}

/// Fields of a metadata record that the build needs.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataRecord {
    /// Document uid shared with the embedding table.
    pub cord_uid: String,
    /// Article title, when present.
    #[serde(default)]
    pub title: Option<String>,
}

/// Article metadata keyed by uid.
#[derive(Debug, Clone, Default)]
pub struct MetadataTable {
    rows: OrderedTable<MetadataRecord>,
}

impl MetadataTable {
    /// Reads a CORD-19 style `metadata.csv`: a header row naming at least
    /// `cord_uid`, other columns ignored.
    pub fn from_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("failed to open {:?}", path))?;
        let mut table = Self::default();
        for record in reader.deserialize::<MetadataRecord>() {
            let record = record.with_context(|| format!("failed to parse {:?}", path))?;
            table.insert(record);
        }
        debug!(rows = table.len(), "loaded metadata");
        Ok(table)
    }

    /// Adds or replaces the record for its uid.
    pub fn insert(&mut self, record: MetadataRecord) {
        self.rows.insert(record.cord_uid.clone(), record);
    }

    /// Distinct uids.
    pub fn len(&self) -> usize {
        self.rows.keys.len()
    }

    /// True when no records were loaded.
    pub fn is_empty(&self) -> bool {
        self.rows.keys.is_empty()
    }

    /// Record for `uid`.
    pub fn get(&self, uid: &str) -> Option<&MetadataRecord> {
        self.rows.get(uid)
    }
}
