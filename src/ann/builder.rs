//! Offline construction of the related-article index.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use super::{AnnIndex, HnswIndex, LabelMap};
use crate::config::BuildSettings;
use crate::embeddings::{EmbeddingTable, MetadataTable};
use crate::error::SearchError;

/// Paths and sizes of a finished build.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    /// Indexed vectors.
    pub count: usize,
    /// Vector component count.
    pub dimension: usize,
    /// Index header; the graph dump sits beside it.
    pub index_path: PathBuf,
    /// Label mapping, one uid per line.
    pub labels_path: PathBuf,
}

/// Builds an HNSW index and its label mapping from embedding tables.
#[derive(Debug, Clone, Default)]
pub struct IndexBuilder {
    settings: BuildSettings,
}

impl IndexBuilder {
    /// Builder using `settings`.
    pub fn new(settings: BuildSettings) -> Self {
        Self { settings }
    }

    /// `<dir>/<name>.bin`.
    pub fn index_path(&self, dir: &Path) -> PathBuf {
        HnswIndex::header_path(dir, &self.settings.index_name)
    }

    /// `<dir>/<name>.txt`.
    pub fn labels_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.txt", self.settings.index_name))
    }

    /// Inserts every embedding in table order, returning the index and its labels.
    pub fn build(
        &self,
        metadata: &MetadataTable,
        embeddings: &EmbeddingTable,
    ) -> Result<(HnswIndex, LabelMap), SearchError> {
        if metadata.len() != embeddings.len() {
            return Err(SearchError::integrity(format!(
                "metadata has {} records but embeddings have {}",
                metadata.len(),
                embeddings.len()
            )));
        }
        let total = embeddings.len();
        let mut index = HnswIndex::new(
            embeddings.dimension().max(1),
            total,
            self.settings.m,
            self.settings.ef_construction,
        )?;
        let mut labels = LabelMap::new();
        let batch_size = self.settings.batch_size.max(1);
        info!(total, dimension = embeddings.dimension(), "building ann index");

        let rows: Vec<(&str, &[f32])> = embeddings.iter().collect();
        if let Some((uid, _)) = rows.iter().find(|(uid, _)| metadata.get(uid).is_none()) {
            return Err(SearchError::integrity(format!(
                "embedding {uid} has no metadata record"
            )));
        }
        for batch in rows.chunks(batch_size) {
            let vectors: Vec<&[f32]> = batch.iter().map(|(_, vector)| *vector).collect();
            let inserted = index.insert_batch(&vectors)?;
            for (label, (uid, _)) in inserted.zip(batch) {
                let mapped = labels.push(*uid)?;
                debug_assert_eq!(label, mapped);
            }
            if labels.len() != index.len() {
                return Err(SearchError::integrity(format!(
                    "label map has {} entries after inserting {} vectors",
                    labels.len(),
                    index.len()
                )));
            }
            info!(inserted = index.len(), total, "indexed batch");
        }
        Ok((index, labels))
    }

    /// Builds and writes the index and `<name>.txt` under `dir`.
    ///
    /// Nothing is written when the inputs fail the integrity checks.
    pub fn build_and_save(
        &self,
        metadata: &MetadataTable,
        embeddings: &EmbeddingTable,
        dir: &Path,
    ) -> Result<BuildReport> {
        let (index, labels) = self.build(metadata, embeddings)?;
        let index_path = self.index_path(dir);
        let labels_path = self.labels_path(dir);
        fs::create_dir_all(dir).with_context(|| format!("failed to create {:?}", dir))?;
        index.save(dir, &self.settings.index_name)?;
        labels.write_to(&labels_path)?;
        info!(
            count = index.len(),
            index = ?index_path,
            labels = ?labels_path,
            "saved ann index"
        );
        Ok(BuildReport {
            count: index.len(),
            dimension: index.dimension(),
            index_path,
            labels_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MetadataRecord;

    fn tables(uids: &[&str], extra_metadata: usize) -> (MetadataTable, EmbeddingTable) {
        let mut metadata = MetadataTable::default();
        let mut embeddings = EmbeddingTable::new(3);
        for (i, uid) in uids.iter().enumerate() {
            metadata.insert(MetadataRecord {
                cord_uid: uid.to_string(),
                title: None,
            });
            embeddings
                .insert(*uid, vec![i as f32, 1.0, -(i as f32)])
                .unwrap();
        }
        for i in 0..extra_metadata {
            metadata.insert(MetadataRecord {
                cord_uid: format!("orphan{i}"),
                title: None,
            });
        }
        (metadata, embeddings)
    }

    fn small_batches() -> IndexBuilder {
        IndexBuilder::new(BuildSettings {
            batch_size: 2,
            ..BuildSettings::default()
        })
    }

    #[test]
    fn count_mismatch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (metadata, embeddings) = tables(&["a", "b"], 1);
        let builder = small_batches();
        let err = builder
            .build_and_save(&metadata, &embeddings, dir.path())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SearchError>(),
            Some(SearchError::Integrity(_))
        ));
        assert!(!builder.index_path(dir.path()).exists());
        assert!(!builder.labels_path(dir.path()).exists());
    }

    #[test]
    fn mapping_line_n_is_uid_of_label_n() {
        let dir = tempfile::tempdir().unwrap();
        let uids = ["c", "a", "e", "b", "d"];
        let (metadata, embeddings) = tables(&uids, 0);
        let report = small_batches()
            .build_and_save(&metadata, &embeddings, dir.path())
            .unwrap();
        assert_eq!(report.count, 5);
        assert_eq!(report.dimension, 3);
        assert_eq!(report.index_path, dir.path().join("cord19-hnsw.bin"));

        let lines: Vec<String> = fs::read_to_string(&report.labels_path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
        assert_eq!(lines, uids);

        let index = HnswIndex::load(dir.path(), "cord19-hnsw").unwrap();
        for (label, uid) in uids.iter().enumerate() {
            assert_eq!(index.vector(label), embeddings.get(uid));
        }
    }

    #[test]
    fn stale_index_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let builder = small_batches();
        fs::write(builder.index_path(dir.path()), b"stale").unwrap();
        let (metadata, embeddings) = tables(&["x", "y", "z"], 0);
        builder
            .build_and_save(&metadata, &embeddings, dir.path())
            .unwrap();
        let index = HnswIndex::load(dir.path(), "cord19-hnsw").unwrap();
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn embedding_without_metadata_is_refused() {
        let (_, embeddings) = tables(&["a", "b"], 0);
        let mut metadata = MetadataTable::default();
        for uid in ["a", "z"] {
            metadata.insert(MetadataRecord {
                cord_uid: uid.to_string(),
                title: None,
            });
        }
        assert!(matches!(
            small_batches().build(&metadata, &embeddings),
            Err(SearchError::Integrity(_))
        ));
    }
}
