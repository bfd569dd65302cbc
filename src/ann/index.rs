//! `hnsw_rs` graph plus the raw vectors it was built from.
//!
//! An index named `<name>` in `<dir>` is three files:
//!
//! ```text
//! <name>.bin          magic "PSHW" | version u16 | dimension u32 | count u32 | m u32 | ef_construction u32 | max_layer u32
//! <name>.hnsw.graph   hnsw_rs graph dump
//! <name>.hnsw.data    hnsw_rs point dump
//! ```
//!
//! The header is little-endian and is checked against the reloaded graph.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hnsw_rs::hnswio::HnswIo;
use hnsw_rs::prelude::*;
use tracing::debug;

use super::{AnnIndex, Neighbor};
use crate::error::SearchError;

const MAGIC: [u8; 4] = *b"PSHW";
const VERSION: u16 = 2;
/// Layer cap handed to `hnsw_rs`.
pub const MAX_LAYER: usize = 16;

/// L2 HNSW index with dense labels.
pub struct HnswIndex {
    hnsw: Hnsw<'static, f32, DistL2>,
    vectors: Vec<Vec<f32>>,
    dimension: usize,
    m: usize,
    ef_construction: usize,
}

impl std::fmt::Debug for HnswIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswIndex")
            .field("len", &self.vectors.len())
            .field("dimension", &self.dimension)
            .field("m", &self.m)
            .field("ef_construction", &self.ef_construction)
            .finish_non_exhaustive()
    }
}

impl HnswIndex {
    /// Allocates an empty index sized for `capacity` vectors.
    pub fn new(
        dimension: usize,
        capacity: usize,
        m: usize,
        ef_construction: usize,
    ) -> Result<Self, SearchError> {
        if dimension == 0 {
            return Err(SearchError::integrity("index dimension must be positive"));
        }
        if m == 0 || ef_construction == 0 {
            return Err(SearchError::integrity(format!(
                "invalid construction parameters m={m} ef_construction={ef_construction}"
            )));
        }
        let hnsw = Hnsw::<f32, DistL2>::new(m, capacity.max(1), MAX_LAYER, ef_construction, DistL2 {});
        Ok(Self {
            hnsw,
            vectors: Vec::with_capacity(capacity),
            dimension,
            m,
            ef_construction,
        })
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), SearchError> {
        if vector.len() != self.dimension {
            return Err(SearchError::integrity(format!(
                "vector has {} components, index expects {}",
                vector.len(),
                self.dimension
            )));
        }
        Ok(())
    }

    /// Inserts `vector` under the next free label and returns that label.
    pub fn insert(&mut self, vector: &[f32]) -> Result<usize, SearchError> {
        self.check_dimension(vector)?;
        let label = self.vectors.len();
        self.hnsw.insert((vector, label));
        self.vectors.push(vector.to_vec());
        Ok(label)
    }

    /// Inserts a batch across the `hnsw_rs` thread pool and returns the labels
    /// it was assigned. Nothing is inserted when any vector has the wrong
    /// dimension.
    pub fn insert_batch(&mut self, batch: &[&[f32]]) -> Result<Range<usize>, SearchError> {
        for vector in batch {
            self.check_dimension(vector)?;
        }
        let start = self.vectors.len();
        self.vectors.extend(batch.iter().map(|v| v.to_vec()));
        let pending: Vec<(&Vec<f32>, usize)> = self.vectors[start..]
            .iter()
            .enumerate()
            .map(|(offset, vector)| (vector, start + offset))
            .collect();
        self.hnsw.parallel_insert(&pending);
        Ok(start..self.vectors.len())
    }

    /// Graph connectivity used at construction.
    pub fn m(&self) -> usize {
        self.m
    }

    /// Build-time candidate list size.
    pub fn ef_construction(&self) -> usize {
        self.ef_construction
    }

    /// Header file of the index called `name` in `dir`.
    pub fn header_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.bin"))
    }

    /// Every file making up the index called `name` in `dir`.
    pub fn artifact_paths(dir: &Path, name: &str) -> [PathBuf; 3] {
        [
            Self::header_path(dir, name),
            dir.join(format!("{name}.hnsw.graph")),
            dir.join(format!("{name}.hnsw.data")),
        ]
    }

    /// Writes the header and graph dump as `name` under `dir`, replacing any
    /// existing index of that name.
    pub fn save(&self, dir: &Path, name: &str) -> Result<()> {
        for path in Self::artifact_paths(dir, name) {
            remove_if_exists(&path)?;
        }
        let header_path = Self::header_path(dir, name);
        let file = File::create(&header_path)
            .with_context(|| format!("failed to create {:?}", header_path))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        for value in [
            self.dimension,
            self.vectors.len(),
            self.m,
            self.ef_construction,
            MAX_LAYER,
        ] {
            let value = u32::try_from(value).context("index header value exceeds u32")?;
            writer.write_all(&value.to_le_bytes())?;
        }
        writer
            .flush()
            .with_context(|| format!("failed to write {:?}", header_path))?;

        let dumped = self
            .hnsw
            .file_dump(dir, name)
            .with_context(|| format!("failed to dump graph {name} into {:?}", dir))?;
        anyhow::ensure!(
            dumped == name,
            "graph dump for {name} was written as {dumped} in {:?}",
            dir
        );
        Ok(())
    }

    /// Reads an index written by [`HnswIndex::save`].
    pub fn load(dir: &Path, name: &str) -> Result<Self> {
        let header_path = Self::header_path(dir, name);
        let file = File::open(&header_path)
            .with_context(|| format!("failed to open {:?}", header_path))?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        read_exact(&mut reader, &mut magic, "magic")?;
        if magic != MAGIC {
            return Err(
                SearchError::integrity(format!("{:?} is not an index file", header_path)).into(),
            );
        }
        let mut version = [0u8; 2];
        read_exact(&mut reader, &mut version, "version")?;
        let version = u16::from_le_bytes(version);
        if version != VERSION {
            return Err(SearchError::integrity(format!(
                "{:?} has unsupported index version {version}",
                header_path
            ))
            .into());
        }
        let dimension = read_u32(&mut reader, "dimension")?;
        let count = read_u32(&mut reader, "count")?;
        let m = read_u32(&mut reader, "m")?;
        let ef_construction = read_u32(&mut reader, "ef_construction")?;
        let _max_layer = read_u32(&mut reader, "max_layer")?;
        let mut trailing = [0u8; 1];
        if reader.read(&mut trailing)? != 0 {
            return Err(
                SearchError::integrity(format!("{:?} has trailing bytes", header_path)).into(),
            );
        }

        // the reloaded graph borrows its loader, which must outlive the index
        let loader: &'static mut HnswIo = Box::leak(Box::new(HnswIo::new(dir, name)));
        let hnsw: Hnsw<'static, f32, DistL2> = loader
            .load_hnsw()
            .with_context(|| format!("failed to reload graph {name} from {:?}", dir))?;
        if hnsw.get_nb_point() != count {
            return Err(SearchError::integrity(format!(
                "header records {count} vectors but graph {name} holds {}",
                hnsw.get_nb_point()
            ))
            .into());
        }

        let mut vectors: Vec<Vec<f32>> = vec![Vec::new(); count];
        for point in hnsw.get_point_indexation() {
            let label = point.get_origin_id();
            let slot = vectors.get_mut(label).ok_or_else(|| {
                SearchError::integrity(format!("graph {name} has out-of-range label {label}"))
            })?;
            *slot = point.get_v().to_vec();
        }
        if let Some(label) = vectors.iter().position(|v| v.len() != dimension) {
            return Err(SearchError::integrity(format!(
                "graph {name} has no {dimension}-component vector for label {label}"
            ))
            .into());
        }

        debug!(dir = ?dir, name, count, dimension, "loaded ann index");
        Ok(Self {
            hnsw,
            vectors,
            dimension,
            m,
            ef_construction,
        })
    }
}

impl AnnIndex for HnswIndex {
    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn vector(&self, label: usize) -> Option<&[f32]> {
        self.vectors.get(label).map(Vec::as_slice)
    }

    fn query_k_nearest(&self, vector: &[f32], k: usize, ef: usize) -> Result<Vec<Neighbor>> {
        anyhow::ensure!(
            vector.len() == self.dimension,
            "query has {} components, index expects {}",
            vector.len(),
            self.dimension
        );
        let k = k.min(self.vectors.len());
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut neighbors: Vec<Neighbor> = self
            .hnsw
            .search(vector, k, ef.max(k))
            .into_iter()
            .map(|n| Neighbor {
                label: n.d_id,
                distance: n.distance,
            })
            .collect();
        neighbors.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.label.cmp(&b.label))
        });
        Ok(neighbors)
    }
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], field: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|err| {
        if err.kind() == ErrorKind::UnexpectedEof {
            anyhow::Error::from(SearchError::integrity(format!(
                "index file truncated while reading {field}"
            )))
        } else {
            anyhow::Error::new(err).context(format!("failed to read {field}"))
        }
    })
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to remove stale {:?}", path)),
    }
}

fn read_u32<R: Read>(reader: &mut R, field: &str) -> Result<usize> {
    let mut bytes = [0u8; 4];
    read_exact(reader, &mut bytes, field)?;
    Ok(u32::from_le_bytes(bytes) as usize)
}
