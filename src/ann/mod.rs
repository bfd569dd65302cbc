//! Approximate nearest-neighbor index over document embeddings.
//!
//! Labels are dense `0..len` integers assigned in insertion order; the
//! [`LabelMap`] built alongside the index translates them back to uids.

mod builder;
mod index;
mod labels;

use anyhow::Result;

pub use builder::{BuildReport, IndexBuilder};
pub use index::{HnswIndex, MAX_LAYER};
pub use labels::LabelMap;

/// One search result: a label and its distance from the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Label assigned at insertion.
    pub label: usize,
    /// L2 distance to the query vector.
    pub distance: f32,
}

/// Read-only view of a built index shared between requests.
pub trait AnnIndex: Send + Sync {
    /// Number of indexed vectors.
    fn len(&self) -> usize;

    /// True when nothing is indexed.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vector component count.
    fn dimension(&self) -> usize;

    /// Stored vector for `label`.
    fn vector(&self, label: usize) -> Option<&[f32]>;

    /// Up to `k` nearest labels to `vector`, ascending by distance.
    ///
    /// `ef` is the search breadth for this query only.
    fn query_k_nearest(&self, vector: &[f32], k: usize, ef: usize) -> Result<Vec<Neighbor>>;
}
