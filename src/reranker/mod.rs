//! Neural relevance scoring for retrieval candidates.

mod batch;
mod http;

use anyhow::Result;

pub use batch::score_in_batches;
pub use http::HttpReranker;

/// Scores model inputs; higher means more relevant.
///
/// Implementations must be length- and order-preserving: output `i` scores input `i`.
pub trait Reranker: Send + Sync {
    /// Scores one batch of fully rendered model inputs.
    fn predict(&self, inputs: &[String]) -> Result<Vec<f32>>;
}
