//! Tunable knobs for the search pipeline, related lookups, and the offline index build.

/// Bounds on the retrieve-rerank-highlight pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchSettings {
    /// Candidates requested from the retrieval source per query.
    pub retrieval_depth: usize,
    /// Characters of hit content kept in each model input.
    pub max_content_chars: usize,
    /// Inputs per reranker call.
    pub rerank_batch_size: usize,
    /// Reranker batches scored concurrently.
    pub rerank_workers: usize,
    /// Whether deduplicated results are highlighted at all.
    pub highlight: bool,
    /// Leading results that receive highlights.
    pub highlight_max: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            retrieval_depth: 96,
            max_content_chars: 5000,
            rerank_batch_size: 8,
            rerank_workers: 1,
            highlight: true,
            highlight_max: 10,
        }
    }
}

/// Paging for related-article lookups.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelatedSettings {
    /// Neighbors per page.
    pub page_size: usize,
}

impl Default for RelatedSettings {
    fn default() -> Self {
        Self { page_size: 20 }
    }
}

/// HNSW construction parameters for the offline build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildSettings {
    /// Graph connectivity (`M`).
    pub m: usize,
    /// Build-time candidate list size.
    pub ef_construction: usize,
    /// Vectors inserted per flush.
    pub batch_size: usize,
    /// Artifact file stem (`<name>.bin`, `<name>.hnsw.*`, `<name>.txt`).
    pub index_name: String,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            batch_size: 200,
            index_name: "cord19-hnsw".to_string(),
        }
    }
}
