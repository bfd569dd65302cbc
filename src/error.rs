//! Request-facing error taxonomy shared by the search and related pipelines.

use std::fmt;

use thiserror::Error;

/// External collaborator whose call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Full-text retrieval source.
    Retrieval,
    /// Neural reranker.
    Reranker,
    /// Passage highlighter.
    Highlighter,
    /// ANN index query.
    Index,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Retrieval => "retrieval",
            Stage::Reranker => "reranker",
            Stage::Highlighter => "highlighter",
            Stage::Index => "ann index",
        };
        f.write_str(name)
    }
}

/// Failures surfaced by the search services.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The requested identifier is unknown.
    #[error("{0} not found")]
    NotFound(String),

    /// Related-article search is switched off by configuration.
    #[error("related search not enabled")]
    FeatureDisabled,

    /// An external collaborator call failed.
    #[error("{stage} call failed: {detail}")]
    Upstream {
        /// Which collaborator failed.
        stage: Stage,
        /// Rendered error chain.
        detail: String,
    },

    /// Inputs or persisted artifacts disagree with each other.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// The request itself is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl SearchError {
    /// Wraps a collaborator error, keeping its full context chain.
    pub fn upstream(stage: Stage, err: anyhow::Error) -> Self {
        SearchError::Upstream {
            stage,
            detail: format!("{err:#}"),
        }
    }

    /// Builds an integrity error from any displayable message.
    pub fn integrity(message: impl Into<String>) -> Self {
        SearchError::Integrity(message.into())
    }
}
