//! Paginated related-article lookup over the ANN index.

use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ann::{AnnIndex, HnswIndex, LabelMap};
use crate::article::RelatedArticle;
use crate::error::{SearchError, Stage};
use crate::querylog::{LogStream, QueryLogger};
use crate::retrieval::RetrievalSource;

/// One page of neighbors, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    number: usize,
    size: usize,
}

impl Page {
    /// Validates a page request.
    pub fn new(number: usize, size: usize) -> Result<Self, SearchError> {
        if number == 0 {
            return Err(SearchError::InvalidRequest(
                "page_number starts at 1".to_string(),
            ));
        }
        if size == 0 {
            return Err(SearchError::InvalidRequest(
                "page size must be positive".to_string(),
            ));
        }
        Ok(Self { number, size })
    }

    /// Neighbors fetched to cover every page up to this one.
    pub fn k(&self) -> usize {
        self.size.saturating_mul(self.number)
    }

    /// Search breadth: twice `k`, kept within `[k, element_count]`.
    pub fn ef(&self, element_count: usize) -> usize {
        let k = self.k();
        k.saturating_mul(2).min(element_count).max(k)
    }

    /// Slice of the neighbor list belonging to this page, clamped to `len`.
    pub fn window(&self, len: usize) -> Range<usize> {
        let start = (self.number - 1).saturating_mul(self.size).min(len);
        let end = self.k().min(len);
        start..end
    }
}

/// ANN index paired with its label mapping.
pub struct RelatedSearcher {
    index: Arc<dyn AnnIndex>,
    labels: LabelMap,
}

impl RelatedSearcher {
    /// Pairs an index with its labels; both must cover the same elements.
    pub fn new(index: Arc<dyn AnnIndex>, labels: LabelMap) -> Result<Self, SearchError> {
        if index.len() != labels.len() {
            return Err(SearchError::integrity(format!(
                "index holds {} vectors but the label map has {} uids",
                index.len(),
                labels.len()
            )));
        }
        Ok(Self { index, labels })
    }

    /// Loads the index called `name` and its `<dir>/<name>.txt` labels.
    pub fn load(dir: &Path, name: &str) -> Result<Self> {
        let labels_path = dir.join(format!("{name}.txt"));
        let index = HnswIndex::load(dir, name)
            .with_context(|| format!("failed to load ann index {name} from {:?}", dir))?;
        let labels = LabelMap::read_from(&labels_path)
            .with_context(|| format!("failed to load label map {:?}", labels_path))?;
        Ok(Self::new(Arc::new(index), labels)?)
    }

    /// Indexed element count.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True when the index is empty.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Whether `uid` is indexed.
    pub fn contains(&self, uid: &str) -> bool {
        self.labels.label(uid).is_some()
    }

    /// Uids and distances for `page` of `uid`'s neighbors, nearest first.
    pub fn neighbors(&self, uid: &str, page: Page) -> Result<Vec<(String, f32)>, SearchError> {
        let label = self
            .labels
            .label(uid)
            .ok_or_else(|| SearchError::NotFound(uid.to_string()))?;
        let vector = self.index.vector(label).ok_or_else(|| {
            SearchError::integrity(format!("label {label} for {uid} has no stored vector"))
        })?;
        let k = page.k();
        let ef = page.ef(self.index.len());
        let found = self
            .index
            .query_k_nearest(vector, k, ef)
            .map_err(|err| SearchError::upstream(Stage::Index, err))?;
        debug!(uid, k, ef, found = found.len(), "ann query");

        let window = page.window(found.len());
        found[window]
            .iter()
            .map(|neighbor| {
                self.labels
                    .uid(neighbor.label)
                    .map(|uid| (uid.to_string(), neighbor.distance))
                    .ok_or_else(|| {
                        SearchError::integrity(format!("label {} has no uid", neighbor.label))
                    })
            })
            .collect()
    }
}

/// Body of a related-article response.
#[derive(Debug, Clone, Serialize)]
pub struct RelatedResponse {
    /// Identifier correlating later click events.
    pub query_id: Uuid,
    /// Resolved neighbors, nearest first.
    pub response: Vec<RelatedArticle>,
}

/// Related-article requests: ANN lookup, re-resolution, logging.
pub struct RelatedPipeline {
    searcher: Option<Arc<RelatedSearcher>>,
    retrieval: Arc<dyn RetrievalSource>,
    logger: QueryLogger,
    page_size: usize,
}

impl RelatedPipeline {
    /// Builds the pipeline; `searcher = None` disables related search.
    pub fn new(
        searcher: Option<Arc<RelatedSearcher>>,
        retrieval: Arc<dyn RetrievalSource>,
        logger: QueryLogger,
        page_size: usize,
    ) -> Self {
        Self {
            searcher,
            retrieval,
            logger,
            page_size,
        }
    }

    /// Whether an index is loaded.
    pub fn enabled(&self) -> bool {
        self.searcher.is_some()
    }

    /// Returns page `page_number` of articles related to `uid`.
    pub async fn related(
        &self,
        uid: &str,
        page_number: usize,
        client_ip: Option<String>,
    ) -> Result<RelatedResponse, SearchError> {
        let searcher = self.searcher.as_ref().ok_or(SearchError::FeatureDisabled)?;
        let page = Page::new(page_number, self.page_size)?;
        let neighbors = searcher.neighbors(uid, page)?;

        let resolved = join_all(
            neighbors
                .iter()
                .map(|(neighbor_uid, _)| self.retrieval.resolve(neighbor_uid)),
        )
        .await;
        let mut response = Vec::with_capacity(neighbors.len());
        for ((neighbor_uid, distance), outcome) in neighbors.into_iter().zip(resolved) {
            match outcome {
                Ok(Some(hit)) => response.push(RelatedArticle::from_hit(hit, distance)),
                Ok(None) => debug!(uid = %neighbor_uid, "neighbor no longer in corpus"),
                Err(err) => {
                    warn!(uid = %neighbor_uid, error = %format!("{err:#}"), "failed to resolve neighbor")
                }
            }
        }

        let query_id = Uuid::new_v4();
        self.logger.log_query(
            LogStream::Related,
            query_id,
            uid,
            &[],
            Some(page_number),
            client_ip,
            &response,
        );
        Ok(RelatedResponse { query_id, response })
    }
}
