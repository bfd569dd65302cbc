//! Free-text search: retrieve, rerank, deduplicate, highlight.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::article::{truncate_chars, Article};
use crate::config::SearchSettings;
use crate::error::{SearchError, Stage};
use crate::highlighter::{highlight_window, Highlighter};
use crate::querylog::{LogStream, QueryLogger};
use crate::reranker::{score_in_batches, Reranker};
use crate::retrieval::RetrievalSource;

/// Body of a search response.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    /// Identifier correlating later click events.
    pub query_id: Uuid,
    /// Deduplicated results, best first.
    pub response: Vec<Article>,
}

/// Request-time search pipeline over shared, read-only collaborators.
pub struct SearchPipeline {
    retrieval: Arc<dyn RetrievalSource>,
    reranker: Arc<dyn Reranker>,
    highlighter: Option<Arc<dyn Highlighter>>,
    settings: SearchSettings,
    logger: QueryLogger,
}

impl SearchPipeline {
    /// Assembles the pipeline. Highlighting runs only when `settings.highlight`
    /// is set and a highlighter is supplied.
    pub fn new(
        retrieval: Arc<dyn RetrievalSource>,
        reranker: Arc<dyn Reranker>,
        highlighter: Option<Arc<dyn Highlighter>>,
        settings: SearchSettings,
        logger: QueryLogger,
    ) -> Self {
        Self {
            retrieval,
            reranker,
            highlighter,
            settings,
            logger,
        }
    }

    /// Active settings.
    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Runs `query` end to end and logs the response.
    pub async fn search(
        &self,
        query: &str,
        facets: &[String],
        client_ip: Option<String>,
    ) -> Result<SearchResponse, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::InvalidRequest("query must not be empty".to_string()));
        }

        let hits = self
            .retrieval
            .search(query, self.settings.retrieval_depth)
            .await
            .map_err(|err| SearchError::upstream(Stage::Retrieval, err))?;
        let inputs: Vec<String> = hits
            .iter()
            .map(|hit| rerank_input(query, truncate_chars(&hit.content, self.settings.max_content_chars)))
            .collect();

        let started = Instant::now();
        let scores = self.rerank(inputs).await?;
        if scores.len() != hits.len() {
            return Err(SearchError::upstream(
                Stage::Reranker,
                anyhow!("{} scores for {} hits", scores.len(), hits.len()),
            ));
        }
        debug!(hits = hits.len(), elapsed_ms = started.elapsed().as_millis() as u64, "reranked");

        let mut articles: Vec<Article> = hits
            .into_iter()
            .zip(scores)
            .map(|(hit, score)| Article::from_hit(hit, score))
            .collect();
        sort_by_score(&mut articles);
        let articles = dedupe_by_base_id(articles);
        let articles = self.highlight(query, articles).await?;

        let query_id = Uuid::new_v4();
        info!(%query_id, results = articles.len(), "search served");
        self.logger
            .log_query(LogStream::Search, query_id, query, facets, None, client_ip, &articles);
        Ok(SearchResponse {
            query_id,
            response: articles,
        })
    }

    async fn rerank(&self, inputs: Vec<String>) -> Result<Vec<f32>, SearchError> {
        let reranker = Arc::clone(&self.reranker);
        let batch_size = self.settings.rerank_batch_size;
        let workers = self.settings.rerank_workers;
        tokio::task::spawn_blocking(move || {
            score_in_batches(reranker.as_ref(), &inputs, batch_size, workers)
        })
        .await
        .map_err(|err| SearchError::upstream(Stage::Reranker, anyhow!("rerank task failed: {err}")))?
        .map_err(|err| SearchError::upstream(Stage::Reranker, err))
    }

    async fn highlight(&self, query: &str, mut articles: Vec<Article>) -> Result<Vec<Article>, SearchError> {
        let highlighter = match (&self.highlighter, self.settings.highlight) {
            (Some(highlighter), true) => Arc::clone(highlighter),
            _ => return Ok(articles),
        };
        let window = self.settings.highlight_max;
        let query = query.to_string();
        let started = Instant::now();
        let articles = tokio::task::spawn_blocking(move || {
            let outcome = highlight_window(highlighter.as_ref(), &query, &mut articles, window);
            outcome.map(|()| articles)
        })
        .await
        .map_err(|err| SearchError::upstream(Stage::Highlighter, anyhow!("highlight task failed: {err}")))?
        .map_err(|err| SearchError::upstream(Stage::Highlighter, err))?;
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "highlighted");
        Ok(articles)
    }
}

/// Reranker prompt for one candidate.
pub fn rerank_input(query: &str, content: &str) -> String {
    format!("Query: {query} Document: {content} Relevant:")
}

/// Sorts by descending score; equal scores keep their current order.
pub fn sort_by_score(articles: &mut [Article]) {
    articles.sort_by(|a, b| b.score.total_cmp(&a.score));
}

/// Keeps the first article seen for each base id.
pub fn dedupe_by_base_id(articles: Vec<Article>) -> Vec<Article> {
    let mut seen = HashSet::new();
    articles
        .into_iter()
        .filter(|article| seen.insert(article.base_id().to_string()))
        .collect()
}
