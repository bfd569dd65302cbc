//! Reranker client for an HTTP model server.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::Reranker;
use crate::client::JsonEndpoint;

/// Blocking reranker client that posts rendered inputs to a scoring endpoint.
#[derive(Clone)]
pub struct HttpReranker {
    endpoint: JsonEndpoint,
}

impl HttpReranker {
    /// Builds a client for the scoring service at `endpoint`.
    pub fn new(endpoint: String, timeout: Duration, max_retries: usize) -> Result<Self> {
        Ok(Self {
            endpoint: JsonEndpoint::new(endpoint, timeout, max_retries)?,
        })
    }

    /// Scoring service URL.
    pub fn endpoint(&self) -> &str {
        self.endpoint.endpoint()
    }
}

impl Reranker for HttpReranker {
    fn predict(&self, inputs: &[String]) -> Result<Vec<f32>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let response: ScoreResponse = self.endpoint.post(&ScoreRequest { inputs })?;
        anyhow::ensure!(
            response.scores.len() == inputs.len(),
            "reranker returned {} scores for {} inputs",
            response.scores.len(),
            inputs.len()
        );
        Ok(response.scores)
    }
}

#[derive(Serialize)]
struct ScoreRequest<'a> {
    inputs: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    scores: Vec<f32>,
}
