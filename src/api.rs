//! HTTP surface for search, related articles, and click feedback.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::SearchError;
use crate::querylog::{ClickEvent, LogStream, QueryLogger};
use crate::related::{RelatedPipeline, RelatedResponse};
use crate::search::{SearchPipeline, SearchResponse};

/// Shared handles for every request.
#[derive(Clone)]
pub struct AppState {
    /// Free-text search pipeline.
    pub search: Arc<SearchPipeline>,
    /// Related-article pipeline.
    pub related: Arc<RelatedPipeline>,
    /// Click log sink.
    pub logger: QueryLogger,
}

/// Error payload for non-2xx responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable reason.
    pub detail: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

#[derive(Debug, Deserialize)]
struct RelatedParams {
    #[serde(default = "first_page")]
    page_number: usize,
}

fn first_page() -> usize {
    1
}

/// Builds the router with all routes bound to `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/search", get(search_handler))
        .route("/search/log/clicked", post(search_clicked))
        .route("/related/:uid", get(related_handler))
        .route("/related/log/clicked", post(related_clicked))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn search_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    params: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let Query(params) = params.map_err(query_rejection)?;
    let mut query = None;
    let mut facets = Vec::new();
    for (key, value) in params {
        match key.as_str() {
            "query" => query = Some(value),
            "facets" => facets.push(value),
            _ => {}
        }
    }
    let query = query.ok_or_else(|| {
        error_response(SearchError::InvalidRequest("missing query parameter".to_string()))
    })?;
    let ip = client_ip(&headers, connect.map(|ConnectInfo(addr)| addr));
    state
        .search
        .search(&query, &facets, ip)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn related_handler(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    params: Result<Query<RelatedParams>, QueryRejection>,
) -> Result<Json<RelatedResponse>, ApiError> {
    let Query(params) = params.map_err(query_rejection)?;
    let ip = client_ip(&headers, connect.map(|ConnectInfo(addr)| addr));
    state
        .related
        .related(&uid, params.page_number, ip)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn search_clicked(State(state): State<AppState>, Json(event): Json<ClickEvent>) -> StatusCode {
    state.logger.log_click(LogStream::Search, event);
    StatusCode::OK
}

async fn related_clicked(State(state): State<AppState>, Json(event): Json<ClickEvent>) -> StatusCode {
    state.logger.log_click(LogStream::Related, event);
    StatusCode::OK
}

/// First `X-Forwarded-For` hop, else the peer address.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

fn query_rejection(rejection: QueryRejection) -> ApiError {
    error_response(SearchError::InvalidRequest(format!(
        "invalid query parameters: {}",
        rejection.body_text()
    )))
}

fn error_response(err: SearchError) -> ApiError {
    let (status, detail) = match &err {
        SearchError::NotFound(_) => (StatusCode::NOT_FOUND, "Item not found".to_string()),
        SearchError::FeatureDisabled => {
            (StatusCode::NOT_FOUND, "Related search not enabled".to_string())
        }
        SearchError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        SearchError::Upstream { .. } | SearchError::Integrity(_) => {
            error!(error = %err, "request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    };
    (status, Json(ErrorBody { detail }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ann::{HnswIndex, LabelMap};
    use crate::article::{ArticleFields, Hit};
    use crate::config::SearchSettings;
    use crate::related::RelatedSearcher;
    use crate::reranker::Reranker;
    use crate::retrieval::RetrievalSource;
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    struct TwoDocs;

    #[async_trait]
    impl RetrievalSource for TwoDocs {
        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<Hit>> {
            Ok(vec![
                Hit::new("a.0", "first", 1.0, ArticleFields::default())?,
                Hit::new("b.0", "second", 0.5, ArticleFields::default())?,
            ])
        }

        async fn resolve(&self, uid: &str) -> Result<Option<Hit>> {
            Ok(Some(Hit::new(format!("{uid}.0"), "text", 0.0, ArticleFields::default())?))
        }
    }

    struct Flat;

    impl Reranker for Flat {
        fn predict(&self, inputs: &[String]) -> Result<Vec<f32>> {
            Ok(vec![0.5; inputs.len()])
        }
    }

    fn state(with_index: bool) -> AppState {
        let retrieval: Arc<dyn RetrievalSource> = Arc::new(TwoDocs);
        let searcher = with_index.then(|| {
            let mut index = HnswIndex::new(2, 2, 16, 200).unwrap();
            let mut labels = LabelMap::new();
            for (uid, v) in [("a", [0.0f32, 0.0]), ("b", [1.0, 1.0])] {
                index.insert(&v).unwrap();
                labels.push(uid).unwrap();
            }
            Arc::new(RelatedSearcher::new(Arc::new(index), labels).unwrap())
        });
        let logger = QueryLogger::disabled();
        AppState {
            search: Arc::new(SearchPipeline::new(
                retrieval.clone(),
                Arc::new(Flat),
                None,
                SearchSettings::default(),
                logger.clone(),
            )),
            related: Arc::new(RelatedPipeline::new(searcher, retrieval, logger.clone(), 20)),
            logger,
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let (status, _) = get_json(router(state(false)), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn search_returns_query_id_and_results() {
        let (status, body) = get_json(router(state(false)), "/search?query=masks&facets=year").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["query_id"].is_string());
        let ids: Vec<&str> = body["response"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["a.0", "b.0"]);
        assert_eq!(body["response"][0]["url"], crate::article::DEFAULT_ARTICLE_URL);
    }

    #[tokio::test]
    async fn search_without_query_is_bad_request() {
        let (status, body) = get_json(router(state(false)), "/search").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("query"));
    }

    #[tokio::test]
    async fn related_when_disabled_is_not_found() {
        let (status, body) = get_json(router(state(false)), "/related/a").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Related search not enabled");
    }

    #[tokio::test]
    async fn related_unknown_uid_is_not_found() {
        let (status, body) = get_json(router(state(true)), "/related/zzz?page_number=1").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Item not found");
    }

    #[tokio::test]
    async fn related_page_zero_is_bad_request() {
        let (status, _) = get_json(router(state(true)), "/related/a?page_number=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_page_number_gets_a_json_error() {
        for uri in ["/related/a?page_number=abc", "/related/a?page_number=-1"] {
            let (status, body) = get_json(router(state(true)), uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert!(body["detail"].as_str().unwrap().contains("invalid query parameters"), "{uri}: {body}");
        }
    }

    #[tokio::test]
    async fn related_returns_neighbors_nearest_first() {
        let (status, body) = get_json(router(state(true)), "/related/a").await;
        assert_eq!(status, StatusCode::OK);
        let response = body["response"].as_array().unwrap();
        assert_eq!(response.len(), 2);
        assert_eq!(response[0]["id"], "a");
        assert_eq!(response[0]["distance"], 0.0);
    }

    #[tokio::test]
    async fn click_is_accepted() {
        let payload = serde_json::json!({
            "query_id": uuid::Uuid::new_v4(),
            "result_id": "a",
            "position": 0
        });
        for uri in ["/search/log/clicked", "/related/log/clicked"] {
            let response = router(state(false))
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri(uri)
                        .header("content-type", "application/json")
                        .body(Body::from(payload.to_string()))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{uri}");
        }
    }

    #[test]
    fn forwarded_for_wins_over_peer() {
        let mut headers = HeaderMap::new();
        let peer: SocketAddr = "192.168.0.9:5555".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(peer)).as_deref(), Some("192.168.0.9"));
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers, Some(peer)).as_deref(), Some("203.0.113.7"));
        assert_eq!(client_ip(&HeaderMap::new(), None), None);
    }
}
