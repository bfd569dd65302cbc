use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use papersearch::api::{router, AppState};
use papersearch::highlighter::HttpHighlighter;
use papersearch::querylog::DEFAULT_QUEUE_CAPACITY;
use papersearch::related::RelatedPipeline;
use papersearch::reranker::HttpReranker;
use papersearch::retrieval::PgRetrievalSource;
use papersearch::{
    BuildSettings, Highlighter, QueryLogger, RelatedSearcher, RelatedSettings, Reranker,
    RetrievalSource, SearchPipeline, SearchSettings, TableName,
};
use tokio::runtime::Runtime;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "papersearch-api",
    about = "HTTP API for reranked paper search and related-article lookups"
)]
struct ServeCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "PAPERSEARCH_BIND", default_value = "127.0.0.1:8000")]
    bind: String,

    /// Postgres connection string (postgres://...).
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Schema holding the paragraph table.
    #[arg(long, env = "PAPERSEARCH_SCHEMA", default_value = "public")]
    schema: String,

    /// Paragraph table with a `content_tsv` column.
    #[arg(long, env = "PAPERSEARCH_TABLE", default_value = "paragraphs")]
    table: String,

    /// Candidates fetched from full-text search per query.
    #[arg(long, env = "PAPERSEARCH_RETRIEVAL_DEPTH", default_value_t = SearchSettings::default().retrieval_depth)]
    retrieval_depth: usize,

    /// Reranker scoring endpoint.
    #[arg(long, env = "PAPERSEARCH_RERANKER_URL")]
    reranker_url: String,

    /// Inputs per reranker request.
    #[arg(long, env = "PAPERSEARCH_RERANK_BATCH", default_value_t = SearchSettings::default().rerank_batch_size)]
    rerank_batch_size: usize,

    /// Reranker batches in flight per query.
    #[arg(long, env = "PAPERSEARCH_RERANK_WORKERS", default_value_t = SearchSettings::default().rerank_workers)]
    rerank_workers: usize,

    /// Characters of paragraph text sent to the reranker.
    #[arg(long, default_value_t = SearchSettings::default().max_content_chars)]
    max_content_chars: usize,

    /// Seconds before model-server requests time out.
    #[arg(long, env = "PAPERSEARCH_MODEL_TIMEOUT_SECS", default_value_t = 30)]
    model_timeout_secs: u64,

    /// Attempts per model-server request.
    #[arg(long, env = "PAPERSEARCH_MODEL_MAX_RETRIES", default_value_t = 3)]
    max_retries: usize,

    /// Highlighter endpoint; highlighting is skipped when unset.
    #[arg(long, env = "PAPERSEARCH_HIGHLIGHTER_URL")]
    highlighter_url: Option<String>,

    /// Highlight the leading results.
    #[arg(long, env = "PAPERSEARCH_HIGHLIGHT", default_value_t = true, action = ArgAction::Set)]
    highlight: bool,

    /// Results that receive highlights.
    #[arg(long, env = "PAPERSEARCH_HIGHLIGHT_MAX", default_value_t = SearchSettings::default().highlight_max)]
    highlight_max: usize,

    /// Serve `/related/:uid` from a prebuilt index.
    #[arg(long, env = "PAPERSEARCH_RELATED_SEARCH", default_value_t = false, action = ArgAction::Set)]
    related_search: bool,

    /// Directory holding the `<index-name>` index files and labels.
    #[arg(long, env = "PAPERSEARCH_INDEX_DIR", default_value = "index/cord19-hnsw-index")]
    index_dir: PathBuf,

    /// Index artifact stem.
    #[arg(long, env = "PAPERSEARCH_INDEX_NAME", default_value_t = BuildSettings::default().index_name)]
    index_name: String,

    /// Neighbors per related page.
    #[arg(long, default_value_t = RelatedSettings::default().page_size)]
    page_size: usize,

    /// Directory for `search.log` and `related.log`.
    #[arg(long, env = "PAPERSEARCH_LOG_DIR", default_value = "logs")]
    log_dir: PathBuf,

    /// Log records queued ahead of the writer before new ones are dropped.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    log_queue_capacity: usize,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = ServeCli::parse();
    let timeout = Duration::from_secs(cli.model_timeout_secs.max(1));

    // blocking clients own a runtime of their own and must be dropped outside ours
    let http_reranker = HttpReranker::new(cli.reranker_url.clone(), timeout, cli.max_retries)?;
    info!(endpoint = http_reranker.endpoint(), "reranker configured");
    let reranker: Arc<dyn Reranker> = Arc::new(http_reranker);
    let highlighter: Option<Arc<dyn Highlighter>> = match (&cli.highlighter_url, cli.highlight) {
        (Some(url), true) => {
            let http_highlighter = HttpHighlighter::new(url.clone(), timeout, cli.max_retries)?;
            info!(endpoint = http_highlighter.endpoint(), "highlighter configured");
            Some(Arc::new(http_highlighter))
        }
        (None, true) => {
            warn!("highlighting requested but no highlighter URL configured");
            None
        }
        _ => None,
    };

    let searcher = if cli.related_search {
        let searcher = RelatedSearcher::load(&cli.index_dir, &cli.index_name)?;
        info!(elements = searcher.len(), dir = ?cli.index_dir, "loaded related index");
        Some(Arc::new(searcher))
    } else {
        None
    };

    let runtime = Runtime::new().context("failed to start tokio runtime")?;
    runtime.block_on(serve(cli, Arc::clone(&reranker), highlighter.clone(), searcher))?;
    drop(runtime);
    Ok(())
}

async fn serve(
    cli: ServeCli,
    reranker: Arc<dyn Reranker>,
    highlighter: Option<Arc<dyn Highlighter>>,
    searcher: Option<Arc<RelatedSearcher>>,
) -> Result<()> {
    let table = TableName::new(cli.schema, cli.table)?;
    let retrieval: Arc<dyn RetrievalSource> =
        Arc::new(PgRetrievalSource::connect(&cli.database_url, &table).await?);
    let (logger, log_writer) = QueryLogger::spawn_with_capacity(&cli.log_dir, cli.log_queue_capacity)?;

    let settings = SearchSettings {
        retrieval_depth: cli.retrieval_depth.max(1),
        max_content_chars: cli.max_content_chars.max(1),
        rerank_batch_size: cli.rerank_batch_size.max(1),
        rerank_workers: cli.rerank_workers.max(1),
        highlight: cli.highlight,
        highlight_max: cli.highlight_max,
    };
    let state = AppState {
        search: Arc::new(SearchPipeline::new(
            Arc::clone(&retrieval),
            reranker,
            highlighter,
            settings,
            logger.clone(),
        )),
        related: Arc::new(RelatedPipeline::new(
            searcher,
            retrieval,
            logger.clone(),
            cli.page_size.max(1),
        )),
        logger,
    };
    let app = router(state);

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "papersearch-api listening");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown")?;

    log_writer.await.context("query log writer failed")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
