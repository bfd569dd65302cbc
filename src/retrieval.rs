//! Full-text retrieval source: candidate search and by-identifier resolution.
//!
//! The Postgres implementation expects one row per paragraph:
//!
//! ```sql
//! CREATE TABLE paragraphs (
//!     doc_id TEXT PRIMARY KEY,          -- "<base_id>.<paragraph_index>"
//!     base_id TEXT NOT NULL,
//!     paragraph_index INTEGER NOT NULL,
//!     content TEXT NOT NULL,
//!     title TEXT, doi TEXT, source_x TEXT, authors TEXT[],
//!     abstract TEXT, journal TEXT, url TEXT, publish_time TEXT,
//!     content_tsv TSVECTOR GENERATED ALWAYS AS (to_tsvector('english', content)) STORED
//! );
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_postgres::{Client, NoTls, Row};
use tracing::error;

use crate::article::{ArticleFields, Hit};
use crate::table::TableName;

/// Source of candidate hits for a query and of documents by identifier.
#[async_trait]
pub trait RetrievalSource: Send + Sync {
    /// Returns up to `limit` hits for `query`, best retrieval score first.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Hit>>;

    /// Looks up a document by its base identifier; `None` when it no longer exists.
    async fn resolve(&self, uid: &str) -> Result<Option<Hit>>;
}

/// Retrieval over a Postgres paragraph table using built-in full-text search.
pub struct PgRetrievalSource {
    client: Arc<Client>,
    search_sql: String,
    resolve_sql: String,
}

impl PgRetrievalSource {
    /// Connects to Postgres and prepares the SQL for `table`.
    pub async fn connect(database_url: &str, table: &TableName) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .with_context(|| format!("failed to connect to Postgres at {}", database_url))?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(error = %err, "postgres connection error");
            }
        });
        Ok(Self::with_client(Arc::new(client), table))
    }

    /// Wraps an existing connection.
    pub fn with_client(client: Arc<Client>, table: &TableName) -> Self {
        Self {
            client,
            search_sql: select_search_sql(table),
            resolve_sql: select_resolve_sql(table),
        }
    }
}

#[async_trait]
impl RetrievalSource for PgRetrievalSource {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Hit>> {
        let trimmed = query.trim();
        if trimmed.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let rows = self
            .client
            .query(self.search_sql.as_str(), &[&trimmed, &(limit as i64)])
            .await
            .context("full-text search query failed")?;
        rows.iter().map(hit_from_row).collect()
    }

    async fn resolve(&self, uid: &str) -> Result<Option<Hit>> {
        let row = self
            .client
            .query_opt(self.resolve_sql.as_str(), &[&uid])
            .await
            .with_context(|| format!("failed to resolve document {uid}"))?;
        row.as_ref().map(hit_from_row).transpose()
    }
}

/// Typed column access; SQL NULL is `None`, a wrong column type is an error.
trait Columns {
    fn text(&self, column: &str) -> Result<Option<String>>;
    fn text_array(&self, column: &str) -> Result<Option<Vec<String>>>;
    fn real(&self, column: &str) -> Result<Option<f32>>;
}

impl Columns for Row {
    fn text(&self, column: &str) -> Result<Option<String>> {
        self.try_get(column)
            .with_context(|| format!("column {column} is not readable as text"))
    }

    fn text_array(&self, column: &str) -> Result<Option<Vec<String>>> {
        self.try_get(column)
            .with_context(|| format!("column {column} is not readable as text[]"))
    }

    fn real(&self, column: &str) -> Result<Option<f32>> {
        self.try_get(column)
            .with_context(|| format!("column {column} is not readable as real"))
    }
}

fn hit_from_row(row: &Row) -> Result<Hit> {
    hit_from_columns(row)
}

fn hit_from_columns(row: &impl Columns) -> Result<Hit> {
    let doc_id = row.text("doc_id")?.context("row has NULL doc_id")?;
    let content = row
        .text("content")?
        .with_context(|| format!("row {doc_id} has NULL content"))?;
    let retrieval_score = row.real("retrieval_score")?.unwrap_or(0.0);
    let fields = ArticleFields {
        title: optional_text(row, "title")?,
        doi: optional_text(row, "doi")?,
        source: optional_text(row, "source_x")?,
        authors: row.text_array("authors")?.unwrap_or_default(),
        abstract_text: optional_text(row, "abstract")?,
        journal: optional_text(row, "journal")?,
        url: optional_text(row, "url")?,
        publish_time: optional_text(row, "publish_time")?,
    };
    Hit::new(doc_id, content, retrieval_score, fields)
}

fn optional_text(row: &impl Columns, column: &str) -> Result<Option<String>> {
    Ok(row
        .text(column)?
        .filter(|value| !value.trim().is_empty()))
}

const SELECT_COLUMNS: &str =
    "doc_id, content, title, doi, source_x, authors, abstract, journal, url, publish_time";

fn select_search_sql(table: &TableName) -> String {
    format!(
        "WITH query AS (SELECT plainto_tsquery('english', $1) AS q)
        SELECT
            {columns},
            ts_rank_cd(content_tsv, query.q) AS retrieval_score
        FROM {table}
        CROSS JOIN query
        WHERE query.q <> to_tsquery('') AND content_tsv @@ query.q
        ORDER BY retrieval_score DESC, doc_id ASC
        LIMIT $2",
        columns = SELECT_COLUMNS,
        table = table.qualified()
    )
}

fn select_resolve_sql(table: &TableName) -> String {
    format!(
        "SELECT {columns}, 0::REAL AS retrieval_score \
        FROM {table} \
        WHERE base_id = $1 \
        ORDER BY paragraph_index ASC \
        LIMIT 1",
        columns = SELECT_COLUMNS,
        table = table.qualified()
    )
}
