#![warn(missing_docs)]
//! Core library entry points for the papersearch services.

pub mod ann;
pub mod api;
pub mod article;
pub mod client;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod highlighter;
pub mod querylog;
pub mod related;
pub mod reranker;
pub mod retrieval;
pub mod search;
pub mod table;

pub use ann::{AnnIndex, HnswIndex, IndexBuilder, LabelMap, Neighbor};
pub use article::{parse_publish_year, Article, ArticleFields, Hit, RelatedArticle};
pub use config::{BuildSettings, RelatedSettings, SearchSettings};
pub use error::SearchError;
pub use highlighter::{Highlight, Highlighter};
pub use querylog::{ClickEvent, QueryLogger};
pub use related::{Page, RelatedPipeline, RelatedResponse, RelatedSearcher};
pub use reranker::{score_in_batches, Reranker};
pub use retrieval::RetrievalSource;
pub use search::{SearchPipeline, SearchResponse};
pub use table::TableName;
