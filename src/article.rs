//! Article records flowing from the retrieval source to API responses.

use anyhow::Result;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::highlighter::Highlight;

/// Fallback link shown when an article has no URL of its own.
pub const DEFAULT_ARTICLE_URL: &str = "https://www.semanticscholar.org/";

/// Display fields attached to every hit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArticleFields {
    /// Article title.
    pub title: Option<String>,
    /// Digital object identifier.
    pub doi: Option<String>,
    /// Upstream collection the article came from.
    pub source: Option<String>,
    /// Author names in byline order.
    #[serde(default)]
    pub authors: Vec<String>,
    /// Abstract text.
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    /// Journal name.
    pub journal: Option<String>,
    /// Canonical article URL.
    pub url: Option<String>,
    /// Raw publication date as stored upstream.
    pub publish_time: Option<String>,
}

/// Candidate returned by the retrieval source.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    doc_id: String,
    /// Paragraph text scored by the reranker.
    pub content: String,
    /// Lexical score assigned by the retrieval source.
    pub retrieval_score: f32,
    /// Display fields.
    pub fields: ArticleFields,
}

impl Hit {
    /// Validates and builds a hit; `doc_id` must be non-empty.
    pub fn new(
        doc_id: impl Into<String>,
        content: impl Into<String>,
        retrieval_score: f32,
        fields: ArticleFields,
    ) -> Result<Self> {
        let doc_id = doc_id.into();
        anyhow::ensure!(!doc_id.trim().is_empty(), "hit is missing a doc_id");
        Ok(Self {
            doc_id,
            content: content.into(),
            retrieval_score,
            fields,
        })
    }

    /// Compound `<base>.<paragraph>` identifier.
    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    /// Document identifier with the paragraph suffix removed.
    pub fn base_id(&self) -> &str {
        base_doc_id(&self.doc_id)
    }
}

/// Strips the paragraph suffix: everything from the first `.` onwards.
pub fn base_doc_id(doc_id: &str) -> &str {
    doc_id.split_once('.').map_or(doc_id, |(base, _)| base)
}

/// Truncates `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Extracts the publication year from the date formats seen in the corpus.
///
/// Returns `None` for anything unparseable instead of guessing.
pub fn parse_publish_year(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.len() == 4 && raw.bytes().all(|b| b.is_ascii_digit()) {
        return raw.parse().ok();
    }
    // chrono needs a day to build a date, so month-only forms get one appended
    let padded = if raw.contains('-') {
        format!("{raw}-01")
    } else {
        format!("{raw} 01")
    };
    let year = [raw, padded.as_str()].into_iter().find_map(|candidate| {
        DATE_FORMATS
            .iter()
            .find_map(|format| NaiveDate::parse_from_str(candidate, format).ok())
            .map(|date| date.year())
    });
    year
}

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y %b %d", "%Y %B %d", "%m/%d/%Y"];

/// Search result as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    /// Compound paragraph identifier of the surviving hit.
    pub id: String,
    /// Display fields, flattened into the response object.
    #[serde(flatten)]
    pub fields: ArticleFields,
    /// Year derived from `publish_time`.
    pub year: Option<i32>,
    /// Reranker relevance score.
    pub score: f32,
    /// Scored paragraphs; the first one is the highlight passage.
    pub paragraphs: Vec<String>,
    /// Highlights for `paragraphs`, present only inside the highlight window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlights: Option<Vec<Highlight>>,
}

impl Article {
    /// Builds a scored article from a hit.
    pub fn from_hit(hit: Hit, score: f32) -> Self {
        let year = hit.fields.publish_time.as_deref().and_then(parse_publish_year);
        let mut fields = hit.fields;
        fields.url.get_or_insert_with(|| DEFAULT_ARTICLE_URL.to_string());
        Self {
            id: hit.doc_id,
            fields,
            year,
            score,
            paragraphs: vec![hit.content],
            highlights: None,
        }
    }

    /// Document identifier used for deduplication.
    pub fn base_id(&self) -> &str {
        base_doc_id(&self.id)
    }
}

/// Neighbor returned by the related-article lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedArticle {
    /// Base identifier (uid) of the resolved document.
    pub id: String,
    /// Display fields.
    #[serde(flatten)]
    pub fields: ArticleFields,
    /// Year derived from `publish_time`.
    pub year: Option<i32>,
    /// Distance from the source article's embedding.
    pub distance: f32,
}

impl RelatedArticle {
    /// Attaches an ANN distance to a resolved hit.
    pub fn from_hit(hit: Hit, distance: f32) -> Self {
        let year = hit.fields.publish_time.as_deref().and_then(parse_publish_year);
        let id = hit.base_id().to_string();
        let mut fields = hit.fields;
        fields.url.get_or_insert_with(|| DEFAULT_ARTICLE_URL.to_string());
        Self {
            id,
            fields,
            year,
            distance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_id_splits_on_first_dot() {
        assert_eq!(base_doc_id("doc1.0"), "doc1");
        assert_eq!(base_doc_id("doc1.12.3"), "doc1");
        assert_eq!(base_doc_id("doc2"), "doc2");
    }

    #[test]
    fn empty_doc_id_rejected() {
        assert!(Hit::new("  ", "text", 1.0, ArticleFields::default()).is_err());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn parses_valid_publish_dates() {
        assert_eq!(parse_publish_year("2020-03-15"), Some(2020));
        assert_eq!(parse_publish_year("2019"), Some(2019));
        assert_eq!(parse_publish_year("2018 Mar 4"), Some(2018));
        assert_eq!(parse_publish_year("2017 Dec"), Some(2017));
        assert_eq!(parse_publish_year("2016-07"), Some(2016));
        assert_eq!(parse_publish_year("04/21/2015"), Some(2015));
    }

    #[test]
    fn malformed_publish_dates_yield_none() {
        assert_eq!(parse_publish_year(""), None);
        assert_eq!(parse_publish_year("not a date"), None);
        assert_eq!(parse_publish_year("2020-13-45"), None);
        assert_eq!(parse_publish_year("20x0"), None);
    }

    #[test]
    fn article_defaults_missing_url() {
        let hit = Hit::new("abc.0", "body", 1.0, ArticleFields::default()).unwrap();
        let article = Article::from_hit(hit, 0.5);
        assert_eq!(article.fields.url.as_deref(), Some(DEFAULT_ARTICLE_URL));
        assert_eq!(article.paragraphs, vec!["body".to_string()]);
        assert_eq!(article.base_id(), "abc");
    }
}
