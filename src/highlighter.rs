//! Passage highlighting for the leading window of search results.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::article::Article;
use crate::client::JsonEndpoint;

/// Highlighted character ranges `(start, end)` within one passage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Highlight {
    /// Half-open character ranges, in passage order.
    pub spans: Vec<(usize, usize)>,
}

/// Marks query-relevant spans in passages.
///
/// Implementations must return exactly one [`Highlight`] per passage, in input order.
pub trait Highlighter: Send + Sync {
    /// Highlights every passage against `query`.
    fn highlight(&self, query: &str, passages: &[String]) -> Result<Vec<Highlight>>;
}

/// Highlighter served over HTTP.
#[derive(Clone)]
pub struct HttpHighlighter {
    endpoint: JsonEndpoint,
}

impl HttpHighlighter {
    /// Builds a client for the highlight service at `endpoint`.
    pub fn new(endpoint: String, timeout: Duration, max_retries: usize) -> Result<Self> {
        Ok(Self {
            endpoint: JsonEndpoint::new(endpoint, timeout, max_retries)?,
        })
    }

    /// Highlight service URL.
    pub fn endpoint(&self) -> &str {
        self.endpoint.endpoint()
    }
}

impl Highlighter for HttpHighlighter {
    fn highlight(&self, query: &str, passages: &[String]) -> Result<Vec<Highlight>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }
        let response: HighlightResponse = self.endpoint.post(&HighlightRequest { query, passages })?;
        Ok(response.highlights)
    }
}

#[derive(Serialize)]
struct HighlightRequest<'a> {
    query: &'a str,
    passages: &'a [String],
}

#[derive(Deserialize)]
struct HighlightResponse {
    highlights: Vec<Highlight>,
}

/// Highlights the first `window` articles with a single highlighter call.
///
/// Articles past the window are left untouched.
pub fn highlight_window(
    highlighter: &dyn Highlighter,
    query: &str,
    articles: &mut [Article],
    window: usize,
) -> Result<()> {
    let end = window.min(articles.len());
    let head = &mut articles[..end];
    if head.is_empty() {
        return Ok(());
    }
    let passages: Vec<String> = head
        .iter()
        .map(|article| article.paragraphs.first().cloned().unwrap_or_default())
        .collect();
    let highlights = highlighter.highlight(query, &passages)?;
    anyhow::ensure!(
        highlights.len() == passages.len(),
        "highlighter returned {} highlights for {} passages",
        highlights.len(),
        passages.len()
    );
    for (article, highlight) in head.iter_mut().zip(highlights) {
        // one paragraph per article is highlighted
        article.highlights = Some(vec![highlight]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::{ArticleFields, Hit};

    struct FirstWord;

    impl Highlighter for FirstWord {
        fn highlight(&self, _query: &str, passages: &[String]) -> Result<Vec<Highlight>> {
            Ok(passages
                .iter()
                .map(|p| Highlight {
                    spans: vec![(0, p.split_whitespace().next().map_or(0, |w| w.chars().count()))],
                })
                .collect())
        }
    }

    struct Short;

    impl Highlighter for Short {
        fn highlight(&self, _query: &str, _passages: &[String]) -> Result<Vec<Highlight>> {
            Ok(vec![Highlight::default()])
        }
    }

    fn articles(n: usize) -> Vec<Article> {
        (0..n)
            .map(|i| {
                let hit = Hit::new(format!("d{i}.0"), format!("word{i} rest"), 0.0, ArticleFields::default())
                    .unwrap();
                Article::from_hit(hit, 1.0)
            })
            .collect()
    }

    #[test]
    fn only_window_is_highlighted() {
        let mut list = articles(4);
        highlight_window(&FirstWord, "q", &mut list, 2).unwrap();
        assert_eq!(
            list[0].highlights,
            Some(vec![Highlight { spans: vec![(0, 5)] }])
        );
        assert!(list[1].highlights.is_some());
        assert!(list[2].highlights.is_none());
        assert!(list[3].highlights.is_none());
    }

    #[test]
    fn window_larger_than_list() {
        let mut list = articles(2);
        highlight_window(&FirstWord, "q", &mut list, 10).unwrap();
        assert!(list.iter().all(|a| a.highlights.is_some()));
    }

    #[test]
    fn length_mismatch_is_an_error() {
        let mut list = articles(3);
        assert!(highlight_window(&Short, "q", &mut list, 3).is_err());
    }

    #[test]
    fn highlight_serializes_as_nested_pairs() {
        let h = Highlight { spans: vec![(1, 4), (7, 9)] };
        assert_eq!(serde_json::to_string(&h).unwrap(), "[[1,4],[7,9]]");
    }
}
