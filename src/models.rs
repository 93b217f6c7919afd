//! Data models for crawled news articles.
//!
//! This module defines the structures that flow through the pipeline:
//! - [`Article`]: A fully assembled, immutable news article
//! - [`Section`]: A titled, ordered slice of an article's body
//! - [`Image`] and [`ImageScope`]: Image references owned by exactly one scope
//! - [`ArticleId`]: The numeric key taken from the source URL
//! - [`InsertOutcome`]: Result of persisting an article
//!
//! Articles are created once at insert time and never updated afterwards.

use crate::errors::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Query parameter on article URLs that carries the stable identifier.
const ID_PARAM: &str = "information_id";

/// Identifier of an article, taken from the `information_id` query parameter.
///
/// Identifiers grow with publication order on the source site, which is what
/// lets the delivery loop use them as a watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArticleId(pub i64);

impl ArticleId {
    /// Extract the identifier from an article URL.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::MissingIdentifier`] if the URL cannot be parsed or
    /// carries no numeric `information_id` parameter.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let id = ArticleId::from_url("https://en.toram.jp/information/detail/?information_id=10234")?;
    /// assert_eq!(id, ArticleId(10234));
    /// ```
    pub fn from_url(url: &str) -> Result<Self, ParseError> {
        let missing = || ParseError::MissingIdentifier(url.to_string());
        let parsed = Url::parse(url).map_err(|_| missing())?;
        parsed
            .query_pairs()
            .find(|(key, _)| key == ID_PARAM)
            .and_then(|(_, value)| value.trim().parse::<i64>().ok())
            .map(ArticleId)
            .ok_or_else(missing)
    }
}

impl fmt::Display for ArticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The scope an image belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageScope {
    /// Not attributable to any section body.
    Article,
    /// Found inside the section at this position.
    Section(usize),
}

/// An image reference carried out-of-band from the markdown text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    pub scope: ImageScope,
}

/// A titled part of an article body.
///
/// `markdown` is already sanitized; `images` all carry
/// [`ImageScope::Section`] with this section's position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub markdown: String,
    pub images: Vec<Image>,
}

impl Section {
    /// The image shown alongside this section in a notification, if any.
    pub fn first_image(&self) -> Option<&str> {
        self.images.first().map(|img| img.url.as_str())
    }
}

/// A normalized news article.
///
/// # Invariants
///
/// - `id` is unique within the store, and so is `url`.
/// - `sections` keep document order; a synthetic "Maintenance Schedule"
///   section, if present, is last.
/// - `images` only holds article-scoped images. No URL appears both here and
///   in a section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub url: String,
    pub title: String,
    /// Publication date as printed on the page (not validated).
    pub date: String,
    pub category: String,
    pub sections: Vec<Section>,
    pub images: Vec<Image>,
}

/// Outcome of [`ArticleStore::insert_article`](crate::store::ArticleStore::insert_article).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The URL or identifier is already stored; nothing was written.
    AlreadyExists,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_article_id_from_url() {
        let id = ArticleId::from_url(
            "https://en.toram.jp/information/detail/?information_id=10234",
        )
        .unwrap();
        assert_eq!(id, ArticleId(10234));
    }

    #[test]
    fn test_article_id_ignores_other_params() {
        let id = ArticleId::from_url(
            "https://en.toram.jp/information/detail/?type_code=all&information_id=77&page=2",
        )
        .unwrap();
        assert_eq!(id, ArticleId(77));
    }

    #[test]
    fn test_article_id_missing_param() {
        let url = "https://en.toram.jp/information/detail/?page=2";
        assert_eq!(
            ArticleId::from_url(url),
            Err(ParseError::MissingIdentifier(url.to_string()))
        );
    }

    #[test]
    fn test_article_id_non_numeric() {
        assert!(
            ArticleId::from_url("https://en.toram.jp/?information_id=abc").is_err()
        );
    }

    #[test]
    fn test_article_ids_order_numerically() {
        assert!(ArticleId(9) < ArticleId(10));
        assert_eq!(ArticleId(42).to_string(), "42");
    }

    #[test]
    fn test_article_serialization() {
        let article = Article {
            id: ArticleId(1),
            url: "https://en.toram.jp/information/detail/?information_id=1".to_string(),
            title: "Update".to_string(),
            date: "2025-07-16".to_string(),
            category: "Update".to_string(),
            sections: vec![],
            images: vec![Image {
                url: "https://img/a.png".to_string(),
                scope: ImageScope::Article,
            }],
        };
        let json = serde_json::to_string(&article).unwrap();
        assert!(json.contains("2025-07-16"));
        assert!(json.contains("https://img/a.png"));
    }
}
