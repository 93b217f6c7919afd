//! Builds the immutable [`Article`] from an extracted page.
//!
//! The assembler owns two decisions the extractor leaves open: which scope
//! each image belongs to, and how a section body becomes final markdown.

use crate::errors::ParseError;
use crate::markdown::{Converter, Html2MdConverter, MarkdownSanitizer};
use crate::models::{Article, ArticleId, Image, ImageScope, Section};
use crate::scrapers::article::{ExtractedArticle, SectionBody};
use std::collections::HashSet;
use tracing::{debug, instrument};

/// Image URLs grouped by owning scope.
///
/// Each URL appears at most once across the whole plan. A section claims
/// the images found in its own fragment, earlier sections first; the article
/// keeps whatever no section claimed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImagePlan {
    pub by_section: Vec<Vec<String>>,
    pub article: Vec<String>,
}

impl ImagePlan {
    pub fn build(extracted: &ExtractedArticle) -> Self {
        let mut claimed: HashSet<&str> = HashSet::new();

        let by_section = extracted
            .sections
            .iter()
            .map(|section| {
                section
                    .images
                    .iter()
                    .filter(|url| claimed.insert(url.as_str()))
                    .cloned()
                    .collect()
            })
            .collect();

        let article = extracted
            .images
            .iter()
            .filter(|url| claimed.insert(url.as_str()))
            .cloned()
            .collect();

        Self {
            by_section,
            article,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ArticleAssembler<C = Html2MdConverter> {
    sanitizer: MarkdownSanitizer<C>,
}

impl<C: Converter> ArticleAssembler<C> {
    pub fn new(sanitizer: MarkdownSanitizer<C>) -> Self {
        Self { sanitizer }
    }

    /// Combine an extracted page with its source URL into an [`Article`].
    ///
    /// HTML section bodies go through the sanitizer; markdown bodies are
    /// already final and are only trimmed.
    ///
    /// # Errors
    ///
    /// [`ParseError::MissingIdentifier`] if `url` has no numeric
    /// `information_id`.
    #[instrument(level = "debug", skip(self, extracted))]
    pub fn assemble(&self, url: &str, extracted: ExtractedArticle) -> Result<Article, ParseError> {
        let id = ArticleId::from_url(url)?;
        let mut plan = ImagePlan::build(&extracted);

        let sections: Vec<Section> = extracted
            .sections
            .into_iter()
            .zip(plan.by_section.iter_mut())
            .enumerate()
            .map(|(position, (raw, urls))| {
                let markdown = match &raw.body {
                    SectionBody::Html(html) => self.sanitizer.sanitize(html, &raw.heading),
                    SectionBody::Markdown(text) => text.trim().to_string(),
                };
                let images = std::mem::take(urls)
                    .into_iter()
                    .map(|url| Image {
                        url,
                        scope: ImageScope::Section(position),
                    })
                    .collect();
                Section {
                    title: raw.heading,
                    markdown,
                    images,
                }
            })
            .collect();

        let images: Vec<Image> = plan
            .article
            .into_iter()
            .map(|url| Image {
                url,
                scope: ImageScope::Article,
            })
            .collect();

        debug!(%id, sections = sections.len(), article_images = images.len(), "Assembled article");
        Ok(Article {
            id,
            url: url.to_string(),
            title: extracted.title,
            date: extracted.date,
            category: extracted.category,
            sections,
            images,
        })
    }
}
