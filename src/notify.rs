//! Delivery of stored articles to a chat channel.
//!
//! # Architecture
//!
//! - [`Notifier`]: The interface used by the delivery loop
//! - [`render_embeds`]: Splits an article into one message part per section
//! - [`WebhookNotifier`]: Posts parts to a Discord-compatible webhook
//! - [`LogNotifier`]: Logs parts instead, used when no webhook is configured
//!
//! # Message Parts
//!
//! Each section becomes one embed carrying the section title, a link to the
//! article, the markdown body cut to [`MAX_DESCRIPTION_CHARS`], the first
//! section image and a footer like `📅 2025-07-16 • 🏷️ Event • Part 2/3`.

use crate::errors::NotifyError;
use crate::models::{Article, ArticleId};
use crate::utils::{truncate_chars, truncate_for_log};
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument};

/// Longest embed description the chat service accepts.
pub const MAX_DESCRIPTION_CHARS: usize = 4096;
/// Longest embed title the chat service accepts.
pub const MAX_TITLE_CHARS: usize = 256;

const NEWS_COLOR: u32 = 0x2F_9E_D8;
const NOT_FOUND_COLOR: u32 = 0xD8_3C_2F;

/// Sends articles to their audience.
pub trait Notifier {
    /// Deliver every part of `article`, in section order.
    ///
    /// Stops at the first part that fails. Parts sent before it are not
    /// rolled back, so a retry of the article posts them again: delivery
    /// is at-least-once per part.
    async fn send(&self, article: &Article) -> Result<(), NotifyError>;

    /// Tell the audience that no article with `id` is stored.
    async fn send_not_found(&self, id: ArticleId) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedImage {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

/// One message part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Embed {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub description: String,
    pub color: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    embeds: [&'a Embed; 1],
}

/// Split `article` into one embed per section.
///
/// An article without sections still yields a single embed, titled with
/// the article title and showing its first article-level image.
pub fn render_embeds(article: &Article) -> Vec<Embed> {
    let footer = |part: usize, total: usize| EmbedFooter {
        text: format!(
            "📅 {} • 🏷️ {} • Part {}/{}",
            article.date, article.category, part, total
        ),
    };

    if article.sections.is_empty() {
        return vec![Embed {
            title: truncate_chars(&article.title, MAX_TITLE_CHARS).to_string(),
            url: Some(article.url.clone()),
            description: String::new(),
            color: NEWS_COLOR,
            image: article.images.first().map(|img| EmbedImage {
                url: img.url.clone(),
            }),
            footer: Some(footer(1, 1)),
            timestamp: None,
        }];
    }

    let total = article.sections.len();
    article
        .sections
        .iter()
        .enumerate()
        .map(|(i, section)| Embed {
            title: truncate_chars(&section.title, MAX_TITLE_CHARS).to_string(),
            url: Some(article.url.clone()),
            description: truncate_chars(&section.markdown, MAX_DESCRIPTION_CHARS).to_string(),
            color: NEWS_COLOR,
            image: section.first_image().map(|url| EmbedImage {
                url: url.to_string(),
            }),
            footer: Some(footer(i + 1, total)),
            timestamp: None,
        })
        .collect()
}

/// The single embed announcing that `id` is not stored.
pub fn render_not_found(id: ArticleId) -> Embed {
    Embed {
        title: "Article not found".to_string(),
        url: None,
        description: format!("No stored article has id {id}."),
        color: NOT_FOUND_COLOR,
        image: None,
        footer: None,
        timestamp: None,
    }
}

/// [`Notifier`] posting to a Discord-compatible webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    webhook_url: String,
    /// Pause between two parts of the same article.
    pacing: Duration,
}

impl WebhookNotifier {
    /// # Arguments
    ///
    /// * `webhook_url` - Full webhook URL, including its token
    /// * `pacing` - Delay between consecutive parts of one article
    /// * `timeout` - Per-request timeout
    pub fn new(
        webhook_url: impl Into<String>,
        pacing: Duration,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
            pacing,
        })
    }

    async fn post(&self, embed: &Embed) -> Result<(), NotifyError> {
        let mut embed = embed.clone();
        embed.timestamp = Some(Utc::now().to_rfc3339());
        let body = serde_json::to_vec(&WebhookPayload { embeds: [&embed] })?;

        let response = self
            .client
            .post(&self.webhook_url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        debug!(status = status.as_u16(), title = %embed.title, "Webhook accepted part");
        Ok(())
    }
}

impl Notifier for WebhookNotifier {
    #[instrument(level = "info", skip_all, fields(id = %article.id))]
    async fn send(&self, article: &Article) -> Result<(), NotifyError> {
        let embeds = render_embeds(article);
        for (i, embed) in embeds.iter().enumerate() {
            if i > 0 {
                sleep(self.pacing).await;
            }
            self.post(embed).await?;
        }
        info!(parts = embeds.len(), title = %article.title, "Delivered article");
        Ok(())
    }

    #[instrument(level = "info", skip(self))]
    async fn send_not_found(&self, id: ArticleId) -> Result<(), NotifyError> {
        self.post(&render_not_found(id)).await
    }
}

/// [`Notifier`] that writes every part to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn send(&self, article: &Article) -> Result<(), NotifyError> {
        let embeds = render_embeds(article);
        for embed in &embeds {
            info!(
                id = %article.id,
                title = %embed.title,
                footer = %embed.footer.as_ref().map(|f| f.text.as_str()).unwrap_or_default(),
                image = ?embed.image.as_ref().map(|i| &i.url),
                description = %truncate_for_log(&embed.description, 200),
                "Article part"
            );
        }
        Ok(())
    }

    async fn send_not_found(&self, id: ArticleId) -> Result<(), NotifyError> {
        info!(%id, "Article not found");
        Ok(())
    }
}

/// The notifier picked at startup from configuration.
#[derive(Debug, Clone)]
pub enum ConfiguredNotifier {
    Webhook(WebhookNotifier),
    Log(LogNotifier),
}

impl Notifier for ConfiguredNotifier {
    async fn send(&self, article: &Article) -> Result<(), NotifyError> {
        match self {
            ConfiguredNotifier::Webhook(n) => n.send(article).await,
            ConfiguredNotifier::Log(n) => n.send(article).await,
        }
    }

    async fn send_not_found(&self, id: ArticleId) -> Result<(), NotifyError> {
        match self {
            ConfiguredNotifier::Webhook(n) => n.send_not_found(id).await,
            ConfiguredNotifier::Log(n) => n.send_not_found(id).await,
        }
    }
}
