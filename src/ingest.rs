//! Periodic crawl: discover new listing links and store each article once.
//!
//! One pass runs discovery, then handles the new URLs one at a time, oldest
//! first, with a pacing delay between detail fetches. A failure on one
//! article is logged and counted; it never stops the rest of the pass.

use crate::assemble::ArticleAssembler;
use crate::errors::CrawlError;
use crate::fetch::PageFetcher;
use crate::markdown::{Converter, Html2MdConverter};
use crate::models::InsertOutcome;
use crate::scrapers::article::extract_article;
use crate::scrapers::listing::discover_new_links;
use crate::seen_links::SeenLinks;
use crate::store::ArticleStore;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, error, info, instrument, warn};

/// Knobs for a crawl pass.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Listing URL with a `{page}` placeholder.
    pub listing_template: String,
    pub max_pages: u32,
    pub default_category: String,
    /// Delay between two detail page fetches.
    pub pacing: Duration,
}

/// Counters for one pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub discovered: usize,
    pub stored: usize,
    pub duplicates: usize,
    pub failed: usize,
    /// Discovery stopped early on a listing fetch failure.
    pub aborted: bool,
}

pub struct Ingestor<F, S, C = Html2MdConverter> {
    fetcher: F,
    store: S,
    assembler: ArticleAssembler<C>,
    seen: SeenLinks,
    options: IngestOptions,
}

impl<F, S, C> Ingestor<F, S, C>
where
    F: PageFetcher,
    S: ArticleStore,
    C: Converter,
{
    pub fn new(
        fetcher: F,
        store: S,
        assembler: ArticleAssembler<C>,
        seen: SeenLinks,
        options: IngestOptions,
    ) -> Self {
        Self {
            fetcher,
            store,
            assembler,
            seen,
            options,
        }
    }

    /// Run one crawl pass.
    ///
    /// # Errors
    ///
    /// Only a failure to append to the seen-links file fails the pass.
    /// Listing fetch failures end discovery early; per-article failures are
    /// counted in [`PassReport::failed`].
    #[instrument(level = "info", skip_all)]
    pub async fn run_pass(&mut self) -> Result<PassReport, CrawlError> {
        let discovery = discover_new_links(
            &self.fetcher,
            &self.options.listing_template,
            self.options.max_pages,
            &mut self.seen,
        )
        .await?;

        let mut report = PassReport {
            discovered: discovery.new_links.len(),
            aborted: discovery.aborted.is_some(),
            ..PassReport::default()
        };
        if let Some(e) = &discovery.aborted {
            warn!(error = %e, "Discovery aborted; processing links found so far");
        }

        // Listing order is newest first; storing oldest first keeps ids
        // ascending in insertion order for the delivery watermark.
        let this = &*self;
        let outcomes: Vec<(String, Result<InsertOutcome, CrawlError>)> =
            stream::iter(discovery.new_links.into_iter().rev().enumerate())
                .then(|(i, url)| async move {
                    if i > 0 {
                        sleep(this.options.pacing).await;
                    }
                    let outcome = this.ingest_article(&url).await;
                    (url, outcome)
                })
                .collect()
                .await;

        for (url, outcome) in outcomes {
            match outcome {
                Ok(InsertOutcome::Inserted) => report.stored += 1,
                Ok(InsertOutcome::AlreadyExists) => report.duplicates += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(%url, error = %e, "Article ingestion failed");
                }
            }
        }

        info!(
            discovered = report.discovered,
            stored = report.stored,
            duplicates = report.duplicates,
            failed = report.failed,
            aborted = report.aborted,
            "Crawl pass finished"
        );
        Ok(report)
    }

    /// Fetch, extract, assemble and store one article.
    #[instrument(level = "info", skip(self))]
    async fn ingest_article(&self, url: &str) -> Result<InsertOutcome, CrawlError> {
        if self.store.query_by_url(url).await?.is_some() {
            debug!("Already stored; detail fetch skipped");
            return Ok(InsertOutcome::AlreadyExists);
        }

        let html = self.fetcher.fetch(url).await?;
        let extracted = extract_article(&html, url, &self.options.default_category)?;
        let article = self.assembler.assemble(url, extracted)?;
        let outcome = self.store.insert_article(&article).await?;
        if outcome == InsertOutcome::Inserted {
            info!(
                id = %article.id,
                title = %article.title,
                sections = article.sections.len(),
                "Stored article"
            );
        }
        Ok(outcome)
    }

    /// Run passes forever, one every `period`. The first pass starts at once.
    pub async fn run(&mut self, period: Duration) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_pass().await {
                error!(error = %e, "Crawl pass failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::ReqwestFetcher;
    use crate::models::ArticleId;
    use crate::store::SqliteStore;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn listing_page(ids: &[i64]) -> String {
        let items: String = ids
            .iter()
            .map(|id| {
                format!(
                    r#"<li class="news_border"><a href="/information/detail/?information_id={id}">News {id}</a></li>"#
                )
            })
            .collect();
        format!("<html><body><ul>{items}</ul></body></html>")
    }

    fn article_page(title: &str) -> String {
        format!(
            r#"<html><body><div class="useBox newsBox">
            <h1 class="news_title">{title}</h1>
            <p class="news_date"><time>2025-07-16</time></p>
            <h2 class="deluxetitle">Details</h2>
            <p>Body of {title}</p>
            <img src="/img/{title}.png">
            </div></body></html>"#
        )
    }

    async fn mount_listing(server: &MockServer, page: u32, ids: &[i64]) {
        Mock::given(method("GET"))
            .and(path("/information/"))
            .and(query_param("page", page.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(ids)))
            .mount(server)
            .await;
    }

    async fn mount_article(server: &MockServer, id: i64, body: String, calls: u64) {
        Mock::given(method("GET"))
            .and(path("/information/detail/"))
            .and(query_param("information_id", id.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(calls)
            .mount(server)
            .await;
    }

    async fn ingestor(
        server: &MockServer,
        tmp: &TempDir,
    ) -> (Ingestor<ReqwestFetcher, SqliteStore>, SqliteStore) {
        let store = SqliteStore::open(tmp.path().join("news.sqlite")).await.unwrap();
        let seen = SeenLinks::load(tmp.path().join("seen.txt")).await.unwrap();
        let options = IngestOptions {
            listing_template: format!("{}/information/?type_code=all&page={{page}}", server.uri()),
            max_pages: 5,
            default_category: "en.toram.jp".to_string(),
            pacing: Duration::from_millis(1),
        };
        let ingestor = Ingestor::new(
            ReqwestFetcher::new(Duration::from_secs(5)).unwrap(),
            store.clone(),
            ArticleAssembler::default(),
            seen,
            options,
        );
        (ingestor, store)
    }

    #[tokio::test]
    async fn test_pass_stores_new_articles_and_survives_bad_pages() {
        let server = MockServer::start().await;
        mount_listing(&server, 1, &[3, 2, 1]).await;
        mount_listing(&server, 2, &[]).await;
        mount_article(&server, 3, article_page("Third"), 1).await;
        mount_article(&server, 2, "<html><body>broken</body></html>".to_string(), 1).await;
        mount_article(&server, 1, article_page("First"), 1).await;

        let tmp = tempfile::tempdir().unwrap();
        let (mut ingestor, store) = ingestor(&server, &tmp).await;

        let report = ingestor.run_pass().await.unwrap();
        assert_eq!(
            report,
            PassReport {
                discovered: 3,
                stored: 2,
                duplicates: 0,
                failed: 1,
                aborted: false,
            }
        );

        let third = store.query_by_id(ArticleId(3)).await.unwrap().unwrap();
        assert_eq!(third.title, "Third");
        assert_eq!(third.category, "en.toram.jp");
        assert_eq!(third.sections[0].markdown, "Body of Third");
        assert_eq!(
            third.sections[0].first_image(),
            Some(format!("{}/img/Third.png", server.uri()).as_str())
        );
        assert_eq!(store.query_by_id(ArticleId(2)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_second_pass_does_not_refetch() {
        let server = MockServer::start().await;
        mount_listing(&server, 1, &[1]).await;
        mount_listing(&server, 2, &[]).await;
        mount_article(&server, 1, article_page("Only"), 1).await;

        let tmp = tempfile::tempdir().unwrap();
        let (mut ingestor, _store) = ingestor(&server, &tmp).await;

        assert_eq!(ingestor.run_pass().await.unwrap().stored, 1);
        let second = ingestor.run_pass().await.unwrap();
        assert_eq!(second.discovered, 0);
        assert_eq!(second.stored, 0);
    }

    #[tokio::test]
    async fn test_already_stored_url_skips_detail_fetch() {
        let server = MockServer::start().await;
        mount_listing(&server, 1, &[1]).await;
        mount_listing(&server, 2, &[]).await;
        mount_article(&server, 1, article_page("Only"), 0).await;

        let tmp = tempfile::tempdir().unwrap();
        let (mut ingestor, store) = ingestor(&server, &tmp).await;

        let url = format!("{}/information/detail/?information_id=1", server.uri());
        let existing = crate::models::Article {
            id: ArticleId(1),
            url,
            title: "Stored earlier".to_string(),
            date: "2025-07-01".to_string(),
            category: "Event".to_string(),
            sections: Vec::new(),
            images: Vec::new(),
        };
        store.insert_article(&existing).await.unwrap();

        let report = ingestor.run_pass().await.unwrap();
        assert_eq!(report.duplicates, 1);
        assert_eq!(store.query_by_id(ArticleId(1)).await.unwrap(), Some(existing));
    }

    #[tokio::test]
    async fn test_listing_failure_still_processes_found_links() {
        let server = MockServer::start().await;
        mount_listing(&server, 1, &[5]).await;
        Mock::given(method("GET"))
            .and(path("/information/"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        mount_article(&server, 5, article_page("Fifth"), 1).await;

        let tmp = tempfile::tempdir().unwrap();
        let (mut ingestor, store) = ingestor(&server, &tmp).await;

        let report = ingestor.run_pass().await.unwrap();
        assert!(report.aborted);
        assert_eq!(report.stored, 1);
        assert_eq!(store.query_max_id().await.unwrap(), Some(ArticleId(5)));
    }
}
