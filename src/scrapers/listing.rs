//! Paginated listing walk that discovers article URLs not seen before.
//!
//! Listing pages are rendered newest first. The walk stops on the first page
//! whose last link was already seen, or which brought nothing new; older
//! pages cannot hold anything unseen once that happens.

use crate::errors::{CrawlError, FetchError};
use crate::fetch::PageFetcher;
use crate::seen_links::SeenLinks;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

static LISTING_LINK: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("ul > li.news_border a[href]").expect("valid listing link selector")
});

/// Placeholder replaced by the page number in a listing URL template.
pub const PAGE_PLACEHOLDER: &str = "{page}";

/// Result of one listing walk.
#[derive(Debug)]
pub struct Discovery {
    /// New article URLs in listing order. Already recorded as seen.
    pub new_links: Vec<String>,
    /// Set when a listing page could not be fetched and the walk stopped early.
    pub aborted: Option<FetchError>,
}

/// Walk the listing from page 1 and record every unseen article URL.
///
/// # Arguments
///
/// * `fetcher` - Fetcher used for listing pages
/// * `listing_template` - Listing URL containing [`PAGE_PLACEHOLDER`]
/// * `max_pages` - Hard limit on the number of pages fetched
/// * `seen` - Seen-link set; new URLs are appended to it as they are found
///
/// # Errors
///
/// Only a failure to persist the seen-link file is an error. A listing fetch
/// failure ends the walk and is reported in [`Discovery::aborted`], together
/// with the links recorded before it.
#[instrument(level = "info", skip_all, fields(template = %listing_template))]
pub async fn discover_new_links<F: PageFetcher>(
    fetcher: &F,
    listing_template: &str,
    max_pages: u32,
    seen: &mut SeenLinks,
) -> Result<Discovery, CrawlError> {
    let mut new_links = Vec::new();

    for page in 1..=max_pages {
        let page_url = listing_template.replace(PAGE_PLACEHOLDER, &page.to_string());
        let html = match fetcher.fetch(&page_url).await {
            Ok(html) => html,
            Err(e) => {
                warn!(page, error = %e, recorded = new_links.len(), "Listing fetch failed; stopping walk");
                return Ok(Discovery {
                    new_links,
                    aborted: Some(e),
                });
            }
        };

        let mut last_was_seen = false;
        let mut found_new = false;
        for link in parse_listing(&html, &page_url) {
            if seen.contains(&link) {
                last_was_seen = true;
            } else {
                last_was_seen = false;
                found_new = true;
                seen.record(&link).await?;
                new_links.push(link);
            }
        }
        debug!(page, found_new, last_was_seen, "Listing page processed");

        if last_was_seen || !found_new {
            break;
        }
    }

    info!(count = new_links.len(), "Discovered new article links");
    Ok(Discovery {
        new_links,
        aborted: None,
    })
}

/// Extract absolute article URLs from one listing page, in rendered order.
pub fn parse_listing(html: &str, page_url: &str) -> Vec<String> {
    let Ok(base) = Url::parse(page_url) else {
        warn!(%page_url, "Listing URL is not absolute; no links resolved");
        return Vec::new();
    };
    let document = Html::parse_document(html);
    document
        .select(&LISTING_LINK)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| base.join(href.trim()).ok())
        .map(|url| url.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::ReqwestFetcher;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
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
        format!(r#"<html><body><ul class="list">{items}</ul><a href="/other">Other</a></body></html>"#)
    }

    fn article_url(server: &MockServer, id: i64) -> String {
        format!("{}/information/detail/?information_id={id}", server.uri())
    }

    fn template(server: &MockServer) -> String {
        format!("{}/information/?type_code=all&page={{page}}", server.uri())
    }

    async fn mount_page(server: &MockServer, page: u32, body: String, calls: u64) {
        Mock::given(method("GET"))
            .and(path("/information/"))
            .and(query_param("page", page.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(calls)
            .mount(server)
            .await;
    }

    fn fetcher() -> ReqwestFetcher {
        ReqwestFetcher::new(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_parse_listing_resolves_relative_links() {
        let links = parse_listing(
            &listing_page(&[12, 11]),
            "https://en.toram.jp/information/?type_code=all&page=1",
        );
        assert_eq!(
            links,
            vec![
                "https://en.toram.jp/information/detail/?information_id=12",
                "https://en.toram.jp/information/detail/?information_id=11",
            ]
        );
    }

    #[tokio::test]
    async fn test_stops_when_last_link_on_page_was_seen() {
        let server = MockServer::start().await;
        mount_page(&server, 1, listing_page(&[3, 2, 1]), 1).await;
        mount_page(&server, 2, listing_page(&[0]), 0).await;

        let tmp = tempfile::tempdir().unwrap();
        let seen_path = tmp.path().join("seen.txt");
        std::fs::write(&seen_path, format!("{}\n", article_url(&server, 1))).unwrap();
        let mut seen = SeenLinks::load(&seen_path).await.unwrap();

        let discovery = discover_new_links(&fetcher(), &template(&server), 10, &mut seen)
            .await
            .unwrap();

        assert_eq!(
            discovery.new_links,
            vec![article_url(&server, 3), article_url(&server, 2)]
        );
        assert!(discovery.aborted.is_none());
        assert!(seen.contains(&article_url(&server, 3)));
        let persisted = std::fs::read_to_string(&seen_path).unwrap();
        assert_eq!(persisted.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_walks_pages_until_nothing_new() {
        let server = MockServer::start().await;
        mount_page(&server, 1, listing_page(&[6, 5]), 1).await;
        mount_page(&server, 2, listing_page(&[4, 3]), 1).await;
        mount_page(&server, 3, listing_page(&[]), 1).await;
        mount_page(&server, 4, listing_page(&[2]), 0).await;

        let tmp = tempfile::tempdir().unwrap();
        let mut seen = SeenLinks::load(tmp.path().join("seen.txt")).await.unwrap();

        let discovery = discover_new_links(&fetcher(), &template(&server), 10, &mut seen)
            .await
            .unwrap();

        let expected: Vec<String> = [6, 5, 4, 3].iter().map(|id| article_url(&server, *id)).collect();
        assert_eq!(discovery.new_links, expected);
    }

    #[tokio::test]
    async fn test_second_pass_finds_nothing() {
        let server = MockServer::start().await;
        mount_page(&server, 1, listing_page(&[2, 1]), 2).await;
        mount_page(&server, 2, listing_page(&[]), 1).await;

        let tmp = tempfile::tempdir().unwrap();
        let mut seen = SeenLinks::load(tmp.path().join("seen.txt")).await.unwrap();

        let first = discover_new_links(&fetcher(), &template(&server), 10, &mut seen)
            .await
            .unwrap();
        assert_eq!(first.new_links.len(), 2);

        let second = discover_new_links(&fetcher(), &template(&server), 10, &mut seen)
            .await
            .unwrap();
        assert!(second.new_links.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_recorded_links() {
        let server = MockServer::start().await;
        mount_page(&server, 1, listing_page(&[9, 8]), 1).await;
        Mock::given(method("GET"))
            .and(path("/information/"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let mut seen = SeenLinks::load(tmp.path().join("seen.txt")).await.unwrap();

        let discovery = discover_new_links(&fetcher(), &template(&server), 10, &mut seen)
            .await
            .unwrap();

        assert_eq!(
            discovery.new_links,
            vec![article_url(&server, 9), article_url(&server, 8)]
        );
        assert!(matches!(
            discovery.aborted,
            Some(FetchError::Status { status: 500, .. })
        ));
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn test_respects_page_limit() {
        let server = MockServer::start().await;
        mount_page(&server, 1, listing_page(&[4, 3]), 1).await;
        mount_page(&server, 2, listing_page(&[2, 1]), 0).await;

        let tmp = tempfile::tempdir().unwrap();
        let mut seen = SeenLinks::load(tmp.path().join("seen.txt")).await.unwrap();

        let discovery = discover_new_links(&fetcher(), &template(&server), 1, &mut seen)
            .await
            .unwrap();
        assert_eq!(discovery.new_links.len(), 2);
    }
}
