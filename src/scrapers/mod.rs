//! Scrapers for the Toram Online news site.
//!
//! Scraping follows the usual two-phase pattern:
//!
//! 1. **Indexing**: [`listing`] walks the paginated listing and yields article
//!    URLs that were never seen before
//! 2. **Extraction**: [`article`] parses one detail page into metadata and raw
//!    sections
//!
//! # Page Shapes
//!
//! | Page | Module | Key selectors |
//! |------|--------|---------------|
//! | Listing | [`listing`] | `ul > li.news_border a[href]` |
//! | Detail | [`article`] | `div.useBox.newsBox`, `h1.news_title`, `h2.deluxetitle` |
//!
//! Both scrapers are pure over the markup they receive; fetching is left to a
//! [`PageFetcher`](crate::fetch::PageFetcher).

pub mod article;
pub mod listing;
