//! # Toram News
//!
//! Crawls the Toram Online news site, turns every new article into sectioned
//! markdown and delivers newly stored articles to a chat webhook, strictly in
//! id order and without duplicates.
//!
//! ## Usage
//!
//! ```sh
//! NEWS_WEBHOOK_URL=https://discord.com/api/webhooks/… toram_news --config config.yaml
//! ```
//!
//! ## Architecture
//!
//! Two periodic loops share one SQLite store:
//! 1. **Ingestion**: listing walk → detail fetch → section extraction →
//!    markdown cleanup → store insert ([`ingest`])
//! 2. **Delivery**: poll the store above a persisted watermark → notifier
//!    ([`deliver`])
//!
//! Both run inside a single task and stop on Ctrl-C.

use clap::Parser;
use std::error::Error;
use std::time::Duration;
use tracing::{info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod assemble;
mod cli;
mod config;
mod deliver;
mod errors;
mod fetch;
mod ingest;
mod markdown;
mod models;
mod notify;
mod scrapers;
mod seen_links;
mod store;
mod utils;

use assemble::ArticleAssembler;
use cli::{Cli, Command};
use config::Settings;
use deliver::{Dispatcher, deliver_on_demand};
use fetch::{ReqwestFetcher, RetryFetch};
use ingest::{IngestOptions, Ingestor};
use markdown::{Html2MdConverter, MarkdownSanitizer};
use models::ArticleId;
use notify::{ConfiguredNotifier, LogNotifier, WebhookNotifier};
use seen_links::SeenLinks;
use store::SqliteStore;
use utils::ensure_parent_dir;

/// First retry delay for detail and listing fetches.
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

type SiteIngestor = Ingestor<RetryFetch<ReqwestFetcher>, SqliteStore>;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let args = Cli::parse();
    let command = args.command();
    info!(?command, version = env!("CARGO_PKG_VERSION"), "toram_news starting up");

    let mut settings = Settings::load(args.config.as_deref()).await?;
    settings.apply_cli(&args);
    settings.validate()?;

    ensure_parent_dir(&settings.database_path).await?;
    ensure_parent_dir(&settings.seen_links_path).await?;
    let store = SqliteStore::open(&settings.database_path).await?;
    let notifier = build_notifier(&settings)?;

    match command {
        Command::Crawl => {
            let mut ingestor = build_ingestor(&settings, store).await?;
            let report = ingestor.run_pass().await?;
            info!(?report, "Single crawl pass complete");
        }
        Command::Deliver => {
            let mut dispatcher =
                Dispatcher::start(store, notifier, settings.deliver_backlog).await?;
            let report = dispatcher.tick().await?;
            info!(?report, watermark = %dispatcher.watermark(), "Single delivery tick complete");
        }
        Command::Show { id } => {
            let found = deliver_on_demand(&store, &notifier, ArticleId(id)).await?;
            info!(%id, found, "On-demand delivery complete");
        }
        Command::Run => {
            let mut ingestor = build_ingestor(&settings, store.clone()).await?;
            let mut dispatcher =
                Dispatcher::start(store, notifier, settings.deliver_backlog).await?;
            info!(
                crawl_every = ?settings.crawl_interval(),
                deliver_every = ?settings.delivery_interval(),
                "Loops started"
            );

            tokio::select! {
                _ = async {
                    tokio::join!(
                        ingestor.run(settings.crawl_interval()),
                        dispatcher.run(settings.delivery_interval()),
                    )
                } => {}
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    info!("Shutdown requested");
                }
            }
        }
    }

    Ok(())
}

async fn build_ingestor(
    settings: &Settings,
    store: SqliteStore,
) -> Result<SiteIngestor, Box<dyn Error>> {
    let fetcher = RetryFetch::new(
        ReqwestFetcher::new(settings.request_timeout())?,
        settings.fetch_retries,
        RETRY_BASE_DELAY,
    );
    let seen = SeenLinks::load(&settings.seen_links_path).await?;
    let options = IngestOptions {
        listing_template: settings.listing_url.clone(),
        max_pages: settings.max_listing_pages,
        default_category: settings.default_category.clone(),
        pacing: settings.pacing(),
    };
    Ok(Ingestor::new(
        fetcher,
        store,
        ArticleAssembler::new(MarkdownSanitizer::new(Html2MdConverter)),
        seen,
        options,
    ))
}

fn build_notifier(settings: &Settings) -> Result<ConfiguredNotifier, Box<dyn Error>> {
    match &settings.webhook_url {
        Some(url) => Ok(ConfiguredNotifier::Webhook(WebhookNotifier::new(
            url.clone(),
            settings.pacing(),
            settings.request_timeout(),
        )?)),
        None => {
            warn!("No webhook configured; notifications are only logged");
            Ok(ConfiguredNotifier::Log(LogNotifier))
        }
    }
}
