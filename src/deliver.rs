//! Watermark-driven delivery of stored articles.
//!
//! The [`Dispatcher`] remembers the highest article id already handed to the
//! notifier. Every tick it asks the store for everything above that mark and
//! sends those articles in ascending id order, moving the mark forward after
//! each successful send. The mark is persisted through the store, so a
//! restart resumes where delivery stopped.

use crate::errors::{DeliveryError, StoreError};
use crate::models::ArticleId;
use crate::notify::Notifier;
use crate::store::ArticleStore;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, warn};

/// Counters for one delivery tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub delivered: usize,
    /// Articles left for a later tick after a failed send.
    pub pending: usize,
}

pub struct Dispatcher<S, N> {
    store: S,
    notifier: N,
    watermark: ArticleId,
}

impl<S, N> Dispatcher<S, N>
where
    S: ArticleStore,
    N: Notifier,
{
    /// Create a dispatcher, resuming from the persisted watermark.
    ///
    /// Without a persisted watermark, delivery starts after the newest stored
    /// article, or from the very beginning when `deliver_backlog` is set.
    #[instrument(level = "info", skip(store, notifier))]
    pub async fn start(store: S, notifier: N, deliver_backlog: bool) -> Result<Self, StoreError> {
        let watermark = match store.load_watermark().await? {
            Some(mark) => mark,
            None if deliver_backlog => ArticleId(0),
            None => {
                let mark = store.query_max_id().await?.unwrap_or(ArticleId(0));
                store.save_watermark(mark).await?;
                mark
            }
        };
        info!(%watermark, "Delivery watermark initialized");
        Ok(Self {
            store,
            notifier,
            watermark,
        })
    }

    pub fn watermark(&self) -> ArticleId {
        self.watermark
    }

    /// Deliver every article stored above the watermark.
    ///
    /// A failed send ends the tick; that article and everything after it are
    /// retried on the next tick.
    ///
    /// # Errors
    ///
    /// A store failure while querying or persisting the watermark.
    #[instrument(level = "debug", skip_all, fields(watermark = %self.watermark))]
    pub async fn tick(&mut self) -> Result<TickReport, StoreError> {
        let articles = self.store.query_ids_greater_than(self.watermark).await?;
        let mut report = TickReport::default();

        for (i, article) in articles.iter().enumerate() {
            if let Err(e) = self.notifier.send(article).await {
                report.pending = articles.len() - i;
                warn!(id = %article.id, error = %e, pending = report.pending, "Delivery failed; retrying next tick");
                break;
            }
            self.watermark = article.id;
            self.store.save_watermark(article.id).await?;
            report.delivered += 1;
        }

        if report.delivered > 0 {
            info!(delivered = report.delivered, watermark = %self.watermark, "Delivery tick finished");
        } else {
            debug!("Nothing to deliver");
        }
        Ok(report)
    }

    /// Tick forever, once every `period`.
    pub async fn run(&mut self, period: Duration) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                error!(error = %e, "Delivery tick failed");
            }
        }
    }
}

/// Send one stored article regardless of the watermark.
///
/// A missing id is answered with a "not found" notification.
#[instrument(level = "info", skip(store, notifier))]
pub async fn deliver_on_demand<S, N>(store: &S, notifier: &N, id: ArticleId) -> Result<bool, DeliveryError>
where
    S: ArticleStore,
    N: Notifier,
{
    match store.query_by_id(id).await? {
        Some(article) => {
            notifier.send(&article).await?;
            Ok(true)
        }
        None => {
            warn!("Requested article is not stored");
            notifier.send_not_found(id).await?;
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::NotifyError;
    use crate::models::Article;
    use crate::store::SqliteStore;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Records sends; fails for `fail_on` while it is set.
    #[derive(Clone, Default)]
    struct Recording {
        sent: Arc<Mutex<Vec<i64>>>,
        not_found: Arc<Mutex<Vec<i64>>>,
        fail_on: Arc<Mutex<Option<ArticleId>>>,
    }

    impl Recording {
        fn sent(&self) -> Vec<i64> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Notifier for Recording {
        async fn send(&self, article: &Article) -> Result<(), NotifyError> {
            if *self.fail_on.lock().unwrap() == Some(article.id) {
                return Err(NotifyError::Status(503));
            }
            self.sent.lock().unwrap().push(article.id.0);
            Ok(())
        }

        async fn send_not_found(&self, id: ArticleId) -> Result<(), NotifyError> {
            self.not_found.lock().unwrap().push(id.0);
            Ok(())
        }
    }

    fn article(id: i64) -> Article {
        Article {
            id: ArticleId(id),
            url: format!("https://en.toram.jp/information/detail/?information_id={id}"),
            title: format!("News {id}"),
            date: "2025-07-16".to_string(),
            category: "Event".to_string(),
            sections: Vec::new(),
            images: Vec::new(),
        }
    }

    async fn store_with(ids: &[i64]) -> (TempDir, SqliteStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(tmp.path().join("news.sqlite")).await.unwrap();
        for id in ids {
            store.insert_article(&article(*id)).await.unwrap();
        }
        (tmp, store)
    }

    #[tokio::test]
    async fn test_fresh_start_skips_existing_articles() {
        let (_tmp, store) = store_with(&[1, 2]).await;
        let notifier = Recording::default();
        let mut dispatcher = Dispatcher::start(store.clone(), notifier.clone(), false)
            .await
            .unwrap();
        assert_eq!(dispatcher.watermark(), ArticleId(2));

        store.insert_article(&article(4)).await.unwrap();
        store.insert_article(&article(3)).await.unwrap();
        let report = dispatcher.tick().await.unwrap();

        assert_eq!(report.delivered, 2);
        assert_eq!(notifier.sent(), vec![3, 4]);
        assert_eq!(dispatcher.watermark(), ArticleId(4));
        assert_eq!(store.load_watermark().await.unwrap(), Some(ArticleId(4)));
    }

    #[tokio::test]
    async fn test_backlog_delivers_everything_in_order() {
        let (_tmp, store) = store_with(&[3, 1, 2]).await;
        let notifier = Recording::default();
        let mut dispatcher = Dispatcher::start(store, notifier.clone(), true).await.unwrap();

        dispatcher.tick().await.unwrap();
        assert_eq!(notifier.sent(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_failed_send_stops_tick_without_advancing() {
        let (_tmp, store) = store_with(&[]).await;
        let notifier = Recording::default();
        let mut dispatcher = Dispatcher::start(store.clone(), notifier.clone(), false)
            .await
            .unwrap();
        for id in [3, 4, 5] {
            store.insert_article(&article(id)).await.unwrap();
        }

        *notifier.fail_on.lock().unwrap() = Some(ArticleId(4));
        let report = dispatcher.tick().await.unwrap();
        assert_eq!(
            report,
            TickReport {
                delivered: 1,
                pending: 2
            }
        );
        assert_eq!(dispatcher.watermark(), ArticleId(3));

        *notifier.fail_on.lock().unwrap() = None;
        dispatcher.tick().await.unwrap();
        assert_eq!(notifier.sent(), vec![3, 4, 5]);
        assert_eq!(dispatcher.watermark(), ArticleId(5));
    }

    #[tokio::test]
    async fn test_watermark_is_monotonic_across_ticks() {
        let (_tmp, store) = store_with(&[]).await;
        let mut dispatcher = Dispatcher::start(store.clone(), Recording::default(), false)
            .await
            .unwrap();

        let mut marks = vec![dispatcher.watermark()];
        for batch in [&[1, 2][..], &[][..], &[7][..], &[5][..]] {
            for id in batch {
                store.insert_article(&article(*id)).await.unwrap();
            }
            dispatcher.tick().await.unwrap();
            marks.push(dispatcher.watermark());
        }

        assert!(marks.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(dispatcher.watermark(), ArticleId(7));
    }

    #[tokio::test]
    async fn test_restart_resumes_from_persisted_watermark() {
        let (_tmp, store) = store_with(&[1, 2, 3]).await;
        store.save_watermark(ArticleId(1)).await.unwrap();

        let notifier = Recording::default();
        let mut dispatcher = Dispatcher::start(store, notifier.clone(), false).await.unwrap();
        assert_eq!(dispatcher.watermark(), ArticleId(1));

        dispatcher.tick().await.unwrap();
        assert_eq!(notifier.sent(), vec![2, 3]);
    }

    #[tokio::test]
    async fn test_on_demand_delivery() {
        let (_tmp, store) = store_with(&[9]).await;
        let notifier = Recording::default();

        assert!(deliver_on_demand(&store, &notifier, ArticleId(9)).await.unwrap());
        assert!(!deliver_on_demand(&store, &notifier, ArticleId(10)).await.unwrap());
        assert_eq!(notifier.sent(), vec![9]);
        assert_eq!(*notifier.not_found.lock().unwrap(), vec![10]);
    }
}
