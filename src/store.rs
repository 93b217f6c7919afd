//! Persistent article store backed by SQLite.
//!
//! # Architecture
//!
//! - [`ArticleStore`]: The narrow interface used by the ingestion and
//!   delivery loops
//! - [`SqliteStore`]: `rusqlite` implementation
//!
//! Every call opens its own connection on a blocking thread, runs one
//! transaction and closes it again, so no transaction is ever held across an
//! `.await`.
//!
//! # Schema
//!
//! | Table | Key | Holds |
//! |-------|-----|-------|
//! | `news_articles` | `id`, unique `url` | article metadata |
//! | `news_sections` | `(article_id, position)` | section title and markdown |
//! | `news_images` | `(article_id, position)` | image URL; `section_position` is `NULL` for article scope |
//! | `delivery_watermark` | single row | last delivered article id |

use crate::errors::StoreError;
use crate::models::{Article, ArticleId, Image, ImageScope, InsertOutcome, Section};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task;
use tracing::{debug, info, instrument, warn};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS news_articles (
        id         INTEGER PRIMARY KEY,
        url        TEXT UNIQUE NOT NULL,
        title      TEXT NOT NULL,
        date       TEXT NOT NULL,
        category   TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE IF NOT EXISTS news_sections (
        article_id INTEGER NOT NULL REFERENCES news_articles(id) ON DELETE CASCADE,
        position   INTEGER NOT NULL,
        title      TEXT NOT NULL,
        markdown   TEXT NOT NULL,
        PRIMARY KEY (article_id, position)
    );

    CREATE TABLE IF NOT EXISTS news_images (
        article_id       INTEGER NOT NULL REFERENCES news_articles(id) ON DELETE CASCADE,
        position         INTEGER NOT NULL,
        section_position INTEGER,
        url              TEXT NOT NULL,
        PRIMARY KEY (article_id, position)
    );

    CREATE TABLE IF NOT EXISTS delivery_watermark (
        id         INTEGER PRIMARY KEY CHECK (id = 1),
        last_id    INTEGER NOT NULL,
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    );
";

/// Storage operations needed by the pipeline.
///
/// Each operation is atomic for a single article.
pub trait ArticleStore {
    /// Persist a new article with its sections and images.
    ///
    /// Returns [`InsertOutcome::AlreadyExists`] without writing anything when
    /// the URL or the identifier is already stored.
    async fn insert_article(&self, article: &Article) -> Result<InsertOutcome, StoreError>;

    async fn query_by_url(&self, url: &str) -> Result<Option<Article>, StoreError>;

    async fn query_by_id(&self, id: ArticleId) -> Result<Option<Article>, StoreError>;

    async fn query_max_id(&self) -> Result<Option<ArticleId>, StoreError>;

    /// All articles with an identifier strictly greater than `id`, ascending.
    async fn query_ids_greater_than(&self, id: ArticleId) -> Result<Vec<Article>, StoreError>;

    /// The last delivered identifier, if delivery ever happened.
    async fn load_watermark(&self) -> Result<Option<ArticleId>, StoreError>;

    /// Persist the last delivered identifier. Never moves it backwards.
    async fn save_watermark(&self, id: ArticleId) -> Result<(), StoreError>;
}

/// [`ArticleStore`] on a SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    /// Open the database at `path`, creating the schema if needed.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        store
            .with_connection(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        info!("Article store ready");
        Ok(store)
    }

    async fn with_connection<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let mut conn = connect(&path)?;
            op(&mut conn)
        })
        .await?
    }
}

fn connect(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

fn insert_article_tx(conn: &mut Connection, article: &Article) -> Result<InsertOutcome, StoreError> {
    let tx = conn.transaction()?;

    let exists: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM news_articles WHERE id = ?1 OR url = ?2)",
        params![article.id.0, article.url],
        |row| row.get(0),
    )?;
    if exists {
        return Ok(InsertOutcome::AlreadyExists);
    }

    match tx.execute(
        "INSERT INTO news_articles (id, url, title, date, category) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            article.id.0,
            article.url,
            article.title,
            article.date,
            article.category
        ],
    ) {
        Ok(_) => {}
        Err(e) if is_constraint_violation(&e) => return Ok(InsertOutcome::AlreadyExists),
        Err(e) => return Err(e.into()),
    }

    {
        let mut section_stmt = tx.prepare(
            "INSERT INTO news_sections (article_id, position, title, markdown) VALUES (?1, ?2, ?3, ?4)",
        )?;
        let mut image_stmt = tx.prepare(
            "INSERT INTO news_images (article_id, position, section_position, url) VALUES (?1, ?2, ?3, ?4)",
        )?;

        for (position, section) in article.sections.iter().enumerate() {
            section_stmt.execute(params![
                article.id.0,
                position as i64,
                section.title,
                section.markdown
            ])?;
        }

        let images = article
            .sections
            .iter()
            .flat_map(|s| s.images.iter())
            .chain(article.images.iter());
        for (position, image) in images.enumerate() {
            let section_position = match image.scope {
                ImageScope::Article => None,
                ImageScope::Section(p) => Some(p as i64),
            };
            image_stmt.execute(params![
                article.id.0,
                position as i64,
                section_position,
                image.url
            ])?;
        }
    }

    tx.commit()?;
    Ok(InsertOutcome::Inserted)
}

fn load_article(conn: &Connection, id: i64) -> Result<Option<Article>, StoreError> {
    let header = conn
        .query_row(
            "SELECT url, title, date, category FROM news_articles WHERE id = ?1",
            [id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;
    let Some((url, title, date, category)) = header else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT title, markdown FROM news_sections WHERE article_id = ?1 ORDER BY position",
    )?;
    let mut sections = stmt
        .query_map([id], |row| {
            Ok(Section {
                title: row.get(0)?,
                markdown: row.get(1)?,
                images: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT section_position, url FROM news_images WHERE article_id = ?1 ORDER BY position",
    )?;
    let rows = stmt
        .query_map([id], |row| {
            Ok((row.get::<_, Option<i64>>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut images = Vec::new();
    for (section_position, url) in rows {
        match section_position {
            None => images.push(Image {
                url,
                scope: ImageScope::Article,
            }),
            Some(p) => {
                let section = usize::try_from(p)
                    .ok()
                    .and_then(|p| sections.get_mut(p).map(|s| (p, s)));
                let Some((p, section)) = section else {
                    return Err(StoreError::Corrupt(format!(
                        "article {id} has an image for missing section {p}"
                    )));
                };
                section.images.push(Image {
                    url,
                    scope: ImageScope::Section(p),
                });
            }
        }
    }

    Ok(Some(Article {
        id: ArticleId(id),
        url,
        title,
        date,
        category,
        sections,
        images,
    }))
}

impl ArticleStore for SqliteStore {
    #[instrument(level = "debug", skip_all, fields(id = %article.id))]
    async fn insert_article(&self, article: &Article) -> Result<InsertOutcome, StoreError> {
        let article = article.clone();
        let outcome = self
            .with_connection(move |conn| insert_article_tx(conn, &article))
            .await?;
        if outcome == InsertOutcome::AlreadyExists {
            warn!("Article already stored; insert skipped");
        }
        Ok(outcome)
    }

    #[instrument(level = "debug", skip(self))]
    async fn query_by_url(&self, url: &str) -> Result<Option<Article>, StoreError> {
        let url = url.to_string();
        self.with_connection(move |conn| {
            let id: Option<i64> = conn
                .query_row("SELECT id FROM news_articles WHERE url = ?1", [&url], |row| {
                    row.get(0)
                })
                .optional()?;
            match id {
                Some(id) => load_article(conn, id),
                None => Ok(None),
            }
        })
        .await
    }

    #[instrument(level = "debug", skip(self))]
    async fn query_by_id(&self, id: ArticleId) -> Result<Option<Article>, StoreError> {
        self.with_connection(move |conn| load_article(conn, id.0)).await
    }

    async fn query_max_id(&self) -> Result<Option<ArticleId>, StoreError> {
        self.with_connection(|conn| {
            let max: Option<i64> =
                conn.query_row("SELECT MAX(id) FROM news_articles", [], |row| row.get(0))?;
            Ok(max.map(ArticleId))
        })
        .await
    }

    #[instrument(level = "debug", skip(self))]
    async fn query_ids_greater_than(&self, id: ArticleId) -> Result<Vec<Article>, StoreError> {
        let articles = self
            .with_connection(move |conn| {
                let ids = conn
                    .prepare("SELECT id FROM news_articles WHERE id > ?1 ORDER BY id ASC")?
                    .query_map([id.0], |row| row.get::<_, i64>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                let mut articles = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(article) = load_article(conn, id)? {
                        articles.push(article);
                    }
                }
                Ok(articles)
            })
            .await?;
        debug!(count = articles.len(), "Queried articles above watermark");
        Ok(articles)
    }

    async fn load_watermark(&self) -> Result<Option<ArticleId>, StoreError> {
        self.with_connection(|conn| {
            let last: Option<i64> = conn
                .query_row(
                    "SELECT last_id FROM delivery_watermark WHERE id = 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(last.map(ArticleId))
        })
        .await
    }

    #[instrument(level = "debug", skip(self))]
    async fn save_watermark(&self, id: ArticleId) -> Result<(), StoreError> {
        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO delivery_watermark (id, last_id) VALUES (1, ?1)
                 ON CONFLICT(id) DO UPDATE SET
                     last_id = MAX(last_id, excluded.last_id),
                     updated_at = datetime('now')",
                [id.0],
            )?;
            Ok(())
        })
        .await
    }
}
