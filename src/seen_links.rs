//! Durable record of listing URLs that were already discovered.
//!
//! The file is plain UTF-8 with one URL per line. It is read once on startup
//! and only ever appended to, so the set grows monotonically across restarts.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

#[derive(Debug)]
pub struct SeenLinks {
    path: PathBuf,
    links: HashSet<String>,
    /// The file exists but its last line is not newline-terminated.
    needs_newline: bool,
}

impl SeenLinks {
    /// Load the set from `path`. A missing file is an empty set.
    ///
    /// # Errors
    ///
    /// Any I/O failure other than the file not existing.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };

        let links: HashSet<String> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();
        info!(count = links.len(), "Loaded seen links");

        Ok(Self {
            path,
            links,
            needs_newline: !content.is_empty() && !content.ends_with('\n'),
        })
    }

    pub fn contains(&self, url: &str) -> bool {
        self.links.contains(url)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Add `url` and append it to the file right away.
    ///
    /// # Returns
    ///
    /// `true` if the URL was new, `false` if it was already recorded (the
    /// file is left untouched).
    pub async fn record(&mut self, url: &str) -> io::Result<bool> {
        if self.links.contains(url) {
            return Ok(false);
        }

        let mut line = String::with_capacity(url.len() + 2);
        if self.needs_newline {
            line.push('\n');
        }
        line.push_str(url);
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        self.needs_newline = false;
        self.links.insert(url.to_string());
        debug!(%url, "Recorded seen link");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_empty_set() {
        let tmp = tempfile::tempdir().unwrap();
        let seen = SeenLinks::load(tmp.path().join("seen.txt")).await.unwrap();
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn test_record_appends_and_survives_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("seen.txt");

        let mut seen = SeenLinks::load(&path).await.unwrap();
        assert!(seen.record("https://a").await.unwrap());
        assert!(seen.record("https://b").await.unwrap());
        assert!(!seen.record("https://a").await.unwrap());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "https://a\nhttps://b\n"
        );

        let reloaded = SeenLinks::load(&path).await.unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains("https://b"));
    }

    #[tokio::test]
    async fn test_load_ignores_blank_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("seen.txt");
        std::fs::write(&path, "https://a\n\n  \nhttps://b\n").unwrap();

        let seen = SeenLinks::load(&path).await.unwrap();
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn test_append_after_unterminated_last_line() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("seen.txt");
        std::fs::write(&path, "https://a").unwrap();

        let mut seen = SeenLinks::load(&path).await.unwrap();
        seen.record("https://b").await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "https://a\nhttps://b\n"
        );
    }
}
