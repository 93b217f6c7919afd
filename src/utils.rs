//! Utility functions for string handling and file system preparation.
//!
//! This module provides helper functions used throughout the application:
//! - String truncation for logging and for bounded notification bodies
//! - Order-preserving URL de-duplication
//! - Parent directory creation for the database and seen-links files

use itertools::Itertools;
use std::error::Error;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Truncate a string for logging purposes.
///
/// Long strings are cut to `max` characters with an ellipsis and a byte
/// count indicator appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}…(+{} bytes)", &s[..cut], s.len() - cut),
    }
}

/// Keep at most `max` characters of `s`.
///
/// Counts characters rather than bytes so multi-byte text is never split
/// in the middle of a code point.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        None => s,
        Some((cut, _)) => &s[..cut],
    }
}

/// Remove duplicate URLs, keeping the first occurrence of each.
pub fn dedup_urls<I>(urls: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    urls.into_iter().unique().collect()
}

/// Ensure the directory holding `path` exists.
///
/// The database and the seen-links file live at user-provided paths; their
/// parent directory is created on startup so the first write cannot fail
/// on a missing directory.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_parent_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).await?;
            info!(dir = %parent.display(), "Data directory ready");
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_log_short_string() {
        let s = "Hello, world!";
        assert_eq!(truncate_for_log(s, 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        let s = "ééééé";
        assert_eq!(truncate_chars(s, 2), "éé");
        assert_eq!(truncate_chars(s, 10), s);
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_dedup_urls_keeps_first_seen_order() {
        let urls = vec!["b", "a", "b", "c", "a"]
            .into_iter()
            .map(String::from);
        assert_eq!(dedup_urls(urls), vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_ensure_parent_dir_creates_nested_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("data/nested/news.sqlite");
        ensure_parent_dir(&file).await.unwrap();
        assert!(tmp.path().join("data/nested").is_dir());
    }

    #[tokio::test]
    async fn test_ensure_parent_dir_bare_filename() {
        ensure_parent_dir(Path::new("news.sqlite")).await.unwrap();
    }
}
