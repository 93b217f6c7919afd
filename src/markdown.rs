//! HTML fragment to cleaned markdown conversion.
//!
//! Each section body goes through a fixed pipeline:
//!
//! 1. Convert the HTML fragment to ATX-heading markdown ([`Converter`])
//! 2. Drop the in-page table of contents ([`remove_toc_block`])
//! 3. Drop in-document anchor links, keeping their visible text
//! 4. Drop image markdown (images are carried as structured data)
//! 5. Drop the leading heading that repeats the section title
//! 6. Collapse whitespace and blank-line runs, then trim
//!
//! Steps 2-6 are repeated until the text stops changing. Every step only
//! removes characters, so the loop terminates, and the result is a fixed
//! point: sanitizing sanitized text returns it unchanged.

use once_cell::sync::Lazy;
use regex::Regex;

static TOC_ENTRY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[-*+]\s+|\d+\.\s+)?\[?[^\n#]+?\]?\(?#\S+?\)?\s*$")
        .expect("valid toc entry regex")
});
static ANCHOR_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:[-*+][ \t]+)?\[[^\]\n]*\]\(#[^)\n]*\)[ \t]*$")
        .expect("valid anchor line regex")
});
static BACK_TO_TOP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\[?back to top\]?\(?#top\)?").expect("valid back-to-top regex")
});
static BACK_TO_TOP_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[ \t]*back to top[ \t]*$").expect("valid back-to-top line regex")
});
static INLINE_ANCHOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[([^\]\n]+)\]\(#[^)\n]*\)").expect("valid inline anchor regex")
});
static IMAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[[^\]\n]*\]\([^)\n]*\)").expect("valid image regex"));
static RAW_IMG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<img\b[^>]*>").expect("valid raw img regex"));
static EMPTY_LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\s*\]\([^)\n]*\)").expect("valid empty link regex"));
static HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#{1,6}[ \t]+(.*?)[ \t#]*$").expect("valid heading regex"));
static LINE_BREAK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t\r]*\n[ \t\r]*").expect("valid line break regex"));
static BLANK_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{2,}").expect("valid blank run regex"));

static SETEXT_UNDERLINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[ \t]*(=+|-{2,})[ \t]*$").expect("valid setext underline regex"));
static CLOSED_ATX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(#{1,6})[ \t]+(.*?)[ \t]+#+[ \t]*$").expect("valid closed atx regex")
});

const TOC_TRIGGER: &str = "tap here to check";

/// Converts an HTML fragment to markdown.
pub trait Converter {
    fn to_markdown(&self, html: &str) -> String;
}

/// [`Converter`] backed by `html2md`.
///
/// `html2md` underlines `h1`/`h2` (setext) and closes `h3`+ with trailing
/// hashes; its output is rewritten to plain ATX headings.
#[derive(Debug, Default, Clone, Copy)]
pub struct Html2MdConverter;

impl Converter for Html2MdConverter {
    fn to_markdown(&self, html: &str) -> String {
        normalize_headings(&html2md::parse_html(html))
    }
}

/// Rewrite setext and closed ATX headings as `# Title` / `## Title` style.
///
/// An underline only counts when the line above it holds text, so a `---`
/// rule after a blank line is left alone.
pub fn normalize_headings(markdown: &str) -> String {
    let lines: Vec<&str> = markdown.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let text = line.trim();
        let underline = lines
            .get(i + 1)
            .and_then(|next| SETEXT_UNDERLINE_RE.captures(next))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str());
        match underline {
            Some(mark) if !text.is_empty() && !text.starts_with('#') => {
                let level = if mark.starts_with('=') { "#" } else { "##" };
                out.push(format!("{level} {text}"));
                i += 2;
            }
            _ => {
                out.push(CLOSED_ATX_RE.replace(line, "$1 $2").into_owned());
                i += 1;
            }
        }
    }
    out.join("\n")
}

/// Turns a section's raw HTML fragment into cleaned markdown.
#[derive(Debug, Default, Clone)]
pub struct MarkdownSanitizer<C = Html2MdConverter> {
    converter: C,
}

impl<C: Converter> MarkdownSanitizer<C> {
    pub fn new(converter: C) -> Self {
        Self { converter }
    }

    /// Convert `fragment` and run the cleanup pipeline on the result.
    ///
    /// `title` is the section title already carried as structured data; a
    /// leading heading repeating it is removed from the text.
    pub fn sanitize(&self, fragment: &str, title: &str) -> String {
        let markdown = self.converter.to_markdown(fragment);
        sanitize_markdown(&markdown, title)
    }
}

/// Run cleanup steps 2-6 on already converted markdown until nothing changes.
///
/// # Examples
///
/// ```ignore
/// let md = "## Title\n[skip](#x)\n![img](u)\nText here\n\n\nMore";
/// assert_eq!(sanitize_markdown(md, "Title"), "Text here\nMore");
/// ```
pub fn sanitize_markdown(markdown: &str, title: &str) -> String {
    let mut current = clean_pass(markdown, title);
    loop {
        let next = clean_pass(&current, title);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn clean_pass(markdown: &str, title: &str) -> String {
    let text = remove_toc_block(markdown);
    let text = remove_internal_links(&text);
    let text = remove_image_markdown(&text);
    let text = strip_title_heading(&text, title);
    collapse_whitespace(text)
}

/// States of the table-of-contents scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TocState {
    /// Lines are copied to the output.
    Copy,
    /// Inside a table of contents; anchor entries and blank lines are dropped.
    SkipToc,
}

impl TocState {
    /// Feed one line, returning the next state and whether the line is kept.
    ///
    /// Leaving `SkipToc` re-reads the line in `Copy`, so a line that ends one
    /// table of contents can start the next.
    pub fn step(self, line: &str) -> (TocState, bool) {
        let trimmed = line.trim();
        match self {
            TocState::Copy => {
                if trimmed.to_lowercase().contains(TOC_TRIGGER) {
                    (TocState::SkipToc, false)
                } else {
                    (TocState::Copy, true)
                }
            }
            TocState::SkipToc => {
                if trimmed.is_empty() {
                    return (TocState::SkipToc, false);
                }
                let ends_toc = trimmed.starts_with('#')
                    || trimmed.starts_with('!')
                    || !TOC_ENTRY_RE.is_match(trimmed);
                if ends_toc {
                    TocState::Copy.step(line)
                } else {
                    (TocState::SkipToc, false)
                }
            }
        }
    }
}

/// Remove "tap here to check" tables of contents and their anchor entries.
pub fn remove_toc_block(markdown: &str) -> String {
    let mut state = TocState::Copy;
    let mut kept = Vec::new();
    for line in markdown.lines() {
        let (next, keep) = state.step(line);
        if keep {
            kept.push(line);
        }
        state = next;
    }
    kept.join("\n")
}

/// Remove stand-alone anchor-link lines and unwrap inline anchor links.
pub fn remove_internal_links(markdown: &str) -> String {
    let text = ANCHOR_LINE_RE.replace_all(markdown, "");
    let text = BACK_TO_TOP_RE.replace_all(&text, "");
    let text = BACK_TO_TOP_LINE_RE.replace_all(&text, "");
    INLINE_ANCHOR_RE.replace_all(&text, "$1").into_owned()
}

/// Remove `![alt](src)` images, plus the empty link left by a linked image.
///
/// `html2md` keeps sized images as raw `<img>` tags; those go too.
pub fn remove_image_markdown(markdown: &str) -> String {
    let text = IMAGE_RE.replace_all(markdown, "");
    let text = RAW_IMG_RE.replace_all(&text, "");
    EMPTY_LINK_RE.replace_all(&text, "").into_owned()
}

/// Drop leading heading lines whose text is the section title.
///
/// Only headings equal to `title` are dropped, never an arbitrary first
/// heading: a sub-heading exposed by one pass must survive the next pass,
/// otherwise sanitizing twice would eat it.
fn strip_title_heading<'a>(markdown: &'a str, title: &str) -> &'a str {
    let wanted = normalize_heading(title);
    let mut rest = markdown.trim_start();
    loop {
        let (first, tail) = rest.split_once('\n').unwrap_or((rest, ""));
        let repeats_title = HEADING_RE
            .captures(first.trim_end())
            .and_then(|caps| caps.get(1))
            .is_some_and(|text| normalize_heading(text.as_str()) == wanted);
        if !repeats_title {
            return rest;
        }
        rest = tail.trim_start();
    }
}

fn normalize_heading(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '\\' | '*' | '_' | '`'))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn collapse_whitespace(markdown: &str) -> String {
    let text = LINE_BREAK_RE.replace_all(markdown, "\n");
    let text = BLANK_RUN_RE.replace_all(&text, "\n");
    text.trim().to_string()
}
