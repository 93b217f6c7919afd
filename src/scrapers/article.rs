//! Article detail page extraction.
//!
//! Parses one article page into its metadata and an ordered list of raw
//! sections. The page is never modified: boilerplate blocks are collected
//! into a set of excluded node ids first, and every later walk over the tree
//! skips those subtrees.
//!
//! # Page Structure
//!
//! ```text
//! div.useBox.newsBox
//! ├── h1.news_title                 title (mandatory)
//! ├── p.news_date > time            date (mandatory)
//! ├── div.infoDetailBox img[alt]    category
//! ├── h2.deluxetitle                section heading
//! │   …siblings…                    section body, up to the next heading
//! ├── div.subtitle "Item Details"   boilerplate, dropped with its siblings
//! └── details                       boilerplate, dropped
//! ```

use crate::errors::ParseError;
use crate::utils::dedup_urls;
use ego_tree::{NodeId, NodeRef};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::HashSet;
use std::fmt::Write;
use tracing::{debug, instrument};
use url::Url;

static NEWS_BOX: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.useBox.newsBox").expect("valid news box selector"));
static TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h1.news_title").expect("valid title selector"));
static DATE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p.news_date time").expect("valid date selector"));
static CATEGORY: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.infoDetailBox img[alt]").expect("valid category selector"));
static DETAILS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("details").expect("valid details selector"));
static SUBTITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.subtitle").expect("valid subtitle selector"));
static SECTION_HEADING: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h2.deluxetitle").expect("valid section heading selector"));
static SCHEDULE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)From:[^\n]+\n+Until:[^\n]+").expect("valid schedule regex")
});
static NEWLINES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n+").expect("valid newline regex"));

/// Title of the synthetic section holding a maintenance window.
pub const MAINTENANCE_SECTION_TITLE: &str = "Maintenance Schedule";

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Body of a raw section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionBody {
    /// HTML fragment of a heading-delimited section, still to be sanitized.
    Html(String),
    /// Text that is already final markdown.
    Markdown(String),
}

/// A section as found on the page, before sanitizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSection {
    pub heading: String,
    pub body: SectionBody,
    /// Images inside the section fragment, first-seen order, no duplicates.
    pub images: Vec<String>,
}

/// Everything extracted from one article page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedArticle {
    pub title: String,
    pub date: String,
    pub category: String,
    pub sections: Vec<RawSection>,
    /// Every image in the cleaned page, first-seen order, no duplicates.
    /// May overlap with section images; scopes are settled by the assembler.
    pub images: Vec<String>,
}

/// Extract title, date, category, sections and images from an article page.
///
/// Relative image URLs are resolved against `page_url`. When the page has
/// no category icon, `default_category` is used.
///
/// # Errors
///
/// Returns [`ParseError::MissingElement`] if the news box, the title or the
/// date is absent. No partial result is produced.
#[instrument(level = "debug", skip(html, default_category))]
pub fn extract_article(
    html: &str,
    page_url: &str,
    default_category: &str,
) -> Result<ExtractedArticle, ParseError> {
    let document = Html::parse_document(html);
    let base = Url::parse(page_url).ok();

    let news_box = document
        .select(&NEWS_BOX)
        .next()
        .ok_or(ParseError::MissingElement("div.useBox.newsBox"))?;
    let title = news_box
        .select(&TITLE)
        .next()
        .map(element_text)
        .ok_or(ParseError::MissingElement("h1.news_title"))?;
    let date = news_box
        .select(&DATE)
        .next()
        .map(element_text)
        .ok_or(ParseError::MissingElement("p.news_date time"))?;
    let category = news_box
        .select(&CATEGORY)
        .next()
        .and_then(|img| img.value().attr("alt"))
        .map(str::trim)
        .filter(|alt| !alt.is_empty())
        .unwrap_or(default_category)
        .to_string();

    let excluded = boilerplate_nodes(news_box);
    let mut sections = split_sections(news_box, &excluded, base.as_ref());

    if title.to_lowercase().contains("maintenance notice") {
        if let Some(schedule) = maintenance_schedule(*news_box, &excluded) {
            sections.push(RawSection {
                heading: MAINTENANCE_SECTION_TITLE.to_string(),
                body: SectionBody::Markdown(schedule),
                images: Vec::new(),
            });
        }
    }

    let images = collect_images(&[*news_box], &excluded, base.as_ref());
    debug!(
        sections = sections.len(),
        images = images.len(),
        excluded = excluded.len(),
        "Extracted article"
    );

    Ok(ExtractedArticle {
        title,
        date,
        category,
        sections,
        images,
    })
}

/// Collect the ids of boilerplate nodes.
///
/// Every `details` element is boilerplate. A `div.subtitle` mentioning
/// "item details" is boilerplate together with the siblings following it,
/// up to the next subtitle or section heading.
fn boilerplate_nodes(news_box: ElementRef<'_>) -> HashSet<NodeId> {
    let mut excluded: HashSet<NodeId> = news_box.select(&DETAILS).map(|d| d.id()).collect();

    for subtitle in news_box.select(&SUBTITLE) {
        let text = subtitle.text().collect::<String>().to_lowercase();
        if !text.contains("item details") {
            continue;
        }
        excluded.insert(subtitle.id());
        for sibling in subtitle.next_siblings() {
            if is_subtitle(sibling) || is_section_heading(sibling) {
                break;
            }
            excluded.insert(sibling.id());
        }
    }
    excluded
}

fn split_sections(
    news_box: ElementRef<'_>,
    excluded: &HashSet<NodeId>,
    base: Option<&Url>,
) -> Vec<RawSection> {
    news_box
        .select(&SECTION_HEADING)
        .filter(|heading| !within_excluded(**heading, excluded))
        .map(|heading| {
            let mut nodes = vec![*heading];
            for sibling in heading.next_siblings() {
                if is_section_heading(sibling) {
                    break;
                }
                if excluded.contains(&sibling.id()) || has_name(sibling, "table") {
                    continue;
                }
                nodes.push(sibling);
            }

            let mut fragment = String::new();
            for node in &nodes {
                write_html(*node, excluded, &mut fragment);
            }

            RawSection {
                heading: element_text(heading),
                body: SectionBody::Html(fragment),
                images: collect_images(&nodes, excluded, base),
            }
        })
        .collect()
}

/// Find a "From: … Until: …" block in the visible text and reformat it with
/// one blank line between its lines.
fn maintenance_schedule(root: NodeRef<'_, Node>, excluded: &HashSet<NodeId>) -> Option<String> {
    let mut lines = Vec::new();
    push_text_lines(root, excluded, &mut lines);
    let text = lines.join("\n");
    let block = SCHEDULE_RE.find(&text)?;
    Some(
        NEWLINES_RE
            .replace_all(block.as_str().trim(), "\n\n")
            .into_owned(),
    )
}

fn push_text_lines(node: NodeRef<'_, Node>, excluded: &HashSet<NodeId>, lines: &mut Vec<String>) {
    if excluded.contains(&node.id()) {
        return;
    }
    match node.value() {
        Node::Text(text) => lines.extend(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from),
        ),
        Node::Element(el) if matches!(el.name(), "script" | "style") => {}
        _ => {
            for child in node.children() {
                push_text_lines(child, excluded, lines);
            }
        }
    }
}

fn collect_images(
    roots: &[NodeRef<'_, Node>],
    excluded: &HashSet<NodeId>,
    base: Option<&Url>,
) -> Vec<String> {
    let mut urls = Vec::new();
    for root in roots {
        push_images(*root, excluded, base, &mut urls);
    }
    dedup_urls(urls)
}

fn push_images(
    node: NodeRef<'_, Node>,
    excluded: &HashSet<NodeId>,
    base: Option<&Url>,
    urls: &mut Vec<String>,
) {
    if excluded.contains(&node.id()) {
        return;
    }
    if let Some(el) = node.value().as_element() {
        if el.name() == "img" {
            if let Some(src) = el.attr("src").map(str::trim).filter(|s| !s.is_empty()) {
                urls.push(resolve_src(src, base));
            }
        }
    }
    for child in node.children() {
        push_images(child, excluded, base, urls);
    }
}

fn resolve_src(src: &str, base: Option<&Url>) -> String {
    match base.and_then(|b| b.join(src).ok()) {
        Some(url) => url.to_string(),
        None => src.to_string(),
    }
}

/// Serialize `node` back to HTML, leaving out excluded subtrees.
fn write_html(node: NodeRef<'_, Node>, excluded: &HashSet<NodeId>, out: &mut String) {
    if excluded.contains(&node.id()) {
        return;
    }
    match node.value() {
        Node::Text(text) => escape_into(text, false, out),
        Node::Element(el) => {
            let name = el.name();
            out.push('<');
            out.push_str(name);
            for (attr, value) in el.attrs() {
                let _ = write!(out, " {attr}=\"");
                escape_into(value, true, out);
                out.push('"');
            }
            out.push('>');
            if VOID_ELEMENTS.contains(&name) {
                return;
            }
            for child in node.children() {
                write_html(child, excluded, out);
            }
            let _ = write!(out, "</{name}>");
        }
        _ => {}
    }
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

fn within_excluded(node: NodeRef<'_, Node>, excluded: &HashSet<NodeId>) -> bool {
    excluded.contains(&node.id()) || node.ancestors().any(|a| excluded.contains(&a.id()))
}

fn has_name(node: NodeRef<'_, Node>, name: &str) -> bool {
    node.value().as_element().is_some_and(|el| el.name() == name)
}

fn has_class(node: NodeRef<'_, Node>, name: &str, class: &str) -> bool {
    node.value()
        .as_element()
        .is_some_and(|el| el.name() == name && el.classes().any(|c| c == class))
}

fn is_section_heading(node: NodeRef<'_, Node>) -> bool {
    has_class(node, "h2", "deluxetitle")
}

fn is_subtitle(node: NodeRef<'_, Node>) -> bool {
    has_class(node, "div", "subtitle")
}

/// Visible text of an element with whitespace runs collapsed.
fn element_text(el: ElementRef<'_>) -> String {
    el.text().flat_map(str::split_whitespace).join(" ")
}
