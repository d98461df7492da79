// src/extract/mod.rs
//! Page content extraction from raw HTML.
//!
//! No DOM: tags are scanned with a regex and elements are delimited by
//! balancing open/close tags of the same name. Good enough for landmark
//! selection on real-world pages; malformed markup degrades to "rest of the
//! document".

pub mod monitor;

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

pub use monitor::{ChangeGate, ContentMonitor, Debouncer, PageSnapshot};

pub const MAX_TEXT_CHARS: usize = 10_000;
pub const MAX_HEADINGS: usize = 10;
pub const MAX_IMAGES: usize = 5;
pub const MIN_IMAGE_DIM: u32 = 100;

const STRIPPED: &[&str] = &["nav", "header", "footer", "aside"];
const VOID: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

#[derive(Debug, Clone, Copy)]
enum Landmark {
    Tag(&'static str),
    Role(&'static str),
    Class(&'static str),
}

const LANDMARKS: &[Landmark] = &[
    Landmark::Tag("main"),
    Landmark::Tag("article"),
    Landmark::Role("main"),
    Landmark::Class("content"),
    Landmark::Class("post-content"),
    Landmark::Class("entry-content"),
    Landmark::Class("article-body"),
    Landmark::Tag("body"),
];

static RE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<(/?)([a-zA-Z][a-zA-Z0-9-]*)((?:[^>"']|"[^"]*"|'[^']*')*)>"#)
        .expect("tag regex")
});
static RE_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([a-zA-Z_:][-a-zA-Z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>/]+))"#)
        .expect("attr regex")
});
static RE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment regex"));
static RE_SCRIPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("script regex"));
static RE_STYLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").expect("style regex"));
static RE_NOSCRIPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<noscript\b[^>]*>.*?</noscript\s*>").expect("noscript regex"));
static RE_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title\b[^>]*>(.*?)</title\s*>").expect("title regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// `og:*` properties without the prefix.
    #[serde(default)]
    pub open_graph: BTreeMap<String, String>,
    #[serde(default)]
    pub headings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageInfo {
    pub src: String,
    #[serde(default)]
    pub alt: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedContent {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub metadata: PageMetadata,
    #[serde(default)]
    pub images: Vec<ImageInfo>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub timestamp: i64,
}

pub fn extract(url: &str, html: &str) -> ExtractedContent {
    extract_at(url, html, chrono::Utc::now().timestamp_millis())
}

pub fn extract_at(url: &str, html: &str, now_ms: i64) -> ExtractedContent {
    let doc = RE_COMMENT.replace_all(html, " ");
    let doc = RE_SCRIPT.replace_all(&doc, " ");
    let doc = RE_STYLE.replace_all(&doc, " ");
    let doc = RE_NOSCRIPT.replace_all(&doc, " ").into_owned();

    let title = RE_TITLE
        .captures(&doc)
        .and_then(|c| c.get(1))
        .map(|m| text_of(m.as_str()))
        .unwrap_or_default();

    let mut metadata = meta_tags(&doc);
    metadata.headings = headings(&doc);

    ExtractedContent {
        url: url.to_string(),
        title,
        text: main_text(&doc),
        metadata,
        images: images(&doc, url),
        timestamp: now_ms,
    }
}

/// Visible text of the first landmark found, with chrome stripped.
/// Fragments without any landmark (not even `<body>`) use the whole document
/// minus `<head>`.
fn main_text(doc: &str) -> String {
    let body = remove_elements(doc, STRIPPED);
    let text = match LANDMARKS.iter().find_map(|lm| find_landmark(&body, *lm)) {
        Some(raw) => text_of(raw),
        None => text_of(&remove_elements(&body, &["head"])),
    };
    truncate_chars(&text, MAX_TEXT_CHARS)
}

fn find_landmark(doc: &str, lm: Landmark) -> Option<&str> {
    let open = RE_TAG.captures_iter(doc).find(|c| {
        if is_closing(c) {
            return false;
        }
        let name = tag_name(c);
        match lm {
            Landmark::Tag(t) => name == t,
            Landmark::Role(r) => attr(c, "role").is_some_and(|v| v.eq_ignore_ascii_case(r)),
            Landmark::Class(cls) => {
                attr(c, "class").is_some_and(|v| v.split_whitespace().any(|x| x == cls))
            }
        }
    })?;
    let m = open.get(0)?;
    if is_self_closing(&open) {
        return Some("");
    }
    let (inner_end, _) = balanced_end(doc, &tag_name(&open), m.end());
    Some(&doc[m.end()..inner_end])
}

/// Removes every element named in `names`, including its subtree.
fn remove_elements(doc: &str, names: &[&str]) -> String {
    let mut out = String::with_capacity(doc.len());
    let mut pos = 0;
    loop {
        let rest = &doc[pos..];
        let hit = RE_TAG.captures_iter(rest).find(|c| {
            !is_closing(c) && !is_self_closing(c) && names.contains(&tag_name(c).as_str())
        });
        let Some((start, open_end, name)) =
            hit.and_then(|c| c.get(0).map(|m| (m.start(), m.end(), tag_name(&c))))
        else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..start]);
        out.push(' ');
        let (_, outer_end) = balanced_end(rest, &name, open_end);
        pos += outer_end;
    }
    out
}

/// Finds the close tag matching an element of `name` whose open tag ends at
/// `from`. Returns (inner end, outer end); unclosed elements run to the end.
fn balanced_end(doc: &str, name: &str, from: usize) -> (usize, usize) {
    let mut depth = 1usize;
    for c in RE_TAG.captures_iter(&doc[from..]) {
        if tag_name(&c) != name {
            continue;
        }
        let Some(m) = c.get(0) else { continue };
        if is_closing(&c) {
            depth -= 1;
            if depth == 0 {
                return (from + m.start(), from + m.end());
            }
        } else if !is_self_closing(&c) {
            depth += 1;
        }
    }
    (doc.len(), doc.len())
}

fn meta_tags(doc: &str) -> PageMetadata {
    let mut md = PageMetadata::default();
    for c in RE_TAG.captures_iter(doc) {
        if is_closing(&c) || tag_name(&c) != "meta" {
            continue;
        }
        let Some(content) = attr(&c, "content") else {
            continue;
        };
        if let Some(name) = attr(&c, "name").map(|n| n.to_ascii_lowercase()) {
            let slot = match name.as_str() {
                "description" => &mut md.description,
                "keywords" => &mut md.keywords,
                "author" => &mut md.author,
                "category" => &mut md.category,
                _ => continue,
            };
            // first tag wins
            if slot.is_none() {
                *slot = Some(content);
            }
        } else if let Some(prop) = attr(&c, "property") {
            if let Some(key) = prop.strip_prefix("og:") {
                md.open_graph.insert(key.to_string(), content);
            }
        }
    }
    md
}

fn headings(doc: &str) -> Vec<String> {
    let mut out = Vec::new();
    for c in RE_TAG.captures_iter(doc) {
        if out.len() >= MAX_HEADINGS {
            break;
        }
        let name = tag_name(&c);
        if is_closing(&c) || !matches!(name.as_str(), "h1" | "h2" | "h3") {
            continue;
        }
        let Some(m) = c.get(0) else { continue };
        let (inner_end, _) = balanced_end(doc, &name, m.end());
        let t = text_of(&doc[m.end()..inner_end]);
        if !t.is_empty() {
            out.push(t);
        }
    }
    out
}

fn images(doc: &str, page_url: &str) -> Vec<ImageInfo> {
    RE_TAG
        .captures_iter(doc)
        .filter(|c| !is_closing(c) && tag_name(c) == "img")
        .filter_map(|c| {
            let src = attr(&c, "src").filter(|s| !s.trim().is_empty())?;
            let width = dimension(attr(&c, "width"))?;
            let height = dimension(attr(&c, "height"))?;
            (width > MIN_IMAGE_DIM && height > MIN_IMAGE_DIM).then(|| ImageInfo {
                src: resolve_url(page_url, src.trim()),
                alt: attr(&c, "alt").unwrap_or_default(),
                width,
                height,
            })
        })
        .take(MAX_IMAGES)
        .collect()
}

fn dimension(v: Option<String>) -> Option<u32> {
    let v = v?;
    let digits = v.trim().trim_end_matches("px");
    digits
        .parse::<u32>()
        .ok()
        .or_else(|| digits.parse::<f64>().ok().map(|f| f as u32))
}

/// Absolute form of `src` relative to `base` (scheme-relative, root-relative,
/// or path-relative). Already-absolute and `data:` URLs pass through.
fn resolve_url(base: &str, src: &str) -> String {
    if src.contains("://") || src.starts_with("data:") {
        return src.to_string();
    }
    let Some((scheme, rest)) = base.split_once("://") else {
        return src.to_string();
    };
    if let Some(s) = src.strip_prefix("//") {
        return format!("{scheme}://{s}");
    }
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    if src.starts_with('/') {
        return format!("{scheme}://{authority}{src}");
    }
    let path = rest[authority.len()..].split(['?', '#']).next().unwrap_or("");
    let dir = match path.rfind('/') {
        Some(i) => &path[..=i],
        None => "/",
    };
    format!("{scheme}://{authority}{dir}{src}")
}

// --- tag helpers ---

fn is_closing(c: &Captures) -> bool {
    c.get(1).is_some_and(|m| !m.as_str().is_empty())
}

fn tag_name(c: &Captures) -> String {
    c.get(2)
        .map(|m| m.as_str().to_ascii_lowercase())
        .unwrap_or_default()
}

fn is_self_closing(c: &Captures) -> bool {
    let explicit = c
        .get(3)
        .is_some_and(|m| m.as_str().trim_end().ends_with('/'));
    explicit || VOID.contains(&tag_name(c).as_str())
}

/// Attribute value (entity-decoded) by case-insensitive name.
fn attr(c: &Captures, name: &str) -> Option<String> {
    let attrs = c.get(3)?.as_str();
    RE_ATTR.captures_iter(attrs).find_map(|a| {
        let key = a.get(1)?.as_str();
        if !key.eq_ignore_ascii_case(name) {
            return None;
        }
        let raw = a.get(2).or_else(|| a.get(3)).or_else(|| a.get(4))?.as_str();
        Some(html_escape::decode_html_entities(raw).trim().to_string())
    })
}

/// Tags → spaces, entities decoded, whitespace collapsed.
pub fn text_of(fragment: &str) -> String {
    let no_tags = RE_TAG.replace_all(fragment, " ");
    let decoded = html_escape::decode_html_entities(&no_tags);
    RE_WS.replace_all(&decoded, " ").trim().to_string()
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((i, _)) => s[..i].to_string(),
        None => s.to_string(),
    }
}
