//! Article extraction from HTML pages.
//!
//! Metadata is read from meta tags first, then `<time>` elements, then
//! JSON-LD blocks. The body is taken from `<article>`/`<main>`, stripped of
//! page chrome, converted to Markdown and truncated.

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};

use marketlore_shared::text::{collapse_whitespace, truncate_chars};
use marketlore_shared::{MarketloreError, Result};

use crate::dates::parse_timestamp;

/// Fields pulled out of an article page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageExtract {
    pub title: Option<String>,
    pub content: String,
    pub published_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
}

const PUBLISHED_META: &[&str] = &[
    r#"meta[property="article:published_time"]"#,
    r#"meta[name="article:published_time"]"#,
    r#"meta[itemprop="datePublished"]"#,
    r#"meta[name="date"]"#,
    r#"meta[name="pubdate"]"#,
    r#"meta[name="publish-date"]"#,
    r#"meta[property="og:published_time"]"#,
];

const TITLE_META: &[&str] = &[
    r#"meta[property="og:title"]"#,
    r#"meta[name="twitter:title"]"#,
];

const AUTHOR_META: &[&str] = &[
    r#"meta[name="author"]"#,
    r#"meta[property="article:author"]"#,
];

/// Extract title, Markdown body, published date and author from a page.
pub fn extract_article(html: &str, max_chars: usize) -> Result<PageExtract> {
    let doc = Html::parse_document(html);
    let json_ld = json_ld_blocks(&doc);

    let title = first_meta(&doc, TITLE_META)
        .or_else(|| first_text(&doc, "title"))
        .or_else(|| first_text(&doc, "h1"))
        .or_else(|| json_ld_string(&json_ld, "headline"));

    let published_at = first_meta(&doc, PUBLISHED_META)
        .and_then(|s| parse_timestamp(&s))
        .or_else(|| time_element(&doc))
        .or_else(|| json_ld_string(&json_ld, "datePublished").and_then(|s| parse_timestamp(&s)));

    let author = first_meta(&doc, AUTHOR_META)
        .filter(|a| !a.starts_with("http"))
        .or_else(|| json_ld_author(&json_ld));

    let content = body_markdown(&doc)?;
    let content = truncate_chars(&content, max_chars).to_string();

    Ok(PageExtract {
        title,
        content,
        published_at,
        author,
    })
}

/// Reduce an HTML fragment (feed description, caption) to plain text.
pub fn html_to_text(fragment: &str) -> String {
    if !fragment.contains('<') && !fragment.contains('&') {
        return collapse_whitespace(fragment);
    }
    let doc = Html::parse_fragment(fragment);
    let skip = Selector::parse("script, style").unwrap();
    let skipped: Vec<_> = doc.select(&skip).map(|e| e.id()).collect();

    let mut out = String::new();
    for node in doc.root_element().descendants() {
        if let Some(text) = node.value().as_text() {
            let inside_skipped = node.ancestors().any(|a| skipped.contains(&a.id()));
            if !inside_skipped {
                out.push_str(text);
                out.push(' ');
            }
        }
    }
    collapse_whitespace(&out)
}

fn first_meta(doc: &Html, selectors: &[&str]) -> Option<String> {
    selectors.iter().find_map(|sel| {
        let sel = Selector::parse(sel).ok()?;
        doc.select(&sel)
            .filter_map(|el| el.value().attr("content"))
            .map(str::trim)
            .find(|c| !c.is_empty())
            .map(str::to_string)
    })
}

fn first_text(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel)
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .find(|t| !t.is_empty())
}

fn time_element(doc: &Html) -> Option<DateTime<Utc>> {
    let sel = Selector::parse("time[datetime]").unwrap();
    doc.select(&sel)
        .filter_map(|el| el.value().attr("datetime"))
        .find_map(parse_timestamp)
}

fn json_ld_blocks(doc: &Html) -> Vec<serde_json::Value> {
    let sel = Selector::parse(r#"script[type="application/ld+json"]"#).unwrap();
    let mut out = Vec::new();
    for el in doc.select(&sel) {
        let raw = el.text().collect::<String>();
        let Ok(value) = serde_json::from_str::<serde_json::Value>(raw.trim()) else {
            continue;
        };
        flatten_json_ld(value, &mut out);
    }
    out
}

/// JSON-LD may be a single object, an array, or an object with `@graph`.
fn flatten_json_ld(value: serde_json::Value, out: &mut Vec<serde_json::Value>) {
    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                flatten_json_ld(item, out);
            }
        }
        serde_json::Value::Object(mut map) => {
            if let Some(graph) = map.remove("@graph") {
                flatten_json_ld(graph, out);
            }
            out.push(serde_json::Value::Object(map));
        }
        _ => {}
    }
}

fn json_ld_string(blocks: &[serde_json::Value], key: &str) -> Option<String> {
    blocks
        .iter()
        .filter_map(|b| b.get(key))
        .filter_map(|v| v.as_str())
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn json_ld_author(blocks: &[serde_json::Value]) -> Option<String> {
    blocks.iter().filter_map(|b| b.get("author")).find_map(|a| {
        let a = match a {
            serde_json::Value::Array(items) => items.first()?,
            other => other,
        };
        let name = match a {
            serde_json::Value::String(s) => Some(s.trim().to_string()),
            serde_json::Value::Object(_) => a.get("name")?.as_str().map(|s| s.trim().to_string()),
            _ => None,
        };
        name.filter(|s| !s.is_empty())
    })
}

fn content_root(doc: &Html) -> Option<ElementRef<'_>> {
    ["article", "main", r#"[role="main"]"#, ".post-content", ".entry-content", "body"]
        .iter()
        .find_map(|sel| {
            let sel = Selector::parse(sel).ok()?;
            doc.select(&sel).next()
        })
}

fn body_markdown(doc: &Html) -> Result<String> {
    let Some(root) = content_root(doc) else {
        return Ok(String::new());
    };
    let html = strip_chrome(&root.inner_html());

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "nav", "iframe", "noscript", "svg", "form"])
        .build();
    let markdown = converter
        .convert(&html)
        .map_err(|e| MarketloreError::parse(format!("htmd conversion failed: {e}")))?;

    Ok(tidy_markdown(&markdown))
}

/// Strip navigation, share widgets and other page chrome from a fragment.
fn strip_chrome(html: &str) -> String {
    let doc = Html::parse_fragment(html);
    let chrome_sel = Selector::parse(
        "nav, header, footer, aside, script, style, form, .sidebar, .share, .related, .comments",
    )
    .unwrap();

    let mut result = html.to_string();
    for el in doc.select(&chrome_sel) {
        result = result.replace(&el.html(), "");
    }
    result
}

/// Collapse runs of blank lines and trim trailing whitespace.
fn tidy_markdown(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());
    let mut blank_run = 0;
    for line in markdown.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}
