//! RSS 2.0 / Atom feed crawler.

use async_trait::async_trait;
use tracing::{debug, instrument};

use marketlore_shared::{CrawledArticle, KnowledgeSource, MarketloreError, Result, SourceType};

use crate::dates::parse_timestamp;
use crate::extract::html_to_text;
use crate::fetcher::HttpFetcher;
use crate::source::ArticleSource;
use crate::xml::{XmlNode, parse_document};

/// Crawls sources whose `feed_url` points at an RSS or Atom document.
pub struct FeedSource {
    fetcher: HttpFetcher,
}

impl FeedSource {
    pub fn new(fetcher: HttpFetcher) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ArticleSource for FeedSource {
    fn source_type(&self) -> SourceType {
        SourceType::Feed
    }

    fn name(&self) -> &str {
        "feed"
    }

    #[instrument(skip_all, fields(source_id = %source.source_id))]
    async fn fetch_articles(&self, source: &KnowledgeSource) -> Result<Vec<CrawledArticle>> {
        let url = source.feed_url.as_deref().ok_or_else(|| {
            MarketloreError::config(format!("source '{}' has no feed_url", source.source_id))
        })?;
        let body = self.fetcher.get_text(url).await?;
        parse_feed(&body, source)
    }
}

/// Parse an RSS or Atom document into articles for `source`.
///
/// RSS `<item>`s are tried first; if none are found the document is read
/// as Atom `<entry>`s. Items lacking a link or a parseable date are skipped.
pub fn parse_feed(xml: &str, source: &KnowledgeSource) -> Result<Vec<CrawledArticle>> {
    let root = parse_document(xml)?;

    let mut items = Vec::new();
    root.descendants("item", &mut items);
    let mut articles: Vec<CrawledArticle> = items
        .iter()
        .filter_map(|item| rss_item(item, source))
        .collect();
    let mut format = "rss";

    if items.is_empty() {
        let mut entries = Vec::new();
        root.descendants("entry", &mut entries);
        articles = entries
            .iter()
            .filter_map(|entry| atom_entry(entry, source))
            .collect();
        format = "atom";
    }

    debug!(
        format,
        articles = articles.len(),
        source_id = %source.source_id,
        "parsed feed"
    );
    Ok(articles)
}

fn rss_item(item: &XmlNode, source: &KnowledgeSource) -> Option<CrawledArticle> {
    let link = item.child_text("link").or_else(|| {
        item.child("guid")
            .filter(|g| g.attr("isPermaLink") != Some("false"))
            .map(|g| g.text.trim().to_string())
            .filter(|g| g.starts_with("http"))
    });
    let Some(link) = link else {
        debug!("skipping feed item without link");
        return None;
    };

    let published_at = item
        .first_text(&["pubDate", "dc:date", "published", "updated"])
        .and_then(|s| parse_timestamp(&s));
    let Some(published_at) = published_at else {
        debug!(%link, "skipping feed item without parseable date");
        return None;
    };

    let title = item
        .child_text("title")
        .map(|t| html_to_text(&t))
        .unwrap_or_else(|| link.clone());
    let content = item
        .first_text(&["content:encoded", "description"])
        .map(|c| html_to_text(&c))
        .unwrap_or_default();
    let author = item.first_text(&["dc:creator", "author"]);

    Some(CrawledArticle {
        url: link,
        title,
        content,
        published_at,
        author,
        source_id: source.source_id.clone(),
        category: source.default_category.clone(),
        metadata: serde_json::json!({ "feed_format": "rss" }),
    })
}

fn atom_entry(entry: &XmlNode, source: &KnowledgeSource) -> Option<CrawledArticle> {
    let links: Vec<&XmlNode> = entry.children_named("link").collect();
    let link = links
        .iter()
        .find(|l| matches!(l.attr("rel"), None | Some("alternate")))
        .or_else(|| links.first())
        .and_then(|l| l.attr("href"))
        .map(str::to_string)
        .or_else(|| entry.child_text("link"));
    let Some(link) = link else {
        debug!("skipping atom entry without link");
        return None;
    };

    let published_at = entry
        .first_text(&["published", "updated"])
        .and_then(|s| parse_timestamp(&s));
    let Some(published_at) = published_at else {
        debug!(%link, "skipping atom entry without parseable date");
        return None;
    };

    let title = entry
        .child_text("title")
        .map(|t| html_to_text(&t))
        .unwrap_or_else(|| link.clone());
    let content = ["content", "summary"]
        .iter()
        .find_map(|n| entry.child_deep_text(n))
        .map(|c| html_to_text(&c))
        .unwrap_or_default();
    let author = entry.child("author").and_then(|a| a.child_text("name"));

    Some(CrawledArticle {
        url: link,
        title,
        content,
        published_at,
        author,
        source_id: source.source_id.clone(),
        category: source.default_category.clone(),
        metadata: serde_json::json!({ "feed_format": "atom" }),
    })
}
