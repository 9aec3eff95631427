//! XML sitemap crawler.
//!
//! Reads `<urlset>` (or one level of `<sitemapindex>`), keeps article-like
//! URLs, takes the most recently modified ones, and extracts each page.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, info, instrument, warn};
use url::Url;

use marketlore_shared::{
    CrawlConfig, CrawledArticle, KnowledgeSource, MarketloreError, Pacer, Result, SourceType,
};

use crate::dates::parse_timestamp;
use crate::extract::extract_article;
use crate::fetcher::HttpFetcher;
use crate::source::ArticleSource;
use crate::xml::{XmlNode, parse_document};

/// One `<url>` or `<sitemap>` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SitemapEntry {
    pub loc: String,
    pub lastmod: Option<DateTime<Utc>>,
}

/// A parsed sitemap document.
#[derive(Debug, Clone, PartialEq)]
pub enum Sitemap {
    Urls(Vec<SitemapEntry>),
    Index(Vec<SitemapEntry>),
}

/// Crawls sources whose `feed_url` points at an XML sitemap.
pub struct SitemapSource {
    fetcher: HttpFetcher,
    max_articles: usize,
    max_child_sitemaps: usize,
    max_article_chars: usize,
    page_delay: std::time::Duration,
}

impl SitemapSource {
    pub fn new(fetcher: HttpFetcher, config: &CrawlConfig) -> Self {
        Self {
            fetcher,
            max_articles: config.max_sitemap_articles,
            max_child_sitemaps: config.max_child_sitemaps,
            max_article_chars: config.max_article_chars,
            page_delay: config.page_delay,
        }
    }

    /// Resolve the sitemap (following an index one level) into URL entries.
    async fn collect_entries(&self, sitemap_url: &str) -> Result<Vec<SitemapEntry>> {
        let body = self.fetcher.get_text(sitemap_url).await?;
        match parse_sitemap(&body)? {
            Sitemap::Urls(entries) => Ok(entries),
            Sitemap::Index(mut children) => {
                sort_by_lastmod_desc(&mut children);
                children.truncate(self.max_child_sitemaps);

                let mut entries = Vec::new();
                let mut last_err = None;
                for child in &children {
                    match self.fetcher.get_text(&child.loc).await.and_then(|b| parse_sitemap(&b)) {
                        Ok(Sitemap::Urls(found)) => entries.extend(found),
                        Ok(Sitemap::Index(_)) => {
                            debug!(url = %child.loc, "nested sitemap index ignored");
                        }
                        Err(e) => {
                            warn!(url = %child.loc, error = %e, "child sitemap failed");
                            last_err = Some(e);
                        }
                    }
                }
                match (entries.is_empty(), last_err) {
                    (true, Some(e)) => Err(e),
                    _ => Ok(entries),
                }
            }
        }
    }
}

#[async_trait]
impl ArticleSource for SitemapSource {
    fn source_type(&self) -> SourceType {
        SourceType::Sitemap
    }

    fn name(&self) -> &str {
        "sitemap"
    }

    #[instrument(skip_all, fields(source_id = %source.source_id))]
    async fn fetch_articles(&self, source: &KnowledgeSource) -> Result<Vec<CrawledArticle>> {
        let sitemap_url = source.feed_url.as_deref().ok_or_else(|| {
            MarketloreError::config(format!("source '{}' has no feed_url", source.source_id))
        })?;

        let entries = self.collect_entries(sitemap_url).await?;
        let total = entries.len();
        let candidates = select_candidates(entries, self.max_articles);
        info!(total, candidates = candidates.len(), "sitemap candidates selected");

        let mut pacer = Pacer::new(self.page_delay);
        let mut articles = Vec::new();
        for entry in candidates {
            pacer.wait().await;

            let html = match self.fetcher.get_text(&entry.loc).await {
                Ok(html) => html,
                Err(e) => {
                    warn!(url = %entry.loc, error = %e, "article page fetch failed");
                    continue;
                }
            };
            let page = match extract_article(&html, self.max_article_chars) {
                Ok(page) => page,
                Err(e) => {
                    warn!(url = %entry.loc, error = %e, "article extraction failed");
                    continue;
                }
            };

            let Some(published_at) = page.published_at.or(entry.lastmod) else {
                debug!(url = %entry.loc, "no published date, skipping");
                continue;
            };
            let Some(title) = page.title else {
                debug!(url = %entry.loc, "no title, skipping");
                continue;
            };

            articles.push(CrawledArticle {
                url: entry.loc,
                title,
                content: page.content,
                published_at,
                author: page.author,
                source_id: source.source_id.clone(),
                category: source.default_category.clone(),
                metadata: serde_json::json!({
                    "sitemap_lastmod": entry.lastmod.map(|d| d.to_rfc3339()),
                }),
            });
        }

        Ok(articles)
    }
}

/// Parse a `<urlset>` or `<sitemapindex>` document.
pub fn parse_sitemap(xml: &str) -> Result<Sitemap> {
    let root = parse_document(xml)?;
    let entries = |tag: &str| -> Vec<SitemapEntry> {
        root.children
            .iter()
            .filter(|c| c.local_name() == tag)
            .filter_map(entry_from_node)
            .collect()
    };

    match root.local_name() {
        "urlset" => Ok(Sitemap::Urls(entries("url"))),
        "sitemapindex" => Ok(Sitemap::Index(entries("sitemap"))),
        other => Err(MarketloreError::parse(format!(
            "unexpected sitemap root element <{other}>"
        ))),
    }
}

fn entry_from_node(node: &XmlNode) -> Option<SitemapEntry> {
    let field = |name: &str| {
        node.children
            .iter()
            .find(|c| c.local_name() == name)
            .map(|c| c.text.trim().to_string())
            .filter(|t| !t.is_empty())
    };
    Some(SitemapEntry {
        loc: field("loc")?,
        lastmod: field("lastmod").and_then(|s| parse_timestamp(&s)),
    })
}

static EXCLUDE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)/(tag|tags|category|categories|author|authors|page|search|feed|wp-content|wp-json|amp)(/|$)",
    )
    .unwrap()
});

static INCLUDE_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(19|20)\d{2}/\d{1,2}(/\d{1,2})?/[^/]+").unwrap());

static INCLUDE_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)/(blog|blogs|article|articles|post|posts|news|insights|resources|column|columns|magazine)/[^/]+").unwrap()
});

/// Whether a sitemap URL looks like an individual article.
///
/// Excluded: query strings, tag/category/author/pagination listings, and
/// the site root. Included: date segments or blog/article/news sections
/// followed by a slug.
pub fn is_article_url(raw: &str) -> bool {
    let Ok(url) = Url::parse(raw) else {
        return false;
    };
    if url.query().is_some() {
        return false;
    }
    let path = url.path();
    if path.trim_matches('/').is_empty() || EXCLUDE.is_match(path) {
        return false;
    }
    INCLUDE_DATE.is_match(path) || INCLUDE_SECTION.is_match(path)
}

/// Keep article-like URLs, newest `lastmod` first, capped at `max`.
pub fn select_candidates(entries: Vec<SitemapEntry>, max: usize) -> Vec<SitemapEntry> {
    let mut candidates: Vec<SitemapEntry> = entries
        .into_iter()
        .filter(|e| is_article_url(&e.loc))
        .collect();
    sort_by_lastmod_desc(&mut candidates);
    candidates.truncate(max);
    candidates
}

/// Newest first; entries without `lastmod` sort last.
fn sort_by_lastmod_desc(entries: &mut [SitemapEntry]) {
    entries.sort_by(|a, b| b.lastmod.cmp(&a.lastmod));
}
