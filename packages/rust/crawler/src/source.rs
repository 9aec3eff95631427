//! The crawler trait, the per-kind registry, and the new-article filter.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, instrument, warn};

use marketlore_shared::{
    CrawlConfig, CrawledArticle, KnowledgeSource, Result, SocialConfig, SourceType,
};

use crate::feed::FeedSource;
use crate::fetcher::HttpFetcher;
use crate::sitemap::SitemapSource;
use crate::social::SocialDiscoverySource;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// One implementation per source kind.
#[async_trait]
pub trait ArticleSource: Send + Sync {
    /// The source kind this crawler handles.
    fn source_type(&self) -> SourceType;

    /// Human-readable crawler name for tracing.
    fn name(&self) -> &str;

    /// Fetch and normalize every article currently exposed by `source`.
    async fn fetch_articles(&self, source: &KnowledgeSource) -> Result<Vec<CrawledArticle>>;
}

/// Result of crawling one source. Failures are captured, never propagated.
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    pub success: bool,
    pub articles: Vec<CrawledArticle>,
    pub error: Option<String>,
}

impl CrawlOutcome {
    fn ok(articles: Vec<CrawledArticle>) -> Self {
        Self {
            success: true,
            articles,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            success: false,
            articles: Vec::new(),
            error: Some(error),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds one crawler per source kind and applies the shared new-article filter.
pub struct CrawlerRegistry {
    crawlers: Vec<Box<dyn ArticleSource>>,
    lookback_days: u32,
}

impl CrawlerRegistry {
    /// Registry with the built-in feed, sitemap and social-discovery crawlers.
    pub fn new(crawl: &CrawlConfig, social: SocialConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(crawl)?;
        Ok(Self {
            crawlers: vec![
                Box::new(FeedSource::new(fetcher.clone())),
                Box::new(SitemapSource::new(fetcher.clone(), crawl)),
                Box::new(SocialDiscoverySource::new(fetcher, social)),
            ],
            lookback_days: crawl.lookback_days,
        })
    }

    /// Registry over caller-supplied crawlers.
    pub fn with_crawlers(crawlers: Vec<Box<dyn ArticleSource>>, lookback_days: u32) -> Self {
        Self {
            crawlers,
            lookback_days,
        }
    }

    fn crawler_for(&self, source_type: SourceType) -> Option<&dyn ArticleSource> {
        self.crawlers
            .iter()
            .find(|c| c.source_type() == source_type)
            .map(|c| c.as_ref())
    }

    /// Crawl one source and keep only articles new since its watermark.
    ///
    /// Missing credentials degrade to an empty, successful crawl.
    #[instrument(skip_all, fields(source_id = %source.source_id, source_type = source.source_type.as_str()))]
    pub async fn crawl(&self, source: &KnowledgeSource, now: DateTime<Utc>) -> CrawlOutcome {
        let Some(crawler) = self.crawler_for(source.source_type) else {
            return CrawlOutcome::failed(format!(
                "no crawler registered for source type {}",
                source.source_type.as_str()
            ));
        };

        match crawler.fetch_articles(source).await {
            Ok(articles) => {
                let fetched = articles.len();
                let fresh = filter_new_articles(
                    articles,
                    source.last_crawled_at,
                    now,
                    self.lookback_days,
                );
                info!(
                    crawler = crawler.name(),
                    fetched,
                    new = fresh.len(),
                    "source crawled"
                );
                CrawlOutcome::ok(fresh)
            }
            Err(e) if e.is_config() => {
                warn!(error = %e, "source skipped: not configured");
                CrawlOutcome::ok(Vec::new())
            }
            Err(e) => {
                warn!(error = %e, "source crawl failed");
                CrawlOutcome::failed(e.to_string())
            }
        }
    }
}

/// Keep articles published after `last_crawled_at`, or within the trailing
/// `lookback_days` on a first run. Duplicate URLs keep their first occurrence.
pub fn filter_new_articles(
    articles: Vec<CrawledArticle>,
    last_crawled_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    lookback_days: u32,
) -> Vec<CrawledArticle> {
    let since = last_crawled_at.unwrap_or_else(|| now - Duration::days(i64::from(lookback_days)));
    let mut seen = std::collections::HashSet::new();
    articles
        .into_iter()
        .filter(|a| a.published_at > since)
        .filter(|a| seen.insert(a.url.clone()))
        .collect()
}
