//! Social business-discovery crawler (Instagram Graph API).
//!
//! Only captions long enough to carry advice and containing at least one
//! informative keyword are kept; the rest of a brand feed is noise.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use marketlore_shared::text::{collapse_whitespace, truncate_chars};
use marketlore_shared::{
    CrawledArticle, KnowledgeSource, MarketloreError, Result, SocialConfig, SourceType,
};

use crate::dates::parse_timestamp;
use crate::fetcher::HttpFetcher;
use crate::source::ArticleSource;

/// English keywords that mark a caption as instructional rather than
/// promotional. Matched as whole words so "tip" never hits "multiple".
static INFORMATIVE_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(tips?|how to|guides?|strateg(y|ies)|algorithms?|updates?|new features?|best practices?|learn|reach|engagement|insights?)\b",
    )
    .unwrap()
});

/// Japanese keywords; there are no word boundaries to match on.
const INFORMATIVE_PHRASES_JA: &[&str] = &[
    "ヒント", "方法", "コツ", "アルゴリズム", "新機能", "アップデート", "戦略", "解説", "ポイント", "活用",
];

const MAX_TITLE_CHARS: usize = 80;

#[derive(Debug, Deserialize)]
struct DiscoveryResponse {
    business_discovery: BusinessDiscovery,
}

#[derive(Debug, Deserialize)]
struct BusinessDiscovery {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    media: Option<MediaPage>,
}

#[derive(Debug, Deserialize)]
struct MediaPage {
    #[serde(default)]
    data: Vec<Media>,
}

#[derive(Debug, Deserialize)]
struct Media {
    id: String,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    permalink: Option<String>,
    #[serde(default)]
    media_type: Option<String>,
}

/// Crawls a public business account's recent posts by handle.
pub struct SocialDiscoverySource {
    fetcher: HttpFetcher,
    config: SocialConfig,
}

impl SocialDiscoverySource {
    pub fn new(fetcher: HttpFetcher, config: SocialConfig) -> Self {
        Self { fetcher, config }
    }

    fn discovery_url(&self, handle: &str) -> Result<String> {
        let (Some(token), Some(account_id)) =
            (&self.config.access_token, &self.config.business_account_id)
        else {
            return Err(MarketloreError::config(
                "social discovery credentials are not configured",
            ));
        };

        let fields = format!(
            "business_discovery.username({handle}){{media.limit({}){{id,caption,timestamp,permalink,media_type}}}}",
            self.config.media_limit
        );
        let url = Url::parse_with_params(
            &format!("{}/{account_id}", self.config.graph_base_url),
            &[("fields", fields.as_str()), ("access_token", token.as_str())],
        )
        .map_err(|e| MarketloreError::config(format!("invalid graph_base_url: {e}")))?;
        Ok(url.to_string())
    }
}

#[async_trait]
impl ArticleSource for SocialDiscoverySource {
    fn source_type(&self) -> SourceType {
        SourceType::SocialDiscovery
    }

    fn name(&self) -> &str {
        "social_discovery"
    }

    #[instrument(skip_all, fields(source_id = %source.source_id))]
    async fn fetch_articles(&self, source: &KnowledgeSource) -> Result<Vec<CrawledArticle>> {
        let handle = source.account_handle.as_deref().ok_or_else(|| {
            MarketloreError::config(format!(
                "source '{}' has no account_handle",
                source.source_id
            ))
        })?;
        let url = self.discovery_url(handle)?;
        let response: DiscoveryResponse = self.fetcher.get_json(&url).await?;

        let username = response
            .business_discovery
            .username
            .unwrap_or_else(|| handle.to_string());
        let media = response
            .business_discovery
            .media
            .map(|m| m.data)
            .unwrap_or_default();
        let total = media.len();

        let articles: Vec<CrawledArticle> = media
            .into_iter()
            .filter_map(|m| self.media_to_article(m, &username, source))
            .collect();

        debug!(total, kept = articles.len(), "filtered social captions");
        Ok(articles)
    }
}

impl SocialDiscoverySource {
    fn media_to_article(
        &self,
        media: Media,
        username: &str,
        source: &KnowledgeSource,
    ) -> Option<CrawledArticle> {
        let caption = media.caption?.trim().to_string();
        if !is_informative_caption(&caption, self.config.min_caption_chars) {
            return None;
        }
        let url = media.permalink?;
        let published_at = media.timestamp.as_deref().and_then(parse_timestamp)?;

        Some(CrawledArticle {
            url,
            title: caption_title(&caption),
            content: caption,
            published_at,
            author: Some(username.to_string()),
            source_id: source.source_id.clone(),
            category: source.default_category.clone(),
            metadata: serde_json::json!({
                "media_id": media.id,
                "media_type": media.media_type,
            }),
        })
    }
}

/// Long enough and carrying at least one informative keyword.
pub fn is_informative_caption(caption: &str, min_chars: usize) -> bool {
    if caption.chars().count() < min_chars {
        return false;
    }
    INFORMATIVE_WORDS.is_match(caption) || INFORMATIVE_PHRASES_JA.iter().any(|k| caption.contains(k))
}

/// First non-empty caption line, cut to 80 characters.
pub fn caption_title(caption: &str) -> String {
    let line = caption
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default();
    truncate_chars(&collapse_whitespace(line), MAX_TITLE_CHARS).to_string()
}
