//! Core domain types for the marketlore knowledge pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MarketloreError, Result};

/// Categories the distiller may assign. Anything else falls back to the
/// source's default category.
pub const KNOWN_CATEGORIES: &[&str] = &[
    "instagram",
    "seo",
    "tiktok",
    "x",
    "sns_general",
    "content_marketing",
    "branding",
    "advertising",
];

/// Whether `category` is one of [`KNOWN_CATEGORIES`].
pub fn is_known_category(category: &str) -> bool {
    KNOWN_CATEGORIES.contains(&category)
}

/// `YYYY-MM` bucket for a timestamp.
pub fn year_month(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m").to_string()
}

// ---------------------------------------------------------------------------
// KnowledgeSource
// ---------------------------------------------------------------------------

/// How a source is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// RSS 2.0 or Atom feed.
    Feed,
    /// XML sitemap pointing at article pages.
    Sitemap,
    /// Social-media business-discovery API.
    SocialDiscovery,
}

impl SourceType {
    /// Storage key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feed => "feed",
            Self::Sitemap => "sitemap",
            Self::SocialDiscovery => "social_discovery",
        }
    }
}

impl std::str::FromStr for SourceType {
    type Err = MarketloreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "feed" | "rss" => Ok(Self::Feed),
            "sitemap" => Ok(Self::Sitemap),
            "social_discovery" | "social-discovery" | "instagram" => Ok(Self::SocialDiscovery),
            other => Err(MarketloreError::validation(format!(
                "unknown source type '{other}'"
            ))),
        }
    }
}

/// A configured knowledge source plus its crawl watermark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSource {
    /// Stable identifier, e.g. `instagram_meta`.
    pub source_id: String,
    /// Fetch strategy.
    pub source_type: SourceType,
    /// Feed URL, or sitemap URL for sitemap sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_url: Option<String>,
    /// Account handle for social-discovery sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_handle: Option<String>,
    /// Category used when the distiller cannot classify an article.
    pub default_category: String,
    /// Disabled sources are skipped by batch runs.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Watermark: the last time this source was processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_crawled_at: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

// ---------------------------------------------------------------------------
// CrawledArticle
// ---------------------------------------------------------------------------

/// A normalized article produced by a crawler. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawledArticle {
    pub url: String,
    pub title: String,
    /// Plain text or Markdown body.
    pub content: String,
    pub published_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub source_id: String,
    pub category: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

// ---------------------------------------------------------------------------
// UniversalKnowledge
// ---------------------------------------------------------------------------

/// Whether a record is hand-curated (immutable) or distilled from a trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeType {
    Core,
    Trend,
}

impl KnowledgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Trend => "trend",
        }
    }
}

impl std::str::FromStr for KnowledgeType {
    type Err = MarketloreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "core" => Ok(Self::Core),
            "trend" => Ok(Self::Trend),
            other => Err(MarketloreError::validation(format!(
                "unknown knowledge type '{other}'"
            ))),
        }
    }
}

/// An actionable rule: if `condition`, then do `then`, because `reason`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guideline {
    #[serde(rename = "if")]
    pub condition: String,
    pub then: String,
    pub reason: String,
}

/// How a practice changed over time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextShift {
    pub before_period: String,
    pub old_practice: String,
    pub new_practice: String,
}

/// The canonical distilled unit of marketing knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniversalKnowledge {
    /// `{SOURCE-PREFIX}-{YYYY-MM}-{slug}`; deterministic per article.
    pub knowledge_id: String,
    pub knowledge_type: KnowledgeType,
    pub category: String,
    pub title: String,
    pub valid_from: NaiveDate,
    pub concept: String,
    pub guidelines: Vec<Guideline>,
    pub tone_and_phrasing: Vec<String>,
    pub context: Vec<ContextShift>,
    pub source_urls: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl UniversalKnowledge {
    /// Core records may never be overwritten by the trend ingestion path.
    pub fn is_immutable(&self) -> bool {
        self.knowledge_type == KnowledgeType::Core
    }
}

// ---------------------------------------------------------------------------
// KnowledgeRecord (vector store row)
// ---------------------------------------------------------------------------

/// A knowledge row as written to the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    pub knowledge_id: String,
    pub knowledge_type: KnowledgeType,
    pub category: String,
    pub title: String,
    /// Canonical text rendering; also the embedding input.
    pub content: String,
    /// `None` when the embedding provider was unavailable.
    pub embedding: Option<Vec<f32>>,
    pub source_urls: Vec<String>,
    pub valid_from: NaiveDate,
    pub is_active: bool,
    pub metadata: serde_json::Value,
    /// Full structured record, kept for review and re-rendering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl KnowledgeRecord {
    /// Build a row from a distilled record, its canonical text and embedding.
    ///
    /// An empty embedding is stored as `None`.
    pub fn from_knowledge(
        knowledge: &UniversalKnowledge,
        content: String,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            knowledge_id: knowledge.knowledge_id.clone(),
            knowledge_type: knowledge.knowledge_type,
            category: knowledge.category.clone(),
            title: knowledge.title.clone(),
            content,
            embedding: if embedding.is_empty() {
                None
            } else {
                Some(embedding)
            },
            source_urls: knowledge.source_urls.clone(),
            valid_from: knowledge.valid_from,
            is_active: true,
            metadata: knowledge.metadata.clone(),
            payload: serde_json::to_value(knowledge).ok(),
        }
    }

    pub fn is_immutable(&self) -> bool {
        self.knowledge_type == KnowledgeType::Core
    }
}

// ---------------------------------------------------------------------------
// CrawlLog
// ---------------------------------------------------------------------------

/// What triggered a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlType {
    Daily,
    Weekly,
    Manual,
}

impl CrawlType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Manual => "manual",
        }
    }
}

impl std::str::FromStr for CrawlType {
    type Err = MarketloreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "manual" => Ok(Self::Manual),
            other => Err(MarketloreError::validation(format!(
                "unknown crawl type '{other}'"
            ))),
        }
    }
}

/// Lifecycle of one (batch, source) crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    Running,
    Success,
    Failed,
}

impl CrawlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for CrawlStatus {
    type Err = MarketloreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(MarketloreError::validation(format!(
                "unknown crawl status '{other}'"
            ))),
        }
    }
}

/// Append-only audit entry for one source within one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlLog {
    pub id: String,
    pub batch_id: String,
    pub source_id: String,
    pub crawl_type: CrawlType,
    pub status: CrawlStatus,
    pub articles_fetched: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// SearchResult
// ---------------------------------------------------------------------------

/// A scored view of stored knowledge returned by similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub knowledge_id: String,
    pub knowledge_type: KnowledgeType,
    pub category: String,
    pub title: String,
    pub content: String,
    pub valid_from: NaiveDate,
    /// Cosine similarity to the query.
    pub similarity: f32,
    /// Type/recency factor; core knowledge is biased upward.
    pub priority_score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_knowledge() -> UniversalKnowledge {
        UniversalKnowledge {
            knowledge_id: "INSTAGRAM_META-2025-01-reels-reach".into(),
            knowledge_type: KnowledgeType::Trend,
            category: "instagram".into(),
            title: "Reels reach".into(),
            valid_from: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            concept: "Short reels get more reach".into(),
            guidelines: vec![Guideline {
                condition: "posting reels".into(),
                then: "keep them under 30s".into(),
                reason: "completion rate drives distribution".into(),
            }],
            tone_and_phrasing: vec!["casual".into()],
            context: vec![],
            source_urls: vec!["https://example.com/a".into()],
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn guideline_uses_if_key_on_the_wire() {
        let json = serde_json::to_string(&sample_knowledge().guidelines[0]).unwrap();
        assert!(json.contains(r#""if":"posting reels""#));
    }

    #[test]
    fn knowledge_serializes_camel_case() {
        let json = serde_json::to_value(sample_knowledge()).unwrap();
        assert!(json.get("knowledgeId").is_some());
        assert!(json.get("toneAndPhrasing").is_some());
        assert_eq!(json["knowledgeType"], "trend");
        assert_eq!(json["validFrom"], "2025-01-10");
    }

    #[test]
    fn record_drops_empty_embedding() {
        let k = sample_knowledge();
        let rec = KnowledgeRecord::from_knowledge(&k, "text".into(), vec![]);
        assert!(rec.embedding.is_none());
        assert!(!rec.is_immutable());

        let rec = KnowledgeRecord::from_knowledge(&k, "text".into(), vec![0.1, 0.2]);
        assert_eq!(rec.embedding.as_deref(), Some(&[0.1, 0.2][..]));
        assert!(rec.payload.is_some());
    }

    #[test]
    fn source_type_parsing() {
        assert_eq!("feed".parse::<SourceType>().unwrap(), SourceType::Feed);
        assert_eq!(
            "social-discovery".parse::<SourceType>().unwrap(),
            SourceType::SocialDiscovery
        );
        assert!("carrier-pigeon".parse::<SourceType>().is_err());
    }

    #[test]
    fn source_deserializes_from_toml_with_defaults() {
        let src: KnowledgeSource = toml::from_str(
            r#"
source_id = "later_blog"
source_type = "feed"
feed_url = "https://later.com/blog/feed/"
default_category = "instagram"
"#,
        )
        .unwrap();
        assert!(src.enabled);
        assert!(src.last_crawled_at.is_none());
        assert_eq!(src.source_type, SourceType::Feed);
    }

    #[test]
    fn year_month_formats() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 9, 12, 0, 0).unwrap();
        assert_eq!(year_month(&ts), "2025-03");
    }

    #[test]
    fn known_categories() {
        assert!(is_known_category("instagram"));
        assert!(!is_known_category("gardening"));
    }
}
