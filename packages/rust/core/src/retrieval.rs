//! Query-time retrieval: embed the query, search the store, and format a
//! prompt-ready context with core knowledge always ahead of trends.

use std::fmt::Write;
use std::sync::LazyLock;

use chrono::{NaiveDate, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use marketlore_providers::EmbeddingClient;
use marketlore_shared::{KnowledgeType, RetrievalConfig, SearchResult};
use marketlore_storage::Storage;

/// Marketing vocabulary that makes a message worth grounding, matched as
/// whole words.
static RAG_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(marketing|instagram|reels?|tiktok|twitter|seo|hashtags?|algorithms?|engagement|followers?|branding|brands?|campaigns?|advertis\w*|content|sns|social media)\b",
    )
    .unwrap()
});

const RAG_PHRASES_JA: &[&str] = &[
    "マーケ", "集客", "インスタ", "リール", "ストーリーズ", "投稿", "フォロワー", "ハッシュタグ",
    "アルゴリズム", "エンゲージメント", "ブランド", "広告", "検索", "バズ", "発信",
];

/// One category's English word pattern and Japanese phrases.
struct CategoryRule {
    category: &'static str,
    words: Regex,
    phrases_ja: &'static [&'static str],
}

impl CategoryRule {
    fn new(category: &'static str, words: &str, phrases_ja: &'static [&'static str]) -> Self {
        Self {
            category,
            words: Regex::new(&format!(r"(?i)\b({words})\b")).unwrap(),
            phrases_ja,
        }
    }

    fn matches(&self, message: &str) -> bool {
        self.words.is_match(message) || self.phrases_ja.iter().any(|p| message.contains(p))
    }
}

/// Category rules in priority order; the first match wins.
static CATEGORY_RULES: LazyLock<Vec<CategoryRule>> = LazyLock::new(|| {
    vec![
        CategoryRule::new("instagram", r"instagram|insta|reels?", &["インスタ", "リール", "ストーリーズ"]),
        CategoryRule::new("tiktok", r"tiktok", &["ティックトック"]),
        CategoryRule::new("x", r"twitter|tweet(s|ed|ing)?|x\.com", &["ツイッター", "ツイート"]),
        CategoryRule::new("seo", r"seo|search engines?|google search", &["検索順位", "検索エンジン", "被リンク"]),
        CategoryRule::new("branding", r"branding|brands?", &["ブランド"]),
        CategoryRule::new("advertising", r"advertis\w*|ads|ad campaigns?", &["広告", "リスティング"]),
    ]
});

const MIN_RAG_MESSAGE_CHARS: usize = 4;

const DEFAULT_PERSONA: &str = "You are a friendly, pragmatic marketing advisor for small businesses \
and creators. Give concrete, actionable advice grounded in widely accepted marketing principles. \
When you are unsure whether a platform feature or algorithm detail is current, say so instead of guessing.";

/// Retrieval output handed to the chat layer.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RagContext {
    pub formatted_context: String,
    pub core_knowledge: Vec<SearchResult>,
    pub trends_knowledge: Vec<SearchResult>,
}

impl RagContext {
    pub fn is_empty(&self) -> bool {
        self.core_knowledge.is_empty() && self.trends_knowledge.is_empty()
    }
}

/// Embeds queries and searches the knowledge store.
pub struct Retriever<'a> {
    storage: &'a Storage,
    embeddings: EmbeddingClient,
    config: RetrievalConfig,
}

impl<'a> Retriever<'a> {
    pub fn new(storage: &'a Storage, embeddings: EmbeddingClient, config: RetrievalConfig) -> Self {
        Self {
            storage,
            embeddings,
            config,
        }
    }

    /// Retrieve context for `query`, optionally restricted to one category.
    ///
    /// Never fails: an empty query embedding, a search error, or no matches
    /// yield an empty context.
    pub async fn retrieve(&self, query: &str, category: Option<&str>) -> RagContext {
        self.retrieve_on(query, category, Utc::now().date_naive()).await
    }

    /// [`Retriever::retrieve`] with an explicit "today" for trend decay.
    #[instrument(skip_all, fields(category = category.unwrap_or("*")))]
    pub async fn retrieve_on(
        &self,
        query: &str,
        category: Option<&str>,
        today: NaiveDate,
    ) -> RagContext {
        let embedding = self.embeddings.embed(query).await;
        if embedding.is_empty() {
            debug!("no query embedding, returning empty context");
            return RagContext::default();
        }

        let results = match self
            .storage
            .match_knowledge(&embedding, category, &self.config, today)
            .await
        {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, "knowledge search failed");
                return RagContext::default();
            }
        };

        let (core_knowledge, trends_knowledge): (Vec<_>, Vec<_>) = results
            .into_iter()
            .partition(|r| r.knowledge_type == KnowledgeType::Core);

        debug!(
            core = core_knowledge.len(),
            trends = trends_knowledge.len(),
            "retrieved knowledge"
        );
        RagContext {
            formatted_context: format_context(&core_knowledge, &trends_knowledge),
            core_knowledge,
            trends_knowledge,
        }
    }
}

/// Core section first, then trends annotated with their `validFrom`.
pub fn format_context(core: &[SearchResult], trends: &[SearchResult]) -> String {
    if core.is_empty() && trends.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    if !core.is_empty() {
        out.push_str("## Core Marketing Principles\n");
        out.push_str("These always apply. When a trend below conflicts with them, follow these.\n");
        for r in core {
            let _ = write!(out, "\n### {}\n{}\n", r.title, r.content.trim());
        }
    }

    if !trends.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("## Recent Trends\n");
        for r in trends {
            let _ = write!(
                out,
                "\n### {} (valid from {})\n{}\n",
                r.title,
                r.valid_from.format("%Y-%m-%d"),
                r.content.trim()
            );
        }
    }

    out.trim_end().to_string()
}

/// Whether `message` looks like a marketing question worth grounding.
pub fn should_use_rag(message: &str) -> bool {
    let message = message.trim();
    if message.chars().count() < MIN_RAG_MESSAGE_CHARS {
        return false;
    }
    RAG_WORDS.is_match(message) || RAG_PHRASES_JA.iter().any(|k| message.contains(k))
}

/// Best-guess category for `message`, if any keyword matches.
pub fn infer_category(message: &str) -> Option<&'static str> {
    CATEGORY_RULES
        .iter()
        .find(|rule| rule.matches(message))
        .map(|rule| rule.category)
}

/// Persona used by the chat layer when retrieval yields nothing.
pub fn default_persona_context() -> &'static str {
    DEFAULT_PERSONA
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use marketlore_providers::EmbeddingProvider;
    use marketlore_shared::{KnowledgeRecord, Result};
    use std::sync::Arc;

    struct FixedQuery(Vec<f32>);

    #[async_trait]
    impl EmbeddingProvider for FixedQuery {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
        fn dimension(&self) -> usize {
            self.0.len()
        }
    }

    fn record(
        id: &str,
        kt: KnowledgeType,
        category: &str,
        title: &str,
        valid_from: NaiveDate,
        embedding: Vec<f32>,
    ) -> KnowledgeRecord {
        KnowledgeRecord {
            knowledge_id: id.into(),
            knowledge_type: kt,
            category: category.into(),
            title: title.into(),
            content: format!("content of {title}"),
            embedding: Some(embedding),
            source_urls: Vec::new(),
            valid_from,
            is_active: true,
            metadata: serde_json::Value::Null,
            payload: None,
        }
    }

    async fn store_with_core_and_trend(today: NaiveDate) -> Storage {
        let path = std::env::temp_dir().join(format!("ml_retrieval_{}.db", uuid::Uuid::now_v7()));
        let storage = Storage::open(&path).await.unwrap();
        storage
            .upsert_knowledge(&record(
                "CORE-fanbase-strategy",
                KnowledgeType::Core,
                "sns_general",
                "Grow a fanbase, not just reach",
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                vec![0.6, 0.8, 0.0],
            ))
            .await
            .unwrap();
        storage
            .upsert_knowledge(&record(
                "LATER_BLOG-2025-01-reels-algorithm",
                KnowledgeType::Trend,
                "instagram",
                "Reels algorithm rewards watch time",
                today - chrono::Duration::days(10),
                vec![0.95, 0.31, 0.0],
            ))
            .await
            .unwrap();
        storage
    }

    fn retriever(storage: &Storage) -> Retriever<'_> {
        Retriever::new(
            storage,
            EmbeddingClient::with_provider(Arc::new(FixedQuery(vec![1.0, 0.0, 0.0])), 8000),
            RetrievalConfig::default(),
        )
    }

    #[tokio::test]
    async fn core_precedes_higher_scoring_trend() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let storage = store_with_core_and_trend(today).await;

        // The trend outranks the core record in raw similarity.
        let raw = storage
            .match_knowledge(&[1.0, 0.0, 0.0], None, &RetrievalConfig::default(), today)
            .await
            .unwrap();
        assert_eq!(raw[0].knowledge_type, KnowledgeType::Trend);

        let ctx = retriever(&storage)
            .retrieve_on("インスタのリール投稿のコツ", None, today)
            .await;
        assert_eq!(ctx.core_knowledge.len(), 1);
        assert_eq!(ctx.trends_knowledge.len(), 1);

        let core_pos = ctx.formatted_context.find("Grow a fanbase").unwrap();
        let trend_pos = ctx.formatted_context.find("Reels algorithm").unwrap();
        assert!(core_pos < trend_pos);
        assert!(ctx.formatted_context.contains("(valid from 2025-02-19)"));
    }

    #[tokio::test]
    async fn category_filter_applies() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let storage = store_with_core_and_trend(today).await;
        let ctx = retriever(&storage)
            .retrieve_on("reels tips", Some("instagram"), today)
            .await;
        assert!(ctx.core_knowledge.is_empty());
        assert_eq!(ctx.trends_knowledge.len(), 1);
        assert!(!ctx.formatted_context.contains("## Core Marketing Principles"));
    }

    #[tokio::test]
    async fn no_embedding_means_empty_context() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let storage = store_with_core_and_trend(today).await;
        let retriever = Retriever::new(&storage, EmbeddingClient::disabled(), RetrievalConfig::default());
        let ctx = retriever.retrieve("instagram reels", None).await;
        assert!(ctx.is_empty());
        assert!(ctx.formatted_context.is_empty());
    }

    #[tokio::test]
    async fn no_matches_means_empty_context() {
        let path = std::env::temp_dir().join(format!("ml_retrieval_{}.db", uuid::Uuid::now_v7()));
        let storage = Storage::open(&path).await.unwrap();
        let ctx = retriever(&storage).retrieve("instagram reels", None).await;
        assert!(ctx.is_empty());
        assert_eq!(ctx.formatted_context, "");
    }

    #[test]
    fn rag_gate() {
        assert!(should_use_rag("インスタのリール投稿のコツ"));
        assert!(should_use_rag("How do I improve my SEO?"));
        assert!(!should_use_rag("hi"));
        assert!(!should_use_rag("  seo "));
        assert!(!should_use_rag("What is the weather tomorrow?"));
        assert!(!should_use_rag("Is the contentious vote today?"));
    }

    #[test]
    fn category_inference() {
        assert_eq!(infer_category("インスタのリール投稿のコツ"), Some("instagram"));
        assert_eq!(infer_category("TikTok hooks that work"), Some("tiktok"));
        assert_eq!(infer_category("How often should I tweet?"), Some("x"));
        assert_eq!(infer_category("SEO basics for a bakery"), Some("seo"));
        assert_eq!(infer_category("ブランドの世界観を作りたい"), Some("branding"));
        assert_eq!(infer_category("Should I run ads this month?"), Some("advertising"));
        assert_eq!(infer_category("hello there"), None);
        assert_eq!(infer_category("Is there an instant fix for this instance?"), None);
        assert_eq!(infer_category("Pairing brandy with dessert"), None);
        assert_eq!(infer_category("Loading adsorption data"), None);
    }

    #[test]
    fn persona_is_not_empty() {
        assert!(default_persona_context().contains("marketing advisor"));
    }
}
