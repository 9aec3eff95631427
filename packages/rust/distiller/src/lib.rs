//! Article distillation: one model call turns a crawled article into a
//! structured trend [`UniversalKnowledge`] record.

pub mod canonical;
pub mod id;
pub mod parse;
pub mod prompt;

use std::sync::Arc;

use serde_json::json;
use tracing::{info, instrument, warn};

use marketlore_providers::{ChatClient, OpenRouterChatClient};
use marketlore_shared::{
    BatchWindow, CrawledArticle, DistillConfig, KnowledgeType, LlmConfig, MarketloreError,
    Result, UniversalKnowledge, is_known_category,
};

pub use canonical::render_canonical_text;
pub use id::{generate_knowledge_id, keyword_slug, source_prefix};
pub use parse::{DistilledPayload, extract_json, parse_response};
pub use prompt::{SYSTEM_PROMPT, build_user_prompt};

/// Result of distilling one article. Failures are captured, never propagated.
#[derive(Debug, Clone)]
pub struct DistillOutcome {
    pub article_url: String,
    pub success: bool,
    pub knowledge: Option<UniversalKnowledge>,
    pub error: Option<String>,
}

/// Turns articles into knowledge records through a [`ChatClient`].
///
/// Without a chat client the distiller is disabled: batches yield nothing
/// and single articles fail with a config error.
#[derive(Clone)]
pub struct Distiller {
    chat: Option<Arc<dyn ChatClient>>,
    config: DistillConfig,
}

impl Distiller {
    pub fn new(chat: Arc<dyn ChatClient>, config: DistillConfig) -> Self {
        Self {
            chat: Some(chat),
            config,
        }
    }

    /// A distiller with no model behind it.
    pub fn disabled(config: DistillConfig) -> Self {
        Self { chat: None, config }
    }

    /// Distiller over the configured OpenAI-compatible endpoint; disabled
    /// with a warning when the client cannot be built (e.g. no API key).
    pub fn from_config(llm: &LlmConfig, config: DistillConfig) -> Self {
        match OpenRouterChatClient::new(llm) {
            Ok(chat) => Self::new(Arc::new(chat), config),
            Err(e) => {
                warn!(error = %e, "distillation disabled");
                Self::disabled(config)
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.chat.is_some()
    }

    /// Distill a single article.
    #[instrument(skip_all, fields(url = %article.url))]
    pub async fn distill(&self, article: &CrawledArticle) -> DistillOutcome {
        match self.try_distill(article).await {
            Ok(knowledge) => DistillOutcome {
                article_url: article.url.clone(),
                success: true,
                knowledge: Some(knowledge),
                error: None,
            },
            Err(e) => {
                warn!(error = %e, "distillation failed");
                DistillOutcome {
                    article_url: article.url.clone(),
                    success: false,
                    knowledge: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn try_distill(&self, article: &CrawledArticle) -> Result<UniversalKnowledge> {
        let chat = self
            .chat
            .as_ref()
            .ok_or_else(|| MarketloreError::config("distillation disabled: no LLM client configured"))?;
        let user = build_user_prompt(article, self.config.max_content_chars);
        let response = chat.complete(SYSTEM_PROMPT, &user).await.map_err(|e| match e {
            MarketloreError::Distillation(_) => e,
            other => MarketloreError::Distillation(format!("model call failed: {other}")),
        })?;
        let payload = parse_response(&response)?;
        Ok(build_knowledge(article, payload, chat.model()))
    }

    /// Distill every article, at most `concurrency` model calls in flight.
    ///
    /// Outcomes are returned in input order. A disabled distiller logs one
    /// warning and returns no outcomes.
    #[instrument(skip_all, fields(articles = articles.len()))]
    pub async fn distill_batch(&self, articles: Vec<CrawledArticle>) -> Vec<DistillOutcome> {
        if !self.is_enabled() {
            if !articles.is_empty() {
                warn!(skipped = articles.len(), "distillation disabled, articles not distilled");
            }
            return Vec::new();
        }

        let window = BatchWindow::new(self.config.concurrency, self.config.window_pause);
        let outcomes = window
            .run(articles, |article| async move { self.distill(&article).await })
            .await;

        let succeeded = outcomes.iter().filter(|o| o.success).count();
        info!(
            succeeded,
            failed = outcomes.len() - succeeded,
            "distillation batch complete"
        );
        outcomes
    }
}

/// Assemble a trend record from an article and the validated model payload.
pub fn build_knowledge(
    article: &CrawledArticle,
    payload: DistilledPayload,
    model: &str,
) -> UniversalKnowledge {
    let suggested = payload.suggested_category.trim().to_lowercase();
    let category = if is_known_category(&suggested) {
        suggested
    } else {
        article.category.clone()
    };

    UniversalKnowledge {
        knowledge_id: generate_knowledge_id(&article.source_id, &article.published_at, &article.title),
        knowledge_type: KnowledgeType::Trend,
        category,
        title: payload.title.trim().to_string(),
        valid_from: article.published_at.date_naive(),
        concept: payload.concept.trim().to_string(),
        guidelines: payload.guidelines,
        tone_and_phrasing: payload.tone_and_phrasing,
        context: payload.context,
        source_urls: vec![article.url.clone()],
        metadata: json!({
            "source_id": article.source_id,
            "author": article.author,
            "suggested_keyword": payload.suggested_keyword,
            "model": model,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone, Utc};
    use marketlore_shared::AppConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const RESPONSE: &str = r#"Here you go:
{
  "title": "Watch time drives reach",
  "concept": "Reach follows watch time.",
  "guidelines": [{"if": "posting Reels", "then": "hook in 3 seconds", "reason": "retention is ranked"}],
  "toneAndPhrasing": [],
  "context": [],
  "suggestedCategory": "Instagram",
  "suggestedKeyword": "watch time"
}"#;

    struct MockChat {
        response: String,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl MockChat {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatClient for MockChat {
        async fn complete(&self, _system: &str, user: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if user.contains("Title: broken") {
                return Err(MarketloreError::Distillation("HTTP 500".into()));
            }
            Ok(self.response.clone())
        }

        fn model(&self) -> &str {
            "mock/model"
        }
    }

    fn article(title: &str) -> CrawledArticle {
        CrawledArticle {
            url: format!("https://later.com/blog/{}/", title.replace(' ', "-")),
            title: title.to_string(),
            content: "Watch time is now the strongest ranking signal.".into(),
            published_at: Utc.with_ymd_and_hms(2025, 1, 10, 8, 0, 0).unwrap(),
            author: Some("Jillian Warren".into()),
            source_id: "later_blog".into(),
            category: "sns_general".into(),
            metadata: serde_json::Value::Null,
        }
    }

    fn distiller(chat: Arc<MockChat>) -> Distiller {
        Distiller::new(
            chat,
            DistillConfig {
                concurrency: 2,
                window_pause: Duration::from_millis(1),
                max_content_chars: 6000,
            },
        )
    }

    #[tokio::test]
    async fn distills_trend_record() {
        let chat = Arc::new(MockChat::new(RESPONSE));
        let outcome = distiller(chat)
            .distill(&article("How the Instagram Algorithm Works"))
            .await;

        assert!(outcome.success);
        let k = outcome.knowledge.unwrap();
        assert_eq!(k.knowledge_id, "LATER_BLOG-2025-01-how-the-instagram");
        assert_eq!(k.knowledge_type, KnowledgeType::Trend);
        assert_eq!(k.category, "instagram");
        assert_eq!(k.valid_from, NaiveDate::from_ymd_opt(2025, 1, 10).unwrap());
        assert_eq!(k.metadata["suggested_keyword"], "watch time");
        assert_eq!(k.metadata["model"], "mock/model");
        assert_eq!(k.source_urls, vec!["https://later.com/blog/How-the-Instagram-Algorithm-Works/"]);
    }

    #[tokio::test]
    async fn unknown_category_falls_back_to_source() {
        let chat = Arc::new(MockChat::new(
            &RESPONSE.replace("\"Instagram\"", "\"podcasting\""),
        ));
        let k = distiller(chat)
            .distill(&article("Podcast growth ideas"))
            .await
            .knowledge
            .unwrap();
        assert_eq!(k.category, "sns_general");
    }

    #[tokio::test]
    async fn same_article_same_id() {
        let chat = Arc::new(MockChat::new(RESPONSE));
        let d = distiller(chat);
        let a = d.distill(&article("Reels tips today")).await.knowledge.unwrap();
        let b = d.distill(&article("Reels tips today")).await.knowledge.unwrap();
        assert_eq!(a.knowledge_id, b.knowledge_id);
    }

    #[tokio::test]
    async fn missing_json_is_failure() {
        let chat = Arc::new(MockChat::new("Sorry, I can't do that."));
        let outcome = distiller(chat).distill(&article("Anything")).await;
        assert!(!outcome.success);
        assert!(outcome.knowledge.is_none());
        assert_eq!(
            outcome.error.as_deref(),
            Some("distillation error: No JSON found in response")
        );
    }

    #[tokio::test]
    async fn batch_caps_concurrency_and_isolates_failures() {
        let chat = Arc::new(MockChat::new(RESPONSE));
        let titles = ["one a", "two b", "broken", "four d", "five e"];
        let articles = titles.iter().map(|t| article(t)).collect();

        let outcomes = distiller(chat.clone()).distill_batch(articles).await;

        assert_eq!(outcomes.len(), 5);
        assert_eq!(chat.calls.load(Ordering::SeqCst), 5);
        assert!(chat.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(outcomes.iter().filter(|o| o.success).count(), 4);
        assert!(!outcomes[2].success);
        assert!(outcomes[2].article_url.contains("broken"));
    }

    #[tokio::test]
    async fn missing_llm_key_disables_distillation() {
        let mut llm = LlmConfig::from(&AppConfig::default());
        llm.api_key = None;
        let d = Distiller::from_config(&llm, DistillConfig::default());
        assert!(!d.is_enabled());

        let outcomes = d.distill_batch(vec![article("one a"), article("two b")]).await;
        assert!(outcomes.is_empty());

        let single = d.distill(&article("three c")).await;
        assert!(!single.success);
        assert!(single.error.unwrap().contains("distillation disabled"));
    }
}
