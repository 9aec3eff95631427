//! Batch ingestion run: sources → crawl → distill → embed → store.
//!
//! Failures are isolated per source, per article and per upsert, and recorded
//! in the [`CrawlSummary`] instead of aborting the run.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use marketlore_crawler::CrawlerRegistry;
use marketlore_distiller::{Distiller, render_canonical_text};
use marketlore_providers::EmbeddingClient;
use marketlore_shared::{
    AppConfig, BatchWindow, CrawlConfig, CrawlStatus, CrawlType, DistillConfig, EmbeddingConfig,
    KnowledgeRecord, LlmConfig, Pacer, Result, SocialConfig, UniversalKnowledge,
};
use marketlore_storage::{Storage, UpsertOutcome};

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Stages of a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Pending,
    Crawling,
    Distilling,
    Storing,
    Done,
}

impl RunPhase {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Loading sources",
            Self::Crawling => "Crawling sources",
            Self::Distilling => "Distilling articles",
            Self::Storing => "Embedding and storing knowledge",
            Self::Done => "Done",
        }
    }
}

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, phase: RunPhase);
    /// Called after each source has been crawled.
    fn source_crawled(&self, source_id: &str, current: usize, total: usize);
    /// Called after each knowledge upsert attempt.
    fn knowledge_stored(&self, knowledge_id: &str, current: usize, total: usize);
    /// Called when the run completes.
    fn done(&self, summary: &CrawlSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _phase: RunPhase) {}
    fn source_crawled(&self, _source_id: &str, _current: usize, _total: usize) {}
    fn knowledge_stored(&self, _knowledge_id: &str, _current: usize, _total: usize) {}
    fn done(&self, _summary: &CrawlSummary) {}
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Counts and errors for one batch run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlSummary {
    pub batch_id: String,
    pub crawl_type: CrawlType,
    pub sources_processed: usize,
    pub sources_succeeded: usize,
    pub sources_failed: usize,
    pub articles_found: usize,
    pub articles_distilled: usize,
    pub knowledge_added: usize,
    pub knowledge_skipped: usize,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl CrawlSummary {
    fn new(batch_id: String, crawl_type: CrawlType, started_at: DateTime<Utc>) -> Self {
        Self {
            batch_id,
            crawl_type,
            sources_processed: 0,
            sources_succeeded: 0,
            sources_failed: 0,
            articles_found: 0,
            articles_distilled: 0,
            knowledge_added: 0,
            knowledge_skipped: 0,
            errors: Vec::new(),
            started_at,
            completed_at: started_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Pacing and watermark settings for a run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub source_interval: Duration,
    pub embedding_concurrency: usize,
    pub advance_watermark_on_failure: bool,
}

impl RunSettings {
    pub fn new(crawl: &CrawlConfig, embedding: &EmbeddingConfig) -> Self {
        Self {
            source_interval: crawl.source_interval,
            embedding_concurrency: embedding.concurrency,
            advance_watermark_on_failure: crawl.advance_watermark_on_failure,
        }
    }
}

/// Drives one ingestion run over the enabled sources.
pub struct Orchestrator<'a> {
    storage: &'a Storage,
    crawlers: CrawlerRegistry,
    distiller: Distiller,
    embeddings: EmbeddingClient,
    settings: RunSettings,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        storage: &'a Storage,
        crawlers: CrawlerRegistry,
        distiller: Distiller,
        embeddings: EmbeddingClient,
        settings: RunSettings,
    ) -> Self {
        Self {
            storage,
            crawlers,
            distiller,
            embeddings,
            settings,
        }
    }

    /// Wire every stage from application config.
    ///
    /// A missing LLM key disables distillation and a missing embedding key
    /// disables vectors; crawling, logs and watermarks still proceed.
    pub fn from_config(storage: &'a Storage, config: &AppConfig) -> Result<Self> {
        let crawl = CrawlConfig::from(config);
        let embedding = EmbeddingConfig::from(config);
        let crawlers = CrawlerRegistry::new(&crawl, SocialConfig::from(config))?;
        let distiller = Distiller::from_config(&LlmConfig::from(config), DistillConfig::from(config));
        let embeddings = EmbeddingClient::from_config(&embedding);
        Ok(Self::new(
            storage,
            crawlers,
            distiller,
            embeddings,
            RunSettings::new(&crawl, &embedding),
        ))
    }

    /// Run the full pipeline once over every enabled source.
    ///
    /// Only loading the source list can fail the run; everything after is
    /// recorded in the summary.
    #[instrument(skip_all, fields(crawl_type = crawl_type.as_str()))]
    pub async fn run_full_crawl(
        &self,
        crawl_type: CrawlType,
        progress: &dyn ProgressReporter,
    ) -> Result<CrawlSummary> {
        let started_at = Utc::now();
        let batch_id = Uuid::now_v7().to_string();
        let mut summary = CrawlSummary::new(batch_id, crawl_type, started_at);
        info!(batch_id = %summary.batch_id, "starting crawl run");

        // --- Phase 1: Sources ---
        progress.phase(RunPhase::Pending);
        let sources = self.storage.list_enabled_sources().await?;

        // --- Phase 2: Crawl ---
        progress.phase(RunPhase::Crawling);
        let mut pacer = Pacer::new(self.settings.source_interval);
        let mut articles = Vec::new();
        let mut succeeded: HashSet<String> = HashSet::new();
        let total_sources = sources.len();

        for (i, source) in sources.iter().enumerate() {
            pacer.wait().await;

            let log_id = match self
                .storage
                .open_crawl_log(&summary.batch_id, &source.source_id, crawl_type)
                .await
            {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(source_id = %source.source_id, error = %e, "could not open crawl log");
                    summary.errors.push(format!("{}: {e}", source.source_id));
                    None
                }
            };

            let outcome = self.crawlers.crawl(source, Utc::now()).await;
            let status = if outcome.success {
                CrawlStatus::Success
            } else {
                CrawlStatus::Failed
            };

            if let Some(log_id) = &log_id {
                if let Err(e) = self
                    .storage
                    .finalize_crawl_log(log_id, status, outcome.articles.len(), outcome.error.as_deref())
                    .await
                {
                    warn!(source_id = %source.source_id, error = %e, "could not close crawl log");
                    summary.errors.push(format!("{}: {e}", source.source_id));
                }
            }

            summary.sources_processed += 1;
            if outcome.success {
                summary.sources_succeeded += 1;
                succeeded.insert(source.source_id.clone());
            } else {
                summary.sources_failed += 1;
                summary.errors.push(format!(
                    "{}: {}",
                    source.source_id,
                    outcome.error.as_deref().unwrap_or("crawl failed")
                ));
            }
            summary.articles_found += outcome.articles.len();
            articles.extend(outcome.articles);
            progress.source_crawled(&source.source_id, i + 1, total_sources);
        }

        // --- Phase 3: Distill ---
        progress.phase(RunPhase::Distilling);
        let mut knowledge: Vec<UniversalKnowledge> = Vec::new();
        for outcome in self.distiller.distill_batch(articles).await {
            match outcome.knowledge {
                Some(k) => knowledge.push(k),
                None => summary.errors.push(format!(
                    "{}: {}",
                    outcome.article_url,
                    outcome.error.as_deref().unwrap_or("distillation failed")
                )),
            }
        }
        summary.articles_distilled = knowledge.len();

        // --- Phase 4: Embed + store ---
        progress.phase(RunPhase::Storing);
        let records = self.embed_all(knowledge).await;
        let total_records = records.len();
        for (i, record) in records.iter().enumerate() {
            match self.storage.upsert_knowledge(record).await {
                Ok(UpsertOutcome::Skipped) => summary.knowledge_skipped += 1,
                Ok(_) => summary.knowledge_added += 1,
                Err(e) => {
                    warn!(knowledge_id = %record.knowledge_id, error = %e, "upsert failed");
                    summary.errors.push(format!("{}: {e}", record.knowledge_id));
                }
            }
            progress.knowledge_stored(&record.knowledge_id, i + 1, total_records);
        }

        // --- Phase 5: Watermarks ---
        for source in &sources {
            if !self.settings.advance_watermark_on_failure && !succeeded.contains(&source.source_id)
            {
                continue;
            }
            if let Err(e) = self.storage.update_watermark(&source.source_id, started_at).await {
                warn!(source_id = %source.source_id, error = %e, "could not advance watermark");
                summary.errors.push(format!("{}: {e}", source.source_id));
            }
        }

        summary.completed_at = Utc::now();
        progress.phase(RunPhase::Done);
        progress.done(&summary);

        info!(
            sources = summary.sources_processed,
            failed = summary.sources_failed,
            articles = summary.articles_found,
            added = summary.knowledge_added,
            skipped = summary.knowledge_skipped,
            errors = summary.errors.len(),
            "crawl run complete"
        );
        Ok(summary)
    }

    /// Canonical text and embedding for each record, in bounded windows.
    async fn embed_all(&self, knowledge: Vec<UniversalKnowledge>) -> Vec<KnowledgeRecord> {
        let window = BatchWindow::new(self.settings.embedding_concurrency, Duration::ZERO);
        let embeddings = &self.embeddings;
        window
            .run(knowledge, |k| async move {
                let content = render_canonical_text(&k);
                let embedding = embeddings.embed(&content).await;
                KnowledgeRecord::from_knowledge(&k, content, embedding)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::SubsecRound;
    use marketlore_crawler::ArticleSource;
    use marketlore_providers::ChatClient;
    use marketlore_shared::{
        CrawledArticle, KnowledgeSource, KnowledgeType, MarketloreError, SourceType,
    };
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RESPONSE: &str = r#"{
      "title": "Watch time drives reach",
      "concept": "Reach follows watch time.",
      "guidelines": [{"if": "posting Reels", "then": "hook in 3 seconds", "reason": "retention is ranked"}],
      "toneAndPhrasing": [],
      "context": [],
      "suggestedCategory": "instagram",
      "suggestedKeyword": "watch time"
    }"#;

    struct FixedChat {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatClient for FixedChat {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RESPONSE.to_string())
        }
        fn model(&self) -> &str {
            "fixed/model"
        }
    }

    /// Feed source that returns canned articles from a template.
    struct CannedSource {
        source_type: SourceType,
        result: std::result::Result<Vec<(String, DateTime<Utc>)>, String>,
    }

    #[async_trait]
    impl ArticleSource for CannedSource {
        fn source_type(&self) -> SourceType {
            self.source_type
        }
        fn name(&self) -> &str {
            "canned"
        }
        async fn fetch_articles(&self, source: &KnowledgeSource) -> Result<Vec<CrawledArticle>> {
            let items = self
                .result
                .clone()
                .map_err(MarketloreError::SourceFetch)?;
            Ok(items
                .into_iter()
                .map(|(title, published_at)| CrawledArticle {
                    url: format!("https://example.com/{}", title.replace(' ', "-")),
                    title,
                    content: "body".into(),
                    published_at,
                    author: None,
                    source_id: source.source_id.clone(),
                    category: source.default_category.clone(),
                    metadata: serde_json::Value::Null,
                })
                .collect())
        }
    }

    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("ml_orch_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn source(id: &str, source_type: SourceType) -> KnowledgeSource {
        KnowledgeSource {
            source_id: id.into(),
            source_type,
            feed_url: Some(format!("https://example.com/{id}")),
            account_handle: None,
            default_category: "instagram".into(),
            enabled: true,
            last_crawled_at: None,
        }
    }

    fn settings(advance_on_failure: bool) -> RunSettings {
        RunSettings {
            source_interval: Duration::ZERO,
            embedding_concurrency: 4,
            advance_watermark_on_failure: advance_on_failure,
        }
    }

    fn distiller(chat: Arc<FixedChat>) -> Distiller {
        Distiller::new(
            chat,
            DistillConfig {
                window_pause: Duration::ZERO,
                ..DistillConfig::default()
            },
        )
    }

    fn recent(days: i64) -> DateTime<Utc> {
        Utc::now() - chrono::Duration::days(days)
    }

    #[tokio::test]
    async fn failed_source_does_not_block_siblings() {
        let storage = test_storage().await;
        storage.upsert_source(&source("good", SourceType::Feed)).await.unwrap();
        storage.upsert_source(&source("bad", SourceType::Sitemap)).await.unwrap();

        let crawlers = CrawlerRegistry::with_crawlers(
            vec![
                Box::new(CannedSource {
                    source_type: SourceType::Feed,
                    result: Ok(vec![("Reels tips now".into(), recent(2))]),
                }),
                Box::new(CannedSource {
                    source_type: SourceType::Sitemap,
                    result: Err("HTTP 503 after 3 attempts".into()),
                }),
            ],
            30,
        );
        let chat = Arc::new(FixedChat {
            calls: AtomicUsize::new(0),
        });
        let orchestrator = Orchestrator::new(
            &storage,
            crawlers,
            distiller(chat),
            EmbeddingClient::disabled(),
            settings(false),
        );

        let summary = orchestrator
            .run_full_crawl(CrawlType::Manual, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(summary.sources_processed, 2);
        assert_eq!(summary.sources_succeeded, 1);
        assert_eq!(summary.sources_failed, 1);
        assert_eq!(summary.knowledge_added, 1);
        assert!(summary.errors.iter().any(|e| e.starts_with("bad: ")));

        let logs = storage.list_crawl_logs(Some(summary.batch_id.as_str()), 10).await.unwrap();
        assert_eq!(logs.len(), 2);
        let bad = logs.iter().find(|l| l.source_id == "bad").unwrap();
        assert_eq!(bad.status, CrawlStatus::Failed);
        assert!(bad.completed_at.is_some());

        // Only the successful source advances.
        let good = storage.get_source("good").await.unwrap().unwrap();
        assert_eq!(good.last_crawled_at, Some(summary.started_at.trunc_subsecs(0)));
        assert!(storage.get_source("bad").await.unwrap().unwrap().last_crawled_at.is_none());
    }

    #[tokio::test]
    async fn watermark_advances_on_failure_when_configured() {
        let storage = test_storage().await;
        storage.upsert_source(&source("bad", SourceType::Sitemap)).await.unwrap();
        let crawlers = CrawlerRegistry::with_crawlers(
            vec![Box::new(CannedSource {
                source_type: SourceType::Sitemap,
                result: Err("down".into()),
            })],
            30,
        );
        let orchestrator = Orchestrator::new(
            &storage,
            crawlers,
            distiller(Arc::new(FixedChat {
                calls: AtomicUsize::new(0),
            })),
            EmbeddingClient::disabled(),
            settings(true),
        );
        orchestrator
            .run_full_crawl(CrawlType::Daily, &SilentProgress)
            .await
            .unwrap();
        assert!(storage.get_source("bad").await.unwrap().unwrap().last_crawled_at.is_some());
    }

    #[tokio::test]
    async fn trend_never_overwrites_core_during_run() {
        let storage = test_storage().await;
        storage.upsert_source(&source("later_blog", SourceType::Feed)).await.unwrap();

        // Pre-store a core record under the id the run will produce.
        let published = recent(1);
        let id = marketlore_distiller::generate_knowledge_id("later_blog", &published, "Reels tips now");
        let mut core = crate::seed::core_knowledge_set().remove(0);
        core.knowledge_id = id.clone();
        let content = render_canonical_text(&core);
        storage
            .upsert_knowledge(&KnowledgeRecord::from_knowledge(&core, content, Vec::new()))
            .await
            .unwrap();

        let crawlers = CrawlerRegistry::with_crawlers(
            vec![Box::new(CannedSource {
                source_type: SourceType::Feed,
                result: Ok(vec![("Reels tips now".into(), published)]),
            })],
            30,
        );
        let orchestrator = Orchestrator::new(
            &storage,
            crawlers,
            distiller(Arc::new(FixedChat {
                calls: AtomicUsize::new(0),
            })),
            EmbeddingClient::disabled(),
            settings(false),
        );
        let summary = orchestrator
            .run_full_crawl(CrawlType::Daily, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(summary.knowledge_added, 0);
        assert_eq!(summary.knowledge_skipped, 1);
        assert!(summary.errors.is_empty());
        let stored = storage.get_knowledge(&id).await.unwrap().unwrap();
        assert_eq!(stored.knowledge_type, KnowledgeType::Core);
    }

    #[tokio::test]
    async fn feed_run_without_embedding_key_is_idempotent() {
        let server = MockServer::start().await;
        let now = Utc::now();
        let feed = format!(
            r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Blog</title>
<item><title>Reels tips for creators</title><link>https://blog.example.com/reels-tips</link>
<pubDate>{}</pubDate><description>Hook viewers in the first three seconds.</description></item>
<item><title>Stories stickers that convert</title><link>https://blog.example.com/stories</link>
<pubDate>{}</pubDate><description>Polls lift replies.</description></item>
</channel></rss>"#,
            (now - chrono::Duration::days(1)).to_rfc2822(),
            (now - chrono::Duration::days(3)).to_rfc2822(),
        );
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(200).set_body_string(feed))
            .mount(&server)
            .await;

        let storage = test_storage().await;
        let mut blog = source("later_blog", SourceType::Feed);
        blog.feed_url = Some(format!("{}/feed", server.uri()));
        storage.upsert_source(&blog).await.unwrap();

        let crawl = CrawlConfig {
            retry_delay: Duration::from_millis(1),
            source_interval: Duration::ZERO,
            ..CrawlConfig::default()
        };
        let chat = Arc::new(FixedChat {
            calls: AtomicUsize::new(0),
        });
        let orchestrator = Orchestrator::new(
            &storage,
            CrawlerRegistry::new(&crawl, SocialConfig::from(&AppConfig::default())).unwrap(),
            distiller(chat.clone()),
            EmbeddingClient::disabled(),
            settings(false),
        );

        let first = orchestrator
            .run_full_crawl(CrawlType::Daily, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(first.articles_found, 2);
        assert_eq!(first.articles_distilled, 2);
        assert!(first.knowledge_added > 0);
        assert!(first.errors.is_empty(), "{:?}", first.errors);

        let id = marketlore_distiller::generate_knowledge_id(
            "later_blog",
            &(now - chrono::Duration::days(1)),
            "Reels tips for creators",
        );
        let stored = storage.get_knowledge(&id).await.unwrap().unwrap();
        assert!(stored.embedding.is_none());
        assert_eq!(stored.knowledge_type, KnowledgeType::Trend);

        let second = orchestrator
            .run_full_crawl(CrawlType::Daily, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(second.articles_found, 0);
        assert_eq!(second.knowledge_added, 0);
        assert_eq!(chat.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn run_without_llm_key_still_crawls_and_advances() {
        let server = MockServer::start().await;
        let feed = format!(
            r#"<rss version="2.0"><channel><title>Blog</title>
<item><title>Reels tips for creators</title><link>https://blog.example.com/reels-tips</link>
<pubDate>{}</pubDate><description>Hook viewers early.</description></item>
</channel></rss>"#,
            recent(1).to_rfc2822(),
        );
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(200).set_body_string(feed))
            .mount(&server)
            .await;

        let storage = test_storage().await;
        let mut blog = source("later_blog", SourceType::Feed);
        blog.feed_url = Some(format!("{}/feed", server.uri()));
        storage.upsert_source(&blog).await.unwrap();

        let config = AppConfig::default();
        let mut llm = LlmConfig::from(&config);
        llm.api_key = None;
        let crawl = CrawlConfig {
            retry_delay: Duration::from_millis(1),
            source_interval: Duration::ZERO,
            ..CrawlConfig::default()
        };
        let orchestrator = Orchestrator::new(
            &storage,
            CrawlerRegistry::new(&crawl, SocialConfig::from(&config)).unwrap(),
            Distiller::from_config(&llm, DistillConfig::default()),
            EmbeddingClient::disabled(),
            settings(false),
        );

        let summary = orchestrator
            .run_full_crawl(CrawlType::Manual, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(summary.sources_succeeded, 1);
        assert_eq!(summary.articles_found, 1);
        assert_eq!(summary.articles_distilled, 0);
        assert_eq!(summary.knowledge_added, 0);

        let logs = storage.list_crawl_logs(Some(summary.batch_id.as_str()), 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, CrawlStatus::Success);

        let stored = storage.get_source("later_blog").await.unwrap().unwrap();
        assert_eq!(stored.last_crawled_at, Some(summary.started_at.trunc_subsecs(0)));
    }
}
