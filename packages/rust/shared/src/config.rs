//! Application configuration for marketlore.
//!
//! User config lives at `~/.marketlore/marketlore.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets are never written to the file; sections name the env vars that hold them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MarketloreError, Result};
use crate::pacing::RetryPolicy;
use crate::types::{KnowledgeSource, SourceType};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "marketlore.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".marketlore";

// ---------------------------------------------------------------------------
// Config structs (matching marketlore.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub defaults: DefaultsSettings,

    #[serde(default)]
    pub crawl: CrawlSettings,

    /// Social-discovery API settings.
    #[serde(default)]
    pub social: SocialSettings,

    /// Chat-completion backend used by the distiller.
    #[serde(default)]
    pub llm: LlmSettings,

    #[serde(default)]
    pub distill: DistillSettings,

    #[serde(default)]
    pub embedding: EmbeddingSettings,

    #[serde(default)]
    pub retrieval: RetrievalSettings,

    /// Configured knowledge sources, synced into the source registry.
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            defaults: DefaultsSettings::default(),
            crawl: CrawlSettings::default(),
            social: SocialSettings::default(),
            llm: LlmSettings::default(),
            distill: DistillSettings::default(),
            embedding: EmbeddingSettings::default(),
            retrieval: RetrievalSettings::default(),
            sources: default_sources(),
        }
    }
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsSettings {
    /// Path of the libSQL database. A leading `~/` expands to the home directory.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for DefaultsSettings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "~/.marketlore/marketlore.db".into()
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSettings {
    /// Trailing window used on a source's first run.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    /// Attempts per HTTP request, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base retry delay; attempt `n` waits `n × retry_delay_ms`.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Hard per-attempt deadline.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Minimum spacing between consecutive source crawls.
    #[serde(default = "default_source_interval_ms")]
    pub source_interval_ms: u64,

    /// Delay between article-page fetches within a sitemap crawl.
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,

    /// Maximum article pages fetched per sitemap.
    #[serde(default = "default_max_sitemap_articles")]
    pub max_sitemap_articles: usize,

    /// Maximum child sitemaps followed from a sitemap index.
    #[serde(default = "default_max_child_sitemaps")]
    pub max_child_sitemaps: usize,

    /// Article bodies are truncated to this many characters.
    #[serde(default = "default_max_article_chars")]
    pub max_article_chars: usize,

    /// Advance a source's watermark even when its crawl failed.
    #[serde(default)]
    pub advance_watermark_on_failure: bool,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            source_interval_ms: default_source_interval_ms(),
            page_delay_ms: default_page_delay_ms(),
            max_sitemap_articles: default_max_sitemap_articles(),
            max_child_sitemaps: default_max_child_sitemaps(),
            max_article_chars: default_max_article_chars(),
            advance_watermark_on_failure: false,
        }
    }
}

fn default_lookback_days() -> u32 {
    30
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_source_interval_ms() -> u64 {
    2000
}
fn default_page_delay_ms() -> u64 {
    1000
}
fn default_max_sitemap_articles() -> usize {
    20
}
fn default_max_child_sitemaps() -> usize {
    5
}
fn default_max_article_chars() -> usize {
    10_000
}

/// `[social]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialSettings {
    #[serde(default = "default_graph_base_url")]
    pub graph_base_url: String,

    /// Env var holding the Graph API access token.
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,

    /// Env var holding the business account id used for discovery.
    #[serde(default = "default_business_account_id_env")]
    pub business_account_id_env: String,

    #[serde(default = "default_media_limit")]
    pub media_limit: u32,

    /// Captions shorter than this are discarded.
    #[serde(default = "default_min_caption_chars")]
    pub min_caption_chars: usize,
}

impl Default for SocialSettings {
    fn default() -> Self {
        Self {
            graph_base_url: default_graph_base_url(),
            access_token_env: default_access_token_env(),
            business_account_id_env: default_business_account_id_env(),
            media_limit: default_media_limit(),
            min_caption_chars: default_min_caption_chars(),
        }
    }
}

fn default_graph_base_url() -> String {
    "https://graph.facebook.com/v19.0".into()
}
fn default_access_token_env() -> String {
    "INSTAGRAM_ACCESS_TOKEN".into()
}
fn default_business_account_id_env() -> String {
    "INSTAGRAM_BUSINESS_ACCOUNT_ID".into()
}
fn default_media_limit() -> u32 {
    25
}
fn default_min_caption_chars() -> usize {
    50
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// OpenAI-compatible API base (`/chat/completions` is appended).
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts per model call; only transient failures are retried.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key_env: default_llm_api_key_env(),
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_llm_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_llm_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    2000
}
fn default_llm_timeout_secs() -> u64 {
    60
}

/// `[distill]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistillSettings {
    /// Model calls in flight per window.
    #[serde(default = "default_distill_concurrency")]
    pub concurrency: usize,

    /// Pause between windows.
    #[serde(default = "default_window_pause_ms")]
    pub window_pause_ms: u64,

    /// Article content is truncated to this many characters before prompting.
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
}

impl Default for DistillSettings {
    fn default() -> Self {
        Self {
            concurrency: default_distill_concurrency(),
            window_pause_ms: default_window_pause_ms(),
            max_content_chars: default_max_content_chars(),
        }
    }
}

fn default_distill_concurrency() -> usize {
    2
}
fn default_window_pause_ms() -> u64 {
    1000
}
fn default_max_content_chars() -> usize {
    6000
}

/// `[embedding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    /// OpenAI-compatible API base (`/embeddings` is appended).
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,

    #[serde(default = "default_embedding_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Input text is truncated to this many characters.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,

    /// Embedding requests in flight per window during ingestion.
    #[serde(default = "default_embedding_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts per embedding call; only transient failures are retried.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            base_url: default_embedding_base_url(),
            api_key_env: default_embedding_api_key_env(),
            model: default_embedding_model(),
            dimensions: default_dimensions(),
            max_input_chars: default_max_input_chars(),
            concurrency: default_embedding_concurrency(),
            timeout_secs: default_embedding_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_embedding_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_dimensions() -> usize {
    1536
}
fn default_max_input_chars() -> usize {
    8000
}
fn default_embedding_concurrency() -> usize {
    4
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

/// `[retrieval]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSettings {
    #[serde(default = "default_match_count")]
    pub match_count: usize,

    /// Rows below this cosine similarity are never returned.
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,

    #[serde(default = "default_similarity_weight")]
    pub similarity_weight: f32,

    #[serde(default = "default_priority_weight")]
    pub priority_weight: f32,

    /// Age at which a trend's recency bonus reaches zero.
    #[serde(default = "default_trend_decay_days")]
    pub trend_decay_days: u32,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            match_count: default_match_count(),
            min_similarity: default_min_similarity(),
            similarity_weight: default_similarity_weight(),
            priority_weight: default_priority_weight(),
            trend_decay_days: default_trend_decay_days(),
        }
    }
}

fn default_match_count() -> usize {
    5
}
fn default_min_similarity() -> f32 {
    0.25
}
fn default_similarity_weight() -> f32 {
    0.7
}
fn default_priority_weight() -> f32 {
    0.3
}
fn default_trend_decay_days() -> u32 {
    180
}

/// `[[sources]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub source_id: String,
    pub source_type: SourceType,
    /// Feed URL, or sitemap URL for sitemap sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_handle: Option<String>,
    pub default_category: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl SourceEntry {
    /// Registry view of this entry. The watermark is owned by storage.
    pub fn to_source(&self) -> KnowledgeSource {
        KnowledgeSource {
            source_id: self.source_id.clone(),
            source_type: self.source_type,
            feed_url: self.feed_url.clone(),
            account_handle: self.account_handle.clone(),
            default_category: self.default_category.clone(),
            enabled: self.enabled,
            last_crawled_at: None,
        }
    }

    /// Reject entries that lack the locator their source type needs.
    pub fn validate(&self) -> Result<()> {
        if self.source_id.trim().is_empty() {
            return Err(MarketloreError::validation("source_id must not be empty"));
        }
        let missing = match self.source_type {
            SourceType::Feed | SourceType::Sitemap => self.feed_url.is_none(),
            SourceType::SocialDiscovery => self.account_handle.is_none(),
        };
        if missing {
            return Err(MarketloreError::validation(format!(
                "source '{}' of type {} is missing its {}",
                self.source_id,
                self.source_type.as_str(),
                match self.source_type {
                    SourceType::SocialDiscovery => "account_handle",
                    _ => "feed_url",
                }
            )));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_sources() -> Vec<SourceEntry> {
    vec![
        SourceEntry {
            source_id: "later_blog".into(),
            source_type: SourceType::Feed,
            feed_url: Some("https://later.com/blog/feed/".into()),
            account_handle: None,
            default_category: "instagram".into(),
            enabled: true,
        },
        SourceEntry {
            source_id: "search_engine_journal".into(),
            source_type: SourceType::Feed,
            feed_url: Some("https://www.searchenginejournal.com/feed/".into()),
            account_handle: None,
            default_category: "seo".into(),
            enabled: true,
        },
        SourceEntry {
            source_id: "creators_instagram".into(),
            source_type: SourceType::SocialDiscovery,
            feed_url: None,
            account_handle: Some("creators".into()),
            default_category: "instagram".into(),
            enabled: false,
        },
    ]
}

// ---------------------------------------------------------------------------
// Runtime configs (derived from AppConfig)
// ---------------------------------------------------------------------------

/// Runtime crawl configuration.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub lookback_days: u32,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
    pub source_interval: Duration,
    pub page_delay: Duration,
    pub max_sitemap_articles: usize,
    pub max_child_sitemaps: usize,
    pub max_article_chars: usize,
    pub advance_watermark_on_failure: bool,
}

impl From<&AppConfig> for CrawlConfig {
    fn from(config: &AppConfig) -> Self {
        let c = &config.crawl;
        Self {
            lookback_days: c.lookback_days,
            max_attempts: c.max_attempts.max(1),
            retry_delay: Duration::from_millis(c.retry_delay_ms),
            request_timeout: Duration::from_secs(c.request_timeout_secs),
            source_interval: Duration::from_millis(c.source_interval_ms),
            page_delay: Duration::from_millis(c.page_delay_ms),
            max_sitemap_articles: c.max_sitemap_articles,
            max_child_sitemaps: c.max_child_sitemaps,
            max_article_chars: c.max_article_chars,
            advance_watermark_on_failure: c.advance_watermark_on_failure,
        }
    }
}

impl CrawlConfig {
    /// Retry policy applied to every crawl request.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.retry_delay)
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Runtime social-discovery configuration with credentials resolved from env.
#[derive(Debug, Clone)]
pub struct SocialConfig {
    pub graph_base_url: String,
    pub access_token: Option<String>,
    pub business_account_id: Option<String>,
    pub media_limit: u32,
    pub min_caption_chars: usize,
}

impl From<&AppConfig> for SocialConfig {
    fn from(config: &AppConfig) -> Self {
        let s = &config.social;
        Self {
            graph_base_url: s.graph_base_url.trim_end_matches('/').to_string(),
            access_token: read_secret(&s.access_token_env),
            business_account_id: read_secret(&s.business_account_id_env),
            media_limit: s.media_limit,
            min_caption_chars: s.min_caption_chars,
        }
    }
}

/// Runtime chat-completion configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl From<&AppConfig> for LlmConfig {
    fn from(config: &AppConfig) -> Self {
        let l = &config.llm;
        Self {
            base_url: l.base_url.trim_end_matches('/').to_string(),
            api_key: read_secret(&l.api_key_env),
            model: l.model.clone(),
            temperature: l.temperature,
            max_tokens: l.max_tokens,
            timeout: Duration::from_secs(l.timeout_secs),
            retry: RetryPolicy::new(l.max_attempts, Duration::from_millis(l.retry_delay_ms)),
        }
    }
}

/// Runtime distillation configuration.
#[derive(Debug, Clone)]
pub struct DistillConfig {
    pub concurrency: usize,
    pub window_pause: Duration,
    pub max_content_chars: usize,
}

impl From<&AppConfig> for DistillConfig {
    fn from(config: &AppConfig) -> Self {
        let d = &config.distill;
        Self {
            concurrency: d.concurrency.max(1),
            window_pause: Duration::from_millis(d.window_pause_ms),
            max_content_chars: d.max_content_chars,
        }
    }
}

impl Default for DistillConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Runtime embedding configuration.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub dimensions: usize,
    pub max_input_chars: usize,
    pub concurrency: usize,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl From<&AppConfig> for EmbeddingConfig {
    fn from(config: &AppConfig) -> Self {
        let e = &config.embedding;
        Self {
            base_url: e.base_url.trim_end_matches('/').to_string(),
            api_key: read_secret(&e.api_key_env),
            model: e.model.clone(),
            dimensions: e.dimensions,
            max_input_chars: e.max_input_chars,
            concurrency: e.concurrency.max(1),
            timeout: Duration::from_secs(e.timeout_secs),
            retry: RetryPolicy::new(e.max_attempts, Duration::from_millis(e.retry_delay_ms)),
        }
    }
}

/// Runtime retrieval configuration.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub match_count: usize,
    pub min_similarity: f32,
    pub similarity_weight: f32,
    pub priority_weight: f32,
    pub trend_decay_days: u32,
}

impl From<&AppConfig> for RetrievalConfig {
    fn from(config: &AppConfig) -> Self {
        let r = &config.retrieval;
        Self {
            match_count: r.match_count,
            min_similarity: r.min_similarity,
            similarity_weight: r.similarity_weight,
            priority_weight: r.priority_weight,
            trend_decay_days: r.trend_decay_days.max(1),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.marketlore/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| MarketloreError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.marketlore/marketlore.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| MarketloreError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        MarketloreError::config(format!("failed to parse {}: {e}", path.display()))
    })?;

    for entry in &config.sources {
        entry.validate()?;
    }
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| MarketloreError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| MarketloreError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| MarketloreError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Resolve the configured database path, expanding a leading `~/`.
pub fn database_path(config: &AppConfig) -> Result<PathBuf> {
    expand_home(&config.defaults.database_path)
}

fn expand_home(raw: &str) -> Result<PathBuf> {
    match raw.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| MarketloreError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(raw)),
    }
}

/// Read a secret from the named env var; empty values count as unset.
pub fn read_secret(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Some(val),
        _ => None,
    }
}
