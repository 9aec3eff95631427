//! Shared types, error model, and configuration for marketlore.
//!
//! This crate is the foundation depended on by all other marketlore crates.
//! It provides:
//! - [`MarketloreError`], the unified error type
//! - Domain types ([`KnowledgeSource`], [`CrawledArticle`], [`UniversalKnowledge`], ...)
//! - Configuration ([`AppConfig`] and the runtime configs derived from it)
//! - Pacing ([`BatchWindow`], [`Pacer`], [`RetryPolicy`]) and text helpers

pub mod config;
pub mod error;
pub mod pacing;
pub mod text;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrawlConfig, CrawlSettings, DefaultsSettings, DistillConfig, DistillSettings,
    EmbeddingConfig, EmbeddingSettings, LlmConfig, LlmSettings, RetrievalConfig,
    RetrievalSettings, SocialConfig, SocialSettings, SourceEntry, config_dir, config_file_path,
    database_path, init_config, load_config, load_config_from, read_secret,
};
pub use error::{MarketloreError, Result};
pub use pacing::{BatchWindow, Pacer, RetryPolicy};
pub use types::{
    ContextShift, CrawlLog, CrawlStatus, CrawlType, CrawledArticle, Guideline, KNOWN_CATEGORIES,
    KnowledgeRecord, KnowledgeSource, KnowledgeType, SearchResult, SourceType, UniversalKnowledge,
    is_known_category, year_month,
};
