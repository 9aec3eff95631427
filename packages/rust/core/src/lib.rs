//! Pipeline orchestration and retrieval for marketlore.
//!
//! This crate ties the source registry, crawlers, distiller, embeddings and
//! store into batch runs (`run_full_crawl`), monthly digests, core-knowledge
//! seeding, and query-time retrieval.

pub mod orchestrator;
pub mod report;
pub mod retrieval;
pub mod seed;
pub mod sources;

pub use orchestrator::{
    CrawlSummary, Orchestrator, ProgressReporter, RunPhase, RunSettings, SilentProgress,
};
pub use report::{Highlight, Importance, MonthlyReport, generate_monthly_report};
pub use retrieval::{
    RagContext, Retriever, default_persona_context, format_context, infer_category,
    should_use_rag,
};
pub use seed::{core_knowledge_set, seed_core_knowledge};
pub use sources::{SyncSummary, sync_sources};
