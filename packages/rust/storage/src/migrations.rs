//! SQL migration definitions for the marketlore database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed as one batch.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: sources, crawl_logs, knowledge",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Source registry and crawl watermarks
CREATE TABLE IF NOT EXISTS sources (
    source_id        TEXT PRIMARY KEY,
    source_type      TEXT NOT NULL,
    feed_url         TEXT,
    account_handle   TEXT,
    default_category TEXT NOT NULL,
    enabled          INTEGER NOT NULL DEFAULT 1,
    last_crawled_at  TEXT
);

-- One row per (batch, source)
CREATE TABLE IF NOT EXISTS crawl_logs (
    id               TEXT PRIMARY KEY,
    batch_id         TEXT NOT NULL,
    source_id        TEXT NOT NULL,
    crawl_type       TEXT NOT NULL,
    status           TEXT NOT NULL,
    articles_fetched INTEGER NOT NULL DEFAULT 0,
    error_message    TEXT,
    started_at       TEXT NOT NULL,
    completed_at     TEXT,
    UNIQUE(batch_id, source_id)
);

CREATE INDEX IF NOT EXISTS idx_crawl_logs_batch ON crawl_logs(batch_id);

-- Distilled and seeded knowledge with embeddings
CREATE TABLE IF NOT EXISTS knowledge (
    knowledge_id     TEXT PRIMARY KEY,
    knowledge_type   TEXT NOT NULL,
    category         TEXT NOT NULL,
    title            TEXT NOT NULL,
    content          TEXT NOT NULL,
    embedding_json   TEXT,
    source_urls_json TEXT NOT NULL DEFAULT '[]',
    valid_from       TEXT NOT NULL,
    is_active        INTEGER NOT NULL DEFAULT 1,
    is_immutable     INTEGER NOT NULL DEFAULT 0,
    metadata_json    TEXT NOT NULL DEFAULT '{}',
    payload_json     TEXT,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_knowledge_category ON knowledge(category);
CREATE INDEX IF NOT EXISTS idx_knowledge_created ON knowledge(created_at);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Monthly digest reports",
            sql: r#"
CREATE TABLE IF NOT EXISTS monthly_reports (
    year_month      TEXT PRIMARY KEY,
    total_knowledge INTEGER NOT NULL,
    report_json     TEXT NOT NULL,
    generated_at    TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
