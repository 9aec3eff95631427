//! libSQL storage layer (local, offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding the source registry,
//! crawl logs, the knowledge vector store, and monthly digest reports.
//!
//! **Access rules:**
//! - Batch runs and operator commands: read-write via [`Storage::open`]
//! - Query-time retrieval may use [`Storage::open_readonly`]

mod migrations;
pub mod search;

use std::path::Path;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use libsql::{Connection, Database, params};
use marketlore_shared::{
    CrawlLog, CrawlStatus, CrawlType, KnowledgeRecord, KnowledgeSource, KnowledgeType,
    MarketloreError, Result, RetrievalConfig, SearchResult, SourceType,
};
use uuid::Uuid;

pub use search::{combined_score, cosine_similarity, priority_score};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

// ---------------------------------------------------------------------------
// Upsert conflict policy
// ---------------------------------------------------------------------------

/// The stored side of a knowledge conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExistingKnowledge {
    pub knowledge_type: KnowledgeType,
    pub valid_from: NaiveDate,
    pub is_immutable: bool,
}

/// What an upsert should do given the stored row (if any).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertDecision {
    Insert,
    Replace,
    KeepExisting,
}

/// Result of [`Storage::upsert_knowledge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
    /// The conflict policy kept the stored row.
    Skipped,
}

impl UpsertOutcome {
    pub fn is_written(&self) -> bool {
        !matches!(self, Self::Skipped)
    }
}

/// Conflict policy for knowledge upserts keyed by `knowledge_id`.
///
/// - a trend never overwrites an immutable (core) row
/// - an incoming core record always replaces
/// - between trends, an older `valid_from` never replaces a newer one
pub fn resolve_upsert(
    existing: Option<&ExistingKnowledge>,
    incoming: &KnowledgeRecord,
) -> UpsertDecision {
    let Some(existing) = existing else {
        return UpsertDecision::Insert;
    };
    if incoming.is_immutable() {
        return UpsertDecision::Replace;
    }
    if existing.is_immutable || existing.knowledge_type == KnowledgeType::Core {
        return UpsertDecision::KeepExisting;
    }
    if incoming.valid_from < existing.valid_from {
        return UpsertDecision::KeepExisting;
    }
    UpsertDecision::Replace
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MarketloreError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MarketloreError::Storage(format!(
                "database not found at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        MarketloreError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(MarketloreError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Source registry
    // -----------------------------------------------------------------------

    /// Insert a source, or refresh its locator fields if it already exists.
    ///
    /// The watermark and the enabled flag of an existing row are left alone.
    pub async fn upsert_source(&self, source: &KnowledgeSource) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO sources (source_id, source_type, feed_url, account_handle, default_category, enabled)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(source_id) DO UPDATE SET
                   source_type = excluded.source_type,
                   feed_url = excluded.feed_url,
                   account_handle = excluded.account_handle,
                   default_category = excluded.default_category",
                params![
                    source.source_id.as_str(),
                    source.source_type.as_str(),
                    source.feed_url.as_deref(),
                    source.account_handle.as_deref(),
                    source.default_category.as_str(),
                    i64::from(source.enabled),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Get a single source by id.
    pub async fn get_source(&self, source_id: &str) -> Result<Option<KnowledgeSource>> {
        let mut rows = self
            .conn
            .query(
                "SELECT source_id, source_type, feed_url, account_handle, default_category, enabled, last_crawled_at
                 FROM sources WHERE source_id = ?1",
                params![source_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_source(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// All sources, ordered by id.
    pub async fn list_sources(&self) -> Result<Vec<KnowledgeSource>> {
        self.query_sources(
            "SELECT source_id, source_type, feed_url, account_handle, default_category, enabled, last_crawled_at
             FROM sources ORDER BY source_id",
        )
        .await
    }

    /// Enabled sources, ordered by id.
    pub async fn list_enabled_sources(&self) -> Result<Vec<KnowledgeSource>> {
        self.query_sources(
            "SELECT source_id, source_type, feed_url, account_handle, default_category, enabled, last_crawled_at
             FROM sources WHERE enabled = 1 ORDER BY source_id",
        )
        .await
    }

    async fn query_sources(&self, sql: &str) -> Result<Vec<KnowledgeSource>> {
        let mut rows = self.conn.query(sql, params![]).await.map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_source(&row)?);
        }
        Ok(results)
    }

    /// Toggle a source. Returns `false` if no such source exists.
    pub async fn set_source_enabled(&self, source_id: &str, enabled: bool) -> Result<bool> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE sources SET enabled = ?1 WHERE source_id = ?2",
                params![i64::from(enabled), source_id],
            )
            .await
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Advance a source's watermark.
    pub async fn update_watermark(&self, source_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "UPDATE sources SET last_crawled_at = ?1 WHERE source_id = ?2",
                params![fmt_ts(&at), source_id],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Crawl logs
    // -----------------------------------------------------------------------

    /// Create a `running` log for one source within a batch. Returns the log id.
    pub async fn open_crawl_log(
        &self,
        batch_id: &str,
        source_id: &str,
        crawl_type: CrawlType,
    ) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = fmt_ts(&Utc::now());
        self.conn
            .execute(
                "INSERT INTO crawl_logs (id, batch_id, source_id, crawl_type, status, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id.as_str(),
                    batch_id,
                    source_id,
                    crawl_type.as_str(),
                    CrawlStatus::Running.as_str(),
                    now.as_str()
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(id)
    }

    /// Close a crawl log with its terminal status.
    pub async fn finalize_crawl_log(
        &self,
        log_id: &str,
        status: CrawlStatus,
        articles_fetched: usize,
        error_message: Option<&str>,
    ) -> Result<()> {
        self.check_writable()?;
        let now = fmt_ts(&Utc::now());
        self.conn
            .execute(
                "UPDATE crawl_logs
                 SET status = ?1, articles_fetched = ?2, error_message = ?3, completed_at = ?4
                 WHERE id = ?5",
                params![
                    status.as_str(),
                    articles_fetched as i64,
                    error_message,
                    now.as_str(),
                    log_id
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Crawl logs, newest first. Restrict to one batch with `batch_id`.
    pub async fn list_crawl_logs(
        &self,
        batch_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<CrawlLog>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, batch_id, source_id, crawl_type, status, articles_fetched, error_message, started_at, completed_at
                 FROM crawl_logs
                 WHERE ?1 IS NULL OR batch_id = ?1
                 ORDER BY started_at DESC, id DESC
                 LIMIT ?2",
                params![batch_id, limit],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_crawl_log(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Knowledge (vector store)
    // -----------------------------------------------------------------------

    /// Upsert a knowledge row keyed by `knowledge_id`, applying [`resolve_upsert`].
    ///
    /// The SQL conflict clause repeats the core-immutability and recency
    /// guards so a concurrent writer cannot bypass them.
    pub async fn upsert_knowledge(&self, record: &KnowledgeRecord) -> Result<UpsertOutcome> {
        self.check_writable()?;

        let existing = self.existing_knowledge(&record.knowledge_id).await?;
        let decision = resolve_upsert(existing.as_ref(), record);
        if decision == UpsertDecision::KeepExisting {
            tracing::debug!(
                knowledge_id = %record.knowledge_id,
                "upsert skipped by conflict policy"
            );
            return Ok(UpsertOutcome::Skipped);
        }

        let embedding_json = record
            .embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| MarketloreError::Storage(e.to_string()))?;
        let source_urls_json = serde_json::to_string(&record.source_urls)
            .map_err(|e| MarketloreError::Storage(e.to_string()))?;
        let metadata_json = serde_json::to_string(&record.metadata)
            .map_err(|e| MarketloreError::Storage(e.to_string()))?;
        let payload_json = record
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| MarketloreError::Storage(e.to_string()))?;
        let now = fmt_ts(&Utc::now());

        let changed = self
            .conn
            .execute(
                "INSERT INTO knowledge (knowledge_id, knowledge_type, category, title, content, embedding_json,
                                        source_urls_json, valid_from, is_active, is_immutable, metadata_json,
                                        payload_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)
                 ON CONFLICT(knowledge_id) DO UPDATE SET
                   knowledge_type = excluded.knowledge_type,
                   category = excluded.category,
                   title = excluded.title,
                   content = excluded.content,
                   embedding_json = excluded.embedding_json,
                   source_urls_json = excluded.source_urls_json,
                   valid_from = excluded.valid_from,
                   is_active = excluded.is_active,
                   is_immutable = excluded.is_immutable,
                   metadata_json = excluded.metadata_json,
                   payload_json = excluded.payload_json,
                   updated_at = excluded.updated_at
                 WHERE excluded.is_immutable = 1
                    OR (knowledge.is_immutable = 0 AND excluded.valid_from >= knowledge.valid_from)",
                params![
                    record.knowledge_id.as_str(),
                    record.knowledge_type.as_str(),
                    record.category.as_str(),
                    record.title.as_str(),
                    record.content.as_str(),
                    embedding_json,
                    source_urls_json,
                    record.valid_from.to_string(),
                    i64::from(record.is_active),
                    i64::from(record.is_immutable()),
                    metadata_json,
                    payload_json,
                    now.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;

        Ok(match (decision, changed) {
            (_, 0) => UpsertOutcome::Skipped,
            (UpsertDecision::Insert, _) => UpsertOutcome::Inserted,
            _ => UpsertOutcome::Replaced,
        })
    }

    async fn existing_knowledge(&self, knowledge_id: &str) -> Result<Option<ExistingKnowledge>> {
        let mut rows = self
            .conn
            .query(
                "SELECT knowledge_type, valid_from, is_immutable FROM knowledge WHERE knowledge_id = ?1",
                params![knowledge_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => {
                let kt: String = row.get(0).map_err(db_err)?;
                let valid_from: String = row.get(1).map_err(db_err)?;
                let immutable: i64 = row.get(2).map_err(db_err)?;
                Ok(Some(ExistingKnowledge {
                    knowledge_type: kt.parse()?,
                    valid_from: parse_date(&valid_from)?,
                    is_immutable: immutable != 0,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Fetch a knowledge row by id.
    pub async fn get_knowledge(&self, knowledge_id: &str) -> Result<Option<KnowledgeRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {KNOWLEDGE_COLUMNS} FROM knowledge WHERE knowledge_id = ?1"),
                params![knowledge_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_knowledge(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Total number of knowledge rows.
    pub async fn count_knowledge(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM knowledge", params![])
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(db_err)? as u64),
            None => Ok(0),
        }
    }

    /// Knowledge first created in `[start, end)`, ordered by creation time.
    pub async fn knowledge_created_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<KnowledgeRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {KNOWLEDGE_COLUMNS} FROM knowledge
                     WHERE created_at >= ?1 AND created_at < ?2
                     ORDER BY created_at, knowledge_id"
                ),
                params![fmt_ts(&start), fmt_ts(&end)],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_knowledge(&row)?);
        }
        Ok(results)
    }

    /// Similarity + priority search over active rows with embeddings.
    ///
    /// Results are ordered by combined score descending and capped at
    /// `config.match_count`.
    pub async fn match_knowledge(
        &self,
        query_embedding: &[f32],
        filter_category: Option<&str>,
        config: &RetrievalConfig,
        today: NaiveDate,
    ) -> Result<Vec<SearchResult>> {
        let mut rows = self
            .conn
            .query(
                "SELECT knowledge_id, knowledge_type, category, title, content, valid_from, embedding_json
                 FROM knowledge
                 WHERE is_active = 1 AND embedding_json IS NOT NULL
                   AND (?1 IS NULL OR category = ?1)",
                params![filter_category],
            )
            .await
            .map_err(db_err)?;

        let mut candidates = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let kt: String = row.get(1).map_err(db_err)?;
            let valid_from: String = row.get(5).map_err(db_err)?;
            let embedding_json: String = row.get(6).map_err(db_err)?;
            let embedding: Vec<f32> = serde_json::from_str(&embedding_json)
                .map_err(|e| MarketloreError::Storage(format!("invalid embedding: {e}")))?;
            candidates.push(search::Candidate {
                knowledge_id: row.get(0).map_err(db_err)?,
                knowledge_type: kt.parse()?,
                category: row.get(2).map_err(db_err)?,
                title: row.get(3).map_err(db_err)?,
                content: row.get(4).map_err(db_err)?,
                valid_from: parse_date(&valid_from)?,
                embedding,
            });
        }

        let scanned = candidates.len();
        let results = search::rank(query_embedding, candidates, config, today);
        tracing::debug!(scanned, matched = results.len(), "knowledge search");
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Monthly reports
    // -----------------------------------------------------------------------

    /// Upsert a monthly digest keyed by `YYYY-MM`.
    pub async fn save_monthly_report(
        &self,
        year_month: &str,
        total_knowledge: usize,
        report_json: &str,
        generated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO monthly_reports (year_month, total_knowledge, report_json, generated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(year_month) DO UPDATE SET
                   total_knowledge = excluded.total_knowledge,
                   report_json = excluded.report_json,
                   generated_at = excluded.generated_at",
                params![
                    year_month,
                    total_knowledge as i64,
                    report_json,
                    fmt_ts(&generated_at)
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Stored report JSON for a month.
    pub async fn get_monthly_report(&self, year_month: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT report_json FROM monthly_reports WHERE year_month = ?1",
                params![year_month],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row.get::<String>(0).map_err(db_err)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }
}

const KNOWLEDGE_COLUMNS: &str = "knowledge_id, knowledge_type, category, title, content, embedding_json, \
     source_urls_json, valid_from, is_active, metadata_json, payload_json";

fn db_err(e: libsql::Error) -> MarketloreError {
    MarketloreError::Storage(e.to_string())
}

/// Timestamps are stored as second-precision RFC 3339 in UTC so that
/// lexicographic order matches chronological order.
fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MarketloreError::Storage(format!("invalid date: {e}")))
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| MarketloreError::Storage(format!("invalid date '{s}': {e}")))
}

fn row_to_source(row: &libsql::Row) -> Result<KnowledgeSource> {
    let source_type: String = row.get(1).map_err(db_err)?;
    Ok(KnowledgeSource {
        source_id: row.get::<String>(0).map_err(db_err)?,
        source_type: source_type.parse::<SourceType>()?,
        feed_url: row.get::<String>(2).ok(),
        account_handle: row.get::<String>(3).ok(),
        default_category: row.get::<String>(4).map_err(db_err)?,
        enabled: row.get::<i64>(5).map_err(db_err)? != 0,
        last_crawled_at: row
            .get::<String>(6)
            .ok()
            .map(|s| parse_ts(&s))
            .transpose()?,
    })
}

fn row_to_crawl_log(row: &libsql::Row) -> Result<CrawlLog> {
    let crawl_type: String = row.get(3).map_err(db_err)?;
    let status: String = row.get(4).map_err(db_err)?;
    let started_at: String = row.get(7).map_err(db_err)?;
    Ok(CrawlLog {
        id: row.get::<String>(0).map_err(db_err)?,
        batch_id: row.get::<String>(1).map_err(db_err)?,
        source_id: row.get::<String>(2).map_err(db_err)?,
        crawl_type: crawl_type.parse()?,
        status: status.parse()?,
        articles_fetched: row.get::<i64>(5).map_err(db_err)? as usize,
        error_message: row.get::<String>(6).ok(),
        started_at: parse_ts(&started_at)?,
        completed_at: row
            .get::<String>(8)
            .ok()
            .map(|s| parse_ts(&s))
            .transpose()?,
    })
}

fn row_to_knowledge(row: &libsql::Row) -> Result<KnowledgeRecord> {
    let kt: String = row.get(1).map_err(db_err)?;
    let source_urls_json: String = row.get(6).map_err(db_err)?;
    let valid_from: String = row.get(7).map_err(db_err)?;
    let metadata_json: String = row.get(9).map_err(db_err)?;
    let to_storage = |e: serde_json::Error| MarketloreError::Storage(e.to_string());
    Ok(KnowledgeRecord {
        knowledge_id: row.get::<String>(0).map_err(db_err)?,
        knowledge_type: kt.parse()?,
        category: row.get::<String>(2).map_err(db_err)?,
        title: row.get::<String>(3).map_err(db_err)?,
        content: row.get::<String>(4).map_err(db_err)?,
        embedding: row
            .get::<String>(5)
            .ok()
            .map(|s| serde_json::from_str::<Vec<f32>>(&s))
            .transpose()
            .map_err(to_storage)?,
        source_urls: serde_json::from_str(&source_urls_json).map_err(to_storage)?,
        valid_from: parse_date(&valid_from)?,
        is_active: row.get::<i64>(8).map_err(db_err)? != 0,
        metadata: serde_json::from_str(&metadata_json).map_err(to_storage)?,
        payload: row
            .get::<String>(10)
            .ok()
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(to_storage)?,
    })
}
