//! Source registry synchronisation from configuration.

use tracing::{debug, info, instrument};

use marketlore_shared::{AppConfig, Result};
use marketlore_storage::Storage;

/// Counts from [`sync_sources`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub inserted: usize,
    pub updated: usize,
}

/// Insert or update every `[[sources]]` entry.
///
/// Existing rows keep their watermark and enabled flag; only locators and the
/// default category follow the config.
#[instrument(skip_all, fields(sources = config.sources.len()))]
pub async fn sync_sources(storage: &Storage, config: &AppConfig) -> Result<SyncSummary> {
    let mut summary = SyncSummary::default();
    for entry in &config.sources {
        entry.validate()?;
        let existed = storage.get_source(&entry.source_id).await?.is_some();
        storage.upsert_source(&entry.to_source()).await?;
        if existed {
            summary.updated += 1;
        } else {
            summary.inserted += 1;
        }
        debug!(source_id = %entry.source_id, existed, "source synced");
    }
    info!(
        inserted = summary.inserted,
        updated = summary.updated,
        "sources synced"
    );
    Ok(summary)
}
