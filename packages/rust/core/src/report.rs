//! Monthly digest of newly added knowledge, grouped by category.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use marketlore_shared::{KnowledgeRecord, MarketloreError, Result};
use marketlore_storage::Storage;

const MAX_TITLES: usize = 5;

/// How notable a category's activity was in the month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    High,
    Medium,
    Low,
}

impl Importance {
    /// `high` at 5 or more records, `medium` at 2 or more.
    pub fn from_count(count: usize) -> Self {
        match count {
            n if n >= 5 => Self::High,
            n if n >= 2 => Self::Medium,
            _ => Self::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Highlight {
    pub category: String,
    pub count: usize,
    pub importance: Importance,
    pub titles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyReport {
    pub year_month: String,
    pub total_knowledge: usize,
    pub highlights: Vec<Highlight>,
    pub generated_at: DateTime<Utc>,
}

/// `[first instant of the month, first instant of the next month)` for `YYYY-MM`.
pub fn month_bounds(year_month: &str) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let invalid = || MarketloreError::validation(format!("invalid month '{year_month}', expected YYYY-MM"));

    let (year, month) = year_month.split_once('-').ok_or_else(invalid)?;
    if year.len() != 4 || month.len() != 2 {
        return Err(invalid());
    }
    let year: i32 = year.parse().map_err(|_| invalid())?;
    let month: u32 = month.parse().map_err(|_| invalid())?;

    let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    let end = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(invalid)?;

    let midnight = |d: NaiveDate| d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc()).ok_or_else(invalid);
    Ok((midnight(start)?, midnight(end)?))
}

/// Group records by category; highlights ordered by count, then category.
pub fn build_report(
    year_month: &str,
    records: &[KnowledgeRecord],
    generated_at: DateTime<Utc>,
) -> MonthlyReport {
    let mut by_category: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for record in records {
        by_category
            .entry(record.category.as_str())
            .or_default()
            .push(record.title.as_str());
    }

    let mut highlights: Vec<Highlight> = by_category
        .into_iter()
        .map(|(category, titles)| Highlight {
            category: category.to_string(),
            count: titles.len(),
            importance: Importance::from_count(titles.len()),
            titles: titles
                .into_iter()
                .take(MAX_TITLES)
                .map(str::to_string)
                .collect(),
        })
        .collect();
    highlights.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.category.cmp(&b.category)));

    MonthlyReport {
        year_month: year_month.to_string(),
        total_knowledge: records.len(),
        highlights,
        generated_at,
    }
}

/// Build and persist the digest for `year_month` from knowledge first added that month.
#[instrument(skip(storage))]
pub async fn generate_monthly_report(storage: &Storage, year_month: &str) -> Result<MonthlyReport> {
    let (start, end) = month_bounds(year_month)?;
    let records = storage.knowledge_created_between(start, end).await?;
    let report = build_report(year_month, &records, Utc::now());

    let json = serde_json::to_string(&report)
        .map_err(|e| MarketloreError::Storage(format!("failed to serialize report: {e}")))?;
    storage
        .save_monthly_report(year_month, report.total_knowledge, &json, report.generated_at)
        .await?;

    info!(
        total = report.total_knowledge,
        categories = report.highlights.len(),
        "monthly report generated"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use marketlore_shared::{KnowledgeType, year_month};

    fn record(id: &str, category: &str) -> KnowledgeRecord {
        KnowledgeRecord {
            knowledge_id: id.into(),
            knowledge_type: KnowledgeType::Trend,
            category: category.into(),
            title: format!("title {id}"),
            content: String::new(),
            embedding: None,
            source_urls: Vec::new(),
            valid_from: NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
            is_active: true,
            metadata: serde_json::Value::Null,
            payload: None,
        }
    }

    #[test]
    fn importance_thresholds() {
        assert_eq!(Importance::from_count(1), Importance::Low);
        assert_eq!(Importance::from_count(2), Importance::Medium);
        assert_eq!(Importance::from_count(4), Importance::Medium);
        assert_eq!(Importance::from_count(5), Importance::High);
    }

    #[test]
    fn bounds_roll_over_year() {
        let (start, end) = month_bounds("2024-12").unwrap();
        assert_eq!(start.to_rfc3339(), "2024-12-01T00:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn invalid_month_is_validation_error() {
        for bad in ["2025-13", "2025-1", "202501", "abcd-ef", ""] {
            let err = month_bounds(bad).unwrap_err();
            assert!(matches!(err, MarketloreError::Validation { .. }), "{bad}");
        }
    }

    #[test]
    fn highlights_sorted_and_capped() {
        let mut records: Vec<_> = (0..6).map(|i| record(&format!("ig{i}"), "instagram")).collect();
        records.push(record("seo1", "seo"));
        records.push(record("seo2", "seo"));
        records.push(record("br1", "branding"));
        records.push(record("ad1", "advertising"));

        let report = build_report("2025-02", &records, Utc::now());
        assert_eq!(report.total_knowledge, 10);

        let cats: Vec<_> = report.highlights.iter().map(|h| h.category.as_str()).collect();
        assert_eq!(cats, vec!["instagram", "seo", "advertising", "branding"]);
        assert_eq!(report.highlights[0].importance, Importance::High);
        assert_eq!(report.highlights[0].titles.len(), 5);
        assert_eq!(report.highlights[1].importance, Importance::Medium);
        assert_eq!(report.highlights[2].importance, Importance::Low);
    }

    #[tokio::test]
    async fn generate_persists_report() {
        let path = std::env::temp_dir().join(format!("ml_report_{}.db", uuid::Uuid::now_v7()));
        let storage = Storage::open(&path).await.unwrap();
        storage.upsert_knowledge(&record("a", "seo")).await.unwrap();
        storage.upsert_knowledge(&record("b", "seo")).await.unwrap();

        let now = Utc::now();
        let ym = year_month(&now);
        let report = generate_monthly_report(&storage, &ym).await.unwrap();
        assert_eq!(report.total_knowledge, 2);
        assert_eq!(report.highlights[0].importance, Importance::Medium);

        let stored = storage.get_monthly_report(&ym).await.unwrap().unwrap();
        let parsed: MonthlyReport = serde_json::from_str(&stored).unwrap();
        assert_eq!(parsed.total_knowledge, 2);

        // A month with nothing added still produces an empty digest.
        let empty_ym = format!("{}-01", now.year() - 10);
        let empty = generate_monthly_report(&storage, &empty_ym).await.unwrap();
        assert_eq!(empty.total_knowledge, 0);
        assert!(empty.highlights.is_empty());
    }
}
