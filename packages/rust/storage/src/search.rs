//! Similarity and priority scoring for knowledge search.
//!
//! Embeddings are stored as JSON arrays, so scoring happens here in Rust
//! over the candidate rows rather than inside the database.

use chrono::NaiveDate;
use marketlore_shared::{KnowledgeType, RetrievalConfig, SearchResult};

/// Cosine similarity of two vectors. Mismatched lengths or zero norms score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Type/recency priority. Core is always 1.0; trends start at 0.8 and
/// decay linearly to 0.5 over `decay_days`.
pub fn priority_score(
    knowledge_type: KnowledgeType,
    valid_from: NaiveDate,
    today: NaiveDate,
    decay_days: u32,
) -> f32 {
    match knowledge_type {
        KnowledgeType::Core => 1.0,
        KnowledgeType::Trend => {
            let age_days = (today - valid_from).num_days().max(0) as f32;
            let freshness = (1.0 - age_days / decay_days.max(1) as f32).max(0.0);
            0.5 + 0.3 * freshness
        }
    }
}

/// Weighted blend used for ordering.
pub fn combined_score(result: &SearchResult, config: &RetrievalConfig) -> f32 {
    config.similarity_weight * result.similarity + config.priority_weight * result.priority_score
}

/// A stored row eligible for scoring.
pub(crate) struct Candidate {
    pub knowledge_id: String,
    pub knowledge_type: KnowledgeType,
    pub category: String,
    pub title: String,
    pub content: String,
    pub valid_from: NaiveDate,
    pub embedding: Vec<f32>,
}

/// Score, threshold, order by combined score descending, and cap.
pub(crate) fn rank(
    query: &[f32],
    candidates: Vec<Candidate>,
    config: &RetrievalConfig,
    today: NaiveDate,
) -> Vec<SearchResult> {
    let mut scored: Vec<(f32, SearchResult)> = candidates
        .into_iter()
        .filter_map(|c| {
            let similarity = cosine_similarity(query, &c.embedding);
            if similarity < config.min_similarity {
                return None;
            }
            let result = SearchResult {
                priority_score: priority_score(
                    c.knowledge_type,
                    c.valid_from,
                    today,
                    config.trend_decay_days,
                ),
                knowledge_id: c.knowledge_id,
                knowledge_type: c.knowledge_type,
                category: c.category,
                title: c.title,
                content: c.content,
                valid_from: c.valid_from,
                similarity,
            };
            Some((combined_score(&result, config), result))
        })
        .collect();

    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.knowledge_id.cmp(&b.1.knowledge_id))
    });
    scored
        .into_iter()
        .take(config.match_count)
        .map(|(_, r)| r)
        .collect()
}
