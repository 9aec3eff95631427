//! The fixed set of core (immutable) marketing principles.

use chrono::NaiveDate;
use serde_json::json;
use tracing::{info, instrument};

use marketlore_distiller::render_canonical_text;
use marketlore_providers::EmbeddingClient;
use marketlore_shared::{Guideline, KnowledgeRecord, KnowledgeType, Result, UniversalKnowledge};
use marketlore_storage::Storage;

fn core(
    id: &str,
    category: &str,
    title: &str,
    concept: &str,
    guidelines: &[(&str, &str, &str)],
    tone: &[&str],
) -> UniversalKnowledge {
    UniversalKnowledge {
        knowledge_id: format!("CORE-{id}"),
        knowledge_type: KnowledgeType::Core,
        category: category.to_string(),
        title: title.to_string(),
        valid_from: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
        concept: concept.to_string(),
        guidelines: guidelines
            .iter()
            .map(|(c, t, r)| Guideline {
                condition: c.to_string(),
                then: t.to_string(),
                reason: r.to_string(),
            })
            .collect(),
        tone_and_phrasing: tone.iter().map(|s| s.to_string()).collect(),
        context: Vec::new(),
        source_urls: Vec::new(),
        metadata: json!({ "origin": "seed" }),
    }
}

/// Principles that hold regardless of platform trends.
pub fn core_knowledge_set() -> Vec<UniversalKnowledge> {
    vec![
        core(
            "fanbase-strategy",
            "sns_general",
            "Grow a fanbase, not just reach",
            "Sustainable results come from a core of fans who trust the brand. Reach without \
             affinity fades; fans buy again, recommend, and defend the brand.",
            &[
                (
                    "planning any social post",
                    "write for your existing fans first",
                    "fans engage early, which carries the post to new audiences",
                ),
                (
                    "a follower comments or asks a question",
                    "reply personally and quickly",
                    "two-way conversation is what turns followers into fans",
                ),
                (
                    "choosing between a viral trend and a brand story",
                    "pick the one your fans would share",
                    "borrowed attention rarely converts into loyalty",
                ),
            ],
            &["Talk like a person, not a press release", "Use 'you' more than 'we'"],
        ),
        core(
            "brand-voice-consistency",
            "branding",
            "Keep one recognisable brand voice",
            "A consistent voice across channels makes a brand recognisable before the logo \
             is seen. Formats change with platforms; the voice should not.",
            &[
                (
                    "adapting content to a new platform",
                    "change the format but keep vocabulary and values",
                    "recognition compounds only when the voice is stable",
                ),
                (
                    "several people write for the brand",
                    "maintain a short written voice guide with do/don't examples",
                    "shared examples prevent drift better than abstract adjectives",
                ),
            ],
            &["Prefer concrete words over buzzwords"],
        ),
        core(
            "helpful-content-first",
            "seo",
            "Write for people first, search engines second",
            "Search engines reward pages that fully satisfy the searcher's intent. Content \
             written to match keywords without answering the question loses over time.",
            &[
                (
                    "choosing a topic",
                    "start from a real question your customers ask",
                    "intent match is the strongest long-term ranking signal",
                ),
                (
                    "an article is thin or duplicated",
                    "merge or expand it into one complete answer",
                    "one authoritative page outperforms several weak ones",
                ),
                (
                    "making claims",
                    "show first-hand experience and cite sources",
                    "demonstrated expertise builds trust with readers and ranking systems",
                ),
            ],
            &["Answer the question in the first paragraph"],
        ),
        core(
            "save-worthy-posts",
            "instagram",
            "Make posts worth saving",
            "Posts that people save or send to friends signal lasting value. Educational, \
             checklist and how-to formats earn saves more reliably than announcements.",
            &[
                (
                    "creating a carousel",
                    "deliver one practical takeaway per slide",
                    "scannable value invites saves for later",
                ),
                (
                    "ending a caption",
                    "invite the reader to save or share it",
                    "an explicit prompt measurably lifts saves",
                ),
            ],
            &["Lead with the benefit", "Keep captions skimmable with line breaks"],
        ),
        core(
            "creative-testing",
            "advertising",
            "Test creatives before scaling spend",
            "Creative quality drives most ad performance. Small, structured tests reveal what \
             works before budget is committed.",
            &[
                (
                    "launching a new campaign",
                    "run several creative variants with a modest budget",
                    "early signals prevent scaling a weak message",
                ),
                (
                    "a variant wins",
                    "change one element at a time in the next round",
                    "isolated changes show which element caused the lift",
                ),
            ],
            &[],
        ),
    ]
}

/// Upsert the core set with canonical text and embeddings.
///
/// Returns the number of rows written.
#[instrument(skip_all)]
pub async fn seed_core_knowledge(storage: &Storage, embeddings: &EmbeddingClient) -> Result<usize> {
    let mut written = 0;
    for knowledge in core_knowledge_set() {
        let content = render_canonical_text(&knowledge);
        let embedding = embeddings.embed(&content).await;
        let record = KnowledgeRecord::from_knowledge(&knowledge, content, embedding);
        if storage.upsert_knowledge(&record).await?.is_written() {
            written += 1;
        }
    }
    info!(written, "core knowledge seeded");
    Ok(written)
}
