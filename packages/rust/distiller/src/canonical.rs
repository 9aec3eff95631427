//! Canonical text rendering of a knowledge record.
//!
//! The same text is shown to users and fed to the embedding provider, so the
//! section order is fixed.

use std::fmt::Write;

use marketlore_shared::UniversalKnowledge;

/// Render `knowledge` as Markdown: header, Concept, Guidelines, Tone & Phrasing, Context.
pub fn render_canonical_text(knowledge: &UniversalKnowledge) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}", knowledge.title);
    let _ = writeln!(
        out,
        "ID: {} | Type: {} | Category: {} | Valid from: {}",
        knowledge.knowledge_id,
        knowledge.knowledge_type.as_str(),
        knowledge.category,
        knowledge.valid_from.format("%Y-%m-%d")
    );

    let _ = write!(out, "\n## Concept\n{}\n", knowledge.concept.trim());

    out.push_str("\n## Guidelines\n");
    for g in &knowledge.guidelines {
        let _ = writeln!(
            out,
            "- IF {} THEN {} (because {})",
            g.condition.trim(),
            g.then.trim(),
            g.reason.trim()
        );
    }

    if !knowledge.tone_and_phrasing.is_empty() {
        out.push_str("\n## Tone & Phrasing\n");
        for t in &knowledge.tone_and_phrasing {
            let _ = writeln!(out, "- {}", t.trim());
        }
    }

    if !knowledge.context.is_empty() {
        out.push_str("\n## Context\n");
        for c in &knowledge.context {
            let _ = writeln!(
                out,
                "- Before {}: {} -> Now: {}",
                c.before_period.trim(),
                c.old_practice.trim(),
                c.new_practice.trim()
            );
        }
    }

    out.trim_end().to_string()
}
