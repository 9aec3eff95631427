//! Deterministic knowledge ids: `{SOURCE-PREFIX}-{YYYY-MM}-{keyword}`.

use chrono::{DateTime, Utc};

use marketlore_shared::text::short_hash;
use marketlore_shared::year_month;

const SLUG_TOKENS: usize = 3;

/// Source id uppercased, non-alphanumerics mapped to `_`.
pub fn source_prefix(source_id: &str) -> String {
    source_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// ASCII slug of the first three whitespace tokens of `title`.
///
/// Empty when the title has no Latin alphanumerics in those tokens.
pub fn keyword_slug(title: &str) -> String {
    title
        .split_whitespace()
        .take(SLUG_TOKENS)
        .map(|token| {
            token
                .chars()
                .filter(char::is_ascii_alphanumeric)
                .map(|c| c.to_ascii_lowercase())
                .collect::<String>()
        })
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Id for an article-derived record. Titles without a Latin slug fall back to
/// `t{unix}-{hash6}` built from the publish time and title.
pub fn generate_knowledge_id(source_id: &str, published_at: &DateTime<Utc>, title: &str) -> String {
    let mut keyword = keyword_slug(title);
    if keyword.is_empty() {
        keyword = format!("t{}-{}", published_at.timestamp(), short_hash(title, 6));
    }
    format!(
        "{}-{}-{}",
        source_prefix(source_id),
        year_month(published_at),
        keyword
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn published() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 8, 0, 0).unwrap()
    }

    #[test]
    fn prefix_maps_separators() {
        assert_eq!(source_prefix("later_blog"), "LATER_BLOG");
        assert_eq!(source_prefix("search-engine.journal"), "SEARCH_ENGINE_JOURNAL");
    }

    #[test]
    fn latin_title_slug() {
        let id = generate_knowledge_id(
            "later_blog",
            &published(),
            "How the Instagram Algorithm Works in 2025",
        );
        assert_eq!(id, "LATER_BLOG-2025-01-how-the-instagram");
    }

    #[test]
    fn punctuation_is_dropped() {
        assert_eq!(keyword_slug("SEO: What's New?"), "seo-whats-new");
    }

    #[test]
    fn non_latin_title_falls_back_deterministically() {
        let a = generate_knowledge_id("creators_instagram", &published(), "リール活用法");
        let b = generate_knowledge_id("creators_instagram", &published(), "リール活用法");
        assert_eq!(a, b);
        assert!(a.starts_with("CREATORS_INSTAGRAM-2025-01-t1736496000-"));
        assert_eq!(a.rsplit('-').next().unwrap().len(), 6);

        let other = generate_knowledge_id("creators_instagram", &published(), "ストーリーズ入門");
        assert_ne!(a, other);
    }
}
