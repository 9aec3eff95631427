//! The fixed extraction prompt.

use marketlore_shared::CrawledArticle;
use marketlore_shared::text::truncate_chars;

/// System prompt fixing the output contract: one JSON object, if/then/reason guidelines.
pub const SYSTEM_PROMPT: &str = r#"You are a senior marketing strategist who turns articles into reusable, actionable knowledge.

Read the article and respond with exactly ONE JSON object and nothing else. Use this shape:

{
  "title": "short, specific title for the insight",
  "concept": "2-3 sentences explaining the core idea",
  "guidelines": [
    { "if": "situation the marketer is in", "then": "concrete action to take", "reason": "why it works" }
  ],
  "toneAndPhrasing": ["example phrasing or tone advice"],
  "context": [
    { "beforePeriod": "when the old practice applied", "oldPractice": "what used to work", "newPractice": "what works now" }
  ],
  "suggestedCategory": "one of: instagram, seo, tiktok, x, sns_general, content_marketing, branding, advertising",
  "suggestedKeyword": "one or two english words summarising the topic"
}

Rules:
- Every guideline must have non-empty "if", "then" and "reason".
- Include at least one guideline. Prefer 3 to 5.
- "toneAndPhrasing" and "context" may be empty arrays when the article gives nothing.
- Do not invent statistics that are not in the article.
- Write in the language of the article."#;

/// User message carrying the article fields, body truncated to `max_content_chars`.
pub fn build_user_prompt(article: &CrawledArticle, max_content_chars: usize) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!("Title: {}\n", article.title));
    prompt.push_str(&format!("URL: {}\n", article.url));
    prompt.push_str(&format!(
        "Published: {}\n",
        article.published_at.format("%Y-%m-%d")
    ));
    if let Some(author) = &article.author {
        prompt.push_str(&format!("Author: {author}\n"));
    }
    prompt.push_str(&format!("Source category: {}\n\n", article.category));
    prompt.push_str("Article:\n");
    prompt.push_str(truncate_chars(&article.content, max_content_chars));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn user_prompt_truncates_body() {
        let article = CrawledArticle {
            url: "https://later.com/blog/instagram-algorithm/".into(),
            title: "How the Instagram Algorithm Works".into(),
            content: "a".repeat(7000),
            published_at: Utc.with_ymd_and_hms(2025, 1, 10, 8, 0, 0).unwrap(),
            author: None,
            source_id: "later_blog".into(),
            category: "instagram".into(),
            metadata: serde_json::Value::Null,
        };
        let prompt = build_user_prompt(&article, 6000);
        assert!(prompt.contains("Published: 2025-01-10"));
        assert!(!prompt.contains("Author:"));
        let body = prompt.split("Article:\n").nth(1).unwrap();
        assert_eq!(body.len(), 6000);
    }
}
