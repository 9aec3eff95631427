//! Parsing and validating model output.

use serde::Deserialize;

use marketlore_shared::{ContextShift, Guideline, MarketloreError, Result};

/// The JSON object the model must return. Every field is required.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistilledPayload {
    pub title: String,
    pub concept: String,
    pub guidelines: Vec<Guideline>,
    pub tone_and_phrasing: Vec<String>,
    pub context: Vec<ContextShift>,
    pub suggested_category: String,
    pub suggested_keyword: String,
}

/// Slice from the first `{` to the last `}`.
pub fn extract_json(response: &str) -> Result<&str> {
    let start = response.find('{');
    let end = response.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if e > s => Ok(&response[s..=e]),
        _ => Err(MarketloreError::Distillation(
            "No JSON found in response".into(),
        )),
    }
}

/// Extract, deserialize and validate a model response.
pub fn parse_response(response: &str) -> Result<DistilledPayload> {
    let json = extract_json(response)?;
    let payload: DistilledPayload = serde_json::from_str(json)
        .map_err(|e| MarketloreError::Distillation(format!("invalid knowledge JSON: {e}")))?;
    validate(&payload)?;
    Ok(payload)
}

fn validate(payload: &DistilledPayload) -> Result<()> {
    if payload.title.trim().is_empty() {
        return Err(MarketloreError::Distillation("title is empty".into()));
    }
    if payload.concept.trim().is_empty() {
        return Err(MarketloreError::Distillation("concept is empty".into()));
    }
    if payload.guidelines.is_empty() {
        return Err(MarketloreError::Distillation("no guidelines".into()));
    }
    for (i, g) in payload.guidelines.iter().enumerate() {
        if g.condition.trim().is_empty() || g.then.trim().is_empty() || g.reason.trim().is_empty()
        {
            return Err(MarketloreError::Distillation(format!(
                "guideline {i} has an empty member"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "title": "Reels hooks",
        "concept": "The first seconds decide retention.",
        "guidelines": [{"if": "posting a Reel", "then": "hook in 3s", "reason": "watch time drives reach"}],
        "toneAndPhrasing": ["Speak directly to the viewer"],
        "context": [{"beforePeriod": "2022", "oldPractice": "long intros", "newPractice": "instant hook"}],
        "suggestedCategory": "instagram",
        "suggestedKeyword": "reels hooks"
    }"#;

    #[test]
    fn extracts_json_wrapped_in_prose() {
        let raw = format!("Sure! Here it is:\n```json\n{VALID}\n```\nHope this helps.");
        let payload = parse_response(&raw).unwrap();
        assert_eq!(payload.title, "Reels hooks");
        assert_eq!(payload.guidelines[0].then, "hook in 3s");
        assert_eq!(payload.context[0].old_practice, "long intros");
    }

    #[test]
    fn no_braces_is_error() {
        let err = parse_response("I cannot help with that.").unwrap_err();
        assert!(err.to_string().contains("No JSON found in response"));
        assert!(extract_json("} backwards {").is_err());
    }

    #[test]
    fn missing_field_is_error() {
        let raw = VALID.replace(r#""suggestedKeyword": "reels hooks""#, r#""other": 1"#);
        assert!(matches!(
            parse_response(&raw),
            Err(MarketloreError::Distillation(_))
        ));
    }

    #[test]
    fn blank_guideline_member_is_error() {
        let raw = VALID.replace(r#""reason": "watch time drives reach""#, r#""reason": "  ""#);
        let err = parse_response(&raw).unwrap_err();
        assert!(err.to_string().contains("guideline 0"));
    }

    #[test]
    fn empty_guidelines_is_error() {
        let raw = r#"{"title":"t","concept":"c","guidelines":[],"toneAndPhrasing":[],"context":[],"suggestedCategory":"seo","suggestedKeyword":"k"}"#;
        assert!(parse_response(raw).is_err());
    }
}
