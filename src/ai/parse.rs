//! Strict parsing of a summarizer's text answer.
//!
//! Accepted: exactly one JSON object with string `title` and `summary`, optionally
//! wrapped in a Markdown code fence. Rejected as malformed: arrays, scalars, trailing
//! content after the object, duplicated keys, missing or blank fields.

use serde::Deserialize;

use crate::ai::{SummarizeError, Summary};

#[derive(Debug, Deserialize)]
struct Wire {
    title: String,
    summary: String,
}

pub fn parse_summary(vendor: &'static str, raw: &str) -> Result<Summary, SummarizeError> {
    let malformed = |detail: String| SummarizeError::Malformed { vendor, detail };

    let body = strip_code_fence(raw.trim());
    if !body.starts_with('{') {
        return Err(malformed("expected a single JSON object".to_string()));
    }

    // Derived struct deserialization rejects duplicate fields and trailing values.
    let wire: Wire = serde_json::from_str(body).map_err(|e| malformed(e.to_string()))?;

    let title = wire.title.trim();
    let summary = wire.summary.trim();
    if title.is_empty() || summary.is_empty() {
        return Err(malformed("blank title or summary".to_string()));
    }

    Ok(Summary {
        title: title.to_string(),
        summary: summary.to_string(),
    })
}

fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // drop an info string such as `json`
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_malformed(r: Result<Summary, SummarizeError>) -> bool {
        matches!(r, Err(SummarizeError::Malformed { .. }))
    }

    #[test]
    fn accepts_one_object() {
        let s = parse_summary("openai", r#" {"title":" 보조금 확대 ","summary":"정부가 발표했다."} "#).unwrap();
        assert_eq!(s.title, "보조금 확대");
        assert_eq!(s.summary, "정부가 발표했다.");
    }

    #[test]
    fn accepts_fenced_object() {
        let raw = "```json\n{\"title\":\"T\",\"summary\":\"S\"}\n```";
        assert_eq!(parse_summary("claude", raw).unwrap().title, "T");
    }

    #[test]
    fn rejects_duplicate_summary_key() {
        let raw = r#"{"title":"T","summary":"first","summary":"second"}"#;
        assert!(is_malformed(parse_summary("openai", raw)));
    }

    #[test]
    fn rejects_arrays_and_trailing_objects() {
        assert!(is_malformed(parse_summary("openai", r#"[{"title":"T","summary":"S"}]"#)));
        assert!(is_malformed(parse_summary("openai", r#"["T","S"]"#)));
        assert!(is_malformed(parse_summary(
            "openai",
            r#"{"title":"T","summary":"S"}{"title":"U","summary":"V"}"#
        )));
    }

    #[test]
    fn rejects_missing_or_blank_fields() {
        assert!(is_malformed(parse_summary("openai", r#"{"title":"T"}"#)));
        assert!(is_malformed(parse_summary("openai", r#"{"title":" ","summary":"S"}"#)));
        assert!(is_malformed(parse_summary("openai", "not json")));
    }
}
