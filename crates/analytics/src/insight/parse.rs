//! Completion-response parsing
//!
//! Models are told to answer with a bare JSON object but routinely wrap it
//! in Markdown fences or chat filler. The contract: strip fences, trim,
//! parse; failing that, extract the first `{...}` block and parse that;
//! failing both, the caller builds a fallback report from the raw text.

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use thiserror::Error;

/// The completion reply was not usable JSON, even after extraction.
#[derive(Debug, Clone, Error)]
#[error("completion response is not valid JSON: {reason}")]
pub struct FormatError {
    pub reason: String,
}

/// The JSON object the model is asked to return.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelReport {
    /// Some models answer with an `analysis` field instead.
    #[serde(alias = "analysis")]
    pub summary: String,

    #[serde(default)]
    pub recommendations: Vec<String>,

    #[serde(default)]
    pub risk: Option<String>,
}

/// Remove leading/trailing Markdown code-fence markers and surrounding
/// whitespace.
pub fn strip_code_fences(text: &str) -> &str {
    let mut s = text.trim();

    if let Some(prefix) = s.get(..7) {
        if prefix.eq_ignore_ascii_case("```json") {
            s = &s[7..];
        }
    }
    if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    s = s.trim_start();

    if let Some(rest) = s.trim_end().strip_suffix("```") {
        s = rest;
    }

    s.trim()
}

/// First `{...}` block in the text, fences and all.
pub fn extract_json_object(text: &str) -> Option<&str> {
    static OBJECT_RE: OnceLock<Regex> = OnceLock::new();
    let re = OBJECT_RE.get_or_init(|| Regex::new(r"\{[\s\S]*\}").expect("valid regex"));
    re.find(text).map(|m| m.as_str())
}

/// Parse a raw completion reply into a [`ModelReport`].
pub fn parse_report(raw: &str) -> Result<ModelReport, FormatError> {
    let cleaned = strip_code_fences(raw);

    match serde_json::from_str::<ModelReport>(cleaned) {
        Ok(report) => Ok(report),
        Err(direct_err) => {
            if let Some(candidate) = extract_json_object(raw) {
                if let Ok(report) = serde_json::from_str::<ModelReport>(candidate) {
                    return Ok(report);
                }
            }
            Err(FormatError {
                reason: direct_err.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_json_parses() {
        let report = parse_report(
            r#"{"summary": "all quiet", "recommendations": ["keep watching"], "risk": "low"}"#,
        )
        .unwrap();
        assert_eq!(report.summary, "all quiet");
        assert_eq!(report.recommendations, vec!["keep watching"]);
        assert_eq!(report.risk.as_deref(), Some("low"));
    }

    #[test]
    fn test_fenced_json_parses() {
        let raw = "```json\n{\"summary\": \"fine\", \"recommendations\": []}\n```";
        let report = parse_report(raw).unwrap();
        assert_eq!(report.summary, "fine");
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn test_bare_fence_parses() {
        let raw = "```\n{\"summary\": \"fine\"}\n```";
        let report = parse_report(raw).unwrap();
        assert_eq!(report.summary, "fine");
        assert!(report.risk.is_none());
    }

    #[test]
    fn test_embedded_object_extracted() {
        let raw = "Sure, here is the report you asked for:\n{\"summary\": \"embedded\", \"recommendations\": [\"a\"]}\nLet me know if you need more.";
        // Direct parse fails on the chat filler; extraction finds the object.
        let report = parse_report(raw).unwrap();
        assert_eq!(report.summary, "embedded");
    }

    #[test]
    fn test_analysis_alias_accepted() {
        let report =
            parse_report(r#"{"analysis": "older field name", "recommendations": []}"#).unwrap();
        assert_eq!(report.summary, "older field name");
    }

    #[test]
    fn test_unusable_text_is_format_error() {
        assert!(parse_report("I could not produce a report today.").is_err());
        assert!(parse_report("").is_err());
        // A brace pair that is not valid JSON still fails.
        assert!(parse_report("{not json}").is_err());
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("```JSON\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("  {}  "), "{}");
        assert_eq!(strip_code_fences("{}"), "{}");
    }

    #[test]
    fn test_extract_json_object_spans_first_to_last_brace() {
        let text = "a {\"x\": {\"y\": 1}} b";
        assert_eq!(extract_json_object(text), Some("{\"x\": {\"y\": 1}}"));
        assert_eq!(extract_json_object("no braces"), None);
    }
}
