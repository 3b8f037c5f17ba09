//! Extraction and structural validation of the provider's reply.
//!
//! The model is asked for a bare JSON object but frequently wraps it in a
//! fenced code block.  [`extract_json`] handles both forms and
//! [`AnalysisResult::from_value`] is the only way to obtain a result, so an
//! unvalidated object can never reach the HTTP layer.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

/// Top-level fields every reply must carry, in validation order.
pub const REQUIRED_FIELDS: [&str; 7] = [
    "totalScore",
    "categoryScores",
    "deductions",
    "fixes",
    "styleTags",
    "paletteHex",
    "oneLineReview",
];

/// Keys of `categoryScores`, in validation order.
pub const CATEGORY_KEYS: [&str; 6] = [
    "fit_silhouette",
    "color_harmony",
    "composition_layering",
    "tpo_appropriateness",
    "details_points",
    "overall_cohesion",
];

pub const FIX_COUNT: usize = 3;

static TAGGED_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```json[ \t]*\r?\n(.*?)\r?\n[ \t]*```").unwrap());
static PLAIN_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[ \t]*\r?\n(.*?)\r?\n[ \t]*```").unwrap());
static HEX_COLOUR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").unwrap());

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ResponseError {
    #[error("AI response could not be parsed as JSON")]
    Unparsable,
    #[error("AI response is not a JSON object")]
    NotAnObject,
    #[error("missing field {0}")]
    MissingField(&'static str),
    #[error("categoryScores missing {0}")]
    MissingCategory(&'static str),
    #[error("fixes must be an array")]
    FixesNotArray,
    #[error("wrong fix count: expected exactly {expected}, got {found}", expected = FIX_COUNT)]
    WrongFixCount { found: usize },
}

/// Locate and parse the JSON payload of a raw reply.  A `json`-tagged fence
/// wins over an untagged one; without any fence the whole reply is parsed.
pub fn extract_json(raw: &str) -> Result<Value, ResponseError> {
    let candidate = TAGGED_FENCE
        .captures(raw)
        .or_else(|| PLAIN_FENCE.captures(raw))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw);
    serde_json::from_str(candidate.trim()).map_err(|_| ResponseError::Unparsable)
}

/// Check the structural invariant.  Stops at the first violation.
pub fn validate(value: &Value) -> Result<(), ResponseError> {
    let obj = value.as_object().ok_or(ResponseError::NotAnObject)?;
    for field in REQUIRED_FIELDS {
        if !obj.contains_key(field) {
            return Err(ResponseError::MissingField(field));
        }
    }

    let categories = obj["categoryScores"].as_object();
    for key in CATEGORY_KEYS {
        if !categories.is_some_and(|c| c.contains_key(key)) {
            return Err(ResponseError::MissingCategory(key));
        }
    }

    let fixes = obj["fixes"]
        .as_array()
        .ok_or(ResponseError::FixesNotArray)?;
    if fixes.len() != FIX_COUNT {
        return Err(ResponseError::WrongFixCount { found: fixes.len() });
    }
    Ok(())
}

/// A structurally valid critique.  Serializes to exactly the object the
/// provider produced; values are never clamped or normalised.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AnalysisResult(Map<String, Value>);

impl AnalysisResult {
    pub fn from_value(value: Value) -> Result<Self, ResponseError> {
        validate(&value)?;
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(ResponseError::NotAnObject),
        }
    }

    /// Extract and validate in one step.
    pub fn parse(raw: &str) -> Result<Self, ResponseError> {
        Self::from_value(extract_json(raw)?)
    }

    pub fn total_score(&self) -> Option<i64> {
        self.0.get("totalScore").and_then(Value::as_i64)
    }

    pub fn category_score(&self, key: &str) -> Option<i64> {
        self.0
            .get("categoryScores")
            .and_then(|c| c.get(key))
            .and_then(Value::as_i64)
    }

    pub fn fixes(&self) -> Vec<&str> {
        self.string_list("fixes")
    }

    pub fn style_tags(&self) -> Vec<&str> {
        self.string_list("styleTags")
    }

    pub fn palette_hex(&self) -> Vec<&str> {
        self.string_list("paletteHex")
    }

    pub fn one_line_review(&self) -> Option<&str> {
        self.0.get("oneLineReview").and_then(Value::as_str)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Departures from the rubric that validation deliberately lets through.
    /// Used for logging only.
    pub fn anomalies(&self) -> Vec<String> {
        let mut notes = Vec::new();
        match self.0.get("totalScore").and_then(Value::as_i64) {
            Some(score) if (0..=100).contains(&score) => {}
            Some(score) => notes.push(format!("totalScore {} outside 0-100", score)),
            None => notes.push("totalScore is not an integer".to_string()),
        }
        for key in CATEGORY_KEYS {
            match self.category_score(key) {
                Some(score) if (0..=20).contains(&score) => {}
                Some(score) => notes.push(format!("{} score {} outside 0-20", key, score)),
                None => notes.push(format!("{} score is not an integer", key)),
            }
        }
        let deductions = self.array_len("deductions");
        if deductions.map_or(true, |n| n > 5) {
            notes.push(format!("deductions count {:?} not within 0-5", deductions));
        }
        for field in ["styleTags", "paletteHex"] {
            let len = self.array_len(field);
            if !len.is_some_and(|n| (3..=6).contains(&n)) {
                notes.push(format!("{} count {:?} outside 3-6", field, len));
            }
        }
        if let Some(colours) = self.0.get("paletteHex").and_then(Value::as_array) {
            for colour in colours {
                if !colour.as_str().is_some_and(|c| HEX_COLOUR.is_match(c)) {
                    notes.push(format!("malformed palette entry {}", colour));
                }
            }
        }
        notes
    }

    fn array_len(&self, field: &str) -> Option<usize> {
        self.0.get(field).and_then(Value::as_array).map(Vec::len)
    }

    fn string_list(&self, field: &str) -> Vec<&str> {
        self.0
            .get(field)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "totalScore": 72,
            "categoryScores": {
                "fit_silhouette": 14,
                "color_harmony": 12,
                "composition_layering": 11,
                "tpo_appropriateness": 13,
                "details_points": 10,
                "overall_cohesion": 12
            },
            "deductions": ["Hem length breaks the leg line"],
            "fixes": ["Crop the jacket", "Swap to loafers", "Drop the second chain"],
            "styleTags": ["minimal", "city", "clean"],
            "paletteHex": ["#111111", "#F2F2F2", "#8A8A8A"],
            "oneLineReview": "Tidy, but proportions let it down."
        })
    }

    #[test]
    fn bare_reply_is_returned_unchanged() {
        let raw = sample().to_string();
        let result = AnalysisResult::parse(&raw).unwrap();
        assert_eq!(result.into_value(), sample());
    }

    #[test]
    fn json_fenced_reply_is_extracted() {
        let raw = format!(
            "Here you go:\n```json\n{}\n```\nThanks",
            serde_json::to_string_pretty(&sample()).unwrap()
        );
        assert_eq!(AnalysisResult::parse(&raw).unwrap().into_value(), sample());
    }

    #[test]
    fn untagged_fence_is_extracted() {
        let raw = format!("```\n{}\n```", sample());
        assert_eq!(extract_json(&raw).unwrap(), sample());
    }

    #[test]
    fn tagged_fence_wins_over_untagged() {
        let raw = format!("```\nnot json\n```\n```json\n{}\n```", sample());
        assert_eq!(extract_json(&raw).unwrap(), sample());
    }

    #[test]
    fn crlf_fence_and_surrounding_whitespace_are_tolerated() {
        let raw = format!("  ```JSON\r\n{}\r\n```  ", sample());
        assert_eq!(extract_json(&raw).unwrap(), sample());
        let padded = format!("\n\n{}\n", sample());
        assert_eq!(extract_json(&padded).unwrap(), sample());
    }

    #[test]
    fn broken_fence_content_is_unparsable() {
        let raw = "```json\n{\"totalScore\": 70,\n```";
        assert_eq!(extract_json(raw), Err(ResponseError::Unparsable));
        assert_eq!(
            extract_json("I cannot rate this photo."),
            Err(ResponseError::Unparsable)
        );
    }

    #[test]
    fn wrong_fix_counts_are_rejected() {
        for fixes in [json!(["a", "b"]), json!(["a", "b", "c", "d"])] {
            let mut value = sample();
            let expected = fixes.as_array().unwrap().len();
            value["fixes"] = fixes;
            assert_eq!(
                AnalysisResult::from_value(value),
                Err(ResponseError::WrongFixCount { found: expected })
            );
        }
        let mut value = sample();
        value["fixes"] = json!("one, two, three");
        assert_eq!(validate(&value), Err(ResponseError::FixesNotArray));
    }

    #[test]
    fn missing_category_is_reported() {
        let mut value = sample();
        value["categoryScores"]
            .as_object_mut()
            .unwrap()
            .remove("color_harmony");
        let err = AnalysisResult::from_value(value).unwrap_err();
        assert_eq!(err, ResponseError::MissingCategory("color_harmony"));
        assert_eq!(err.to_string(), "categoryScores missing color_harmony");
    }

    #[test]
    fn first_missing_field_is_reported() {
        let mut value = sample();
        let obj = value.as_object_mut().unwrap();
        obj.remove("styleTags");
        obj.remove("oneLineReview");
        assert_eq!(
            validate(&value).unwrap_err().to_string(),
            "missing field styleTags"
        );
        assert_eq!(validate(&json!([1, 2, 3])), Err(ResponseError::NotAnObject));
    }

    #[test]
    fn category_scores_of_wrong_type_count_as_missing() {
        let mut value = sample();
        value["categoryScores"] = json!(80);
        assert_eq!(
            validate(&value),
            Err(ResponseError::MissingCategory("fit_silhouette"))
        );
    }

    #[test]
    fn anomalies_are_reported_but_not_enforced() {
        let mut value = sample();
        value["totalScore"] = json!(140);
        value["paletteHex"] = json!(["#111111", "blue"]);
        value["categoryScores"]["details_points"] = json!(25);
        let result = AnalysisResult::from_value(value.clone()).unwrap();
        let notes = result.anomalies();
        assert!(notes.iter().any(|n| n.contains("totalScore 140")));
        assert!(notes.iter().any(|n| n.contains("details_points score 25")));
        assert!(notes.iter().any(|n| n.contains("paletteHex count")));
        assert!(notes.iter().any(|n| n.contains("\"blue\"")));
        assert_eq!(result.into_value(), value);
        assert!(AnalysisResult::from_value(sample())
            .unwrap()
            .anomalies()
            .is_empty());
    }

    #[test]
    fn accessors_read_through() {
        let result = AnalysisResult::from_value(sample()).unwrap();
        assert_eq!(result.total_score(), Some(72));
        assert_eq!(result.category_score("color_harmony"), Some(12));
        assert_eq!(result.fixes().len(), 3);
        assert_eq!(result.style_tags(), vec!["minimal", "city", "clean"]);
        assert_eq!(result.palette_hex()[0], "#111111");
        assert!(result.one_line_review().unwrap().starts_with("Tidy"));
    }
}
