//! Data types produced by the judge stages.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a trajectory is in its evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStage {
    Pending,
    ExtractingKeyPoints,
    ScoringImages,
    SynthesizingVerdict,
    Persisted,
}

impl EvaluationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationStage::Pending => "pending",
            EvaluationStage::ExtractingKeyPoints => "extracting_key_points",
            EvaluationStage::ScoringImages => "scoring_images",
            EvaluationStage::SynthesizingVerdict => "synthesizing_verdict",
            EvaluationStage::Persisted => "persisted",
        }
    }
}

impl fmt::Display for EvaluationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best-effort value returned by a response parser that could not find the
/// structure it expected.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseDegradation<T> {
    /// Value to use in place of a properly parsed one.
    pub fallback: T,
    /// What was missing from the response.
    pub reason: String,
}

impl<T> ParseDegradation<T> {
    pub fn new(fallback: T, reason: impl Into<String>) -> Self {
        Self {
            fallback,
            reason: reason.into(),
        }
    }
}

/// Resolve a parser result to a value, logging the degradation if any.
pub(crate) fn recover<T>(result: Result<T, ParseDegradation<T>>, what: &str) -> T {
    match result {
        Ok(value) => value,
        Err(degraded) => {
            tracing::debug!(parser = what, reason = %degraded.reason, "Parse degraded to fallback");
            degraded.fallback
        }
    }
}

/// Ordered checklist of requirements extracted from a task instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyPointList(Vec<String>);

impl KeyPointList {
    pub fn new(points: Vec<String>) -> Self {
        Self(points)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// One key point per line, as embedded in prompts.
    pub fn render(&self) -> String {
        self.0.join("\n")
    }
}

impl From<Vec<String>> for KeyPointList {
    fn from(points: Vec<String>) -> Self {
        Self(points)
    }
}

/// Relevance judgement for one screenshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRecord {
    /// Raw model response.
    #[serde(alias = "Response")]
    pub response: String,
    /// 1..=5, or 0 when the response could not be parsed.
    #[serde(alias = "Score")]
    pub score: u8,
    /// Text between the reasoning and score markers, on one line.
    #[serde(default)]
    pub reasoning: String,
}

/// Final verdict on a trajectory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Raw model response.
    pub details: String,
    /// 1 success, 0 failure, `None` when no status line could be read.
    pub predicted_label: Option<u8>,
}

/// The persisted result of judging one trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub episode_id: String,
    /// Raw verdict text.
    #[serde(default)]
    pub evaluation_details: String,
    #[serde(default)]
    pub predicted_label: Option<u8>,
    #[serde(default)]
    pub image_judge_record: Vec<ScoreRecord>,
    #[serde(default)]
    pub key_points: KeyPointList,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_threshold: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluated_at: Option<DateTime<Utc>>,
}

impl EvaluationResult {
    pub fn is_success(&self) -> bool {
        self.predicted_label == Some(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_display() {
        assert_eq!(EvaluationStage::ExtractingKeyPoints.to_string(), "extracting_key_points");
        assert_eq!(EvaluationStage::Persisted.to_string(), "persisted");
    }

    #[test]
    fn test_recover_returns_fallback() {
        let degraded: Result<u8, ParseDegradation<u8>> = Err(ParseDegradation::new(0, "no score"));
        assert_eq!(recover(degraded, "score"), 0);
        assert_eq!(recover(Ok(4), "score"), 4);
    }

    #[test]
    fn test_key_point_list_render() {
        let points = KeyPointList::from(vec!["1. Open maps".to_string(), "2. Walk".to_string()]);
        assert_eq!(points.render(), "1. Open maps\n2. Walk");
        assert_eq!(serde_json::to_string(&points).expect("serialize"), r#"["1. Open maps","2. Walk"]"#);
    }

    #[test]
    fn test_score_record_accepts_legacy_keys() {
        let record: ScoreRecord =
            serde_json::from_str(r####"{"Response": "### Score: 4", "Score": 4}"####).expect("parse");
        assert_eq!(record.score, 4);
        assert!(record.reasoning.is_empty());
    }

    #[test]
    fn test_result_without_optional_fields_loads() {
        let raw = r#"{"episode_id": "MAP-1-1", "evaluation_details": "Status: success",
                      "predicted_label": 1, "image_judge_record": [], "key_points": []}"#;
        let result: EvaluationResult = serde_json::from_str(raw).expect("parse");
        assert!(result.is_success());
        assert_eq!(result.evaluated_at, None);
        assert_eq!(result.score_threshold, None);
    }
}
