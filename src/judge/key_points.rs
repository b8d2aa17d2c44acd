//! Key-point extraction.
//!
//! Turns a task instruction into the checklist the later stages judge
//! against. Parsing never fails: a response without the expected header is
//! used as best as it can be.

use std::sync::Arc;

use crate::config::ModelSettings;
use crate::error::JudgeError;
use crate::llm::{generate_text, ContentPart, GenerationRequest, LlmProvider, Message};

use super::prompts::{key_point_prompt, KEY_POINT_SYSTEM_PROMPT};
use super::types::{recover, EvaluationStage, KeyPointList, ParseDegradation};

/// Header the prompt asks the model to emit.
const STRICT_HEADER: &str = "**Key Points**:";

/// Looser header accepted when the strict one is missing.
const LOOSE_HEADER: &str = "Key Points:";

/// Extracts the explicit requirements of a task instruction.
pub struct KeyPointExtractor {
    llm: Arc<dyn LlmProvider>,
    settings: ModelSettings,
}

impl KeyPointExtractor {
    pub fn new(llm: Arc<dyn LlmProvider>, settings: ModelSettings) -> Self {
        Self { llm, settings }
    }

    /// Extract key points for `task`.
    ///
    /// `reference_images` are attached after the task text. Fails only when
    /// the model call itself fails.
    pub async fn extract(
        &self,
        task: &str,
        reference_images: &[ContentPart],
    ) -> Result<KeyPointList, JudgeError> {
        let mut parts = vec![ContentPart::text(key_point_prompt(task))];
        parts.extend_from_slice(reference_images);

        let request = GenerationRequest::new(
            self.settings.model.clone(),
            vec![Message::system(KEY_POINT_SYSTEM_PROMPT), Message::user_parts(parts)],
        )
        .with_temperature(self.settings.temperature)
        .with_max_tokens(self.settings.max_tokens);

        let raw = generate_text(self.llm.as_ref(), request)
            .await
            .map_err(|e| JudgeError::stage(EvaluationStage::ExtractingKeyPoints, e))?;

        let key_points = recover(parse_key_points(&raw), "key_points");
        if key_points.is_empty() {
            // Blank response; the instruction is the only requirement we know.
            return Ok(KeyPointList::from(vec![task.trim().to_string()]));
        }
        Ok(key_points)
    }
}

/// Parse the checklist out of a key-point response.
///
/// Looks for `**Key Points**:` first, then for the last `Key Points:`, and
/// finally treats the whole response as the checklist. Lines are left-trimmed
/// and blank or markup-only lines dropped.
pub fn parse_key_points(raw: &str) -> Result<KeyPointList, ParseDegradation<KeyPointList>> {
    let normalized = raw.replace("\n\n", "\n");

    if let Some((_, body)) = normalized.split_once(STRICT_HEADER) {
        let points = checklist_lines(body);
        if !points.is_empty() {
            return Ok(points);
        }
        return Err(ParseDegradation::new(
            checklist_lines(&normalized),
            "key point header present but followed by no items",
        ));
    }

    if let Some(idx) = normalized.rfind(LOOSE_HEADER) {
        let points = checklist_lines(&normalized[idx + LOOSE_HEADER.len()..]);
        if !points.is_empty() {
            return Err(ParseDegradation::new(points, "strict key point header missing"));
        }
    }

    Err(ParseDegradation::new(
        checklist_lines(&normalized),
        "no key point header found",
    ))
}

fn checklist_lines(body: &str) -> KeyPointList {
    body.lines()
        .map(|line| line.trim_start().trim_end())
        .filter(|line| line.chars().any(|c| !matches!(c, '*' | '#' | '-')))
        .map(str::to_string)
        .collect::<Vec<_>>()
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{Choice, GenerationResponse, Usage};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Mock LLM provider for testing.
    struct MockLlmProvider {
        response: String,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl MockLlmProvider {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlmProvider {
        async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            self.requests.lock().expect("lock poisoned").push(request);
            Ok(GenerationResponse {
                id: "test-id".to_string(),
                model: "test-model".to_string(),
                choices: vec![Choice {
                    index: 0,
                    content: self.response.clone(),
                    finish_reason: "stop".to_string(),
                }],
                usage: Usage::default(),
            })
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl LlmProvider for FailingProvider {
        async fn generate(&self, _request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            Err(LlmError::ApiError {
                code: 401,
                message: "invalid api key".to_string(),
            })
        }
    }

    #[test]
    fn test_parse_strict_header() {
        let raw = "Analysis done.\n\n**Key Points**:\n\n  1. Walking route\n  2. Destination: home";
        let points = parse_key_points(raw).expect("strict header should parse");
        assert_eq!(
            points.iter().collect::<Vec<_>>(),
            vec!["1. Walking route", "2. Destination: home"]
        );
    }

    #[test]
    fn test_parse_loose_header_degrades() {
        let raw = "**Key Points:**\n1. Filter by closest\n2. Gas station";
        let degraded = parse_key_points(raw).expect_err("loose header is a degradation");
        assert_eq!(
            degraded.fallback.iter().collect::<Vec<_>>(),
            vec!["1. Filter by closest", "2. Gas station"]
        );
    }

    #[test]
    fn test_parse_loose_header_uses_last_occurrence() {
        let raw = "Key Points: draft\nKey Points:\n1. Final";
        let degraded = parse_key_points(raw).expect_err("degraded");
        assert_eq!(degraded.fallback.iter().collect::<Vec<_>>(), vec!["1. Final"]);
    }

    #[test]
    fn test_parse_without_header_keeps_whole_response() {
        let raw = "1. Open the map\n2. Search for cafes";
        let degraded = parse_key_points(raw).expect_err("no header");
        assert_eq!(degraded.fallback.len(), 2);
        assert!(!degraded.reason.is_empty());
    }

    #[tokio::test]
    async fn test_extract_sends_task_and_reference_images() {
        let provider = Arc::new(MockLlmProvider::new("**Key Points**:\n1. Walking route"));
        let extractor = KeyPointExtractor::new(provider.clone(), ModelSettings::default());

        let images = vec![ContentPart::image("data:image/png;base64,AAAA")];
        let points = extractor
            .extract("Find a walking route home", &images)
            .await
            .expect("extract");
        assert_eq!(points.render(), "1. Walking route");

        let requests = provider.requests.lock().expect("lock poisoned");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages[0].role, "system");
        assert_eq!(requests[0].messages[1].text(), "Task: Find a walking route home");
        assert_eq!(requests[0].image_count(), 1);
        assert_eq!(requests[0].max_tokens, Some(512));
    }

    #[tokio::test]
    async fn test_extract_blank_response_falls_back_to_instruction() {
        let extractor = KeyPointExtractor::new(Arc::new(MockLlmProvider::new("  \n")), ModelSettings::default());
        let points = extractor.extract("Open maps", &[]).await.expect("extract");
        assert_eq!(points.iter().collect::<Vec<_>>(), vec!["Open maps"]);
    }

    #[tokio::test]
    async fn test_extract_provider_failure_is_stage_error() {
        let extractor = KeyPointExtractor::new(Arc::new(FailingProvider), ModelSettings::default());
        let err = extractor.extract("Open maps", &[]).await.unwrap_err();
        assert!(matches!(
            err,
            JudgeError::Stage {
                stage: EvaluationStage::ExtractingKeyPoints,
                ..
            }
        ));
    }
}
