//! Per-screenshot relevance scoring.
//!
//! Every screenshot of a trajectory is scored by an independent model call.
//! The calls run concurrently, bounded by a semaphore, and the records come
//! back in screenshot order whatever order the calls finish in.

use std::sync::Arc;

use futures::future::try_join_all;
use tokio::sync::Semaphore;

use crate::config::ModelSettings;
use crate::error::JudgeError;
use crate::llm::{generate_text, ContentPart, GenerationRequest, LlmProvider, Message};

use super::prompts::{image_judge_prompt, IMAGE_JUDGE_SYSTEM_PROMPT, INPUT_IMAGES_LEAD};
use super::types::{recover, EvaluationStage, KeyPointList, ParseDegradation, ScoreRecord};

const SCORE_MARKER: &str = "### Score";
const REASONING_MARKER: &str = "### Reasoning:";

/// Scores screenshots 1-5 for how much task evidence they show.
pub struct ImageRelevanceScorer {
    llm: Arc<dyn LlmProvider>,
    settings: ModelSettings,
    /// Calls in flight per trajectory; 0 means one per screenshot.
    max_concurrency: usize,
}

impl ImageRelevanceScorer {
    pub fn new(llm: Arc<dyn LlmProvider>, settings: ModelSettings) -> Self {
        Self {
            llm,
            settings,
            max_concurrency: 0,
        }
    }

    /// Bound the number of scoring calls in flight. 0 removes the bound.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Score one screenshot.
    pub async fn score(
        &self,
        task: &str,
        key_points: &KeyPointList,
        screenshot: &ContentPart,
        reference_images: &[ContentPart],
    ) -> Result<ScoreRecord, JudgeError> {
        let mut messages = vec![Message::system(IMAGE_JUDGE_SYSTEM_PROMPT)];
        if !reference_images.is_empty() {
            let mut parts = vec![ContentPart::text(INPUT_IMAGES_LEAD)];
            parts.extend_from_slice(reference_images);
            messages.push(Message::user_parts(parts));
        }
        messages.push(Message::user_parts(vec![
            ContentPart::text(image_judge_prompt(task, key_points)),
            screenshot.clone(),
        ]));

        let request = GenerationRequest::new(self.settings.model.clone(), messages)
            .with_temperature(self.settings.temperature)
            .with_max_tokens(self.settings.max_tokens);

        let raw = generate_text(self.llm.as_ref(), request)
            .await
            .map_err(|e| JudgeError::stage(EvaluationStage::ScoringImages, e))?;

        Ok(recover(parse_score_response(&raw), "image_score"))
    }

    /// Score every screenshot concurrently.
    ///
    /// The result has one record per screenshot, in input order. The first
    /// failed call fails the whole set and drops the calls still pending.
    pub async fn score_all(
        &self,
        task: &str,
        key_points: &KeyPointList,
        screenshots: &[ContentPart],
        reference_images: &[ContentPart],
    ) -> Result<Vec<ScoreRecord>, JudgeError> {
        let permits = match self.max_concurrency {
            0 => screenshots.len().max(1),
            n => n,
        };
        let semaphore = Semaphore::new(permits);
        let semaphore = &semaphore;

        let calls = screenshots.iter().enumerate().map(|(index, screenshot)| async move {
            // The semaphore is never closed, so acquire cannot fail.
            let _permit = semaphore.acquire().await.ok();
            let record = self
                .score(task, key_points, screenshot, reference_images)
                .await?;
            tracing::debug!(index, score = record.score, "Screenshot scored");
            Ok::<_, JudgeError>(record)
        });

        try_join_all(calls).await
    }
}

/// Parse a scoring response into a [`ScoreRecord`].
///
/// The score is the first digit 1-5 after the `### Score` marker. The
/// reasoning is the text after `### Reasoning:` up to the score marker,
/// joined onto one line. Without a score the record degrades to score 0 and
/// empty reasoning.
pub fn parse_score_response(raw: &str) -> Result<ScoreRecord, ParseDegradation<ScoreRecord>> {
    let degraded = |reason: &str| {
        ParseDegradation::new(
            ScoreRecord {
                response: raw.to_string(),
                score: 0,
                reasoning: String::new(),
            },
            reason,
        )
    };

    let Some((_, after_marker)) = raw.split_once(SCORE_MARKER) else {
        return Err(degraded("score marker missing"));
    };
    let Some(score) = after_marker
        .chars()
        .find(|c| ('1'..='5').contains(c))
        .and_then(|c| c.to_digit(10))
    else {
        return Err(degraded("no 1-5 digit after score marker"));
    };

    let reasoning_start = raw
        .rfind(REASONING_MARKER)
        .map(|idx| idx + REASONING_MARKER.len())
        .unwrap_or(0);
    let reasoning = raw[reasoning_start..]
        .split(SCORE_MARKER)
        .next()
        .unwrap_or_default()
        .trim()
        .replace('\n', " ");

    Ok(ScoreRecord {
        response: raw.to_string(),
        score: score as u8,
        reasoning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{Choice, GenerationResponse, Usage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scores screenshot `i` (encoded in its URL) with `scores[i]`, finishing
    /// later screenshots first.
    struct MockLlmProvider {
        scores: Vec<u8>,
        fail_on: Option<usize>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockLlmProvider {
        fn new(scores: Vec<u8>) -> Self {
            Self {
                scores,
                fail_on: None,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    fn screenshot_index(request: &GenerationRequest) -> usize {
        let last = request.messages.last().expect("screenshot message");
        match &last.content {
            crate::llm::MessageContent::Parts(parts) => parts
                .iter()
                .find_map(|p| match p {
                    ContentPart::ImageUrl { image_url } => {
                        image_url.url.rsplit(',').next().and_then(|i| i.parse().ok())
                    }
                    _ => None,
                })
                .expect("indexed screenshot"),
            _ => panic!("expected multimodal message"),
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlmProvider {
        async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            let index = screenshot_index(&request);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let delay = (self.scores.len() - index) as u64 * 10;
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_on == Some(index) {
                return Err(LlmError::RateLimited("quota".to_string()));
            }
            Ok(GenerationResponse {
                id: "test-id".to_string(),
                model: "test-model".to_string(),
                choices: vec![Choice {
                    index: 0,
                    content: format!(
                        "### Reasoning: screenshot {index}\n### Score: {}",
                        self.scores[index]
                    ),
                    finish_reason: "stop".to_string(),
                }],
                usage: Usage::default(),
            })
        }
    }

    fn screenshots(n: usize) -> Vec<ContentPart> {
        (0..n)
            .map(|i| ContentPart::image(format!("data:image/png;base64,{i}")))
            .collect()
    }

    fn key_points() -> KeyPointList {
        KeyPointList::from(vec!["1. Walking route".to_string()])
    }

    #[test]
    fn test_parse_score_response() {
        let raw = "### Reasoning: The map shows\na walking route.\n### Score: 4";
        let record = parse_score_response(raw).expect("parse");
        assert_eq!(record.score, 4);
        assert_eq!(record.reasoning, "The map shows a walking route.");
        assert_eq!(record.response, raw);
    }

    #[test]
    fn test_parse_score_takes_first_valid_digit() {
        let record = parse_score_response("### Reasoning: ok\n### Score**: 0/9 then 3").expect("parse");
        assert_eq!(record.score, 3);
    }

    #[test]
    fn test_parse_score_without_reasoning_marker() {
        let record = parse_score_response("Looks relevant.\n### Score: 5").expect("parse");
        assert_eq!(record.reasoning, "Looks relevant.");
    }

    #[test]
    fn test_parse_score_degrades_to_zero() {
        let degraded = parse_score_response("I cannot see the image.").expect_err("no marker");
        assert_eq!(degraded.fallback.score, 0);
        assert_eq!(degraded.fallback.response, "I cannot see the image.");

        let degraded = parse_score_response("### Score: none").expect_err("no digit");
        assert_eq!(degraded.fallback.score, 0);
    }

    #[tokio::test]
    async fn test_score_all_preserves_order() {
        let provider = Arc::new(MockLlmProvider::new(vec![1, 4, 5, 2, 3]));
        let scorer = ImageRelevanceScorer::new(provider, ModelSettings::default());

        let records = scorer
            .score_all("Walk home", &key_points(), &screenshots(5), &[])
            .await
            .expect("score");

        let scores: Vec<u8> = records.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![1, 4, 5, 2, 3]);
        assert_eq!(records[2].reasoning, "screenshot 2");
    }

    #[tokio::test]
    async fn test_score_all_respects_concurrency_bound() {
        let provider = Arc::new(MockLlmProvider::new(vec![3; 6]));
        let scorer = ImageRelevanceScorer::new(provider.clone(), ModelSettings::default())
            .with_max_concurrency(2);

        scorer
            .score_all("Walk home", &key_points(), &screenshots(6), &[])
            .await
            .expect("score");
        assert!(provider.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_score_all_unbounded_runs_all_at_once() {
        let provider = Arc::new(MockLlmProvider::new(vec![3; 4]));
        let scorer = ImageRelevanceScorer::new(provider.clone(), ModelSettings::default());

        scorer
            .score_all("Walk home", &key_points(), &screenshots(4), &[])
            .await
            .expect("score");
        assert_eq!(provider.max_in_flight.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_score_all_propagates_stage_failure() {
        let mut provider = MockLlmProvider::new(vec![3, 3, 3]);
        provider.fail_on = Some(1);
        let scorer = ImageRelevanceScorer::new(Arc::new(provider), ModelSettings::default());

        let err = scorer
            .score_all("Walk home", &key_points(), &screenshots(3), &[])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Stage 'scoring_images' failed: Rate limited: quota");
    }

    #[tokio::test]
    async fn test_score_all_empty() {
        let scorer = ImageRelevanceScorer::new(Arc::new(MockLlmProvider::new(vec![])), ModelSettings::default());
        let records = scorer
            .score_all("Walk home", &key_points(), &[], &[])
            .await
            .expect("score");
        assert!(records.is_empty());
    }
}
