//! Per-trajectory judging.

use std::sync::Arc;

use chrono::Utc;

use crate::config::EvalConfig;
use crate::error::{JudgeError, TrajectoryError};
use crate::llm::{image_parts, LlmProvider};
use crate::trajectory::Trajectory;

use super::image_scorer::ImageRelevanceScorer;
use super::key_points::KeyPointExtractor;
use super::types::{EvaluationResult, EvaluationStage};
use super::verdict::{VerdictInput, VerdictSynthesizer};

/// Runs key-point extraction, screenshot scoring and verdict synthesis for
/// one trajectory.
///
/// Every stage shares the same provider. A stage failure ends the evaluation
/// of that trajectory; nothing is written on its behalf.
pub struct TrajectoryJudge {
    key_points: KeyPointExtractor,
    scorer: ImageRelevanceScorer,
    verdict: VerdictSynthesizer,
    attach_step_images: bool,
}

impl TrajectoryJudge {
    pub fn new(llm: Arc<dyn LlmProvider>, config: &EvalConfig) -> Self {
        Self {
            key_points: KeyPointExtractor::new(llm.clone(), config.model.clone()),
            scorer: ImageRelevanceScorer::new(llm.clone(), config.model.clone())
                .with_max_concurrency(config.max_concurrent_scoring),
            verdict: VerdictSynthesizer::new(
                llm,
                config.model.clone(),
                config.score_threshold,
                config.max_evidence_images,
            ),
            attach_step_images: config.attach_step_images,
        }
    }

    pub fn score_threshold(&self) -> u8 {
        self.verdict.score_threshold()
    }

    /// Judge one trajectory.
    ///
    /// All images are read and encoded before the first model call, so a
    /// missing or unreadable screenshot fails the trajectory without
    /// spending any calls on it.
    pub async fn evaluate(&self, trajectory: &Trajectory) -> Result<EvaluationResult, JudgeError> {
        let episode_id = trajectory.episode_id.as_str();
        let task = trajectory
            .instruction()
            .ok_or_else(|| TrajectoryError::MissingInstruction(episode_id.to_string()))?;

        let reference_images = if self.attach_step_images {
            image_parts(&trajectory.step_images).await?
        } else {
            Vec::new()
        };
        let screenshots = image_parts(&trajectory.screenshots).await?;

        tracing::info!(
            episode_id = %episode_id,
            stage = %EvaluationStage::ExtractingKeyPoints,
            reference_images = reference_images.len(),
            "Extracting key points"
        );
        let key_points = self.key_points.extract(task, &reference_images).await?;

        tracing::info!(
            episode_id = %episode_id,
            stage = %EvaluationStage::ScoringImages,
            key_points = key_points.len(),
            screenshots = screenshots.len(),
            "Scoring screenshots"
        );
        let records = self
            .scorer
            .score_all(task, &key_points, &screenshots, &reference_images)
            .await?;

        tracing::info!(
            episode_id = %episode_id,
            stage = %EvaluationStage::SynthesizingVerdict,
            "Synthesizing verdict"
        );
        let actions = trajectory.action_history();
        let verdict = self
            .verdict
            .synthesize(&VerdictInput {
                task,
                key_points: &key_points,
                actions: &actions,
                screenshots: &screenshots,
                records: &records,
                reference_images: &reference_images,
            })
            .await?;

        Ok(EvaluationResult {
            episode_id: episode_id.to_string(),
            evaluation_details: verdict.details,
            predicted_label: verdict.predicted_label,
            image_judge_record: records,
            key_points,
            score_threshold: Some(self.score_threshold()),
            evaluated_at: Some(Utc::now()),
        })
    }
}
