//! Verdict synthesis.
//!
//! Screenshots scoring at or above the threshold become evidence. The
//! verdict prompt carries the task, the key points, the numbered action
//! history, the evidence reasons and the evidence images; when nothing
//! survives the filter the screenshot section is dropped from the prompt.

use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::config::ModelSettings;
use crate::error::JudgeError;
use crate::llm::{generate_text, ContentPart, GenerationRequest, LlmProvider, Message};

use super::prompts::{verdict_prompt, INPUT_IMAGES_LEAD, VERDICT_SYSTEM_PROMPT};
use super::types::{recover, EvaluationStage, KeyPointList, ParseDegradation, ScoreRecord, Verdict};

/// Screenshots retained as evidence for the verdict.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvidenceSelection {
    /// Indices of retained screenshots, ascending, at most the cap.
    pub indices: Vec<usize>,
    /// Non-empty reasoning of retained screenshots, in order, at most the cap.
    pub reasons: Vec<String>,
}

impl EvidenceSelection {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Keep records scoring at least `threshold`.
///
/// Images and reasons are capped at `max_items` independently; a retained
/// record with empty reasoning contributes an image but no reason.
pub fn select_evidence(records: &[ScoreRecord], threshold: u8, max_items: usize) -> EvidenceSelection {
    let retained: Vec<(usize, &ScoreRecord)> = records
        .iter()
        .enumerate()
        .filter(|(_, record)| record.score >= threshold)
        .collect();

    EvidenceSelection {
        indices: retained.iter().map(|(i, _)| *i).take(max_items).collect(),
        reasons: retained
            .iter()
            .map(|(_, record)| record.reasoning.as_str())
            .filter(|reason| !reason.is_empty())
            .take(max_items)
            .map(str::to_string)
            .collect(),
    }
}

/// Inputs to one verdict call.
#[derive(Debug, Clone, Copy)]
pub struct VerdictInput<'a> {
    pub task: &'a str,
    pub key_points: &'a KeyPointList,
    /// Rendered action of every step.
    pub actions: &'a [String],
    /// Every screenshot, aligned with `records`.
    pub screenshots: &'a [ContentPart],
    pub records: &'a [ScoreRecord],
    pub reference_images: &'a [ContentPart],
}

/// Produces the success/failure verdict for a trajectory.
pub struct VerdictSynthesizer {
    llm: Arc<dyn LlmProvider>,
    settings: ModelSettings,
    score_threshold: u8,
    max_evidence: usize,
}

impl VerdictSynthesizer {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        settings: ModelSettings,
        score_threshold: u8,
        max_evidence: usize,
    ) -> Self {
        Self {
            llm,
            settings,
            score_threshold,
            max_evidence,
        }
    }

    pub fn score_threshold(&self) -> u8 {
        self.score_threshold
    }

    /// Build the verdict conversation and report which evidence went in.
    pub fn build_messages(&self, input: &VerdictInput<'_>) -> (Vec<Message>, EvidenceSelection) {
        let evidence = select_evidence(input.records, self.score_threshold, self.max_evidence);

        let mut messages = vec![Message::system(VERDICT_SYSTEM_PROMPT)];
        if !input.reference_images.is_empty() {
            let mut parts = vec![ContentPart::text(INPUT_IMAGES_LEAD)];
            parts.extend_from_slice(input.reference_images);
            messages.push(Message::user_parts(parts));
        }

        let text = verdict_prompt(
            input.task,
            input.key_points,
            input.actions,
            &evidence.reasons,
            !evidence.is_empty(),
        );
        let mut parts = vec![ContentPart::text(text)];
        parts.extend(
            evidence
                .indices
                .iter()
                .filter_map(|&i| input.screenshots.get(i).cloned()),
        );
        messages.push(Message::user_parts(parts));

        (messages, evidence)
    }

    /// Ask the model for a verdict.
    pub async fn synthesize(&self, input: &VerdictInput<'_>) -> Result<Verdict, JudgeError> {
        let (messages, evidence) = self.build_messages(input);
        tracing::debug!(
            evidence_images = evidence.indices.len(),
            evidence_reasons = evidence.reasons.len(),
            "Verdict prompt assembled"
        );

        let request = GenerationRequest::new(self.settings.model.clone(), messages)
            .with_temperature(self.settings.temperature)
            .with_max_tokens(self.settings.max_tokens);

        let details = generate_text(self.llm.as_ref(), request)
            .await
            .map_err(|e| JudgeError::stage(EvaluationStage::SynthesizingVerdict, e))?;

        let predicted_label = recover(parse_verdict(&details).map(Some), "verdict");
        Ok(Verdict {
            details,
            predicted_label,
        })
    }
}

fn status_pattern() -> &'static Regex {
    static STATUS: OnceLock<Regex> = OnceLock::new();
    STATUS.get_or_init(|| {
        Regex::new(r#"(?im)^[\s*#>-]*status[\s*]*:[\s*"'`“”‘’]*(success|failure)\b"#)
            .expect("status pattern is a valid regex")
    })
}

/// Read the predicted label from a verdict response.
///
/// The last `Status:` line decides: `success` is 1, `failure` is 0, case
/// insensitive, with or without straight or curly quotes and bold markers.
/// Without such a line the label is undetermined, which is not the same as
/// failure.
pub fn parse_verdict(raw: &str) -> Result<u8, ParseDegradation<Option<u8>>> {
    let status = status_pattern()
        .captures_iter(raw)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_lowercase());

    match status.as_deref() {
        Some("success") => Ok(1),
        Some("failure") => Ok(0),
        _ => Err(ParseDegradation::new(None, "no recognizable status line")),
    }
}
