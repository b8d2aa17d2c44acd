//! Error types for mobile-judge operations.
//!
//! Defines error types for each subsystem:
//! - Model provider calls (network, rate limits, API errors)
//! - Trajectory loading and resource resolution
//! - Judge stages (key points, image scoring, verdict)
//! - Ledger persistence
//! - Batch evaluation

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::judge::EvaluationStage;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: OPENAI_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("LLM response contained no completions")]
    EmptyResponse,

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LlmError {
    /// Whether the provider error is worth retrying.
    ///
    /// Rate limits, connection failures, timeouts and 5xx responses are
    /// transient. Authentication and malformed-request errors (4xx other than
    /// 408/429) are not.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RateLimited(_) | LlmError::ConnectionFailed(_) | LlmError::Timeout(_) => {
                true
            }
            LlmError::RequestFailed(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("timeout")
                    || msg.contains("timed out")
                    || msg.contains("connection")
                    || msg.contains("temporarily")
            }
            LlmError::ApiError { code, .. } => *code >= 500 || *code == 429 || *code == 408,
            _ => false,
        }
    }
}

/// Errors that can occur while loading a trajectory from disk.
#[derive(Debug, Error)]
pub enum TrajectoryError {
    #[error("Trajectory file not found in {0}")]
    StepsFileNotFound(PathBuf),

    #[error("Trajectory '{0}' has no steps")]
    EmptyTrajectory(String),

    #[error("Trajectory '{0}' has no instruction on any step")]
    MissingInstruction(String),

    #[error("Trajectory '{episode_id}' references missing files: {}", format_paths(.paths))]
    MissingResources {
        episode_id: String,
        paths: Vec<PathBuf>,
    },

    #[error("Invalid trajectory JSON in {path}: {source}")]
    InvalidJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors that can occur while encoding an image for a prompt.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Image not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read image {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that abort the evaluation of a single trajectory.
#[derive(Debug, Error)]
pub enum JudgeError {
    /// A model-calling stage could not obtain a usable response after retries.
    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: EvaluationStage,
        #[source]
        source: LlmError,
    },

    /// A screenshot or reference image could not be encoded.
    #[error("Malformed input: {0}")]
    Image(#[from] ImageError),

    #[error("Trajectory error: {0}")]
    Trajectory(#[from] TrajectoryError),
}

impl JudgeError {
    pub(crate) fn stage(stage: EvaluationStage, source: LlmError) -> Self {
        JudgeError::Stage { stage, source }
    }
}

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Failed to create ledger directory {path}: {source}")]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error on ledger: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors that abort a whole batch run.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Trajectories directory does not exist: {0}")]
    MissingTrajectoriesDir(PathBuf),

    #[error("Failed to list trajectories in {path}: {source}")]
    ListFailed {
        path: PathBuf,
        #[source]
        source: TrajectoryError,
    },

    #[error("Ledger failure: {0}")]
    Ledger(#[from] LedgerError),
}
