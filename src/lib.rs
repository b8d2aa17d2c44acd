//! mobile-judge: vision-LLM judge for recorded mobile-agent trajectories.
//!
//! Each trajectory goes through three model-calling stages (key-point
//! extraction, per-screenshot relevance scoring, verdict synthesis) and ends
//! up as one line in an append-only ledger that doubles as the resume
//! checkpoint for batch runs.

pub mod cli;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod judge;
pub mod ledger;
pub mod llm;
pub mod trajectory;

// Re-export commonly used types
pub use config::{ConfigError, EvalConfig, ModelSettings};
pub use error::{BatchError, ImageError, JudgeError, LedgerError, LlmError, TrajectoryError};
pub use evaluator::{BatchReport, TrajectoryEvaluator};
pub use judge::{EvaluationResult, EvaluationStage, KeyPointList, ScoreRecord, TrajectoryJudge};
pub use ledger::{Ledger, NullLabelPolicy};
pub use llm::{LlmProvider, RetryPolicy};
pub use trajectory::{Trajectory, TrajectoryStorage};
