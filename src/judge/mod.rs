//! The judge: three model-calling stages run in order per trajectory.
//!
//! 1. [`KeyPointExtractor`] turns the instruction into a checklist.
//! 2. [`ImageRelevanceScorer`] scores every screenshot against it, concurrently.
//! 3. [`VerdictSynthesizer`] filters the screenshots by score and asks for a
//!    success/failure verdict.
//!
//! [`TrajectoryJudge`] drives the three for one trajectory and produces the
//! [`EvaluationResult`] the ledger stores.

pub mod image_scorer;
pub mod key_points;
pub mod pipeline;
pub mod prompts;
pub mod types;
pub mod verdict;

pub use image_scorer::{parse_score_response, ImageRelevanceScorer};
pub use key_points::{parse_key_points, KeyPointExtractor};
pub use pipeline::TrajectoryJudge;
pub use types::{
    EvaluationResult, EvaluationStage, KeyPointList, ParseDegradation, ScoreRecord, Verdict,
};
pub use verdict::{parse_verdict, select_evidence, EvidenceSelection, VerdictInput, VerdictSynthesizer};
