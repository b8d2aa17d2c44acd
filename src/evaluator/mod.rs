//! Batch evaluation of a trajectories directory.
//!
//! The driver lists trajectory directories in name order, skips every
//! episode id the ledger already holds, judges the rest and appends each
//! result the moment it is ready. A trajectory that fails is reported and
//! the run moves on; a ledger write failure ends the run, since results that
//! cannot be recorded would be judged again on the next run.

pub mod report;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::config::EvalConfig;
use crate::error::{BatchError, JudgeError, LedgerError};
use crate::judge::{EvaluationStage, TrajectoryJudge};
use crate::ledger::Ledger;
use crate::llm::LlmProvider;
use crate::trajectory::TrajectoryStorage;

pub use report::{BatchReport, StageFailure};

enum Outcome {
    Evaluated(Option<u8>),
    Failed(String),
}

/// Judges every not-yet-evaluated trajectory under a directory.
pub struct TrajectoryEvaluator {
    storage: TrajectoryStorage,
    judge: TrajectoryJudge,
    ledger: Ledger,
    config: EvalConfig,
}

impl TrajectoryEvaluator {
    /// Create an evaluator writing its ledger into `output_dir`.
    pub fn new(
        trajectories_dir: impl Into<PathBuf>,
        output_dir: &Path,
        llm: Arc<dyn LlmProvider>,
        config: EvalConfig,
    ) -> Self {
        Self {
            storage: TrajectoryStorage::new(trajectories_dir),
            judge: TrajectoryJudge::new(llm, &config),
            ledger: Ledger::new(config.ledger_path(output_dir)),
            config,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Run the batch.
    pub async fn run(&self) -> Result<BatchReport, BatchError> {
        let base_path = self.storage.base_path();
        if !base_path.is_dir() {
            return Err(BatchError::MissingTrajectoriesDir(base_path.to_path_buf()));
        }

        self.ledger.prepare().await?;
        let already_evaluated = self.ledger.episode_ids().await?;

        let episodes = self
            .storage
            .list()
            .await
            .map_err(|source| BatchError::ListFailed {
                path: base_path.to_path_buf(),
                source,
            })?;
        let total = episodes.len();
        let pending: Vec<String> = episodes
            .into_iter()
            .filter(|id| !already_evaluated.contains(id))
            .collect();
        let skipped = total - pending.len();

        tracing::info!(
            total,
            skipped,
            pending = pending.len(),
            concurrency = self.config.max_concurrent_trajectories,
            ledger = %self.ledger.path().display(),
            "Starting batch evaluation"
        );

        let mut report = BatchReport::new(
            total,
            skipped,
            self.config.null_label_policy,
            self.ledger.path().to_path_buf(),
        );

        let mut outcomes = stream::iter(pending)
            .map(|episode_id| async move {
                let outcome = self.evaluate_one(&episode_id).await;
                (episode_id, outcome)
            })
            .buffered(self.config.max_concurrent_trajectories.max(1));

        while let Some((episode_id, outcome)) = outcomes.next().await {
            match outcome? {
                Outcome::Evaluated(label) => report.record_label(label),
                Outcome::Failed(error) => report.record_failure(episode_id, error),
            }
        }

        report.finish();
        tracing::info!(
            attempted = report.attempted,
            evaluated = report.evaluated,
            stage_failures = report.stage_failure_count(),
            success_rate = ?report.success_rate,
            "Batch evaluation complete"
        );
        Ok(report)
    }

    /// Judge and persist one trajectory. Only ledger errors are returned as
    /// errors; everything else is an [`Outcome::Failed`].
    async fn evaluate_one(&self, episode_id: &str) -> Result<Outcome, LedgerError> {
        tracing::debug!(episode_id = %episode_id, stage = %EvaluationStage::Pending, "Loading trajectory");
        let result = match self.storage.load(episode_id).await {
            Ok(trajectory) => self.judge.evaluate(&trajectory).await,
            Err(e) => Err(JudgeError::from(e)),
        };

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(episode_id = %episode_id, error = %e, "Trajectory evaluation failed");
                return Ok(Outcome::Failed(e.to_string()));
            }
        };

        self.ledger.append(&result).await?;
        tracing::info!(
            episode_id = %episode_id,
            stage = %EvaluationStage::Persisted,
            predicted_label = ?result.predicted_label,
            "Result persisted"
        );
        Ok(Outcome::Evaluated(result.predicted_label))
    }
}
