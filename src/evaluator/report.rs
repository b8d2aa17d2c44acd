//! Batch run summary.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::ledger::NullLabelPolicy;

/// A trajectory whose evaluation failed before a result was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageFailure {
    pub episode_id: String,
    pub error: String,
}

/// Outcome of one batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// Trajectory directories found.
    pub total: usize,
    /// Skipped because the ledger already holds them.
    pub skipped: usize,
    /// Evaluations started in this run.
    pub attempted: usize,
    /// Evaluations that produced a ledger line.
    pub evaluated: usize,
    pub succeeded: usize,
    pub failed_labels: usize,
    pub null_labels: usize,
    pub stage_failures: Vec<StageFailure>,
    pub null_label_policy: NullLabelPolicy,
    /// `None` when nothing counted towards the denominator.
    pub success_rate: Option<f64>,
    pub ledger_path: PathBuf,
}

impl BatchReport {
    pub(crate) fn new(total: usize, skipped: usize, policy: NullLabelPolicy, ledger_path: PathBuf) -> Self {
        Self {
            total,
            skipped,
            attempted: 0,
            evaluated: 0,
            succeeded: 0,
            failed_labels: 0,
            null_labels: 0,
            stage_failures: Vec::new(),
            null_label_policy: policy,
            success_rate: None,
            ledger_path,
        }
    }

    pub(crate) fn record_label(&mut self, label: Option<u8>) {
        self.attempted += 1;
        self.evaluated += 1;
        match label {
            Some(1) => self.succeeded += 1,
            Some(_) => self.failed_labels += 1,
            None => self.null_labels += 1,
        }
    }

    pub(crate) fn record_failure(&mut self, episode_id: String, error: String) {
        self.attempted += 1;
        self.stage_failures.push(StageFailure { episode_id, error });
    }

    /// Successes over attempted trajectories. Stage failures stay in the
    /// denominator; null labels leave it under [`NullLabelPolicy::Exclude`].
    pub(crate) fn finish(&mut self) {
        let denominator = match self.null_label_policy {
            NullLabelPolicy::CountAsFailure => self.attempted,
            NullLabelPolicy::Exclude => self.attempted - self.null_labels,
        };
        self.success_rate = (denominator > 0).then(|| self.succeeded as f64 / denominator as f64);
    }

    pub fn stage_failure_count(&self) -> usize {
        self.stage_failures.len()
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Trajectory Evaluation ===")?;
        writeln!(f, "Trajectories:   {}", self.total)?;
        writeln!(f, "Skipped:        {} (already in ledger)", self.skipped)?;
        writeln!(f, "Attempted:      {}", self.attempted)?;
        writeln!(
            f,
            "Evaluated:      {} (success {}, failure {}, undetermined {})",
            self.evaluated, self.succeeded, self.failed_labels, self.null_labels
        )?;
        writeln!(f, "Stage failures: {}", self.stage_failures.len())?;
        for failure in &self.stage_failures {
            writeln!(f, "    {}: {}", failure.episode_id, failure.error)?;
        }
        match self.success_rate {
            Some(rate) => writeln!(
                f,
                "Success rate:   {:.2}% (null labels: {})",
                rate * 100.0,
                self.null_label_policy
            )?,
            None => writeln!(f, "Success rate:   n/a")?,
        }
        write!(f, "Ledger:         {}", self.ledger_path.display())
    }
}
