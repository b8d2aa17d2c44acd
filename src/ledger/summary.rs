//! Aggregation over ledger entries.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::LedgerEntry;
use crate::error::LedgerError;
use crate::trajectory::base_episode_id;

/// How undetermined (null) verdicts enter the success rate.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum NullLabelPolicy {
    /// Nulls stay in the denominator and count as non-success.
    #[default]
    CountAsFailure,
    /// Nulls are left out of the denominator.
    Exclude,
}

impl fmt::Display for NullLabelPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NullLabelPolicy::CountAsFailure => write!(f, "count-as-failure"),
            NullLabelPolicy::Exclude => write!(f, "exclude"),
        }
    }
}

impl FromStr for NullLabelPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "count-as-failure" | "failure" => Ok(NullLabelPolicy::CountAsFailure),
            "exclude" => Ok(NullLabelPolicy::Exclude),
            other => Err(format!(
                "unknown null label policy '{}', expected 'count-as-failure' or 'exclude'",
                other
            )),
        }
    }
}

/// Counts of predicted labels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LabelTally {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub null: usize,
}

impl LabelTally {
    pub fn from_labels<I: IntoIterator<Item = Option<u8>>>(labels: I) -> Self {
        let mut tally = Self::default();
        for label in labels {
            tally.record(label);
        }
        tally
    }

    pub fn record(&mut self, label: Option<u8>) {
        self.total += 1;
        match label {
            Some(1) => self.succeeded += 1,
            Some(_) => self.failed += 1,
            None => self.null += 1,
        }
    }

    /// Fraction of successes, or `None` when the denominator is zero.
    pub fn success_rate(&self, policy: NullLabelPolicy) -> Option<f64> {
        let denominator = match policy {
            NullLabelPolicy::CountAsFailure => self.total,
            NullLabelPolicy::Exclude => self.total - self.null,
        };
        (denominator > 0).then(|| self.succeeded as f64 / denominator as f64)
    }
}

/// Episode count and label sum for one instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BaseIdSummary {
    pub base_id: String,
    pub episodes: usize,
    pub predicted_label_sum: u64,
}

impl fmt::Display for BaseIdSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: episodes={}, predicted_label_sum={}",
            self.base_id, self.episodes, self.predicted_label_sum
        )
    }
}

/// Group entries by instruction id, sorted by id.
///
/// Entries without a predicted label are not counted.
pub fn summarize_by_base_id(entries: &[LedgerEntry]) -> Vec<BaseIdSummary> {
    let mut groups: BTreeMap<&str, (usize, u64)> = BTreeMap::new();
    for entry in entries {
        let Some(label) = entry.predicted_label else {
            continue;
        };
        let group = groups.entry(base_episode_id(&entry.episode_id)).or_default();
        group.0 += 1;
        group.1 += u64::from(label);
    }

    groups
        .into_iter()
        .map(|(base_id, (episodes, sum))| BaseIdSummary {
            base_id: base_id.to_string(),
            episodes,
            predicted_label_sum: sum,
        })
        .collect()
}

/// Write one summary line per instruction id, replacing `path`.
pub async fn write_summary(path: &Path, summaries: &[BaseIdSummary]) -> Result<(), LedgerError> {
    let mut content = String::new();
    for summary in summaries {
        content.push_str(&summary.to_string());
        content.push('\n');
    }
    tokio::fs::write(path, content).await?;
    Ok(())
}
