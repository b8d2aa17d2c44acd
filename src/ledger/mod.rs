//! Append-only JSONL ledger of evaluation results.
//!
//! One ledger exists per configuration tuple (see
//! [`EvalConfig::ledger_file_name`](crate::config::EvalConfig::ledger_file_name)).
//! Its episode ids are the only record of what has already been judged:
//! a batch run reads them first and skips those trajectories.
//!
//! Reading is lenient. Blank and malformed lines are logged and skipped, and
//! a line that is a JSON array counts when its first element is a string id.
//! Writing is strict: every result becomes one complete line, and appends
//! from concurrent evaluations are serialized.

pub mod summary;

use std::collections::HashSet;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::LedgerError;
use crate::judge::EvaluationResult;

pub use summary::{
    summarize_by_base_id, write_summary, BaseIdSummary, LabelTally, NullLabelPolicy,
};

/// The fields of a ledger line needed for resumption and aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub episode_id: String,
    pub predicted_label: Option<u8>,
}

impl LedgerEntry {
    /// Extract an entry from one parsed line.
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self {
                episode_id: map.get("episode_id")?.as_str()?.to_string(),
                predicted_label: map.get("predicted_label").and_then(label_value),
            }),
            Value::Array(items) => Some(Self {
                episode_id: items.first()?.as_str()?.to_string(),
                predicted_label: items.get(1).and_then(label_value),
            }),
            _ => None,
        }
    }
}

/// Whether `file` is empty or its last byte is a newline.
async fn ends_with_newline(file: &mut fs::File) -> std::io::Result<bool> {
    if file.metadata().await?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] == b'\n')
}

fn label_value(value: &Value) -> Option<u8> {
    value.as_u64().and_then(|v| u8::try_from(v).ok())
}

/// A ledger file.
pub struct Ledger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the ledger's directory and an empty file if missing.
    ///
    /// Called before a batch starts so an unwritable location fails the
    /// run before any model call is made.
    pub async fn prepare(&self) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| LedgerError::DirectoryCreationFailed {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        Ok(())
    }

    /// Every readable entry, in file order. A missing file reads as empty.
    pub async fn entries(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let parsed = serde_json::from_str::<Value>(line)
                .ok()
                .and_then(|value| LedgerEntry::from_value(&value));
            match parsed {
                Some(entry) => entries.push(entry),
                None => tracing::warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    "Skipping malformed ledger line"
                ),
            }
        }
        Ok(entries)
    }

    /// Episode ids already in the ledger.
    pub async fn episode_ids(&self) -> Result<HashSet<String>, LedgerError> {
        let ids: HashSet<String> = self
            .entries()
            .await?
            .into_iter()
            .map(|entry| entry.episode_id)
            .collect();
        tracing::info!(
            already_evaluated = ids.len(),
            path = %self.path.display(),
            "Loaded ledger"
        );
        Ok(ids)
    }

    /// Append one result as a single line and sync it to disk.
    ///
    /// A previous line left unterminated (a crash mid-write, a hand-edited
    /// file) is closed first so the new record never merges into it.
    pub async fn append(&self, result: &EvaluationResult) -> Result<(), LedgerError> {
        let record = serde_json::to_string(result)?;

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await?;

        let mut line = String::with_capacity(record.len() + 2);
        if !ends_with_newline(&mut file).await? {
            tracing::warn!(path = %self.path.display(), "Ledger ended mid-line, starting a new line");
            line.push('\n');
        }
        line.push_str(&record);
        line.push('\n');

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::KeyPointList;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn result(episode_id: &str, label: Option<u8>) -> EvaluationResult {
        EvaluationResult {
            episode_id: episode_id.to_string(),
            evaluation_details: "Thoughts: ok\nStatus: \"success\"".to_string(),
            predicted_label: label,
            image_judge_record: Vec::new(),
            key_points: KeyPointList::default(),
            score_threshold: Some(3),
            evaluated_at: None,
        }
    }

    #[tokio::test]
    async fn test_missing_ledger_is_empty() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let ledger = Ledger::new(temp_dir.path().join("ledger.jsonl"));
        assert!(ledger.episode_ids().await.expect("read").is_empty());
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let ledger = Ledger::new(temp_dir.path().join("out").join("ledger.jsonl"));
        ledger.prepare().await.expect("prepare");

        ledger.append(&result("MAP-1-1", Some(1))).await.expect("append");
        ledger.append(&result("MAP-1-2", None)).await.expect("append");

        let entries = ledger.entries().await.expect("read");
        assert_eq!(
            entries,
            vec![
                LedgerEntry {
                    episode_id: "MAP-1-1".to_string(),
                    predicted_label: Some(1)
                },
                LedgerEntry {
                    episode_id: "MAP-1-2".to_string(),
                    predicted_label: None
                },
            ]
        );
        let content = std::fs::read_to_string(ledger.path()).expect("read");
        let first: EvaluationResult =
            serde_json::from_str(content.lines().next().expect("first line")).expect("parse");
        assert_eq!(first, result("MAP-1-1", Some(1)));
    }

    #[tokio::test]
    async fn test_tolerates_malformed_and_legacy_lines() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("ledger.jsonl");
        std::fs::write(
            &path,
            concat!(
                "{\"episode_id\":\"MAP-123\"}\n",
                "\n",
                "{not json\n",
                "[\"MAP-124\", 1]\n",
                "{\"predicted_label\": 1}\n",
                "{\"episode_id\":\"MAP-125\",\"predicted_label\":0,\"key_points\":\"1. legacy text\"}\n",
            ),
        )
        .expect("write ledger");

        let ledger = Ledger::new(&path);
        let ids = ledger.episode_ids().await.expect("read");
        assert_eq!(ids.len(), 3);
        assert!(ids.contains("MAP-123"));
        assert!(ids.contains("MAP-124"));
        assert!(ids.contains("MAP-125"));

        let entries = ledger.entries().await.expect("read");
        assert_eq!(entries[1].predicted_label, Some(1));
        assert_eq!(entries[2].predicted_label, Some(0));
    }

    #[tokio::test]
    async fn test_append_after_unterminated_line_keeps_both_records() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("ledger.jsonl");
        std::fs::write(&path, "{\"episode_id\":\"MAP-123\"}").expect("write ledger");

        let ledger = Ledger::new(&path);
        ledger.prepare().await.expect("prepare");
        ledger.append(&result("MAP-124", Some(1))).await.expect("append");
        ledger.append(&result("MAP-125", Some(0))).await.expect("append");

        let ids = ledger.episode_ids().await.expect("read");
        assert_eq!(ids.len(), 3);
        assert!(ids.contains("MAP-123"));
        assert!(ids.contains("MAP-124"));
        assert!(ids.contains("MAP-125"));

        let content = std::fs::read_to_string(&path).expect("read");
        assert_eq!(content.lines().count(), 3);
        assert!(content.ends_with('\n'));
        assert!(!content.contains("\n\n"));
    }

    #[tokio::test]
    async fn test_concurrent_appends_do_not_interleave() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let ledger = Arc::new(Ledger::new(temp_dir.path().join("ledger.jsonl")));

        let mut handles = Vec::new();
        for i in 0..20 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                let mut r = result(&format!("MAP-{i}-1"), Some(1));
                r.evaluation_details = "x".repeat(4096);
                ledger.append(&r).await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("append");
        }

        let content = std::fs::read_to_string(ledger.path()).expect("read");
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 20);
        for line in lines {
            let parsed: EvaluationResult = serde_json::from_str(line).expect("complete line");
            assert_eq!(parsed.evaluation_details.len(), 4096);
        }
        assert_eq!(ledger.episode_ids().await.expect("read").len(), 20);
    }
}
