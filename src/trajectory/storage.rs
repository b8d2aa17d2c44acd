//! Loading trajectories from a dataset directory.
//!
//! Layout: one subdirectory per episode, named by episode id. Each holds the
//! recorder's step JSON (`<instruction id>.json`) and the screenshots.

use std::path::{Path, PathBuf};

use tokio::fs;

use super::types::{base_episode_id, sort_by_step_index, Step, Trajectory};
use crate::error::TrajectoryError;

const SCREENSHOT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Read-only view over a directory of recorded trajectories.
pub struct TrajectoryStorage {
    base_path: PathBuf,
}

impl TrajectoryStorage {
    /// Creates a storage view rooted at `base_path`.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Returns the base storage path.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Lists episode ids (subdirectory names) in sorted order.
    pub async fn list(&self) -> Result<Vec<String>, TrajectoryError> {
        let mut episodes = Vec::new();
        let mut entries = fs::read_dir(&self.base_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                episodes.push(name.to_string());
            }
        }

        episodes.sort();
        Ok(episodes)
    }

    /// Directory holding an episode.
    pub fn episode_dir(&self, episode_id: &str) -> PathBuf {
        self.base_path.join(episode_id)
    }

    /// Loads and validates one trajectory.
    ///
    /// Fails when the step file is missing or invalid, when no step carries
    /// an instruction, or when a declared step image does not exist.
    pub async fn load(&self, episode_id: &str) -> Result<Trajectory, TrajectoryError> {
        let directory = self.episode_dir(episode_id);
        let steps_path = find_steps_file(&directory, episode_id).await?;

        let contents = fs::read_to_string(&steps_path).await?;
        let steps: Vec<Step> =
            serde_json::from_str(&contents).map_err(|source| TrajectoryError::InvalidJson {
                path: steps_path.clone(),
                source,
            })?;

        if steps.is_empty() {
            return Err(TrajectoryError::EmptyTrajectory(episode_id.to_string()));
        }

        let mut missing = Vec::new();
        let mut step_images = Vec::new();
        for declared in steps.iter().filter_map(|s| s.image_path.as_deref()) {
            match resolve_image(&directory, declared) {
                Some(path) => step_images.push(path),
                None => missing.push(directory.join(declared)),
            }
        }
        if !missing.is_empty() {
            return Err(TrajectoryError::MissingResources {
                episode_id: episode_id.to_string(),
                paths: missing,
            });
        }

        let screenshots = list_screenshots(&directory).await?;

        let trajectory = Trajectory {
            episode_id: episode_id.to_string(),
            directory,
            steps,
            screenshots,
            step_images,
        };

        if trajectory.instruction().is_none() {
            return Err(TrajectoryError::MissingInstruction(episode_id.to_string()));
        }

        tracing::debug!(
            episode_id = %episode_id,
            steps = trajectory.steps.len(),
            screenshots = trajectory.screenshots.len(),
            "Trajectory loaded"
        );

        Ok(trajectory)
    }
}

/// Locate the step JSON: `<instruction id>.json`, else the only JSON file.
async fn find_steps_file(directory: &Path, episode_id: &str) -> Result<PathBuf, TrajectoryError> {
    let preferred = directory.join(format!("{}.json", base_episode_id(episode_id)));
    if fs::try_exists(&preferred).await? {
        return Ok(preferred);
    }

    let mut candidates = Vec::new();
    let mut entries = match fs::read_dir(directory).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TrajectoryError::StepsFileNotFound(directory.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            candidates.push(path);
        }
    }

    match candidates.len() {
        1 => Ok(candidates.remove(0)),
        _ => Err(TrajectoryError::StepsFileNotFound(directory.to_path_buf())),
    }
}

/// Resolve a declared image path against the trajectory directory.
///
/// Tries the path as given (if absolute), relative to the directory, then the
/// bare file name inside the directory.
fn resolve_image(directory: &Path, declared: &str) -> Option<PathBuf> {
    let declared_path = Path::new(declared);
    let mut candidates = Vec::with_capacity(3);
    if declared_path.is_absolute() {
        candidates.push(declared_path.to_path_buf());
    }
    candidates.push(directory.join(declared_path));
    if let Some(name) = declared_path.file_name() {
        candidates.push(directory.join(name));
    }
    candidates.into_iter().find(|p| p.is_file())
}

/// Screenshot files in `directory`, ordered by step index.
async fn list_screenshots(directory: &Path) -> Result<Vec<PathBuf>, TrajectoryError> {
    let mut screenshots = Vec::new();
    let mut entries = fs::read_dir(directory).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| SCREENSHOT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_image && entry.file_type().await?.is_file() {
            screenshots.push(path);
        }
    }

    sort_by_step_index(&mut screenshots);
    Ok(screenshots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_episode(root: &Path, episode_id: &str, steps_file: &str, steps: &str, images: &[&str]) {
        let dir = root.join(episode_id);
        std::fs::create_dir_all(&dir).expect("create episode dir");
        std::fs::write(dir.join(steps_file), steps).expect("write steps");
        for image in images {
            std::fs::write(dir.join(image), b"png").expect("write image");
        }
    }

    const STEPS: &str = r#"[
        {"instruction": "Find a walking route home", "result_action_type": "click", "image_path": "MAP-7-1_0.png"},
        {"instruction": "", "result_action_type": "type", "result_action_text": "home", "image_path": "MAP-7-1_1.png"}
    ]"#;

    #[tokio::test]
    async fn test_list_sorted_directories_only() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        std::fs::create_dir(temp_dir.path().join("MAP-2-1")).expect("mkdir");
        std::fs::create_dir(temp_dir.path().join("MAP-1-1")).expect("mkdir");
        std::fs::write(temp_dir.path().join("ledger.jsonl"), "").expect("write file");

        let storage = TrajectoryStorage::new(temp_dir.path());
        let episodes = storage.list().await.expect("list");
        assert_eq!(episodes, vec!["MAP-1-1".to_string(), "MAP-2-1".to_string()]);
    }

    #[tokio::test]
    async fn test_load_trajectory() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        write_episode(
            temp_dir.path(),
            "MAP-7-1",
            "MAP-7.json",
            STEPS,
            &["MAP-7-1_1.png", "MAP-7-1_0.png", "MAP-7-1_10.jpg"],
        );

        let storage = TrajectoryStorage::new(temp_dir.path());
        let trajectory = storage.load("MAP-7-1").await.expect("load");

        assert_eq!(trajectory.instruction(), Some("Find a walking route home"));
        assert_eq!(trajectory.action_history(), vec!["click", "type 'home'"]);
        let names: Vec<_> = trajectory
            .screenshots
            .iter()
            .map(|p| p.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string())
            .collect();
        assert_eq!(names, vec!["MAP-7-1_0.png", "MAP-7-1_1.png", "MAP-7-1_10.jpg"]);
        assert_eq!(trajectory.step_images.len(), 2);
    }

    #[tokio::test]
    async fn test_load_falls_back_to_single_json() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        write_episode(
            temp_dir.path(),
            "MAP-7-1",
            "steps.json",
            STEPS,
            &["MAP-7-1_0.png", "MAP-7-1_1.png"],
        );

        let storage = TrajectoryStorage::new(temp_dir.path());
        assert!(storage.load("MAP-7-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_step_image_is_reported() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        write_episode(temp_dir.path(), "MAP-7-1", "MAP-7.json", STEPS, &["MAP-7-1_0.png"]);

        let storage = TrajectoryStorage::new(temp_dir.path());
        match storage.load("MAP-7-1").await {
            Err(TrajectoryError::MissingResources { paths, .. }) => {
                assert_eq!(paths.len(), 1);
                assert!(paths[0].ends_with("MAP-7-1_1.png"));
            }
            other => panic!("expected missing resources, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_steps_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        std::fs::create_dir(temp_dir.path().join("MAP-9-1")).expect("mkdir");

        let storage = TrajectoryStorage::new(temp_dir.path());
        assert!(matches!(
            storage.load("MAP-9-1").await,
            Err(TrajectoryError::StepsFileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_instruction() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        write_episode(
            temp_dir.path(),
            "MAP-3-1",
            "MAP-3.json",
            r#"[{"result_action_type": "click"}]"#,
            &[],
        );

        let storage = TrajectoryStorage::new(temp_dir.path());
        assert!(matches!(
            storage.load("MAP-3-1").await,
            Err(TrajectoryError::MissingInstruction(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        write_episode(temp_dir.path(), "MAP-4-1", "MAP-4.json", "{not json", &[]);

        let storage = TrajectoryStorage::new(temp_dir.path());
        assert!(matches!(
            storage.load("MAP-4-1").await,
            Err(TrajectoryError::InvalidJson { .. })
        ));
    }
}
