//! Trajectory data types for recorded mobile-agent runs.
//!
//! A trajectory is the ordered list of steps the agent took on one task. The
//! step JSON is produced by the recorder; screenshots live next to it in the
//! same directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Action type whose text payload is rendered into the action history.
pub const TYPE_ACTION: &str = "type";

/// One recorded step of an agent run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Task description. Only meaningfully populated on the first step.
    #[serde(default)]
    pub instruction: Option<String>,

    /// Categorical action tag (e.g. "click", "type", "scroll").
    #[serde(default)]
    pub result_action_type: Option<String>,

    /// Free text for text-entry actions.
    #[serde(default)]
    pub result_action_text: Option<String>,

    /// Screenshot reference, relative to the trajectory directory.
    #[serde(default)]
    pub image_path: Option<String>,

    /// Recorder step identifier (integer or string, passed through).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<serde_json::Value>,
}

impl Step {
    /// Human-readable rendering of this step's action.
    ///
    /// Text entry renders as `type '<text>'`; everything else as the bare
    /// action type.
    pub fn render_action(&self) -> String {
        match self.result_action_type.as_deref() {
            Some(TYPE_ACTION) => format!(
                "type '{}'",
                self.result_action_text.as_deref().unwrap_or_default()
            ),
            Some(action) if !action.trim().is_empty() => action.to_string(),
            _ => "unknown".to_string(),
        }
    }
}

/// A loaded trajectory ready for judging.
#[derive(Debug, Clone)]
pub struct Trajectory {
    /// Directory name of the trajectory, e.g. `MAP-1466028412-3`.
    pub episode_id: String,
    /// Directory holding the step JSON and screenshots.
    pub directory: PathBuf,
    /// Recorded steps in order.
    pub steps: Vec<Step>,
    /// Screenshot files ordered by step index.
    pub screenshots: Vec<PathBuf>,
    /// Images declared by the steps' `image_path`, resolved against `directory`.
    pub step_images: Vec<PathBuf>,
}

impl Trajectory {
    /// The task instruction: the first non-empty `instruction` across steps.
    pub fn instruction(&self) -> Option<&str> {
        self.steps
            .iter()
            .filter_map(|s| s.instruction.as_deref())
            .map(str::trim)
            .find(|s| !s.is_empty())
    }

    /// Rendered action of every step, in order.
    pub fn action_history(&self) -> Vec<String> {
        self.steps.iter().map(Step::render_action).collect()
    }

    /// Instruction id shared by every episode of the same task.
    pub fn base_id(&self) -> &str {
        base_episode_id(&self.episode_id)
    }
}

/// Strip the trailing `-<suffix>` of an episode id.
///
/// `MAP-1466028412-3` becomes `MAP-1466028412`; ids without a dash are
/// returned unchanged.
pub fn base_episode_id(episode_id: &str) -> &str {
    episode_id
        .rsplit_once('-')
        .map(|(base, _)| base)
        .unwrap_or(episode_id)
}

/// Step index encoded in a screenshot filename.
///
/// The recorder names screenshots `<anything>_<index>.<ext>`; names without a
/// numeric suffix yield `None` and sort after every indexed screenshot.
pub fn step_index(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    stem.rsplit('_').next()?.parse().ok()
}

/// Sort screenshot paths by ascending step index, unindexed names last.
pub fn sort_by_step_index(paths: &mut [PathBuf]) {
    paths.sort_by(|a, b| {
        let ka = step_index(a);
        let kb = step_index(b);
        (ka.is_none(), ka, a.file_name()).cmp(&(kb.is_none(), kb, b.file_name()))
    });
}
