//! Recorded mobile-agent trajectories.
//!
//! A trajectory directory holds the recorder's step JSON and one screenshot
//! per step:
//!
//! ```text
//! map/
//!   MAP-1466028412-1/
//!     MAP-1466028412.json
//!     MAP-1466028412-1_0.png
//!     MAP-1466028412-1_1.png
//! ```
//!
//! Trajectories are read-only inputs; nothing in this crate writes to them.

pub mod storage;
pub mod types;

pub use storage::TrajectoryStorage;
pub use types::{base_episode_id, sort_by_step_index, step_index, Step, Trajectory};
