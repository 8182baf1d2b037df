//! Lifecycle state of the hub

use serde::{Deserialize, Serialize};

/// Lifecycle state of the hub
///
/// Components set up while the hub is already `Running` will not see
/// `homeassistant_started` and must act on their own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoreState {
    #[default]
    NotRunning,
    Starting,
    Running,
    Stopping,
    FinalWrite,
    Stopped,
}

impl CoreState {
    /// True while the hub is starting or running
    pub fn is_running(self) -> bool {
        matches!(self, CoreState::Starting | CoreState::Running)
    }
}

impl std::fmt::Display for CoreState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CoreState::NotRunning => "NOT_RUNNING",
            CoreState::Starting => "STARTING",
            CoreState::Running => "RUNNING",
            CoreState::Stopping => "STOPPING",
            CoreState::FinalWrite => "FINAL_WRITE",
            CoreState::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}
