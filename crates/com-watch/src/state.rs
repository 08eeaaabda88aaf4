//! Watcher lifecycle state

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a port watcher
///
/// ```text
/// None -> Started -> StopRequested -> Stopped
///            ^                           |
///            +---------------------------+
/// ```
///
/// `StopRequested` exists because tearing down the change subscription is
/// itself asynchronous. Only the teardown confirmation moves the watcher to
/// `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WatcherState {
    /// Constructed, never started
    #[default]
    None,
    /// Change subscription active
    Started,
    /// Stop requested, teardown in flight
    StopRequested,
    /// Teardown confirmed
    Stopped,
}

impl WatcherState {
    /// Whether `start_watching` is legal in this state
    pub fn can_start(self) -> bool {
        matches!(self, WatcherState::None | WatcherState::Stopped)
    }

    /// Whether `stop_watching` is legal in this state
    pub fn can_stop(self) -> bool {
        self == WatcherState::Started
    }

    /// Upper-case name used in messages
    pub fn name(self) -> &'static str {
        match self {
            WatcherState::None => "NONE",
            WatcherState::Started => "STARTED",
            WatcherState::StopRequested => "STOP_REQUESTED",
            WatcherState::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
