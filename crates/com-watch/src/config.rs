//! Watcher configuration

use std::time::Duration;

use com_detect::{PortId, DEFAULT_RESERVED_PORT};

use crate::signal::DEFAULT_POLL_INTERVAL;

/// Port watcher configuration
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Drop the reserved port from every snapshot
    pub ignore_reserved_port: bool,
    /// The port treated as reserved (COM1 on Windows)
    pub reserved_port: PortId,
    /// Period of the polling change signal used by [`PortWatcher::system`](crate::PortWatcher::system)
    pub poll_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            ignore_reserved_port: true,
            reserved_port: PortId::from(DEFAULT_RESERVED_PORT),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}
