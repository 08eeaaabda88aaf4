//! Events raised by the port watcher

use com_detect::PortId;
use serde::{Deserialize, Serialize};

/// Direction of a port change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDirection {
    /// The port appeared
    Added,
    /// The port disappeared
    Removed,
}

/// One detected port change
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortChangeEvent {
    /// Port that changed
    pub port: PortId,
    /// Whether it was added or removed
    pub direction: ChangeDirection,
}

impl PortChangeEvent {
    /// A port arrival
    pub fn added(port: PortId) -> Self {
        Self {
            port,
            direction: ChangeDirection::Added,
        }
    }

    /// A port removal
    pub fn removed(port: PortId) -> Self {
        Self {
            port,
            direction: ChangeDirection::Removed,
        }
    }
}

/// Everything a watcher subscriber can observe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "port", rename_all = "snake_case")]
pub enum WatcherEvent {
    /// Watching has started
    Started,
    /// The change subscription has been torn down
    Stopped,
    /// A serial port appeared
    PortAdded(PortId),
    /// A serial port disappeared
    PortRemoved(PortId),
}

impl WatcherEvent {
    /// The port change carried by this event, if any
    pub fn port_change(&self) -> Option<PortChangeEvent> {
        match self {
            WatcherEvent::PortAdded(port) => Some(PortChangeEvent::added(port.clone())),
            WatcherEvent::PortRemoved(port) => Some(PortChangeEvent::removed(port.clone())),
            WatcherEvent::Started | WatcherEvent::Stopped => None,
        }
    }

    /// Check if this is a lifecycle event
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, WatcherEvent::Started | WatcherEvent::Stopped)
    }
}

impl From<PortChangeEvent> for WatcherEvent {
    fn from(change: PortChangeEvent) -> Self {
        match change.direction {
            ChangeDirection::Added => WatcherEvent::PortAdded(change.port),
            ChangeDirection::Removed => WatcherEvent::PortRemoved(change.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_classification() {
        assert!(WatcherEvent::Started.is_lifecycle());
        assert!(WatcherEvent::Stopped.is_lifecycle());
        assert!(!WatcherEvent::PortAdded(PortId::from("COM3")).is_lifecycle());
        assert_eq!(WatcherEvent::Stopped.port_change(), None);
    }

    #[test]
    fn test_port_change_conversion() {
        let event = WatcherEvent::PortRemoved(PortId::from("COM4"));
        let change = event.port_change().unwrap();
        assert_eq!(change.direction, ChangeDirection::Removed);
        assert_eq!(change.port.as_str(), "COM4");
        assert_eq!(WatcherEvent::from(change), event);
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_string(&WatcherEvent::PortAdded(PortId::from("COM3"))).unwrap();
        assert_eq!(json, r#"{"event":"port_added","port":"COM3"}"#);

        let json = serde_json::to_string(&WatcherEvent::Started).unwrap();
        assert_eq!(json, r#"{"event":"started"}"#);
    }
}
