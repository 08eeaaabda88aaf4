//! Snapshot reconciliation
//!
//! The change signal is coarse: it says that *something* in the device
//! topology changed, not what or in which direction. Truth is re-derived by
//! diffing a fresh snapshot against the remembered one.

use std::collections::BTreeSet;

use com_detect::PortId;

use crate::events::WatcherEvent;

/// Difference between two port snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortDiff {
    /// Ports present now but not before
    pub added: BTreeSet<PortId>,
    /// Ports present before but not now
    pub removed: BTreeSet<PortId>,
}

impl PortDiff {
    /// Compute `current - previous` and `previous - current`
    pub fn between(previous: &BTreeSet<PortId>, current: &BTreeSet<PortId>) -> Self {
        Self {
            added: current.difference(previous).cloned().collect(),
            removed: previous.difference(current).cloned().collect(),
        }
    }

    /// True when the snapshots were equal
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Number of port changes
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len()
    }

    /// Bring `ports` in line with the snapshot this diff was computed against
    pub fn apply(&self, ports: &mut BTreeSet<PortId>) {
        for port in &self.removed {
            ports.remove(port);
        }
        ports.extend(self.added.iter().cloned());
    }

    /// One event per change: additions first, then removals
    pub fn events(&self) -> impl Iterator<Item = WatcherEvent> + '_ {
        self.added
            .iter()
            .cloned()
            .map(WatcherEvent::PortAdded)
            .chain(self.removed.iter().cloned().map(WatcherEvent::PortRemoved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports(names: &[&str]) -> BTreeSet<PortId> {
        names.iter().map(|n| PortId::from(*n)).collect()
    }

    #[test]
    fn test_single_addition() {
        let diff = PortDiff::between(&ports(&["COM3"]), &ports(&["COM3", "COM4"]));
        assert_eq!(diff.added, ports(&["COM4"]));
        assert!(diff.removed.is_empty());
        assert_eq!(diff.len(), 1);
    }

    #[test]
    fn test_single_removal() {
        let diff = PortDiff::between(&ports(&["COM3", "COM4"]), &ports(&["COM4"]));
        assert!(diff.added.is_empty());
        assert_eq!(diff.removed, ports(&["COM3"]));
    }

    #[test]
    fn test_simultaneous_add_and_remove() {
        let mut existing = ports(&["COM3", "COM5"]);
        let current = ports(&["COM4", "COM5", "COM6"]);
        let diff = PortDiff::between(&existing, &current);

        assert_eq!(diff.added, ports(&["COM4", "COM6"]));
        assert_eq!(diff.removed, ports(&["COM3"]));

        diff.apply(&mut existing);
        assert_eq!(existing, current);
    }

    #[test]
    fn test_equal_snapshots_are_empty() {
        let diff = PortDiff::between(&ports(&["COM3"]), &ports(&["COM3"]));
        assert!(diff.is_empty());
        assert_eq!(diff.events().count(), 0);
    }

    #[test]
    fn test_events_cover_every_change_once() {
        let diff = PortDiff::between(&ports(&["A", "B"]), &ports(&["B", "C", "D"]));
        let events: Vec<_> = diff.events().collect();
        assert_eq!(
            events,
            vec![
                WatcherEvent::PortAdded(PortId::from("C")),
                WatcherEvent::PortAdded(PortId::from("D")),
                WatcherEvent::PortRemoved(PortId::from("A")),
            ]
        );
    }
}
