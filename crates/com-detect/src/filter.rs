//! Port filter policies
//!
//! Enumerators return a best-effort set. Filters decide which of those ports
//! the watcher should treat as real.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::port::PortId;

/// Reserved port name ignored by default
#[cfg(windows)]
pub const DEFAULT_RESERVED_PORT: &str = "COM1";

/// Reserved port name ignored by default
#[cfg(not(windows))]
pub const DEFAULT_RESERVED_PORT: &str = "/dev/ttyS0";

/// Decides whether an enumerated port is kept
pub trait PortFilter: Send + Sync {
    /// Return true to keep the port
    fn accepts(&self, port: &PortId) -> bool;
}

impl<F> PortFilter for F
where
    F: Fn(&PortId) -> bool + Send + Sync,
{
    fn accepts(&self, port: &PortId) -> bool {
        self(port)
    }
}

/// Drops one reserved port (COM1 style debug/virtual port) while enabled
#[derive(Debug)]
pub struct ReservedPortFilter {
    reserved: PortId,
    enabled: AtomicBool,
}

impl ReservedPortFilter {
    /// Create a filter for `reserved`, initially enabled or not
    pub fn new(reserved: PortId, enabled: bool) -> Self {
        Self {
            reserved,
            enabled: AtomicBool::new(enabled),
        }
    }

    /// The port this filter drops
    pub fn reserved(&self) -> &PortId {
        &self.reserved
    }

    /// Whether the reserved port is currently dropped
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Toggle the filter
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

impl Default for ReservedPortFilter {
    fn default() -> Self {
        Self::new(PortId::from(DEFAULT_RESERVED_PORT), true)
    }
}

impl PortFilter for ReservedPortFilter {
    fn accepts(&self, port: &PortId) -> bool {
        !(self.is_enabled() && *port == self.reserved)
    }
}

/// Drops ports whose name contains any of the given patterns
#[derive(Debug, Clone, Default)]
pub struct SkipPatternFilter {
    patterns: Vec<String>,
}

impl SkipPatternFilter {
    /// Create a filter from substrings to skip
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    /// Check a free-form string (port name, product, caption) against the patterns
    pub fn matches(&self, text: &str) -> bool {
        self.patterns.iter().any(|p| text.contains(p.as_str()))
    }
}

impl PortFilter for SkipPatternFilter {
    fn accepts(&self, port: &PortId) -> bool {
        !self.matches(port.as_str())
    }
}
