//! Port enumeration capability
//!
//! The watcher only needs a point-in-time answer to "which serial ports are
//! present right now". Anything able to produce that answer implements
//! [`PortEnumerator`]: the system scanner, or a simulated enumerator in tests.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::DetectError;
use crate::port::PortId;

/// Source of serial port snapshots
///
/// `query` may block on OS I/O. Callers running inside an async runtime
/// should invoke it from a blocking thread.
pub trait PortEnumerator: Send + Sync {
    /// Return the set of currently present ports
    fn query(&self) -> Result<BTreeSet<PortId>, DetectError>;
}

impl<T: PortEnumerator + ?Sized> PortEnumerator for Arc<T> {
    fn query(&self) -> Result<BTreeSet<PortId>, DetectError> {
        (**self).query()
    }
}

impl<T: PortEnumerator + ?Sized> PortEnumerator for Box<T> {
    fn query(&self) -> Result<BTreeSet<PortId>, DetectError> {
        (**self).query()
    }
}
