//! Subscriber registries

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::error::WatchError;
use crate::events::WatcherEvent;

/// Handler for watcher events
pub type EventHandler = std::sync::Arc<dyn Fn(&WatcherEvent) + Send + Sync>;

/// Handler for diagnostics (enumeration and dispatch failures)
pub type DiagnosticHandler = std::sync::Arc<dyn Fn(&WatchError) + Send + Sync>;

/// Token returned by subscription methods, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

// Shared by every registry so ids never collide across handler kinds
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Ordered list of handlers that can change while events are in flight
///
/// Emitters take a snapshot, so a handler added during delivery only sees
/// later events.
pub(crate) struct Registry<H> {
    handlers: RwLock<Vec<(SubscriptionId, H)>>,
}

impl<H: Clone> Registry<H> {
    pub(crate) fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, handler: H) -> SubscriptionId {
        let id = SubscriptionId(NEXT_ID.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, handler));
        id
    }

    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    pub(crate) fn snapshot(&self) -> Vec<H> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_unique_across_registries() {
        let events: Registry<u8> = Registry::new();
        let diagnostics: Registry<u8> = Registry::new();
        let a = events.add(1);
        let b = diagnostics.add(2);
        assert_ne!(a, b);
        assert!(!events.remove(b));
    }

    #[test]
    fn test_add_remove_snapshot() {
        let registry: Registry<&'static str> = Registry::new();
        let a = registry.add("a");
        let b = registry.add("b");
        assert_ne!(a, b);
        assert_eq!(registry.snapshot(), vec!["a", "b"]);

        assert!(registry.remove(a));
        assert!(!registry.remove(a));
        assert_eq!(registry.snapshot(), vec!["b"]);
    }
}
