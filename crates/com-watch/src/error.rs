//! Error types for the port watcher

use com_detect::DetectError;
use thiserror::Error;

use crate::state::WatcherState;

/// Errors raised by an execution context when handing over a job
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The consumer side of the context has gone away
    #[error("execution context is closed")]
    ContextClosed,

    /// The context refused the job
    #[error("execution context rejected job: {0}")]
    Rejected(String),
}

/// Errors that can occur in the port watcher
#[derive(Debug, Error)]
pub enum WatchError {
    /// Lifecycle operation called in a state that does not allow it
    #[error("cannot {operation} while watcher is {state}")]
    InvalidState {
        /// Operation that was attempted
        operation: &'static str,
        /// State the watcher was in
        state: WatcherState,
    },

    /// The port enumerator query failed
    #[error("port enumeration failed: {0}")]
    Enumeration(#[from] DetectError),

    /// Event delivery through the execution context failed
    #[error("event dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
}

impl WatchError {
    /// Check if this is a lifecycle precondition failure
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, WatchError::InvalidState { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_message_names_state() {
        let err = WatchError::InvalidState {
            operation: "stop watching",
            state: WatcherState::StopRequested,
        };
        assert!(err.is_invalid_state());
        assert_eq!(
            err.to_string(),
            "cannot stop watching while watcher is STOP_REQUESTED"
        );
    }

    #[test]
    fn test_dispatch_and_enumeration_are_distinct() {
        let dispatch: WatchError = DispatchError::ContextClosed.into();
        let enumeration: WatchError = DetectError::EnumerationFailed("boom".into()).into();
        assert!(matches!(dispatch, WatchError::Dispatch(_)));
        assert!(matches!(enumeration, WatchError::Enumeration(_)));
        assert!(!dispatch.is_invalid_state());
    }
}
