//! Serial Port Watcher
//!
//! This crate watches a host for serial ports being attached and removed and
//! notifies subscribers of every change.
//!
//! # Architecture
//!
//! The watcher consumes two collaborators:
//! - A [`PortEnumerator`](com_detect::PortEnumerator) answering "which ports
//!   are present right now"
//! - A [`ChangeSignal`] firing whenever *some* device topology change may
//!   have happened, without saying what changed
//!
//! Every signal triggers a reconciliation: a fresh enumerator query diffed
//! against the remembered snapshot. Each difference becomes a
//! [`WatcherEvent`] handed to the [`ExecutionContext`] captured when the
//! watcher was built.
//!
//! # Example
//!
//! ```rust,no_run
//! use com_watch::{PortWatcher, WatcherConfig};
//!
//! # async fn run() -> Result<(), com_watch::WatchError> {
//! let watcher = PortWatcher::system(WatcherConfig::default()).await?;
//! watcher.on_port_added(|port| println!("Connected: {}", port));
//! watcher.on_port_removed(|port| println!("Disconnected: {}", port));
//! watcher.start_watching()?;
//!
//! // ... later
//! watcher.stop_watching_and_wait().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod diff;
pub mod error;
pub mod events;
pub mod registry;
pub mod signal;
pub mod state;
pub mod watcher;

pub use config::WatcherConfig;
pub use context::{channel_context, ChannelContext, ContextQueue, ExecutionContext, Job, TokioContext};
pub use diff::PortDiff;
pub use error::{DispatchError, WatchError};
pub use events::{ChangeDirection, PortChangeEvent, WatcherEvent};
pub use registry::{DiagnosticHandler, EventHandler, SubscriptionId};
pub use signal::{
    ChangeSignal, PollingSignal, SignalCallback, SignalHandle, StopConfirmation,
    DEFAULT_POLL_INTERVAL,
};
pub use state::WatcherState;
pub use watcher::{PortWatcher, PortWatcherBuilder};

// Re-export detection types used in the public API
pub use com_detect::{DetectError, PortEnumerator, PortFilter, PortId};
