//! Port Watcher Simulation Library
//!
//! This crate provides simulated collaborators for exercising the port
//! watcher without physical serial hardware. It includes:
//!
//! - **SimulatedEnumerator**: a port set that tests attach/detach ports on,
//!   with scripted snapshots, failure injection and query gates
//! - **ManualSignal**: a change signal fired by hand, with configurable
//!   teardown confirmation
//!
//! # Example
//!
//! ```rust
//! use com_sim::{ManualSignal, SimulatedEnumerator};
//! use com_watch::PortWatcher;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let ports = Arc::new(SimulatedEnumerator::new(["COM3"]));
//! let signal = ManualSignal::new();
//! let watcher = PortWatcher::builder(ports.clone(), signal.clone())
//!     .inline()
//!     .build()
//!     .await
//!     .unwrap();
//! watcher.start_watching().unwrap();
//!
//! ports.attach("COM4");
//! signal.fire();
//! assert_eq!(watcher.known_ports().len(), 2);
//! # }
//! ```

pub mod enumerator;
pub mod signal;

pub use enumerator::SimulatedEnumerator;
pub use signal::{ConfirmMode, ManualSignal};
