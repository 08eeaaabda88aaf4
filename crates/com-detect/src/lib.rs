//! Serial Port Detection Library
//!
//! This crate provides serial port identifiers, the [`PortEnumerator`]
//! capability consumed by the port watcher, a system scanner backed by the
//! `serialport` crate, and filter policies applied to enumerated ports.
//!
//! # Example
//!
//! ```rust,no_run
//! use com_detect::{PortEnumerator, PortScanner};
//!
//! let scanner = PortScanner::new();
//! let ports = scanner.query().unwrap();
//!
//! for port in ports {
//!     println!("Found port: {}", port);
//! }
//! ```

pub mod enumerator;
pub mod error;
pub mod filter;
pub mod port;
pub mod scanner;

pub use enumerator::PortEnumerator;
pub use error::DetectError;
pub use filter::{PortFilter, ReservedPortFilter, SkipPatternFilter, DEFAULT_RESERVED_PORT};
pub use port::PortId;
pub use scanner::{PortScanner, ScannerConfig, SerialPortInfo};
