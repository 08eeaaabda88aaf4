//! Serial port scanner
//!
//! This module provides serial port enumeration backed by the `serialport` crate.

use std::collections::BTreeSet;

use serialport::{available_ports, SerialPortType};
use tracing::{debug, info};

use crate::enumerator::PortEnumerator;
use crate::error::DetectError;
use crate::filter::SkipPatternFilter;
use crate::port::PortId;

/// Information about a serial port
#[derive(Debug, Clone)]
pub struct SerialPortInfo {
    /// Port identifier (e.g., /dev/ttyUSB0, COM3)
    pub port: PortId,
    /// USB Vendor ID (if USB)
    pub vid: Option<u16>,
    /// USB Product ID (if USB)
    pub pid: Option<u16>,
    /// USB serial number (if available)
    pub serial_number: Option<String>,
    /// USB manufacturer string
    pub manufacturer: Option<String>,
    /// USB product string
    pub product: Option<String>,
}

impl SerialPortInfo {
    /// Create from serialport crate's port info
    fn from_serialport(name: String, port_type: &SerialPortType) -> Self {
        match port_type {
            SerialPortType::UsbPort(usb) => Self {
                port: PortId::from(name),
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                serial_number: usb.serial_number.clone(),
                manufacturer: usb.manufacturer.clone(),
                product: usb.product.clone(),
            },
            _ => Self {
                port: PortId::from(name),
                vid: None,
                pid: None,
                serial_number: None,
                manufacturer: None,
                product: None,
            },
        }
    }

    /// Display label: "COM3 (FT232R)" or just the port name
    pub fn label(&self) -> String {
        match &self.product {
            Some(product) => format!("{} ({})", self.port, product),
            None => self.port.to_string(),
        }
    }
}

/// Serial port scanner configuration
#[derive(Debug, Clone, Default)]
pub struct ScannerConfig {
    /// Skip ports whose name or product contains one of these patterns
    pub skip_patterns: Vec<String>,
}

/// Serial port scanner
pub struct PortScanner {
    skip: SkipPatternFilter,
}

impl PortScanner {
    /// Create a new scanner with default configuration
    pub fn new() -> Self {
        Self::with_config(ScannerConfig {
            skip_patterns: vec![
                // Bluetooth ports on macOS
                "Bluetooth".to_string(),
                // Debug/logging ports
                "debug".to_string(),
                // Modem/phone emulators exposing a COM port
                "emulator".to_string(),
            ],
        })
    }

    /// Create a scanner with custom configuration
    pub fn with_config(config: ScannerConfig) -> Self {
        Self {
            skip: SkipPatternFilter::new(config.skip_patterns),
        }
    }

    /// Enumerate all available serial ports
    pub fn enumerate_ports(&self) -> Result<Vec<SerialPortInfo>, DetectError> {
        debug!("Enumerating serial ports...");
        let ports = available_ports().map_err(|e| DetectError::EnumerationFailed(e.to_string()))?;

        let result: Vec<_> = ports
            .into_iter()
            .map(|p| SerialPortInfo::from_serialport(p.port_name, &p.port_type))
            .filter(|p| !self.should_skip_port(p))
            .collect();

        if result.is_empty() {
            debug!("No serial ports found");
        } else {
            debug!("Found {} serial port(s)", result.len());
            for port in &result {
                let desc = port.product.as_deref().unwrap_or("Unknown");
                debug!("  {} - {}", port.port, desc);
            }
        }

        Ok(result)
    }

    /// Look up details for a single port
    pub fn describe(&self, port: &PortId) -> Result<Option<SerialPortInfo>, DetectError> {
        Ok(self
            .enumerate_ports()?
            .into_iter()
            .find(|info| info.port == *port))
    }

    /// Check if a port should be skipped
    fn should_skip_port(&self, port: &SerialPortInfo) -> bool {
        if self.skip.matches(port.port.as_str()) {
            return true;
        }
        match &port.product {
            Some(product) => {
                let skip = self.skip.matches(product);
                if skip {
                    info!("Skipping {} ({})", port.port, product);
                }
                skip
            }
            None => false,
        }
    }
}

impl Default for PortScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl PortEnumerator for PortScanner {
    fn query(&self) -> Result<BTreeSet<PortId>, DetectError> {
        Ok(self
            .enumerate_ports()?
            .into_iter()
            .map(|info| info.port)
            .collect())
    }
}
