//! Event formatting for the console

use std::sync::Arc;

use com_detect::{PortId, PortScanner, SerialPortInfo};
use com_watch::WatcherEvent;
use tracing::debug;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

/// Formats watcher events, enriching arrivals with USB details when available
pub struct Printer {
    format: Format,
    scanner: Option<Arc<PortScanner>>,
}

impl Printer {
    pub fn new(format: Format, scanner: Option<Arc<PortScanner>>) -> Self {
        Self { format, scanner }
    }

    /// Look up USB details of a port that just appeared
    ///
    /// Blocks on enumeration; call from the printing thread only.
    fn details(&self, port: &PortId) -> Option<SerialPortInfo> {
        let scanner = self.scanner.as_ref()?;
        match scanner.describe(port) {
            Ok(info) => info,
            Err(e) => {
                debug!("No details for {}: {}", port, e);
                None
            }
        }
    }

    /// Render one event
    pub fn render(&self, event: &WatcherEvent) -> String {
        let details = match event {
            WatcherEvent::PortAdded(port) => self.details(port),
            _ => None,
        };
        match self.format {
            Format::Text => render_text(event, details.as_ref()),
            Format::Json => render_json(event, details.as_ref()),
        }
    }

    /// Render and print one event
    pub fn print(&self, event: &WatcherEvent) {
        println!("{}", self.render(event));
    }
}

fn render_text(event: &WatcherEvent, details: Option<&SerialPortInfo>) -> String {
    match event {
        WatcherEvent::Started => "Watching for serial ports (Ctrl+C to stop)".to_string(),
        WatcherEvent::Stopped => "Stopped watching".to_string(),
        WatcherEvent::PortAdded(port) => match details {
            Some(info) => format!("+ {}", info.label()),
            None => format!("+ {}", port),
        },
        WatcherEvent::PortRemoved(port) => format!("- {}", port),
    }
}

fn render_json(event: &WatcherEvent, details: Option<&SerialPortInfo>) -> String {
    let mut value = serde_json::to_value(event).unwrap_or_default();
    if let (Some(info), Some(object)) = (details, value.as_object_mut()) {
        if let Some(product) = &info.product {
            object.insert("product".to_string(), product.clone().into());
        }
        if let (Some(vid), Some(pid)) = (info.vid, info.pid) {
            object.insert("usb_id".to_string(), format!("{:04x}:{:04x}", vid, pid).into());
        }
    }
    value.to_string()
}

/// Render the listing printed by `--list`
pub fn render_listing(ports: &[SerialPortInfo], format: Format) -> Vec<String> {
    match format {
        Format::Text => ports.iter().map(SerialPortInfo::label).collect(),
        Format::Json => ports
            .iter()
            .map(|info| {
                serde_json::json!({
                    "port": info.port,
                    "number": info.port.number(),
                    "product": info.product,
                    "manufacturer": info.manufacturer,
                })
                .to_string()
            })
            .collect(),
    }
}
