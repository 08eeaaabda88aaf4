//! Serial Port Monitor
//!
//! Prints serial ports as they are attached to or removed from this host.

mod output;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use com_detect::{PortFilter, PortScanner, ReservedPortFilter};
use com_watch::{channel_context, PollingSignal, PortWatcher};
use output::{render_listing, Format, Printer};
use settings::Settings;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "comwatch")]
#[command(
    author,
    version,
    about = "Watch for serial (COM) ports being attached and removed"
)]
#[command(long_about = "
Watches this host for serial ports appearing and disappearing and prints one
line per change.

EXAMPLES:
    # Watch with saved or default settings
    comwatch

    # List the ports present right now and exit
    comwatch --list

    # JSON lines, including the reserved port, polling every 250ms
    comwatch --json --include-reserved --poll-ms 250

CONFIGURATION:
    Settings are read from --config, else $XDG_CONFIG_HOME/comwatch/settings.json
    or ~/.config/comwatch/settings.json, else built-in defaults.
")]
struct Args {
    /// Path to a settings file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// List current ports and exit
    #[arg(short, long)]
    list: bool,

    /// Print JSON lines instead of text
    #[arg(long)]
    json: bool,

    /// Polling interval in milliseconds
    #[arg(long, value_name = "MS")]
    poll_ms: Option<u64>,

    /// Do not hide the reserved port
    #[arg(long)]
    include_reserved: bool,

    /// Write the effective settings back to the settings file
    #[arg(long)]
    save: bool,
}

impl Args {
    /// Command-line flags take precedence over saved settings
    fn apply_to(&self, settings: &mut Settings) {
        if self.json {
            settings.json_output = true;
        }
        if let Some(poll_ms) = self.poll_ms {
            settings.poll_interval_ms = poll_ms;
        }
        if self.include_reserved {
            settings.ignore_reserved_port = false;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "comwatch=info,com_monitor=info,com_detect=info,com_watch=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let mut settings = match &args.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load(),
    };
    args.apply_to(&mut settings);

    if args.save {
        let path = settings.save(args.config.as_deref())?;
        info!("Saved settings to {}", path.display());
    }

    let format = if settings.json_output {
        Format::Json
    } else {
        Format::Text
    };
    let scanner = Arc::new(PortScanner::with_config(settings.scanner_config()));

    if args.list {
        return list_ports(&settings, scanner, format).await;
    }
    watch_ports(&settings, scanner, format).await
}

/// Print the ports present right now
async fn list_ports(
    settings: &Settings,
    scanner: Arc<PortScanner>,
    format: Format,
) -> anyhow::Result<()> {
    let config = settings.watcher_config();
    let reserved = ReservedPortFilter::new(config.reserved_port, config.ignore_reserved_port);

    let ports = tokio::task::spawn_blocking(move || scanner.enumerate_ports())
        .await
        .context("enumeration task failed")?
        .context("failed to enumerate serial ports")?;
    let ports: Vec<_> = ports
        .into_iter()
        .filter(|info| reserved.accepts(&info.port))
        .collect();

    if ports.is_empty() && format == Format::Text {
        println!("No serial ports found");
    }
    for line in render_listing(&ports, format) {
        println!("{}", line);
    }
    Ok(())
}

/// Watch until Ctrl+C
async fn watch_ports(
    settings: &Settings,
    scanner: Arc<PortScanner>,
    format: Format,
) -> anyhow::Result<()> {
    let config = settings.watcher_config();
    info!(
        "Starting comwatch (poll every {:?}, reserved {} {})",
        config.poll_interval,
        config.reserved_port,
        if config.ignore_reserved_port {
            "hidden"
        } else {
            "shown"
        }
    );

    // Events are printed on a dedicated thread draining the context queue
    let (context, mut queue) = channel_context();
    let printing = std::thread::Builder::new()
        .name("comwatch-print".to_string())
        .spawn(move || while queue.blocking_run_next() {})
        .context("failed to spawn printing thread")?;

    let watcher = PortWatcher::builder(scanner.clone(), PollingSignal::new(config.poll_interval))
        .config(config)
        .context(context)
        .build()
        .await
        .context("failed to read the initial set of serial ports")?;

    for port in watcher.known_ports() {
        info!("Present: {}", port);
    }

    let printer = Printer::new(format, Some(scanner));
    watcher.subscribe(move |event| printer.print(event));
    watcher.start_watching()?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    watcher.stop_watching_and_wait().await?;
    // Dropping the watcher closes the context and lets the printing thread finish
    drop(watcher);
    if printing.join().is_err() {
        anyhow::bail!("printing thread panicked");
    }
    Ok(())
}
