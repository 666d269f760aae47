use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use parcel_rerouter::browser::FantocciniLauncher;
use parcel_rerouter::calendar::CalDavGate;
use parcel_rerouter::carriers::{CarrierRegistry, DhlCarrier};
use parcel_rerouter::channels::build_mailboxes;
use parcel_rerouter::config::{AppConfig, CliOverrides, RunSettings};
use parcel_rerouter::logging;
use parcel_rerouter::pipeline::Workflow;

/// Scan mailboxes for parcel notifications and redirect shipments to a
/// drop-off spot when nobody is home on the delivery day.
#[derive(Parser, Debug)]
#[command(name = "parcel-rerouter", version)]
struct Cli {
    /// YAML configuration file.
    #[arg(long, env = "PARCEL_REROUTER_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Only read messages received within this many days.
    #[arg(long)]
    lookback_days: Option<u32>,

    /// Postal code used to open tracking pages.
    #[arg(long = "zip")]
    zip_code: Option<String>,

    /// Drop-off location text entered on the carrier form.
    #[arg(long = "location")]
    custom_location: Option<String>,

    /// Stop before the final confirmation click (true/false).
    #[arg(long, value_name = "BOOL")]
    dry_run: Option<bool>,

    /// Run the browser without a window (true/false).
    #[arg(long, value_name = "BOOL")]
    headless: Option<bool>,

    /// Per-element wait in seconds for carrier pages.
    #[arg(long = "timeout", value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Also write logs to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            lookback_days: self.lookback_days,
            zip_code: self.zip_code.clone(),
            custom_location: self.custom_location.clone(),
            dry_run: self.dry_run,
            headless: self.headless,
            timeout_secs: self.timeout_secs,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let _log_guard = logging::init(cli.log_file.as_deref());
    info!(version = env!("CARGO_PKG_VERSION"), config = %cli.config.display(), "Parcel rerouter starting");

    // ── Configuration (fatal before any mailbox is touched) ────────────
    let app_config = AppConfig::load(&cli.config)?;

    let launcher = Arc::new(FantocciniLauncher::new(app_config.webdriver.url.clone()));
    let registry = Arc::new(CarrierRegistry::new().with(Arc::new(DhlCarrier::new(launcher))));
    let carriers = registry.names();

    let settings = RunSettings::resolve(&app_config, &cli.overrides(), &carriers)?;
    let mailboxes = build_mailboxes(&app_config.mailboxes, settings.lookback_days)?;
    if mailboxes.is_empty() {
        warn!("No mailboxes configured, nothing to scan");
    }
    let gate = Arc::new(CalDavGate::from_config(&app_config.calendar)?);

    // ── Run ────────────────────────────────────────────────────────────
    let workflow = Workflow::new(settings, registry, gate)?;
    info!(run_id = %workflow.run_id(), carriers = ?carriers, "Workflow ready");
    let report = workflow.run(&mailboxes).await;

    let mut stdout = std::io::stdout().lock();
    for shipment in &report.shipments {
        let line = serde_json::to_string(&shipment.lifecycle)
            .context("Failed to serialize shipment record")?;
        writeln!(stdout, "{line}").context("Failed to write shipment record")?;
    }
    stdout.flush()?;
    Ok(())
}
