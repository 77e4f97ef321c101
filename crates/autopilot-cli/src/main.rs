//! Autopilot - command-line supervisor for IDE automation payloads.
//!
//! `autopilot run` discovers IDE windows on the debugging ports, injects the
//! payload and keeps it configured until interrupted. The other subcommands
//! inspect the shared store or the ports without taking control.

mod cli;
mod logging;
mod settings;

use anyhow::{bail, Context, Result};
use autopilot_core::election::read_lock;
use autopilot_core::stats::WeeklyLedger;
use autopilot_core::targets::payload;
use autopilot_core::{
    ConnectionManager, KeyValueStore, Payload, SqliteStore, StoreKeys, Supervisor,
    TargetDiscovery, WeeklyStats,
};
use chrono::Local;
use clap::Parser;
use cli::{Cli, Command, ResetCircuitArgs, RunArgs, ScanArgs, StoreArgs};
use serde_json::json;
use settings::{resolve_run, Settings};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.debug, cli.log_json);

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Scan(args) => scan(args).await,
        Command::Stats(args) => stats(args),
        Command::Lock(args) => lock(args),
        Command::ResetCircuit(args) => reset_circuit(args).await,
    }
}

fn open_store(path: Option<&Path>) -> Result<SqliteStore> {
    let store = match path {
        Some(path) => SqliteStore::open_at(path),
        None => SqliteStore::open(),
    };
    store.context("Failed to open the shared store")
}

async fn run(args: RunArgs) -> Result<()> {
    let settings = Settings::load_or_default(args.settings.as_deref())?;
    let options = resolve_run(&args, settings)?;

    let payload = Payload::from_file(&options.payload)
        .with_context(|| format!("Failed to load payload {}", options.payload.display()))?;
    let store = open_store(args.store.as_deref())?;

    let supervisor = Supervisor::builder(options.ide, payload)
        .store(Arc::new(store))
        .port_range(options.port_start, options.port_end)
        .tick_interval(options.tick_interval)
        .stats_interval(options.stats_interval)
        .build()?;

    info!(
        "Starting autopilot for {} (instance {}, ports {}-{})",
        options.ide.display_name(),
        supervisor.instance_id(),
        options.port_start,
        options.port_end
    );

    if supervisor.take_pending_enable()? {
        info!("Resuming an enable request left by a previous run");
    }

    if !supervisor.is_available().await {
        supervisor.set_pending_enable(true)?;
        bail!(
            "automation blocked: no {} window is listening on ports {}-{}; relaunch it with a remote debugging port",
            options.ide.display_name(),
            options.port_start,
            options.port_end
        );
    }

    let mut alerts = supervisor.take_alerts();
    let printer = tokio::spawn(async move {
        if let Some(rx) = alerts.as_mut() {
            while let Some(alert) = rx.recv().await {
                eprintln!(
                    "[{}] {}: {}",
                    alert.raised_at.format("%H:%M:%S"),
                    alert.target_id,
                    alert.message
                );
            }
        }
    });

    let report = supervisor.start(options.session).await;
    if report.leader {
        info!(
            "In control: {} target(s) configured, {} failure(s)",
            report.configured.len(),
            report.failures.len()
        );
    } else {
        info!(
            "Standing by; leader is {}",
            report.standby_for.as_deref().unwrap_or("unknown")
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");

    supervisor.stop().await;
    printer.abort();

    if let Ok(week) = supervisor.weekly_stats() {
        info!(
            "This week: {} clicks, {} blocked commands",
            week.clicks, week.blocked_commands
        );
    }
    Ok(())
}

async fn scan(args: ScanArgs) -> Result<()> {
    let (start, end) = args.target.port_range((None, None));
    let discovery = TargetDiscovery::with_range(start, end)?;
    let ports = discovery.scan().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    if ports.is_empty() {
        println!("No debug targets found on ports {}-{}", start, end);
        return Ok(());
    }
    for port in &ports {
        println!("Port {}:", port.port);
        for page in &port.pages {
            println!("  {}  {}  {}", page.id, page.title, page.url);
        }
    }
    Ok(())
}

fn stats(args: StoreArgs) -> Result<()> {
    let ide = args.ide.unwrap_or_default();
    let store: Arc<dyn KeyValueStore> = Arc::new(open_store(args.store.as_deref())?);
    let ledger = WeeklyLedger::new(store, StoreKeys::for_ide(ide));

    let current = ledger.load(Local::now())?;
    let last_week = ledger.take_last_week()?;

    if args.json {
        let out = json!({
            "ide": ide,
            "current": current,
            "lastWeek": last_week,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{}", ide.display_name());
    print_week("This week", &current);
    if let Some(last) = last_week {
        print_week("Last week", &last);
    }
    Ok(())
}

fn print_week(label: &str, week: &WeeklyStats) {
    let start = week
        .week_start_local()
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "?".to_string());
    println!(
        "  {} (from {}): {} clicks, {} blocked commands",
        label, start, week.clicks, week.blocked_commands
    );
}

fn lock(args: StoreArgs) -> Result<()> {
    let ide = args.ide.unwrap_or_default();
    let store = open_store(args.store.as_deref())?;
    let record = read_lock(&store, &StoreKeys::for_ide(ide))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }
    match record {
        Some(record) => {
            let age_ms = now_ms().saturating_sub(record.heartbeat_at);
            println!(
                "{}: leader {} (heartbeat {} ms ago)",
                ide.display_name(),
                record.owner_id,
                age_ms
            );
        }
        None => println!("{}: No leader", ide.display_name()),
    }
    Ok(())
}

async fn reset_circuit(args: ResetCircuitArgs) -> Result<()> {
    let (start, end) = args.target.port_range((None, None));
    let ide = args.target.ide.unwrap_or_default();
    let discovery = TargetDiscovery::with_range(start, end)?;

    let page = discovery
        .scan()
        .await
        .into_iter()
        .flat_map(|port| port.pages)
        .find(|page| page.id == args.target_id)
        .with_context(|| format!("Target {} not found on ports {}-{}", args.target_id, start, end))?;

    // Only evaluates a call into an already-injected payload.
    let manager = ConnectionManager::new(Payload::new(""));
    if !manager.connect(&page).await {
        bail!("Could not connect to target {}", page.id);
    }
    let result = manager
        .evaluate(&page.id, &payload::reset_circuit_expression())
        .await;
    manager.disconnect_all().await;

    let value = result?;
    if payload::is_not_injected(&value) {
        warn!("Payload is not running in {} ({})", page.id, ide.display_name());
        bail!("payload not injected in target {}", page.id);
    }
    println!("Retry circuit reset in {}", page.id);
    Ok(())
}

fn now_ms() -> i64 {
    Local::now().timestamp_millis()
}
