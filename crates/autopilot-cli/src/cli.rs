//! Command-line arguments.

use autopilot_core::config::DiscoveryConfig;
use autopilot_core::IdeKind;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "autopilot")]
#[command(about = "Supervise the automation payload inside running IDE windows")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start supervising until interrupted
    Run(RunArgs),
    /// List controllable pages on the debugging ports
    Scan(ScanArgs),
    /// Show this week's (and any unclaimed last week's) totals
    Stats(StoreArgs),
    /// Show who currently holds the leader lock
    Lock(StoreArgs),
    /// Clear the payload's retry circuit in one target
    ResetCircuit(ResetCircuitArgs),
}

/// Which IDE and which ports to look at.
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// IDE kind (cursor, antigravity, vscode, windsurf)
    #[arg(long, value_parser = parse_ide)]
    pub ide: Option<IdeKind>,

    /// First debugging port to scan
    #[arg(long)]
    pub port_start: Option<u16>,

    /// Last debugging port to scan (inclusive)
    #[arg(long)]
    pub port_end: Option<u16>,

    /// Scan only the alternate relaunch port
    #[arg(long, conflicts_with_all = ["port_start", "port_end"])]
    pub alternate_port: bool,
}

impl TargetArgs {
    /// Resolve the port range: flags, then settings, then defaults.
    pub fn port_range(&self, settings: (Option<u16>, Option<u16>)) -> (u16, u16) {
        if self.alternate_port {
            return (DiscoveryConfig::ALTERNATE_PORT, DiscoveryConfig::ALTERNATE_PORT);
        }
        let start = self
            .port_start
            .or(settings.0)
            .unwrap_or(DiscoveryConfig::DEFAULT_PORT_START);
        let end = self
            .port_end
            .or(settings.1)
            .unwrap_or(DiscoveryConfig::DEFAULT_PORT_END)
            .max(start);
        (start, end)
    }
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// IDE kind whose namespace to read
    #[arg(long, value_parser = parse_ide)]
    pub ide: Option<IdeKind>,

    /// Shared store database (defaults to the user config directory)
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Bootstrap script to inject into each page
    #[arg(long)]
    pub payload: Option<PathBuf>,

    /// Settings file (JSON); flags take precedence
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Shared store database (defaults to the user config directory)
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Scheduler tick in milliseconds
    #[arg(long)]
    pub tick_ms: Option<u64>,

    /// Stats collection interval in milliseconds
    #[arg(long)]
    pub stats_ms: Option<u64>,

    /// Payload poll interval in milliseconds
    #[arg(long)]
    pub poll_ms: Option<u64>,

    /// Enable pro features in the payload
    #[arg(long)]
    pub pro: bool,

    /// Keep acting while the IDE window is in the background
    #[arg(long)]
    pub background: bool,

    /// Additional banned command pattern (repeatable)
    #[arg(long = "ban", value_name = "PATTERN")]
    pub banned: Vec<String>,

    /// Do not auto-accept file edits
    #[arg(long)]
    pub no_auto_accept: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ResetCircuitArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Page id to reset (as printed by `scan`)
    #[arg(long)]
    pub target_id: String,
}

fn parse_ide(value: &str) -> Result<IdeKind, String> {
    IdeKind::from_str(value).ok_or_else(|| {
        let known: Vec<&str> = IdeKind::ALL.iter().map(|k| k.as_str()).collect();
        format!("unknown IDE '{}', expected one of: {}", value, known.join(", "))
    })
}
