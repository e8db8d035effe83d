//! jack-plumber - rule-driven port renaming and patching for JACK
//!
//! Subcommands:
//! - `jack-plumber run` - Stay connected and keep the graph in line (default)
//! - `jack-plumber once` - Reconcile the current graph once and exit
//! - `jack-plumber check` - Validate configuration and rules without connecting
//! - `jack-plumber ports` - List ports with the renames and rules that apply
//! - `jack-plumber config` - Print the effective configuration

mod telemetry;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use plumbconf::{expand_path, load_rules_file, PlumbConfig, SessionConfig};
use plumber::{
    channel, DispatchSettings, Dispatcher, NotificationSender, Plumber, PlumberOptions,
    PortSnapshot, RuleEngine, RuleSet, Session,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "jack-plumber")]
#[command(about = "Rename and connect JACK ports by regex rules")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file, used instead of ./jack-plumber.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Extra rule file, appended after configured rules (repeatable)
    #[arg(short, long, global = true)]
    rules: Vec<PathBuf>,

    /// JACK client name
    #[arg(long, global = true)]
    client_name: Option<String>,

    /// Plan and log actions without touching the graph
    #[arg(long, global = true)]
    dry_run: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Commands {
    /// Stay connected and keep the graph in line
    Run,

    /// Reconcile the current graph once and exit
    Once,

    /// Validate configuration and rules, then exit
    Check,

    /// List ports with their proposed names and matching connect rules
    Ports {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.as_deref().map(expand_cli_path);
    let (mut config, sources) = PlumbConfig::load_with_sources_from(config_path.as_deref())
        .context("Failed to load configuration")?;
    for path in cli.rules.iter().map(|path| expand_cli_path(path)) {
        let extra = load_rules_file(&path)
            .with_context(|| format!("Failed to load rules from {}", path.display()))?;
        config.rules.extend(extra);
    }
    if let Some(name) = &cli.client_name {
        config.session.client_name = name.clone();
    }

    telemetry::init(&config.telemetry.log_level, cli.verbose)?;
    debug!(files = ?sources.files, env = ?sources.env_overrides, "configuration loaded");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Config => {
            print!("{}", config.to_toml());
            Ok(())
        }
        Commands::Check => {
            let rules = compile(&config)?;
            println!(
                "OK: {} rename rule(s), {} connect rule(s)",
                rules.rename_rules().len(),
                rules.connect_rules().len()
            );
            Ok(())
        }
        Commands::Ports { json } => ports(&config, json),
        Commands::Once => once(&config, cli.dry_run),
        Commands::Run => run(&config, cli.dry_run).await,
    }
}

/// Paths may arrive quoted past the shell, so `~/` and `$VAR/` are expanded here.
fn expand_cli_path(path: &std::path::Path) -> PathBuf {
    expand_path(&path.to_string_lossy())
}

fn compile(config: &PlumbConfig) -> Result<RuleSet> {
    let rules = RuleSet::compile(&config.rules).context("Invalid rules")?;
    if rules.is_empty() {
        warn!("no rules configured, nothing will change");
    }
    Ok(rules)
}

fn options(config: &PlumbConfig, dry_run: bool) -> PlumberOptions {
    PlumberOptions {
        dry_run,
        slow_call: Duration::from_millis(config.dispatch.slow_call_ms),
    }
}

async fn run(config: &PlumbConfig, dry_run: bool) -> Result<()> {
    let rules = compile(config)?;
    let (sender, queue) = channel(config.dispatch.queue_capacity);
    let session = open_session(&config.session, sender)?;

    let plumber = Plumber::new(session, rules, options(config, dry_run));
    let dispatcher = Dispatcher::new(plumber, queue, DispatchSettings::from(&config.dispatch));

    let shutdown_token = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown_token.clone()));

    info!(dry_run, "jack-plumber {} running", env!("CARGO_PKG_VERSION"));
    let stats = dispatcher
        .run(shutdown_token)
        .await
        .context("Plumber stopped")?;

    info!(?stats, "shutdown complete");
    Ok(())
}

fn once(config: &PlumbConfig, dry_run: bool) -> Result<()> {
    let rules = compile(config)?;
    let (sender, _queue) = channel(config.dispatch.queue_capacity);
    let session = open_session(&config.session, sender)?;

    let mut plumber = Plumber::new(session, rules, options(config, dry_run));
    let report = plumber.start().context("Reconciliation failed")?;

    for (action, outcome) in &report.results {
        println!("{}: {:?}", action, outcome);
    }
    info!(stats = ?plumber.stats(), "done");
    Ok(())
}

#[derive(Serialize)]
struct PortReport<'a> {
    #[serde(flatten)]
    port: &'a PortSnapshot,
    proposed_name: Option<String>,
    connect_rules: Vec<String>,
}

fn ports(config: &PlumbConfig, json: bool) -> Result<()> {
    let rules = compile(config)?;
    let (sender, _queue) = channel(config.dispatch.queue_capacity);
    let session = open_session(&config.session, sender)?;
    let ports = session.list_ports().context("Failed to list ports")?;
    let engine = RuleEngine::new(rules);

    let reports: Vec<PortReport<'_>> = ports
        .iter()
        .map(|port| PortReport {
            port,
            proposed_name: engine.propose_name(port),
            connect_rules: engine
                .rules()
                .connect_rules_matching(port)
                .iter()
                .map(|rule| rule.label.to_string())
                .collect(),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    for report in &reports {
        let rename = report
            .proposed_name
            .as_deref()
            .map(|name| format!(" -> {}", name))
            .unwrap_or_default();
        println!(
            "{:<40} {:<6} {:<5}{}",
            report.port.full_name,
            report.port.direction.to_string(),
            report.port.kind.to_string(),
            rename
        );
        for rule in &report.connect_rules {
            println!("    {}", rule);
        }
    }
    Ok(())
}

#[cfg(feature = "jack")]
fn open_session(config: &SessionConfig, sender: NotificationSender) -> Result<plumber::JackSession> {
    plumber::JackSession::open(&config.client_name, config.start_server, sender)
        .context("Failed to connect to the JACK server")
}

#[cfg(not(feature = "jack"))]
fn open_session(_config: &SessionConfig, _sender: NotificationSender) -> Result<plumber::MemorySession> {
    anyhow::bail!("jack-plumber was built without JACK support (enable the `jack` feature)")
}

/// Cancel `token` on SIGINT or SIGTERM.
async fn wait_for_signal(token: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!("Failed to set up SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
    token.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_cli_paths_are_expanded() {
        let expanded = expand_cli_path(Path::new("~/studio/rules.toml"));
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.ends_with("studio/rules.toml"));

        let plain = expand_cli_path(Path::new("/etc/jack-plumber/extra.toml"));
        assert_eq!(plain, PathBuf::from("/etc/jack-plumber/extra.toml"));
    }

    #[test]
    fn test_rules_flag_is_repeatable() {
        let cli = Cli::try_parse_from([
            "jack-plumber",
            "--rules",
            "~/a.toml",
            "-r",
            "b.toml",
            "check",
        ])
        .unwrap();
        assert_eq!(cli.rules.len(), 2);
        assert!(matches!(cli.command, Some(Commands::Check)));
        assert_eq!(expand_cli_path(&cli.rules[1]), PathBuf::from("b.toml"));
    }
}
