// # ipupd
//
// Daemon entry point: parse flags, find and load the config file, set
// up logging and the runtime, run the startup sync, then hand over to
// the event loop until SIGTERM/SIGINT.
//
// All DNS and reconciliation logic lives in ipup-core; this binary only
// wires the netlink source and the hickory backend into it and maps
// failures to exit codes.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use ipup_core::reconcile::reconcile;
use ipup_core::traits::AddrSource;
use ipup_core::{Config, Engine};
use ipup_dns::HickoryUpdater;
use ipup_netlink::NetlinkAddrSource;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

/// Exit statuses follow sysexits(3): 64 usage, 65 bad config data,
/// 66 missing config file, 70 internal, 71 runtime.
#[derive(Debug, Clone, Copy)]
enum ExitStatus {
    Success = 0,
    Usage = 64,
    DataErr = 65,
    NoInput = 66,
    Software = 70,
    OsErr = 71,
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status as u8)
    }
}

#[derive(Parser)]
#[command(
    name = "ipupd",
    version,
    about = "Keeps DNS AAAA records aligned with this host's global IPv6 addresses"
)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log destination
    #[arg(long = "log", value_enum, default_value = "auto")]
    log: LogSink,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogSink {
    /// Human-readable on a terminal, collector-friendly otherwise
    Auto,
    Stdout,
    Syslog,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version render through this same path.
            let status = if e.use_stderr() {
                ExitStatus::Usage
            } else {
                ExitStatus::Success
            };
            let _ = e.print();
            return status.into();
        }
    };

    if let Err(e) = init_logging(cli.log) {
        eprintln!("cannot initialize logging: {e}");
        return ExitStatus::Software.into();
    }

    let Some(path) = cli.config.clone().or_else(find_config) else {
        error!(
            "no configuration file found (tried /etc/ipup/conf, \
             $XDG_CONFIG_HOME/ipup/conf, $HOME/.ipup.conf)"
        );
        return ExitStatus::NoInput.into();
    };

    let metadata = match std::fs::metadata(&path) {
        Ok(metadata) => metadata,
        Err(e) => {
            error!("cannot read {}: {e}", path.display());
            return ExitStatus::NoInput.into();
        }
    };
    if !metadata.is_file() {
        error!("{} is not a regular file", path.display());
        return ExitStatus::NoInput.into();
    }

    let source = match std::fs::read_to_string(&path) {
        Ok(source) => source,
        Err(e) => {
            error!("cannot read {}: {e}", path.display());
            return ExitStatus::NoInput.into();
        }
    };

    let config = match Config::load(&source, &path.display().to_string()) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitStatus::DataErr.into();
        }
    };
    info!(
        "loaded {} server(s) and {} interface(s) from {}",
        config.servers.len(),
        config.interfaces.len(),
        path.display()
    );

    // Single-threaded by design: the config graph and its maps are
    // owned by one task for the whole run.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("cannot create runtime: {e}");
            return ExitStatus::OsErr.into();
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitStatus::Success.into(),
        Err(e) => {
            error!("{e:#}");
            ExitStatus::OsErr.into()
        }
    }
}

async fn run(config: Config) -> Result<()> {
    let source = NetlinkAddrSource::new()?;
    let dns = HickoryUpdater::new();

    let addrs = source.addresses().await?;
    info!(
        "reconciling {} live address(es) against published records",
        addrs.len()
    );
    let known = reconcile(&config, &addrs, &dns).await?;

    let mut engine = Engine::new(config, Box::new(dns), known);
    engine.run(source.watch()).await?;

    Ok(())
}

fn init_logging(sink: LogSink) -> Result<()> {
    let level = match std::env::var("IPUP_LOG").unwrap_or_default().to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let human = match sink {
        LogSink::Stdout => true,
        LogSink::Syslog => false,
        LogSink::Auto => std::io::stdout().is_terminal(),
    };

    if human {
        let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        // Timestamps and colors belong to the collector (journald or
        // syslogd reading our stdout).
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_ansi(false)
            .without_time()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}

/// Search order when no `-c` was given: system config, XDG config,
/// dotfile in $HOME. First existing regular file wins.
fn find_config() -> Option<PathBuf> {
    let mut candidates = vec![PathBuf::from("/etc/ipup/conf")];
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            candidates.push(Path::new(&xdg).join("ipup/conf"));
        }
    }
    if let Ok(home) = std::env::var("HOME") {
        if !home.is_empty() {
            candidates.push(Path::new(&home).join(".ipup.conf"));
        }
    }

    candidates.into_iter().find(|path| path.is_file())
}
