use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::ChronoLocal;

use sshq::app::App;
use sshq::config::{self, DEFAULT_SCROLLBACK, DashboardConfig, PoolConfig};
use sshq::queue::Task;
use sshq::session::{Connector, LocalConnector, OpenSshConnector};
use sshq::tui::{Dashboard, TabWriter};

/// Command run on every host when no command file is given
const DEFAULT_COMMAND: &str = "hostname";

#[derive(Parser, Debug)]
#[command(
    name = "sshq",
    author,
    version,
    about = "Dispatch a queue of shell commands over ssh hosts and watch their output",
    long_about = None
)]
struct Args {
    /// Hosts file (TOML). Defaults to localhost as the current user
    #[arg(short = 's', long = "servers", value_name = "FILE")]
    servers: Option<PathBuf>,

    /// File with one command per line. Defaults to `hostname` once per host
    #[arg(short = 'c', long = "cmd", value_name = "FILE")]
    cmd: Option<PathBuf>,

    /// Exit once every command finished instead of waiting for `q`
    #[arg(short = 'n', long)]
    no_wait: bool,

    /// Drop commands that exit non-zero instead of requeueing them
    #[arg(short = 'p', long)]
    not_persistent: bool,

    /// Level of the log shown in the Main tab; RUST_LOG overrides it
    #[arg(
        long,
        default_value = "info",
        value_parser = ["error", "warn", "info", "debug", "trace"]
    )]
    log_level: String,

    /// Run commands locally through `sh -c` instead of over ssh
    #[arg(long)]
    local: bool,

    /// Maximum scrollback lines per tab
    #[arg(short = 'b', long, default_value_t = DEFAULT_SCROLLBACK)]
    scrollback: usize,
}

/// Send log events to the dashboard's Main tab
fn init_tracing(level: &str, writer: TabWriter) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .with_timer(ChronoLocal::new("%H:%M:%S".to_string()))
        .try_init();
}

/// Queue every task and wait for them, or for the user to quit early
async fn run(app: &App, tasks: Vec<Task>, wait_for_user: bool) -> anyhow::Result<()> {
    let total = tasks.len();
    let work = async {
        for task in tasks {
            app.enqueue(task).await?;
        }
        app.wait_idle().await
    };

    tokio::select! {
        result = work => {
            result.context("workers stopped before every command finished")?;
            info!(total, "all tasks completed");
        }
        _ = app.dashboard().wait_closed() => {
            info!("dashboard closed before all tasks completed");
            return Ok(());
        }
    }

    if wait_for_user {
        app.wait_user_exit("All tasks completed! Press 'q' to exit")
            .await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let hosts = match &args.servers {
        Some(path) => config::load_hosts(path)?,
        None => config::default_hosts()?,
    };
    let tasks: Vec<Task> = match &args.cmd {
        Some(path) => config::load_commands(path)?,
        None => hosts.iter().map(|_| Task::from(DEFAULT_COMMAND)).collect(),
    };

    let dashboard = Dashboard::start(DashboardConfig {
        scrollback: args.scrollback,
        ..DashboardConfig::default()
    })
    .await
    .context("failed to start the dashboard")?;
    let main_tab = dashboard.add_tab("Main");
    init_tracing(&args.log_level, TabWriter::new(dashboard.clone(), main_tab));

    let connector: Arc<dyn Connector> = if args.local {
        Arc::new(LocalConnector)
    } else {
        Arc::new(OpenSshConnector::new())
    };
    let config = PoolConfig {
        persistent: !args.not_persistent,
        ..PoolConfig::default()
    };
    info!(hosts = hosts.len(), tasks = tasks.len(), "starting");
    let app = App::start(hosts, connector, dashboard, main_tab, config);

    let result = run(&app, tasks, !args.no_wait).await;

    // Restores the terminal, so errors below print to a sane screen
    if !app.shutdown().await {
        eprintln!("dashboard did not stop in time");
    }
    result
}
