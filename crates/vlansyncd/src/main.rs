//! vlansyncd - declarative VLAN layout push tool
//!
//! Parses a port-spec from the command line, shows the desired layout
//! and its delta against the live device, and with `--commit` drives
//! the device to match.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use vlansync_core::{diff, read_device_config, reconcile, Config};
use vlansync_driver::{connect, ConnectOptions, SwitchConnection};

mod checkpoint;
mod format;
mod spec;

use checkpoint::StateStore;

#[derive(Debug, Parser)]
#[command(name = "vlansyncd", about = "Push a declarative VLAN layout to a switch")]
struct Args {
    /// Switch hostname or address.
    #[arg(long)]
    hostname: String,

    /// Admin password.
    #[arg(long, default_value = "password")]
    password: String,

    /// Apply changes to the device (default is preview only).
    #[arg(long)]
    commit: bool,

    /// Skip the device entirely when the config matches the last
    /// committed checkpoint.
    #[arg(long)]
    lazy: bool,

    /// After reconciling, delete device VLANs the config does not
    /// reference (VLAN 1 is never deleted).
    #[arg(long)]
    prune: bool,

    /// Port spec tokens, e.g. `port 1 access 10 port 2 trunk 10,12-14`.
    #[arg(required = true, value_name = "SPEC")]
    spec: Vec<String>,
}

/// Initializes tracing/logging subsystem
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = spec::parse_tokens(&args.spec)?;

    println!("== {} ==", args.hostname);
    println!("{}", format::render_config(&config));

    let store = StateStore::open_default()?;
    if let Some(time) = store.unchanged_since(&args.hostname, &config)? {
        info!(host = %args.hostname, committed = %time, "config unchanged since last commit");
        if args.lazy {
            println!("unchanged since {time}, skipping (--lazy)");
            return Ok(());
        }
    }

    let session = store.load_session(&args.hostname)?.unwrap_or_default();
    let options = ConnectOptions {
        password: args.password.clone(),
        session,
    };
    let mut connection = connect(&args.hostname, &options).await?;

    let result = sync(&args, &config, &store, &mut connection).await;

    if let Some(session) = connection.session() {
        store.save_session(&args.hostname, &session)?;
    }
    if let SwitchConnection::CliSession(driver) = &mut connection {
        if let Err(error) = driver.logout().await {
            warn!(host = %args.hostname, %error, "logout failed");
        }
    }

    result
}

async fn sync(
    args: &Args,
    config: &Config,
    store: &StateStore,
    connection: &mut SwitchConnection,
) -> Result<()> {
    let driver = connection.driver();

    let current = read_device_config(config.ports(), driver).await?;
    let delta = diff(&current, config)?;
    if delta.is_empty() {
        println!("no uncommitted changes");
    } else {
        println!("uncommitted changes:");
        println!("{}", format::render_diff(&delta));
    }

    if !args.commit {
        if !delta.is_empty() {
            println!("use --commit to apply");
        }
        return Ok(());
    }

    reconcile(config, driver).await?;
    if args.prune {
        let removed = vlansync_core::prune_vlans(config, driver).await?;
        for vlan in &removed {
            info!(host = %args.hostname, vlan, "pruned unreferenced VLAN");
        }
    }
    store.record_commit(&args.hostname, config)?;
    println!("committed");
    Ok(())
}
