//! Mount entry point: parse options, log in, pick the device endpoint and
//! hand the filesystem to FUSE.

use std::process::exit;
use std::sync::Arc;

use clap::Parser;
use clap::error::ErrorKind;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wd_bridge::api_client::RemoteClient;
use wd_bridge::config::{Cli, MountConfig, USAGE};
use wd_bridge::fs::{BridgeContext, WdFs};

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = err.print();
            exit(0);
        }
        Err(err) => {
            let _ = err.print();
            eprintln!("{USAGE}");
            exit(1);
        }
    };

    let config = match MountConfig::parse(&cli.options) {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("Error: {msg}");
            eprintln!("{USAGE}");
            exit(1);
        }
    };

    // Fork before any runtime threads exist; a multi-thread runtime does
    // not survive a fork.
    if !cli.foreground {
        if let Err(err) = daemonize::Daemonize::new().start() {
            eprintln!("Failed to daemonize: {err}");
            exit(1);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wd_bridge=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start the async runtime: {err}");
            exit(1);
        }
    };

    let client = match RemoteClient::new() {
        Ok(client) => client,
        Err(err) => {
            eprintln!("Network bridge initialization failed: {err}");
            exit(1);
        }
    };

    if let Err(err) = runtime.block_on(client.login(&config.username, &config.password)) {
        eprintln!("Login failed: {err}... shutting down");
        exit(1);
    }
    info!("logged in as {}", config.username);

    match runtime.block_on(client.detect_endpoint(&config.host)) {
        Ok(host) => info!("using endpoint https://{host}.remotewd.com/"),
        Err(err) => {
            eprintln!("Failed to detect the endpoint: {err}... shutting down");
            exit(1);
        }
    }

    let options = config.mount_options();
    let fs = WdFs::new(Arc::new(BridgeContext::new(client)), runtime);
    info!("mounting at {}", cli.mount_point.display());
    if let Err(err) = fuser::mount2(fs, &cli.mount_point, &options) {
        error!("mount failed: {err}");
        exit(1);
    }
}
