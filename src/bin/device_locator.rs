//! Enumerate the MyCloud devices of an account, so the user can pick the
//! `host=` value for the mount.

use std::process::exit;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wd_bridge::api_client::RemoteClient;

#[derive(Parser)]
#[command(name = "device_locator")]
struct Cli {
    user: String,
    pass: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wd_bridge=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("Enumerating devices... please wait!");

    let client = match RemoteClient::new() {
        Ok(client) => client,
        Err(err) => {
            eprintln!("Network bridge initialization failed: {err}");
            exit(1);
        }
    };

    let session = match client.login(&cli.user, &cli.pass).await {
        Ok(session) => session,
        Err(err) => {
            eprintln!("Login failed: {err}... shutting down");
            exit(1);
        }
    };

    let Some(access_token) = session.access_token else {
        eprintln!("Login did not return an access token");
        exit(1);
    };

    let user_id = match client.user_id(&access_token).await {
        Ok(user_id) => user_id,
        Err(err) => {
            eprintln!("User ID lookup failed: {err}");
            exit(1);
        }
    };

    let devices = match client.user_devices(&user_id).await {
        Ok(devices) => devices,
        Err(err) => {
            eprintln!("Device enumeration failed: {err}");
            exit(1);
        }
    };

    println!("Listing devices for user:");
    for (i, device) in devices.iter().enumerate() {
        println!("[{i}] {} ({})", device.name, device.id);
    }
}
