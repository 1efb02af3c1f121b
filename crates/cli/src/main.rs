//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: murmur — a peer-to-peer terminal chat system.
//
// main.rs - CLI entry point: `app`, `client`, `version` (spec §6).

use std::path::PathBuf;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use clap::{Parser, Subcommand};

use murmur_core::connection_details::Kek;
use murmur_core::secure::KEY_LEN;
use murmur_core::{
    AppBuilder, Config, ConfigOverrides, ConnectionDetailsStore, ConnectionManager, EventBus,
    FileConnectionDetailsRepository, Service,
};

#[derive(Parser)]
#[command(name = "murmur", version, about = "A peer-to-peer terminal chat system")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the long-lived process: binds the listening socket and hosts the
    /// event-driven service loop.
    App {
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        storage: Option<PathBuf>,
    },
    /// Run without a listening socket, dialing out only.
    Client {
        #[arg(long)]
        storage: Option<PathBuf>,
    },
    /// Print the CLI version.
    Version,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

/// The installation KEK, sourced from `MURMUR_KEK` (standard base64 of 32
/// raw bytes). Falls back to a fixed, clearly-labeled development key so a
/// fresh checkout runs out of the box; production deployments must set the
/// environment variable.
fn installation_kek() -> Kek {
    match std::env::var("MURMUR_KEK") {
        Ok(encoded) => {
            let bytes = STANDARD.decode(encoded.trim()).expect("MURMUR_KEK must be base64");
            let key: [u8; KEY_LEN] = bytes.try_into().expect("MURMUR_KEK must decode to 32 bytes");
            Kek::from_bytes(key)
        }
        Err(_) => {
            tracing::warn!("MURMUR_KEK not set; using a fixed development key, not safe for production");
            Kek::from_bytes([0x4d; KEY_LEN])
        }
    }
}

async fn run(overrides: ConfigOverrides, listen: bool) -> anyhow::Result<()> {
    let config = Config::load(&overrides)?;
    tracing::info!(
        storage = %config.storage_path.display(),
        port = config.server_port,
        listen,
        "starting murmur"
    );

    let repo = FileConnectionDetailsRepository::open(config.storage_path.clone())?;
    let store = Arc::new(ConnectionDetailsStore::new(repo, installation_kek()));
    let events = EventBus::new();

    let server_port = listen.then_some(config.server_port);
    let manager: Arc<dyn Service> = Arc::new(ConnectionManager::new(server_port, store, events.clone()));

    let app = AppBuilder::new().with_events(events).with_service(manager).build();
    app.run().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("murmur {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::App { port, storage } => {
            init_tracing();
            run(ConfigOverrides { port, storage }, true).await
        }
        Commands::Client { storage } => {
            init_tracing();
            run(ConfigOverrides { port: None, storage }, false).await
        }
    }
}
