//! XMTP bridge -- relays Redis pub/sub requests to XMTP recipients.
//!
//! Subscribes to a Redis channel and, for every
//! `{"ethereumAddress": "...", "message": "..."}` payload, sends the text to
//! that address as a direct message.
//!
//! # Usage
//!
//! ```bash
//! # Required settings come from the environment or ./.env
//! PRIVATE_KEY=0x... XMTP_DB_ENCRYPTION_KEY=... XMTP_ENV=local cargo run --bin xmtpbridge
//!
//! # Custom Redis and channel
//! cargo run --bin xmtpbridge -- --redis-url redis://cache:6379 --channel outbound
//! ```

use std::sync::Arc;

use clap::Parser;
use xmtpbridge::bus::Bus;
use xmtpbridge::bus::redis::RedisBus;
use xmtpbridge::client::ClientLifecycle;
use xmtpbridge::config::{BridgeCliArgs, BridgeConfig, ConfigError};
use xmtpbridge::listener::BusListener;
use xmtpbridge::network::NetworkEnv;
use xmtpbridge::network::loopback::LoopbackNetwork;
use xmtpbridge::relay::Relay;

#[tokio::main]
async fn main() {
    let cli = BridgeCliArgs::parse();

    // Load config from CLI args + environment + env file + config file + defaults.
    let config = match BridgeConfig::load(&cli) {
        Ok(c) => c,
        Err(ConfigError::MissingKeys(keys)) => {
            eprintln!("Missing required configuration:");
            for key in &keys {
                eprintln!("  {key}");
            }
            eprintln!(
                "Set them in the environment or in {}",
                cli.env_file.display()
            );
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let network = match config.client.env {
        NetworkEnv::Local => LoopbackNetwork::new(),
        other => {
            tracing::error!(env = %other, "no messaging network backend is linked for this environment");
            std::process::exit(1);
        }
    };

    let bus = match RedisBus::open(&config.bus.redis_url) {
        Ok(bus) => bus,
        Err(e) => {
            tracing::error!(error = %e, "failed to configure bus");
            std::process::exit(1);
        }
    };

    tracing::info!(
        env = %config.client.env,
        endpoint = %bus.endpoint(),
        channel = %config.bus.channel,
        "starting xmtp bridge"
    );

    let clients = Arc::new(ClientLifecycle::new(network, config.client.clone()));
    if let Err(e) = clients.get_or_create().await {
        tracing::warn!(error = %e, "messaging client warm-up failed, retrying on first relay");
    }

    let relay = Arc::new(Relay::new(Arc::clone(&clients), &config.relay));
    let listener = Arc::new(BusListener::new(bus, relay, &config.bus));

    tokio::spawn({
        let listener = Arc::clone(&listener);
        async move {
            shutdown_signal().await;
            listener.stop();
        }
    });

    let outcome = listener.run().await;

    if let Err(e) = clients.close().await {
        tracing::warn!(error = %e, "messaging client did not close cleanly");
    }

    match outcome {
        Ok(()) => tracing::info!("xmtp bridge stopped"),
        Err(e) => {
            tracing::error!(error = %e, "failed to start bus listener");
            std::process::exit(1);
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    let mut sigterm = {
        use tokio::signal::unix::{SignalKind, signal};
        signal(SignalKind::terminate()).ok()
    };

    tokio::select! {
        () = async {
            #[cfg(unix)]
            {
                match sigterm.as_mut() {
                    Some(sigterm) => {
                        sigterm.recv().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            tracing::info!("received SIGTERM, shutting down");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
        }
    }
}
