//! tetherd — demo host for the tether transport.
//!
//! Wires a no-op agent bridge to the TCP link so the transport can be
//! exercised end to end: it listens, checks in against whatever peer
//! connects, and logs the tasking it is given. Real deployments embed
//! `tether-link` with their own bridge and key-exchange backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use tether_core::codec::JsonCodec;
use tether_core::config::LinkConfig;
use tether_core::exchange::NullKeyExchange;
use tether_core::message::{CheckinMessage, ResponseMessage, TaskingMessage};
use tether_link::{AgentBridge, LinkTransport};

/// Bridge with no task manager behind it: produces nothing and logs
/// every response it is handed.
struct DemoBridge {
    alive: AtomicBool,
}

impl DemoBridge {
    fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
        }
    }

    fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

impl AgentBridge for DemoBridge {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn produce_tasking(&self) -> Option<TaskingMessage> {
        None
    }

    fn process_response(&self, response: ResponseMessage) -> bool {
        tracing::info!(
            tasks = response.tasks.len(),
            delegates = response.delegates.len(),
            "response received"
        );
        true
    }
}

fn local_checkin() -> CheckinMessage {
    CheckinMessage {
        host: std::env::var("HOSTNAME").unwrap_or_default(),
        user: std::env::var("USER").unwrap_or_default(),
        pid: std::process::id(),
        os: std::env::consts::OS.to_string(),
        architecture: std::env::consts::ARCH.to_string(),
        ..Default::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = LinkConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = LinkConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        LinkConfig::default()
    });

    // The demo carries no asymmetric backend, so an encrypted exchange
    // could never complete.
    if config.session.encrypted_exchange {
        tracing::warn!("no key-exchange backend in tetherd, disabling encrypted exchange");
        config.session.encrypted_exchange = false;
    }
    tracing::info!(port = config.network.listen_port, "tetherd starting");

    let bridge = Arc::new(DemoBridge::new());
    let transport = Arc::new(LinkTransport::new(
        config,
        Arc::new(JsonCodec::new()),
        Arc::new(NullKeyExchange),
        bridge.clone(),
    ));

    let session = {
        let transport = transport.clone();
        async move {
            let connected = transport
                .connect(local_checkin(), |resp| {
                    tracing::info!(identity = ?resp.identity, "checkin acknowledged");
                    true
                })
                .await?;
            if !connected {
                anyhow::bail!("checkin was not acknowledged");
            }
            transport.start().await;
            Ok::<(), anyhow::Error>(())
        }
    };

    tokio::select! {
        result = session => {
            if let Err(e) = result {
                tracing::error!(error = %e, "session ended with error");
            } else {
                tracing::info!("session ended");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            bridge.kill();
            transport.shutdown_link().await;
        }
    }

    Ok(())
}
