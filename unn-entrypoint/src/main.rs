//! Entry-point binary (§4.4, §6): the rendezvous SSH server.
//!
//! Listens on `-bind:-port`, authenticates every connection by public
//! key, and dispatches each opened channel to the room-control, client
//! API, signaling, or interactive-person handler depending on the first
//! recognized request that arrives on it.

mod api;
mod broker;
mod control;
mod input_bridge;
mod interactive;
mod person;
mod signaling;
mod ssh;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use unn_core::identity::IdentityRegistry;
use unn_core::room::RoomRegistry;

#[derive(Parser, Debug)]
#[command(name = "unn-entrypoint", about = "UNN rendezvous entry point")]
struct Cli {
    /// TCP port to listen on.
    #[arg(long = "port", default_value_t = 44322)]
    port: u16,

    /// Interface to bind.
    #[arg(long = "bind", default_value = "0.0.0.0")]
    bind: String,

    /// Path to the server's host key (ed25519, generated if missing).
    #[arg(long = "hostkey", default_value = None)]
    hostkey: Option<PathBuf>,
}

fn default_hostkey_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".unn")
        .join("entrypoint_host_key")
}

fn load_or_generate_host_key(path: &std::path::Path) -> Result<russh_keys::key::KeyPair> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating host key directory {}", parent.display()))?;
    }
    match std::fs::read(path) {
        Ok(bytes) => {
            let key = russh_keys::decode_secret_key(
                std::str::from_utf8(&bytes).context("host key file is not valid UTF-8 PEM")?,
                None,
            )
            .context("decoding existing host key")?;
            info!(path = %path.display(), "loaded existing host key");
            Ok(key)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "generating new ed25519 host key");
            let key = russh_keys::key::KeyPair::generate_ed25519()
                .context("generating ed25519 host key")?;
            let pem = russh_keys::encode_pkcs8_pem(&key).context("encoding host key as PEM")?;
            std::fs::write(path, pem)
                .with_context(|| format!("writing host key to {}", path.display()))?;
            Ok(key)
        }
        Err(e) => Err(e).with_context(|| format!("reading host key {}", path.display())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let hostkey_path = cli.hostkey.unwrap_or_else(default_hostkey_path);
    let registry_dir = hostkey_path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let host_key = load_or_generate_host_key(&hostkey_path)?;

    let identities = IdentityRegistry::load(registry_dir.join("users"));
    let rooms = RoomRegistry::load(registry_dir.join("rooms"));
    let state = ssh::SharedState {
        identities,
        rooms,
        persons: person::PersonRegistry::new(),
        signaling: signaling::SignalingRegistry::new(),
        broker: Arc::new(broker::Broker::new()),
    };

    let config = Arc::new(russh::server::Config {
        keys: vec![host_key],
        ..Default::default()
    });

    let mut server = ssh::EntryPointServer { state };
    let bind_addr = format!("{}:{}", cli.bind, cli.port);
    info!(%bind_addr, "entry point listening");

    let run = russh::server::run(config, &bind_addr, &mut server);
    tokio::select! {
        result = run => result.context("ssh server exited with an error"),
        _ = shutdown_signal() => {
            info!("shutdown signal received, stopping listener");
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_hostkey_path_is_under_dot_unn() {
        let path = default_hostkey_path();
        assert!(path.ends_with(".unn/entrypoint_host_key"));
    }
}
