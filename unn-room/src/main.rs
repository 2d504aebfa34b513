//! Room-side registration client binary (§4.6).
//!
//! A thin CLI wrapper: load or generate this room's host key, dial the
//! configured entry point, and hold the control stream open for the
//! life of the process, answering punch offers as they arrive.

mod client;
mod reactor;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "unn-room", about = "UNN room-side registration client")]
struct Cli {
    /// Entry point to dial, "host:port".
    #[arg(long = "entrypoint")]
    entrypoint: String,

    /// This room's advertised name.
    #[arg(long = "room-name")]
    room_name: String,

    /// Comma-separated candidate addresses ("ip:port") advertised to visitors.
    #[arg(long = "candidates", value_delimiter = ',')]
    candidates: Vec<String>,

    /// The port this room's own SSH server listens on.
    #[arg(long = "ssh-port", default_value_t = 22)]
    ssh_port: u16,

    /// Optional `doors` subprocess launcher names (passed through verbatim;
    /// the launcher itself is an external collaborator, out of scope here).
    #[arg(long = "doors", value_delimiter = ',', default_value = "")]
    doors: Vec<String>,

    /// How many people the room reports as currently present.
    #[arg(long = "people-count", default_value_t = 0)]
    people_count: u32,

    /// Path to this room's own host key (ed25519, generated if missing).
    #[arg(long = "hostkey", default_value = None)]
    hostkey: Option<PathBuf>,
}

fn default_hostkey_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".unn")
        .join("room_host_key")
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
            Ok(key)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
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
    let key_pair = load_or_generate_host_key(&hostkey_path)?;
    // Wire-format bytes, base64-encoded for the JSON wire — not a
    // Debug-formatted string. The entry point decodes this and hashes
    // the decoded bytes into this room's host-key fingerprint (§3).
    let public_key_wire_bytes = key_pair.clone_public_key()?.public_key_bytes();
    let public_key_line = unn_core::encode_wire_key(&public_key_wire_bytes);

    info!(entrypoint = %cli.entrypoint, room = %cli.room_name, "connecting");
    client::run_registration_client(
        &cli.entrypoint,
        key_pair,
        client::RegisterRequest {
            room_name: cli.room_name,
            doors: cli.doors.into_iter().filter(|s| !s.is_empty()).collect(),
            candidates: cli.candidates,
            ssh_port: cli.ssh_port,
            public_keys: vec![public_key_line],
            people_count: cli.people_count,
        },
    )
    .await
}
