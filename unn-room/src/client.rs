//! Room-side registration client (§4.6, §4.9): dials the entry point,
//! holds the `unn-control` subsystem channel open for the life of the
//! process, sends `register`, and answers `punch_offer`s.

use crate::reactor::{react, RoomAdvertisement};
use anyhow::{Context, Result};
use async_trait::async_trait;
use russh::client::{Handler, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use std::sync::Arc;
use tracing::{info, warn};
use unn_core::envelope::JsonFrameDecoder;
use unn_core::messages::{OperatorMessage, RegisterPayload};

/// This exercise's entry point verifies rooms by watching for a matching
/// host-key fingerprint across registrations (§4.6), not by the room
/// verifying the entry point's key against a known-hosts file — so the
/// client accepts whatever host key the entry point presents. A
/// production deployment would pin this.
struct AcceptAnyServerKey;

#[async_trait]
impl Handler for AcceptAnyServerKey {
    type Error = anyhow::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

pub struct RegisterRequest {
    pub room_name: String,
    pub doors: Vec<String>,
    pub candidates: Vec<String>,
    pub ssh_port: u16,
    pub public_keys: Vec<String>,
    pub people_count: u32,
}

/// Connect to `entrypoint_addr`, authenticate as `unn_username` with the
/// room's own key pair, open the `unn-control` subsystem, send
/// `register`, and loop forever answering whatever the entry point
/// sends until the connection drops.
pub async fn run_registration_client(
    entrypoint_addr: &str,
    key_pair: russh_keys::key::KeyPair,
    request: RegisterRequest,
) -> Result<()> {
    let config = Arc::new(russh::client::Config::default());
    let mut session = russh::client::connect(config, entrypoint_addr, AcceptAnyServerKey)
        .await
        .with_context(|| format!("dialing entry point at {entrypoint_addr}"))?;

    let authenticated = session
        .authenticate_publickey("room", Arc::new(key_pair))
        .await
        .context("public-key authentication with entry point failed")?;
    if !authenticated {
        anyhow::bail!("entry point rejected this room's key");
    }

    let mut channel: Channel<Msg> = session
        .channel_open_session()
        .await
        .context("opening control channel")?;
    channel
        .request_subsystem(true, "unn-control")
        .await
        .context("requesting unn-control subsystem")?;

    let advertisement = RoomAdvertisement {
        candidates: request.candidates.clone(),
        ssh_port: request.ssh_port,
    };

    let register = OperatorMessage::Register(RegisterPayload {
        room_name: request.room_name.clone(),
        doors: request.doors,
        candidates: request.candidates,
        ssh_port: request.ssh_port,
        public_keys: request.public_keys,
        people_count: request.people_count,
    });
    channel
        .data(register.to_json().to_string().as_bytes())
        .await
        .context("sending initial register message")?;
    info!(room = %request.room_name, "registration sent");

    let mut decoder = JsonFrameDecoder::new();
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Data { data }) => {
                let frames = match decoder.feed(&data) {
                    Ok(frames) => frames,
                    Err(e) => {
                        warn!(error = %e, "malformed frame from entry point");
                        continue;
                    }
                };
                for frame in frames {
                    let msg = match OperatorMessage::from_json(frame) {
                        Ok(msg) => msg,
                        Err(e) => {
                            warn!(error = %e, "undecodable operator message");
                            continue;
                        }
                    };
                    if let Some(reply) = react(&advertisement, msg) {
                        let _ = channel.data(reply.to_json().to_string().as_bytes()).await;
                    }
                }
            }
            Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                info!("control stream closed by entry point");
                break;
            }
            _ => {}
        }
    }

    let _ = session
        .disconnect(Disconnect::ByApplication, "", "en-US")
        .await;
    Ok(())
}
