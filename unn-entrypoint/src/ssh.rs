//! Entry-point multiplexer (§4.4): SSH transport plumbing around the
//! protocol logic in `control.rs`, `api.rs`, `signaling.rs` and
//! `interactive.rs`.
//!
//! One `ConnectionHandler` is created per accepted TCP connection
//! (`russh::server::Server::new_client`); one `ChannelKind` is assigned
//! per opened channel, decided by the first recognized request on that
//! channel, exactly as §4.4 specifies. Everything downstream of that
//! classification is handled by the modules above; this file's job ends
//! at turning SSH bytes into decoded frames and decoded frames back into
//! SSH writes.

use crate::api::ApiSession;
use crate::broker::Broker;
use crate::control::RoomControlSession;
use crate::input_bridge::InputBridge;
use crate::interactive::{InteractiveSession, OutEvent};
use crate::person::{PersonRegistry, ToPerson};
use crate::signaling::SignalingRegistry;
use async_trait::async_trait;
use russh::server::{Auth, Msg, Server as _, Session};
use russh::{Channel, ChannelId, CryptoVec};
use russh_keys::key::PublicKey;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use unn_core::envelope::JsonFrameDecoder;
use unn_core::fingerprint::PublicKeyFingerprint;
use unn_core::identity::IdentityRegistry;
use unn_core::messages::{ApiRequest, OperatorMessage};
use unn_core::room::RoomRegistry;

/// Shared, cloneable handle to every piece of process-wide state a
/// connection handler needs. One instance is built in `main.rs` and
/// cloned into every accepted connection.
#[derive(Clone)]
pub struct SharedState {
    pub identities: IdentityRegistry,
    pub rooms: RoomRegistry,
    pub persons: PersonRegistry,
    pub signaling: SignalingRegistry,
    pub broker: Arc<Broker>,
}

pub struct EntryPointServer {
    pub state: SharedState,
}

impl russh::server::Server for EntryPointServer {
    type Handler = ConnectionHandler;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> ConnectionHandler {
        info!(?peer_addr, "accepted connection");
        ConnectionHandler {
            state: self.state.clone(),
            fingerprint: None,
            authenticated_username: None,
            public_key_wire_bytes: Vec::new(),
            peer_addr,
            channels: HashMap::new(),
        }
    }
}

/// What a channel turns out to be, decided by the first recognized
/// request on it (§4.4 point 2). Each variant owns exactly the state its
/// kind needs; a channel never changes kind after classification.
enum ChannelKind {
    Control {
        session: RoomControlSession,
        decoder: JsonFrameDecoder,
        control_rx_task: tokio::task::JoinHandle<()>,
    },
    Api {
        session: ApiSession,
        decoder: JsonFrameDecoder,
    },
    Signaling {
        decoder: JsonFrameDecoder,
    },
    Interactive {
        bridge: InputBridge,
        _session_task: tokio::task::JoinHandle<()>,
        _pump_task: tokio::task::JoinHandle<()>,
        _line_task: tokio::task::JoinHandle<()>,
    },
    /// A channel opened but not yet classified (no recognized request
    /// has arrived on it yet).
    Pending,
}

pub struct ConnectionHandler {
    state: SharedState,
    fingerprint: Option<PublicKeyFingerprint>,
    authenticated_username: Option<String>,
    public_key_wire_bytes: Vec<u8>,
    peer_addr: Option<SocketAddr>,
    channels: HashMap<ChannelId, ChannelKind>,
}

impl ConnectionHandler {
    fn require_fingerprint(&self) -> PublicKeyFingerprint {
        self.fingerprint
            .clone()
            .expect("channel operations only occur after publickey auth succeeds")
    }
}

#[async_trait]
impl russh::server::Handler for ConnectionHandler {
    type Error = anyhow::Error;

    /// The only authentication step (§4.4 point 1): compute the
    /// fingerprint, look up identity, and remember it on the connection.
    /// Connections without a valid key signature never reach here —
    /// russh itself enforces the signature before calling us.
    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        let wire_bytes = public_key.public_key_bytes();
        let fingerprint = PublicKeyFingerprint::from_wire_bytes(&wire_bytes);
        let status = self.state.identities.get_status(&fingerprint, None);

        self.public_key_wire_bytes = wire_bytes.to_vec();
        self.fingerprint = Some(fingerprint.clone());
        self.authenticated_username = status.username.clone();
        self.state.identities.touch(&fingerprint);

        info!(%user, verified = status.verified, "publickey authenticated");
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.channels.insert(channel.id(), ChannelKind::Pending);
        Ok(true)
    }

    /// `direct-tcpip` is rejected unless the target is loopback (§4.4
    /// point 3) — UNN is a rendezvous, not a relay.
    async fn channel_open_direct_tcpip(
        &mut self,
        _channel: Channel<Msg>,
        host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let is_loopback = host_to_connect == "127.0.0.1" || host_to_connect == "::1" || host_to_connect == "localhost";
        Ok(is_loopback)
    }

    async fn subsystem_request(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        match name {
            "unn-control" => self.classify_control(channel_id, session),
            "unn-api" => self.classify_api(channel_id),
            "unn-signaling" => self.classify_signaling(channel_id),
            other => warn!(subsystem = other, "unrecognized subsystem request"),
        }
        session.channel_success(channel_id);
        Ok(())
    }

    async fn pty_request(
        &mut self,
        channel_id: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.classify_interactive(channel_id, session);
        session.channel_success(channel_id);
        Ok(())
    }

    async fn data(
        &mut self,
        channel_id: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.handle_channel_data(channel_id, data, session).await
    }

    async fn channel_close(
        &mut self,
        channel_id: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.teardown_channel(channel_id).await;
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel_id: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.teardown_channel(channel_id).await;
        Ok(())
    }
}

impl ConnectionHandler {
    fn classify_control(&mut self, channel_id: ChannelId, session: &mut Session) {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel::<OperatorMessage>();
        let handle = session.handle();
        let control_rx_task = tokio::spawn(async move {
            while let Some(msg) = control_rx.recv().await {
                let bytes = CryptoVec::from(msg.to_json().to_string().into_bytes());
                if handle.data(channel_id, bytes).await.is_err() {
                    break;
                }
            }
        });

        let room_session = RoomControlSession::new(
            self.state.rooms.clone(),
            self.state.persons.clone(),
            self.state.broker.clone(),
            self.authenticated_username.clone(),
            control_tx,
        );
        self.channels.insert(
            channel_id,
            ChannelKind::Control {
                session: room_session,
                decoder: JsonFrameDecoder::new(),
                control_rx_task,
            },
        );
    }

    fn classify_api(&mut self, channel_id: ChannelId) {
        let session = ApiSession::new(
            self.state.identities.clone(),
            self.state.rooms.clone(),
            self.state.broker.clone(),
            self.require_fingerprint(),
        );
        self.channels.insert(
            channel_id,
            ChannelKind::Api { session, decoder: JsonFrameDecoder::new() },
        );
    }

    fn classify_signaling(&mut self, channel_id: ChannelId) {
        self.channels
            .insert(channel_id, ChannelKind::Signaling { decoder: JsonFrameDecoder::new() });
    }

    fn classify_interactive(&mut self, channel_id: ChannelId, session: &mut Session) {
        let fingerprint = self.require_fingerprint();
        let (lines_tx, lines_rx) = mpsc::unbounded_channel::<String>();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<OutEvent>();
        let persons = self.state.persons.clone();
        let identities = self.state.identities.clone();
        let rooms = self.state.rooms.clone();
        let broker = self.state.broker.clone();
        let public_key_wire_bytes = self.public_key_wire_bytes.clone();
        let peer_addr = self.peer_addr;

        let session_task = tokio::spawn(async move {
            let session_id = rand::random::<u64>();
            let (handle, from_system) =
                persons.attach(session_id, fingerprint.clone(), None).await;
            let interactive = InteractiveSession {
                fingerprint: fingerprint.clone(),
                public_key_wire_bytes,
                identities,
                rooms,
                broker,
                out: out_tx,
            };
            interactive.run(lines_rx, from_system).await;
            persons.detach(&fingerprint, session_id).await;
            let _ = handle;
            info!(?peer_addr, "interactive session ended");
        });

        // The pump task owns out_rx exclusively and writes to the wire
        // as soon as a line is produced, independent of when the client
        // next sends input — the welcome banner must appear before the
        // visitor has typed anything.
        let wire_handle = session.handle();
        let pump_task = tokio::spawn(async move {
            let mut out_rx = out_rx;
            while let Some(event) = out_rx.recv().await {
                match event {
                    OutEvent::Line(text) => {
                        let mut bytes = text.into_bytes();
                        bytes.extend_from_slice(b"\r\n");
                        if wire_handle.data(channel_id, CryptoVec::from(bytes)).await.is_err() {
                            break;
                        }
                    }
                    OutEvent::Raw(bytes) => {
                        if wire_handle.data(channel_id, CryptoVec::from(bytes)).await.is_err() {
                            break;
                        }
                    }
                    OutEvent::Disconnect => {
                        let _ = wire_handle.close(channel_id).await;
                        break;
                    }
                }
            }
        });

        // The bridge is the sole consumer of this channel's raw input
        // bytes (§5, §9); the line assembler below is its initial
        // consumer, and is what `switch_consumer` would hand stdin off
        // from if this connection ever needed to give a door/child
        // process exclusive control of the PTY.
        let (bridge, mut bridge_rx) = InputBridge::new();
        let line_task = tokio::spawn(async move {
            let mut line_buf = Vec::new();
            while let Some(data) = bridge_rx.recv().await {
                line_buf.extend_from_slice(&data);
                while let Some(pos) = line_buf.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = line_buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line).trim_end().to_string();
                    let _ = lines_tx.send(line);
                }
            }
        });

        self.channels.insert(
            channel_id,
            ChannelKind::Interactive {
                bridge,
                _session_task: session_task,
                _pump_task: pump_task,
                _line_task: line_task,
            },
        );
    }

    async fn handle_channel_data(
        &mut self,
        channel_id: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), anyhow::Error> {
        match self.channels.get_mut(&channel_id) {
            Some(ChannelKind::Control { session: room_session, decoder, .. }) => {
                for frame in decoder.feed(data).unwrap_or_default() {
                    let msg = match OperatorMessage::from_json(frame) {
                        Ok(msg) => msg,
                        Err(e) => {
                            warn!(error = %e, "malformed control frame");
                            continue;
                        }
                    };
                    let outcome = room_session.handle(msg).await;
                    if let Some(rooms) = outcome.broadcast {
                        room_session.deliver_broadcast(rooms).await;
                    }
                    if let Some(reply) = outcome.reply {
                        let bytes = reply.to_json().to_string().into_bytes();
                        session.data(channel_id, CryptoVec::from(bytes));
                    }
                }
            }
            Some(ChannelKind::Api { session: api_session, decoder }) => {
                for frame in decoder.feed(data).unwrap_or_default() {
                    let req = match ApiRequest::from_json(frame) {
                        Ok(req) => req,
                        Err(e) => {
                            warn!(error = %e, "malformed api frame");
                            continue;
                        }
                    };
                    let resp = api_session.handle(req).await;
                    let bytes = resp.to_json().to_string().into_bytes();
                    session.data(channel_id, CryptoVec::from(bytes));
                }
            }
            Some(ChannelKind::Signaling { decoder }) => {
                for frame in decoder.feed(data).unwrap_or_default() {
                    self.handle_signaling_frame(channel_id, frame, session);
                }
            }
            Some(ChannelKind::Interactive { bridge, .. }) => {
                bridge.publish(data.to_vec()).await;
            }
            Some(ChannelKind::Pending) | None => {
                warn!("data on unclassified channel");
            }
        }
        Ok(())
    }

    fn handle_signaling_frame(
        &mut self,
        channel_id: ChannelId,
        frame: serde_json::Value,
        session: &mut Session,
    ) {
        use unn_core::messages::{GetPeerPayload, SignalingMessage, SignalingRegisterPayload};
        let msg = match SignalingMessage::from_json(frame) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "malformed signaling frame");
                return;
            }
        };
        let remote_ip = self
            .peer_addr
            .map(|a| a.ip())
            .unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED));
        let response = match msg {
            SignalingMessage::Register(SignalingRegisterPayload { peer_id, candidates }) => {
                self.state.signaling.register(peer_id, candidates, remote_ip);
                serde_json::json!({"type": "response", "payload": []})
            }
            SignalingMessage::GetPeer(GetPeerPayload { peer_id }) => {
                match self.state.signaling.get_peer(&peer_id) {
                    Ok(candidates) => serde_json::json!({"type": "response", "payload": candidates}),
                    Err(_) => serde_json::json!({"type": "error", "payload": {"message": "peer not found"}}),
                }
            }
            SignalingMessage::Unknown { tag, .. } => {
                serde_json::json!({"type": "error", "payload": {"message": format!("unrecognized type '{tag}'")}})
            }
        };
        session.data(channel_id, CryptoVec::from(response.to_string().into_bytes()));
    }

    async fn teardown_channel(&mut self, channel_id: ChannelId) {
        if let Some(kind) = self.channels.remove(&channel_id) {
            match kind {
                ChannelKind::Control { mut session, control_rx_task, .. } => {
                    if let Some(rooms) = session.on_stream_closed().await {
                        session.deliver_broadcast(rooms).await;
                    }
                    control_rx_task.abort();
                }
                ChannelKind::Interactive { .. } => {
                    // The interactive task notices the lines channel
                    // closing (its sender is dropped here) and exits on
                    // its own, detaching the Person.
                }
                _ => {}
            }
        }
    }
}
