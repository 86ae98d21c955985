// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The gateway TCP listener: one task per accepted connection, driving a
//! [`GatewayConnection`] state machine against the socket with a single
//! `tokio::select!` between inbound socket reads and outbound channel
//! sends, and one cancellable task per connection (here, a child of the
//! listener's shutdown token).

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::BridgeConfig;
use crate::directory::UserDirectory;
use crate::ids::{ClientId, DeviceId, UserId};
use crate::protocol::connection::{ConnEvent, ConnState, GatewayConnection};
use crate::protocol::message::{
    parse_expose_endpoint_id, ControlMessage, ExposeMessage, DeviceStatusMessage, StatusMessage,
    Topic,
};
use crate::repository::{Device, DeviceRepository, Endpoint};

/// A control message queued for a connection, tagged so the write loop can
/// apply the backpressure policy: commands are never dropped, other
/// outbound traffic sheds under a full queue.
#[derive(Debug, Clone)]
pub enum OutboundKind {
    Command(ControlMessage),
    State(ControlMessage),
}

/// A live gateway connection's routable handle: the write side of its
/// outbound queue, plus a token to force it closed (used on session
/// collision).
pub struct ConnectionHandle {
    pub client_id: ClientId,
    outbound: mpsc::Sender<OutboundKind>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    fn new(client_id: ClientId, outbound: mpsc::Sender<OutboundKind>, cancel: CancellationToken) -> Self {
        Self { client_id, outbound, cancel }
    }

    /// Queue a command; awaits channel capacity rather than dropping, since
    /// commands are the one outbound class the backpressure policy protects.
    pub async fn send_command(&self, msg: ControlMessage) {
        let _ = self.outbound.send(OutboundKind::Command(msg)).await;
    }

    /// Queue a non-command control message; dropped outright if the queue is
    /// full rather than blocking the sender.
    pub fn send_state(&self, msg: ControlMessage) {
        let _ = self.outbound.try_send(OutboundKind::State(msg));
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }

    #[cfg(test)]
    pub fn new_for_test(client_id: ClientId) -> (Self, mpsc::Receiver<OutboundKind>) {
        let (tx, rx) = mpsc::channel(8);
        (Self::new(client_id, tx, CancellationToken::new()), rx)
    }
}

/// Bind the gateway TCP port and accept connections until `shutdown` fires.
pub async fn spawn_listener(
    config: BridgeConfig,
    directory: Arc<UserDirectory>,
    repository: Arc<DeviceRepository>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    tracing::info!(addr = %listener.local_addr()?, "gateway listener bound");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(err = %e, "accept failed");
                        continue;
                    }
                };
                let config = config.clone();
                let directory = Arc::clone(&directory);
                let repository = Arc::clone(&repository);
                let conn_shutdown = shutdown.child_token();
                tokio::spawn(async move {
                    drive_connection(socket, peer, config, directory, repository, conn_shutdown).await;
                });
            }
        }
    }
    Ok(())
}

async fn drive_connection(
    mut socket: TcpStream,
    peer: SocketAddr,
    config: BridgeConfig,
    directory: Arc<UserDirectory>,
    repository: Arc<DeviceRepository>,
    shutdown: CancellationToken,
) {
    let mut conn = GatewayConnection::new(config.max_frame_bytes);
    let (outbound_tx, mut outbound_rx) = mpsc::channel(config.write_queue_capacity);
    let mut identity: Option<(UserId, ClientId, Arc<ConnectionHandle>)> = None;
    let mut buf = vec![0u8; 4096];

    let auth_deadline = tokio::time::sleep(config.auth_deadline());
    tokio::pin!(auth_deadline);

    'driver: loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            () = &mut auth_deadline, if conn.state() != ConnState::Subscribed => {
                tracing::debug!(%peer, "auth deadline exceeded");
                break;
            }
            outgoing = outbound_rx.recv() => {
                let Some(kind) = outgoing else { break };
                let control = match kind { OutboundKind::Command(c) | OutboundKind::State(c) => c };
                if let Some(bytes) = conn.encode(&control) {
                    if socket.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
            }
            read = socket.read(&mut buf) => {
                let n = match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                for event in conn.ingest(&buf[..n]) {
                    match event {
                        ConnEvent::WriteRaw(bytes) => {
                            if socket.write_all(&bytes).await.is_err() {
                                break 'driver;
                            }
                        }
                        ConnEvent::AuthAttempt { unique_id, token } => {
                            match directory.resolve_token(&token).await {
                                Some(user_id) => {
                                    let client_id = ClientId::from(unique_id);
                                    let handle = Arc::new(ConnectionHandle::new(
                                        client_id.clone(),
                                        outbound_tx.clone(),
                                        shutdown.clone(),
                                    ));
                                    if let Some(old) = directory
                                        .attach(user_id.clone(), client_id.clone(), Arc::clone(&handle))
                                        .await
                                    {
                                        old.close();
                                    }
                                    identity = Some((user_id, client_id, handle));
                                    let subscribe_bytes = conn.complete_auth();
                                    if socket.write_all(&subscribe_bytes).await.is_err() {
                                        break 'driver;
                                    }
                                }
                                None => {
                                    conn.reject_auth();
                                    tracing::debug!(%peer, "rejected unknown token");
                                    break 'driver;
                                }
                            }
                        }
                        ConnEvent::Dispatch { topic, message } => {
                            if let Some((user_id, client_id, _)) = identity.clone() {
                                let follow_ups =
                                    ingest_message(&repository, &user_id, &client_id, topic, message).await;
                                for control in follow_ups {
                                    if let Some(bytes) = conn.encode(&control) {
                                        if socket.write_all(&bytes).await.is_err() {
                                            break 'driver;
                                        }
                                    }
                                }
                            }
                        }
                        ConnEvent::DroppedMessage { reason } => {
                            tracing::trace!(reason, %peer, "dropped inbound message");
                        }
                        ConnEvent::Fatal(e) => {
                            tracing::debug!(err = %e, %peer, "transport error, closing connection");
                            break 'driver;
                        }
                    }
                }
            }
        }
    }

    if let Some((user_id, client_id, handle)) = identity {
        // A superseded connection's teardown must not remove the routing
        // entry (or purge the devices) of the connection that replaced it;
        // only act if this connection's handle is still the registered one.
        if directory.detach_if_current(&user_id, &client_id, &handle).await {
            repository.purge_client(&user_id, &client_id).await;
        }
    }
}

/// Turn one decoded gateway message into the corresponding repository
/// mutation. Unparsable bodies are dropped (transient, not fatal);
/// the connection itself stays open. Returns subscribe messages the driver
/// should send for devices newly discovered by a `status/<protocol>` sync —
/// the gateway only starts publishing `expose`/`device`/`fd` for a device
/// once the server explicitly subscribes to it.
async fn ingest_message(
    repository: &DeviceRepository,
    user_id: &UserId,
    client_id: &ClientId,
    topic: Topic,
    message: Value,
) -> Vec<ControlMessage> {
    match topic {
        Topic::Status { protocol } => {
            let Ok(status) = serde_json::from_value::<StatusMessage>(message) else { return Vec::new() };
            let incoming: Vec<(DeviceId, Device)> = status
                .devices
                .into_iter()
                .filter(|d| d.cloud && !d.removed && !d.name.is_empty() && !d.name.eq_ignore_ascii_case(&protocol))
                .map(|d| {
                    let id = DeviceId::new(&protocol, &d.ieee_address);
                    let device = Device {
                        name: d.name,
                        description: d.description,
                        manufacturer: d.manufacturer_name,
                        model: d.model_name,
                        firmware: d.firmware,
                        protocol: protocol.clone(),
                        address: d.ieee_address,
                        endpoints: Vec::new(),
                    };
                    (id, device)
                })
                .collect();
            let (added, _removed) =
                repository.sync_client_devices(user_id, client_id, incoming).await;
            added
                .into_iter()
                .flat_map(|id| {
                    let topic = id.as_str().to_owned();
                    [
                        ControlMessage::subscribe(format!("expose/{topic}")),
                        ControlMessage::subscribe(format!("device/{topic}")),
                        ControlMessage::subscribe(format!("fd/{topic}")),
                    ]
                })
                .collect()
        }
        Topic::Expose { protocol, address } => {
            let Ok(expose) = serde_json::from_value::<ExposeMessage>(message) else { return Vec::new() };
            let endpoints = expose
                .into_iter()
                .map(|(key, entry)| Endpoint {
                    id: parse_expose_endpoint_id(&key),
                    exposes: entry.items,
                    options: entry.options,
                })
                .collect();
            let device_id = DeviceId::new(&protocol, &address);
            repository.update_device(user_id, client_id, &device_id, endpoints).await;
            Vec::new()
        }
        Topic::Device { protocol, address } => {
            let Ok(status) = serde_json::from_value::<DeviceStatusMessage>(message) else { return Vec::new() };
            let device_id = DeviceId::new(&protocol, &address);
            repository.set_available(user_id, client_id, &device_id, status.is_online()).await;
            Vec::new()
        }
        Topic::Fd { protocol, address, endpoint } => {
            let device_id = DeviceId::new(&protocol, &address);
            let endpoint_id = endpoint.and_then(|e| e.parse().ok());
            repository.update_state(user_id, client_id, &device_id, message, endpoint_id).await;
            Vec::new()
        }
    }
}
