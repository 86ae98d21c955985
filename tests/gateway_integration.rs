// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tests driving the real TCP listener with a client that speaks
//! the wire protocol directly: handshake, auth, and topic traffic over a
//! live socket, checked against the device repository and fulfillment
//! handler the listener feeds.

use std::sync::Arc;
use std::time::Duration;

use num_bigint::BigUint;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use hearthbridge::config::BridgeConfig;
use hearthbridge::directory::UserDirectory;
use hearthbridge::fulfillment::{FulfillmentHandler, FulfillmentRequest};
use hearthbridge::ids::UserId;
use hearthbridge::protocol::crypto::SessionCipher;
use hearthbridge::protocol::frame::{self, FrameDecoder};
use hearthbridge::repository::DeviceRepository;

struct Harness {
    directory: Arc<UserDirectory>,
    repository: Arc<DeviceRepository>,
    fulfillment: FulfillmentHandler,
    shutdown: CancellationToken,
    port: u16,
}

async fn start(port: u16) -> Harness {
    let directory = Arc::new(UserDirectory::new());
    let repository = Arc::new(DeviceRepository::new(Duration::from_secs(30)));
    let fulfillment = FulfillmentHandler::new(Arc::clone(&directory), Arc::clone(&repository));
    let shutdown = CancellationToken::new();

    let config = BridgeConfig {
        host: "127.0.0.1".to_owned(),
        port,
        http_host: "127.0.0.1".to_owned(),
        http_port: 0,
        auth_deadline_ms: 5_000,
        max_frame_bytes: 64 * 1024,
        liveness_timeout_ms: 30_000,
        write_queue_capacity: 64,
    };

    let d = Arc::clone(&directory);
    let r = Arc::clone(&repository);
    let s = shutdown.clone();
    tokio::spawn(async move {
        let _ = hearthbridge::listener::spawn_listener(config, d, r, s).await;
    });
    // Give the listener a moment to bind before the test connects.
    tokio::time::sleep(Duration::from_millis(50)).await;

    Harness { directory, repository, fulfillment, shutdown, port }
}

/// A minimal client-side driver for the gateway wire protocol: the DH
/// handshake with the literal S1 parameters, then framed+encrypted
/// read/write over the socket.
struct GatewayClient {
    socket: TcpStream,
    cipher: SessionCipher,
    decoder: FrameDecoder,
}

impl GatewayClient {
    async fn connect(port: u16) -> Self {
        let mut socket = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

        // Literal small-prime parameters: prime=11, g=2, client priv=3.
        let prime: u32 = 11;
        let generator: u32 = 2;
        let client_priv = BigUint::from(3u32);
        let client_public = BigUint::from(generator).modpow(&client_priv, &BigUint::from(prime));
        let client_public_u32: u32 =
            client_public.to_bytes_be().iter().fold(0u32, |acc, &b| (acc << 8) | b as u32);

        let mut req = Vec::with_capacity(12);
        req.extend(prime.to_be_bytes());
        req.extend(generator.to_be_bytes());
        req.extend(client_public_u32.to_be_bytes());
        socket.write_all(&req).await.unwrap();

        let mut reply = [0u8; 4];
        socket.read_exact(&mut reply).await.unwrap();
        let server_public = BigUint::from(u32::from_be_bytes(reply));
        let shared = server_public.modpow(&client_priv, &BigUint::from(prime));
        let cipher = SessionCipher::derive(&shared);

        Self { socket, cipher, decoder: FrameDecoder::new(1024 * 1024) }
    }

    async fn auth(&mut self, unique_id: &str, token: &str) {
        let payload = json!({"uniqueId": unique_id, "token": token}).to_string();
        let ciphertext = self.cipher.encrypt(payload.as_bytes());
        self.socket.write_all(&frame::encode(&ciphertext)).await.unwrap();
    }

    async fn publish(&mut self, topic: &str, message: serde_json::Value) {
        let payload = json!({"action": "publish", "topic": topic, "message": message}).to_string();
        let ciphertext = self.cipher.encrypt(payload.as_bytes());
        self.socket.write_all(&frame::encode(&ciphertext)).await.unwrap();
    }

    /// Read one decrypted, decoded control message off the socket.
    async fn recv_control(&mut self) -> serde_json::Value {
        loop {
            if let Some(frame) = self.decoder.try_extract().unwrap() {
                let plaintext = self.cipher.decrypt(&frame).unwrap();
                return serde_json::from_slice(&plaintext).unwrap();
            }
            let mut buf = [0u8; 4096];
            let n = self.socket.read(&mut buf).await.unwrap();
            assert!(n > 0, "socket closed before a control message arrived");
            self.decoder.feed(&buf[..n]).unwrap();
        }
    }
}

#[tokio::test]
async fn s1_handshake_and_auth_yields_status_subscribe() {
    let harness = start(17_601).await;
    harness.directory.upsert_user(UserId::from("alice"), "gw-1-token".to_owned()).await;

    let mut client = GatewayClient::connect(harness.port).await;
    client.auth("gw-1", "gw-1-token").await;

    let control = client.recv_control().await;
    assert_eq!(control, json!({"action": "subscribe", "topic": "status/#"}));

    harness.shutdown.cancel();
}

#[tokio::test]
async fn s2_device_lifecycle_drives_dynamic_subscribes_and_state_projection() {
    let harness = start(17_602).await;
    harness.directory.upsert_user(UserId::from("alice"), "gw-1-token".to_owned()).await;

    let mut client = GatewayClient::connect(harness.port).await;
    client.auth("gw-1", "gw-1-token").await;
    assert_eq!(client.recv_control().await, json!({"action": "subscribe", "topic": "status/#"}));

    client
        .publish(
            "status/zigbee",
            json!({"devices": [{"ieeeAddress": "84:fd:27:00:00:00:00:01", "name": "Lamp", "cloud": true}]}),
        )
        .await;

    // The newly-discovered device triggers three follow-up subscribes.
    let mut subscribed_topics = Vec::new();
    for _ in 0..3 {
        let control = client.recv_control().await;
        subscribed_topics.push(control["topic"].as_str().unwrap().to_owned());
    }
    subscribed_topics.sort();
    assert_eq!(
        subscribed_topics,
        vec![
            "device/zigbee/84:fd:27:00:00:00:00:01",
            "expose/zigbee/84:fd:27:00:00:00:00:01",
            "fd/zigbee/84:fd:27:00:00:00:00:01",
        ]
    );

    client
        .publish("expose/zigbee/84:fd:27:00:00:00:00:01", json!({"1": {"items": ["light", "brightness"]}}))
        .await;
    client.publish("device/zigbee/84:fd:27:00:00:00:00:01", json!({"status": "online"})).await;
    client.publish("fd/zigbee/84:fd:27:00:00:00:00:01", json!({"state": "ON", "brightness": 128})).await;

    // Give the connection task time to process the three publishes.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let user = UserId::from("alice");
    let client_id = hearthbridge::ids::ClientId::from("gw-1");
    let devices = harness.repository.list_devices(&user, &client_id).await;
    assert_eq!(devices.len(), 1);

    let device_id = devices[0].0.clone();
    let (_, state) = harness.repository.device_snapshot(&user, &client_id, &device_id).await.unwrap();
    let traits = hearthbridge::translate::project_state(&state);
    assert_eq!(traits["online"], json!(true));
    assert_eq!(traits["on"], json!(true));
    assert_eq!(traits["brightness"], json!(50));

    harness.shutdown.cancel();
}

#[tokio::test]
async fn s3_execute_lowers_and_routes_command_to_the_owning_connection() {
    let harness = start(17_603).await;
    let user = UserId::from("alice");
    harness.directory.upsert_user(user.clone(), "gw-1-token".to_owned()).await;

    let mut client = GatewayClient::connect(harness.port).await;
    client.auth("gw-1", "gw-1-token").await;
    assert_eq!(client.recv_control().await, json!({"action": "subscribe", "topic": "status/#"}));

    client
        .publish(
            "status/zigbee",
            json!({"devices": [{"ieeeAddress": "84:fd:27:00:00:00:00:01", "name": "Lamp", "cloud": true}]}),
        )
        .await;
    for _ in 0..3 {
        client.recv_control().await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let request: FulfillmentRequest = serde_json::from_value(json!({
        "requestId": "req-1",
        "inputs": [{
            "intent": "action.devices.EXECUTE",
            "payload": {
                "commands": [{
                    "devices": [{"id": "gw-1/zigbee/84:fd:27:00:00:00:00:01"}],
                    "execution": [{"command": "action.devices.commands.OnOff", "params": {"on": false}}]
                }]
            }
        }]
    }))
    .unwrap();

    let response = harness.fulfillment.handle(&user, request).await;
    let command = client.recv_control().await;
    assert_eq!(
        command,
        json!({
            "action": "publish",
            "topic": "command/zigbee",
            "message": {
                "action": "off",
                "device": "84:fd:27:00:00:00:00:01",
                "service": "cloud",
            }
        })
    );

    let results = response["payload"]["commands"].as_array().unwrap();
    assert_eq!(results[0]["status"], json!("SUCCESS"));

    harness.shutdown.cancel();
}

#[tokio::test]
async fn session_collision_closes_old_connection_without_clobbering_the_new_one() {
    let harness = start(17_604).await;
    let user = UserId::from("alice");
    let client_id = hearthbridge::ids::ClientId::from("gw-1");
    harness.directory.upsert_user(user.clone(), "gw-1-token".to_owned()).await;

    let mut old_client = GatewayClient::connect(harness.port).await;
    old_client.auth("gw-1", "gw-1-token").await;
    assert_eq!(old_client.recv_control().await, json!({"action": "subscribe", "topic": "status/#"}));

    old_client
        .publish(
            "status/zigbee",
            json!({"devices": [{"ieeeAddress": "84:fd:27:00:00:00:00:01", "name": "Lamp", "cloud": true}]}),
        )
        .await;
    for _ in 0..3 {
        old_client.recv_control().await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.repository.list_devices(&user, &client_id).await.len(), 1);

    // A second gateway connecting with the same unique id evicts the first.
    let mut new_client = GatewayClient::connect(harness.port).await;
    new_client.auth("gw-1", "gw-1-token").await;
    assert_eq!(new_client.recv_control().await, json!({"action": "subscribe", "topic": "status/#"}));

    // The evicted connection's task must actually terminate: its socket
    // observes EOF rather than staying open and live.
    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_millis(500), old_client.socket.read(&mut buf))
        .await
        .expect("evicted connection's task never closed its socket")
        .unwrap();
    assert_eq!(read, 0, "evicted connection's socket should observe EOF");

    // The new connection's routing entry and the device catalog it shares
    // with the old connection (same user+client id) must survive the old
    // connection's delayed teardown.
    assert!(harness.directory.connection_for(&user, &client_id).await.is_some());
    assert_eq!(harness.repository.list_devices(&user, &client_id).await.len(), 1);

    harness.shutdown.cancel();
}
