// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection state machine: `AwaitHandshake -> AwaitAuth -> Subscribed -> Closed`.
//!
//! [`GatewayConnection`] is a pure, synchronous parser: it owns the cipher and
//! the accumulation buffers exclusively, and turns inbound bytes into a list
//! of [`ConnEvent`]s for the driving task to act on. It performs no I/O
//! itself, which keeps the handshake/frame/auth logic unit-testable without a
//! socket.

use serde_json::Value;

use crate::error::TransportError;
use crate::protocol::crypto::{self, HandshakeRequest, SessionCipher};
use crate::protocol::frame::FrameDecoder;
use crate::protocol::message::{AuthMessage, ControlMessage, InboundEnvelope, Topic};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    AwaitHandshake,
    AwaitAuth,
    Subscribed,
    Closed,
}

/// An action for the driving task to perform in response to ingested bytes.
#[derive(Debug)]
pub enum ConnEvent {
    /// Write these raw bytes to the socket (the unencrypted 4-byte handshake reply).
    WriteRaw(Vec<u8>),
    /// The gateway's auth message arrived; the driver must resolve `token`
    /// against the user directory and call [`GatewayConnection::complete_auth`]
    /// or [`GatewayConnection::reject_auth`].
    AuthAttempt { unique_id: String, token: String },
    /// A subscribed-state message routed to a device topic, for the driver to
    /// hand to the device repository.
    Dispatch { topic: Topic, message: Value },
    /// An unknown-topic message was dropped (transient, connection stays open).
    DroppedMessage { reason: &'static str },
    /// A transport-fatal error occurred; the driver must close the socket.
    Fatal(TransportError),
}

/// Synchronous gateway session state machine.
pub struct GatewayConnection {
    state: ConnState,
    handshake_buf: Vec<u8>,
    decoder: FrameDecoder,
    cipher: Option<SessionCipher>,
}

impl GatewayConnection {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            state: ConnState::AwaitHandshake,
            handshake_buf: Vec::with_capacity(12),
            decoder: FrameDecoder::new(max_frame_bytes),
            cipher: None,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Ingest newly-read socket bytes, producing zero or more events.
    ///
    /// Stops and returns after the first [`ConnEvent::Fatal`] or
    /// [`ConnEvent::AuthAttempt`] — the driver must act on either before more
    /// bytes make sense to process (an auth attempt blocks on an async
    /// directory lookup; a fatal error means the socket is about to close).
    pub fn ingest(&mut self, data: &[u8]) -> Vec<ConnEvent> {
        let mut events = Vec::new();

        match self.state {
            ConnState::AwaitHandshake => {
                self.handshake_buf.extend_from_slice(data);
                if self.handshake_buf.len() >= 12 {
                    let rest = self.handshake_buf.split_off(12);
                    match HandshakeRequest::parse(&self.handshake_buf) {
                        Ok(req) => {
                            let outcome = crypto::server_handshake(&req);
                            self.cipher = Some(outcome.cipher);
                            self.state = ConnState::AwaitAuth;
                            events.push(ConnEvent::WriteRaw(outcome.server_public_reply.to_vec()));
                            // Any bytes past the 12-byte handshake belong to
                            // the frame layer; feed them in below.
                            if !rest.is_empty() {
                                events.extend(self.ingest(&rest));
                            }
                        }
                        Err(e) => {
                            self.state = ConnState::Closed;
                            events.push(ConnEvent::Fatal(e));
                        }
                    }
                }
                events
            }
            ConnState::AwaitAuth => {
                if let Err(e) = self.decoder.feed(data) {
                    self.state = ConnState::Closed;
                    events.push(ConnEvent::Fatal(e));
                    return events;
                }
                match self.decoder.try_extract() {
                    Ok(Some(frame)) => match self.decrypt(&frame) {
                        Ok(plaintext) => match AuthMessage::parse(&plaintext) {
                            Ok(auth) => {
                                events.push(ConnEvent::AuthAttempt {
                                    unique_id: auth.unique_id,
                                    token: auth.token,
                                });
                            }
                            Err(e) => {
                                self.state = ConnState::Closed;
                                events.push(ConnEvent::Fatal(e));
                            }
                        },
                        Err(e) => {
                            self.state = ConnState::Closed;
                            events.push(ConnEvent::Fatal(e));
                        }
                    },
                    Ok(None) => {}
                    Err(e) => {
                        self.state = ConnState::Closed;
                        events.push(ConnEvent::Fatal(e));
                    }
                }
                events
            }
            ConnState::Subscribed => {
                if let Err(e) = self.decoder.feed(data) {
                    self.state = ConnState::Closed;
                    events.push(ConnEvent::Fatal(e));
                    return events;
                }
                loop {
                    match self.decoder.try_extract() {
                        Ok(Some(frame)) => match self.decrypt(&frame) {
                            Ok(plaintext) => match InboundEnvelope::parse(&plaintext) {
                                Ok(envelope) => match Topic::parse(&envelope.topic) {
                                    Ok(topic) => events.push(ConnEvent::Dispatch {
                                        topic,
                                        message: envelope.message,
                                    }),
                                    Err(_) => events.push(ConnEvent::DroppedMessage {
                                        reason: "unknown_topic",
                                    }),
                                },
                                Err(e) => {
                                    self.state = ConnState::Closed;
                                    events.push(ConnEvent::Fatal(e));
                                    break;
                                }
                            },
                            Err(e) => {
                                self.state = ConnState::Closed;
                                events.push(ConnEvent::Fatal(e));
                                break;
                            }
                        },
                        Ok(None) => break,
                        Err(e) => {
                            self.state = ConnState::Closed;
                            events.push(ConnEvent::Fatal(e));
                            break;
                        }
                    }
                }
                events
            }
            ConnState::Closed => events,
        }
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.cipher.as_ref().ok_or(TransportError::DecryptFailure)?.decrypt(ciphertext)
    }

    /// Complete authentication: transition to `Subscribed` and produce the
    /// framed, encrypted initial subscription message to write.
    pub fn complete_auth(&mut self) -> Vec<u8> {
        self.state = ConnState::Subscribed;
        // The cipher is always present once `AwaitAuth` was reached; absence
        // here would mean `complete_auth` was called out of sequence, which
        // the driver never does (it only fires off an `AuthAttempt` event,
        // which implies a cipher, before this can be called).
        self.encode(&ControlMessage::subscribe("status/#")).unwrap_or_default()
    }

    /// Authentication failed (unknown token or prior collision loser): close.
    pub fn reject_auth(&mut self) {
        self.state = ConnState::Closed;
    }

    /// Encode and encrypt a control message for the socket.
    ///
    /// Returns `None` if not yet `Subscribed` — sending before subscription
    /// completes is a programmer error, prevented structurally: the only
    /// caller able to reach this path is the connection driver itself, never
    /// an external sender, since routing tables don't register a connection
    /// until [`complete_auth`](Self::complete_auth) runs.
    pub fn encode(&self, msg: &ControlMessage) -> Option<Vec<u8>> {
        if self.state != ConnState::Subscribed {
            return None;
        }
        let cipher = self.cipher.as_ref()?;
        let ciphertext = cipher.encrypt(&msg.to_json_bytes());
        Some(crate::protocol::frame::encode(&ciphertext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::crypto::server_handshake;
    use crate::protocol::frame;
    use num_bigint::BigUint;

    fn handshake_bytes(prime: u32, generator: u32, client_public: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(12);
        out.extend(prime.to_be_bytes());
        out.extend(generator.to_be_bytes());
        out.extend(client_public.to_be_bytes());
        out
    }

    /// The literal handshake + auth happy path scenario.
    #[test]
    fn s1_handshake_then_auth_transitions_to_subscribed() {
        let mut conn = GatewayConnection::new(100 * 1024);
        let client_priv = BigUint::from(3u32);
        let prime = BigUint::from(11u32);
        let client_public = BigUint::from(2u32).modpow(&client_priv, &prime);
        let client_public_u32: u32 =
            client_public.to_bytes_be().iter().fold(0u32, |acc, &b| (acc << 8) | b as u32);

        let events = conn.ingest(&handshake_bytes(11, 2, client_public_u32));
        assert_eq!(conn.state(), ConnState::AwaitAuth);
        let reply = match &events[0] {
            ConnEvent::WriteRaw(bytes) => bytes.clone(),
            other => panic!("expected WriteRaw, got {other:?}"),
        };
        assert_eq!(reply.len(), 4);

        // Client derives the same session cipher from the reply.
        let server_public = BigUint::from(u32::from_be_bytes(reply.try_into().unwrap()));
        let shared = server_public.modpow(&client_priv, &prime);
        let client_cipher = crate::protocol::crypto::SessionCipher::derive(&shared);

        let auth_plain = br#"{"uniqueId":"gw-1","token":"abcdef"}"#;
        let auth_frame = frame::encode(&client_cipher.encrypt(auth_plain));
        let events = conn.ingest(&auth_frame);
        match &events[0] {
            ConnEvent::AuthAttempt { unique_id, token } => {
                assert_eq!(unique_id, "gw-1");
                assert_eq!(token, "abcdef");
            }
            other => panic!("expected AuthAttempt, got {other:?}"),
        }

        let subscribe_frame = conn.complete_auth();
        assert_eq!(conn.state(), ConnState::Subscribed);
        assert!(!subscribe_frame.is_empty());
    }

    #[test]
    fn malformed_handshake_is_fatal() {
        let req = HandshakeRequest { prime: 11, generator: 2, client_public: 5 };
        let outcome = server_handshake(&req);
        drop(outcome); // just exercising the handshake fn for coverage symmetry

        let mut conn = GatewayConnection::new(1024);
        // Sending a full 12 bytes but then corrupting the frame layer with
        // garbage exercises the fatal path deterministically.
        let _ = conn.ingest(&handshake_bytes(11, 2, 5));
        let events = conn.ingest(&[0x00, 0x01, 0x02]);
        assert!(matches!(events.first(), Some(ConnEvent::Fatal(_))));
    }

    #[test]
    fn sending_before_subscribed_is_refused() {
        let conn = GatewayConnection::new(1024);
        assert!(conn.encode(&ControlMessage::subscribe("status/#")).is_none());
    }
}
