// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON payload shapes carried inside decrypted frames, and topic parsing.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{MessageError, TransportError};

/// The first message a gateway sends after the handshake reply.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthMessage {
    #[serde(rename = "uniqueId")]
    pub unique_id: String,
    pub token: String,
}

impl AuthMessage {
    pub fn parse(payload: &[u8]) -> Result<Self, TransportError> {
        let text = std::str::from_utf8(payload).map_err(|_| TransportError::JsonMalformed)?;
        serde_json::from_str(text).map_err(|_| TransportError::SchemaViolation)
    }
}

/// A server-to-gateway control message: subscribe to a topic, or publish a
/// command to one.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlMessage {
    Subscribe { topic: String },
    Publish { topic: String, message: Value },
}

impl ControlMessage {
    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self::Subscribe { topic: topic.into() }
    }

    pub fn to_json_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// The envelope every gateway-to-server message after auth arrives in.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    #[allow(dead_code)]
    pub action: String,
    pub topic: String,
    pub message: Value,
}

impl InboundEnvelope {
    pub fn parse(payload: &[u8]) -> Result<Self, TransportError> {
        let text = std::str::from_utf8(payload).map_err(|_| TransportError::JsonMalformed)?;
        serde_json::from_str(text).map_err(|_| TransportError::SchemaViolation)
    }
}

/// A parsed topic, identifying the event kind and the device (if any) it
/// concerns. The first segment names the kind; subsequent segments identify
/// protocol/address/endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    /// `status/<protocol>` — service inventory.
    Status { protocol: String },
    /// `expose/<protocol>/<address>` — per-endpoint capability map.
    Expose { protocol: String, address: String },
    /// `device/<protocol>/<address>` — online/offline liveness signal.
    Device { protocol: String, address: String },
    /// `fd/<protocol>/<address>[/<endpointId>]` — state key-values.
    Fd { protocol: String, address: String, endpoint: Option<String> },
}

impl Topic {
    pub fn parse(topic: &str) -> Result<Self, MessageError> {
        let mut segs = topic.split('/');
        let kind = segs.next().ok_or(MessageError::UnknownTopic)?;
        match kind {
            "status" => {
                let protocol = segs.next().ok_or(MessageError::UnknownTopic)?.to_owned();
                Ok(Self::Status { protocol })
            }
            "expose" => {
                let protocol = segs.next().ok_or(MessageError::UnknownTopic)?.to_owned();
                let address = segs.next().ok_or(MessageError::UnknownTopic)?.to_owned();
                Ok(Self::Expose { protocol, address })
            }
            "device" => {
                let protocol = segs.next().ok_or(MessageError::UnknownTopic)?.to_owned();
                let address = segs.next().ok_or(MessageError::UnknownTopic)?.to_owned();
                Ok(Self::Device { protocol, address })
            }
            "fd" => {
                let protocol = segs.next().ok_or(MessageError::UnknownTopic)?.to_owned();
                let address = segs.next().ok_or(MessageError::UnknownTopic)?.to_owned();
                let endpoint = segs.next().map(str::to_owned);
                Ok(Self::Fd { protocol, address, endpoint })
            }
            // Unknown first segments are dropped silently by the caller.
            _ => Err(MessageError::UnknownTopic),
        }
    }

    pub fn device_id(&self) -> Option<String> {
        match self {
            Self::Status { .. } => None,
            Self::Expose { protocol, address }
            | Self::Device { protocol, address }
            | Self::Fd { protocol, address, .. } => Some(format!("{protocol}/{address}")),
        }
    }
}

/// One device record within a `status/<protocol>` inventory message.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusDeviceRecord {
    #[serde(rename = "ieeeAddress")]
    pub ieee_address: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "manufacturerName", default)]
    pub manufacturer_name: Option<String>,
    #[serde(rename = "modelName", default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub firmware: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub cloud: bool,
    #[serde(default)]
    pub removed: bool,
}

/// Body of a `status/<protocol>` message.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusMessage {
    pub devices: Vec<StatusDeviceRecord>,
    #[serde(default)]
    #[allow(dead_code)]
    pub names: Option<bool>,
}

/// One endpoint's capability entry within an `expose/<...>` message.
#[derive(Debug, Clone, Deserialize)]
pub struct ExposeEntry {
    pub items: Vec<String>,
    #[serde(default)]
    pub options: Value,
}

/// Body of an `expose/<protocol>/<address>` message: endpoint id -> entry.
/// Non-numeric keys map to endpoint 0 ("device-wide").
pub type ExposeMessage = HashMap<String, ExposeEntry>;

pub fn parse_expose_endpoint_id(raw_key: &str) -> u32 {
    raw_key.parse::<u32>().unwrap_or(0)
}

/// Body of a `device/<protocol>/<address>` liveness message.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceStatusMessage {
    pub status: String,
}

impl DeviceStatusMessage {
    pub fn is_online(&self) -> bool {
        self.status == "online"
    }
}
