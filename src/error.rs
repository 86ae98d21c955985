// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Transport-fatal errors: the connection that raised these is closed, never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The inbound buffer grew past the configured cap before a complete frame arrived.
    FrameOverflow,
    /// Bytes preceding a frame's start byte that are not themselves a frame.
    FrameMalformed,
    /// The 12-byte DH handshake triple was truncated or otherwise unparsable.
    HandshakeMalformed,
    /// AES-CBC decrypt or unpadding failed.
    DecryptFailure,
    /// Decrypted payload was not valid UTF-8 JSON.
    JsonMalformed,
    /// Payload parsed as JSON but did not match the expected message shape.
    SchemaViolation,
    /// The auth message's token did not resolve to a user.
    UnknownToken,
}

impl TransportError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FrameOverflow => "frame_overflow",
            Self::FrameMalformed => "frame_malformed",
            Self::HandshakeMalformed => "handshake_malformed",
            Self::DecryptFailure => "decrypt_failure",
            Self::JsonMalformed => "json_malformed",
            Self::SchemaViolation => "schema_violation",
            Self::UnknownToken => "unknown_token",
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for TransportError {}

/// Transient-per-message errors: the message is dropped, the connection stays open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageError {
    UnknownTopic,
    EndpointOutOfRange,
    UnknownDevice,
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UnknownTopic => "unknown_topic",
            Self::EndpointOutOfRange => "endpoint_out_of_range",
            Self::UnknownDevice => "unknown_device",
        };
        f.write_str(s)
    }
}

/// Per-command outcome reported in a fulfillment execute response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    /// The device id does not resolve, or resolves but has no live connection.
    DeviceOffline,
    /// The command has no known translation to a gateway payload.
    NotSupported,
}

impl CommandError {
    pub fn status(&self) -> &'static str {
        match self {
            Self::DeviceOffline => "OFFLINE",
            Self::NotSupported => "ERROR",
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DeviceOffline => "deviceOffline",
            Self::NotSupported => "notSupported",
        }
    }
}
