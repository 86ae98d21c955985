// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fulfillment request handler: resolves the authenticated user, dispatches
//! on intent kind, and assembles responses from the device repository and
//! capability translator. Execute is fire-and-forget with respect to the
//! physical device; state convergence is observed later via `stateChanged`.

mod schema;

use std::sync::Arc;

use serde_json::Value;

use crate::directory::UserDirectory;
use crate::error::CommandError;
use crate::ids::{ClientId, DeviceId, UserId};
use crate::protocol::message::ControlMessage;
use crate::repository::DeviceRepository;
use crate::translate;

pub use schema::{Execution, FulfillmentRequest, Input, Intent};

pub struct FulfillmentHandler {
    directory: Arc<UserDirectory>,
    repository: Arc<DeviceRepository>,
}

impl FulfillmentHandler {
    pub fn new(directory: Arc<UserDirectory>, repository: Arc<DeviceRepository>) -> Self {
        Self { directory, repository }
    }

    /// Handle one fulfillment request for an already-authenticated user.
    /// Only the first input's intent is honored, matching every scenario in
    /// the wire protocol carries one intent per request in
    /// practice even though the envelope technically allows a list.
    pub async fn handle(&self, user_id: &UserId, request: FulfillmentRequest) -> Value {
        let payload = match request.inputs.into_iter().next() {
            Some(Input { intent: Intent::Enumerate }) => self.enumerate(user_id).await,
            Some(Input { intent: Intent::Query { device_ids } }) => {
                self.query(user_id, device_ids).await
            }
            Some(Input { intent: Intent::Execute { commands } }) => {
                self.execute(user_id, commands).await
            }
            Some(Input { intent: Intent::Disconnect }) => {
                self.directory.unlink(user_id).await;
                serde_json::json!({})
            }
            None => serde_json::json!({}),
        };
        serde_json::json!({"requestId": request.request_id, "payload": payload})
    }

    async fn enumerate(&self, user_id: &UserId) -> Value {
        let mut devices = Vec::new();
        for handle in self.directory.connections_of(user_id).await {
            let client_id = handle.client_id.clone();
            for (device_id, device, _state) in
                self.repository.list_devices(user_id, &client_id).await
            {
                for record in translate::enumerate_records(&client_id, &device_id, &device) {
                    devices.push(serde_json::json!({
                        "id": record.id,
                        "type": record.device_type,
                        "traits": record.traits,
                        "name": {"name": record.name},
                        "willReportState": true,
                        "attributes": record.attributes,
                    }));
                }
            }
        }
        serde_json::json!({"agentUserId": user_id.as_str(), "devices": devices})
    }

    async fn query(&self, user_id: &UserId, device_ids: Vec<String>) -> Value {
        let mut out = serde_json::Map::new();
        for raw_id in device_ids {
            let state = match parse_device_id(&raw_id) {
                Some((client_id, device_id, endpoint)) => {
                    match self.repository.device_snapshot(user_id, &client_id, &device_id).await {
                        Some((_device, state)) => {
                            translate::project_state(&effective_state(&state, endpoint))
                        }
                        None => offline_state(),
                    }
                }
                None => offline_state(),
            };
            out.insert(raw_id, state);
        }
        Value::Object(out)
    }

    async fn execute(
        &self,
        user_id: &UserId,
        groups: Vec<crate::fulfillment::schema::ExecuteCommandGroup>,
    ) -> Value {
        let mut results = Vec::new();
        for group in groups {
            for raw_id in &group.device_ids {
                for execution in &group.execution {
                    let outcome = self.execute_one(user_id, raw_id, execution).await;
                    results.push(outcome);
                }
            }
        }
        serde_json::json!({"commands": results})
    }

    async fn execute_one(&self, user_id: &UserId, raw_id: &str, execution: &Execution) -> Value {
        let Some((client_id, device_id, _endpoint)) = parse_device_id(raw_id) else {
            return command_result(raw_id, Err(CommandError::DeviceOffline));
        };
        if self.repository.device_snapshot(user_id, &client_id, &device_id).await.is_none() {
            return command_result(raw_id, Err(CommandError::DeviceOffline));
        }
        let payload = match translate::lower_command(&execution.command, &execution.params) {
            Ok(payload) => payload,
            Err(e) => return command_result(raw_id, Err(e)),
        };
        let Some(handle) = self.directory.connection_for(user_id, &client_id).await else {
            return command_result(raw_id, Err(CommandError::DeviceOffline));
        };
        let mut message = payload;
        if let Some(obj) = message.as_object_mut() {
            obj.insert("device".into(), Value::String(device_id_address(&device_id)));
            obj.insert("service".into(), Value::String("cloud".into()));
        }
        let topic = format!("command/{}", device_protocol(&device_id));
        handle.send_command(ControlMessage::Publish { topic, message }).await;
        command_result(raw_id, Ok(()))
    }
}

fn offline_state() -> Value {
    serde_json::json!({"online": false, "status": "OFFLINE"})
}

fn command_result(device_id: &str, outcome: Result<(), CommandError>) -> Value {
    match outcome {
        Ok(()) => serde_json::json!({"ids": [device_id], "status": "SUCCESS"}),
        Err(e) => serde_json::json!({
            "ids": [device_id],
            "status": e.status(),
            "errorCode": e.error_code(),
        }),
    }
}

fn effective_state(state: &Value, endpoint: Option<u32>) -> Value {
    let Some(ep) = endpoint else { return state.clone() };
    let mut merged = state.clone();
    let overlay = state.get("endpoints").and_then(|e| e.get(ep.to_string())).cloned();
    if let (Some(merged_obj), Some(Value::Object(overlay_obj))) = (merged.as_object_mut(), overlay) {
        for (k, v) in overlay_obj {
            merged_obj.insert(k, v);
        }
    }
    merged
}

fn device_protocol(device_id: &DeviceId) -> &str {
    device_id.as_str().split_once('/').map(|(p, _)| p).unwrap_or(device_id.as_str())
}

fn device_id_address(device_id: &DeviceId) -> String {
    device_id.as_str().split_once('/').map(|(_, a)| a.to_owned()).unwrap_or_default()
}

/// Parse an assistant-visible device id `<clientId>/<protocol>/<address>`,
/// optionally suffixed `#<endpointId>` for multi-endpoint devices.
fn parse_device_id(id: &str) -> Option<(ClientId, DeviceId, Option<u32>)> {
    let (base, endpoint) = match id.split_once('#') {
        Some((b, e)) => (b, e.parse::<u32>().ok()),
        None => (id, None),
    };
    let (client, rest) = base.split_once('/')?;
    Some((ClientId::from(client), DeviceId::from(rest), endpoint))
}
