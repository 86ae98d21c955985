// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device catalog types: `Device`, `Endpoint`, and the events the repository emits.

use serde_json::Value;

use crate::ids::{ClientId, DeviceId, UserId};

/// A single sub-addressable unit within a device. Endpoint 0 is "device-wide".
#[derive(Debug, Clone, Default)]
pub struct Endpoint {
    pub id: u32,
    pub exposes: Vec<String>,
    pub options: Value,
}

/// A device known to the bridge, keyed by `DeviceId` within `(UserId, ClientId)`.
#[derive(Debug, Clone)]
pub struct Device {
    pub name: String,
    pub description: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub firmware: Option<String>,
    /// Gateway protocol this device speaks (the first segment of its `DeviceId`);
    /// used to build the `command/<protocol>` topic.
    pub protocol: String,
    /// The device address (the part of `DeviceId` after the protocol).
    pub address: String,
    pub endpoints: Vec<Endpoint>,
}

impl Device {
    pub fn merged_exposes(&self) -> Vec<&str> {
        let mut all: Vec<&str> = self.endpoints.iter().flat_map(|e| e.exposes.iter().map(String::as_str)).collect();
        all.sort_unstable();
        all.dedup();
        all
    }

    pub fn is_multi_endpoint(&self) -> bool {
        self.endpoints.len() > 1
    }
}

/// An event emitted by the device repository. A narrow, typed set of
/// subscribers listen on a broadcast channel — no dynamic dispatch by name.
#[derive(Debug, Clone)]
pub enum RepositoryEvent {
    DevicesChanged { user_id: UserId },
    StateChanged {
        user_id: UserId,
        client_id: ClientId,
        device_id: DeviceId,
        prev: Value,
        next: Value,
    },
}

/// Build the canonical "empty" device state object: `{"available": false}`.
pub fn empty_state() -> Value {
    serde_json::json!({ "available": false })
}

/// Read the `available` flag out of a state object (defaulting to `false`).
pub fn is_available(state: &Value) -> bool {
    state.get("available").and_then(Value::as_bool).unwrap_or(false)
}

/// Deep-merge `patch` into `base` (objects merge key-wise and recursively;
/// any other value type replaces outright), optionally nested under
/// `endpoints.<endpoint_id>`.
pub fn merge_state(base: &Value, patch: &Value, endpoint_id: Option<u32>) -> Value {
    let mut merged = match base {
        Value::Object(_) => base.clone(),
        _ => Value::Object(Default::default()),
    };
    match endpoint_id {
        None => deep_merge(&mut merged, patch),
        Some(id) => {
            if let Value::Object(map) = &mut merged {
                let endpoints =
                    map.entry("endpoints").or_insert_with(|| Value::Object(Default::default()));
                if !endpoints.is_object() {
                    *endpoints = Value::Object(Default::default());
                }
                if let Value::Object(endpoints_obj) = endpoints {
                    let slot = endpoints_obj
                        .entry(id.to_string())
                        .or_insert_with(|| Value::Object(Default::default()));
                    deep_merge(slot, patch);
                }
            }
        }
    }
    merged
}

fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (k, v) in patch_map {
                deep_merge(base_map.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
        (base_slot, patch_value) => {
            *base_slot = patch_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deep_merge_overwrites_scalar_and_keeps_siblings() {
        let base = json!({"on": true, "brightness": 10});
        let patch = json!({"brightness": 50});
        let merged = merge_state(&base, &patch, None);
        assert_eq!(merged, json!({"on": true, "brightness": 50}));
    }

    #[test]
    fn deep_merge_nests_under_endpoint() {
        let base = json!({"available": true});
        let patch = json!({"on": true});
        let merged = merge_state(&base, &patch, Some(1));
        assert_eq!(merged, json!({"available": true, "endpoints": {"1": {"on": true}}}));
    }

    #[test]
    fn deep_merge_is_recursive_on_nested_objects() {
        let base = json!({"endpoints": {"1": {"on": true, "level": 5}}});
        let patch = json!({"endpoints": {"1": {"level": 9}}});
        let merged = merge_state(&base, &patch, None);
        assert_eq!(merged, json!({"endpoints": {"1": {"on": true, "level": 9}}}));
    }
}
