// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire shapes for the fulfillment HTTP surface. `Input`'s
//! payload shape depends on its `intent` tag, so it gets a manual
//! `Deserialize` rather than a derived one.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct FulfillmentRequest {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub inputs: Vec<Input>,
}

#[derive(Debug, Clone)]
pub struct Input {
    pub intent: Intent,
}

#[derive(Clone)]
pub enum Intent {
    Enumerate,
    Query { device_ids: Vec<String> },
    Execute { commands: Vec<ExecuteCommandGroup> },
    Disconnect,
}

#[derive(Debug, Clone)]
pub struct ExecuteCommandGroup {
    pub device_ids: Vec<String>,
    pub execution: Vec<Execution>,
}

#[derive(Debug, Clone)]
pub struct Execution {
    pub command: String,
    pub params: Value,
}

impl<'de> Deserialize<'de> for Input {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            intent: String,
            #[serde(default)]
            payload: Value,
        }
        let raw = Raw::deserialize(deserializer)?;
        let intent = match raw.intent.as_str() {
            "action.devices.SYNC" => Intent::Enumerate,
            "action.devices.QUERY" => Intent::Query { device_ids: device_ids(&raw.payload) },
            "action.devices.EXECUTE" => Intent::Execute { commands: execute_groups(&raw.payload) },
            "action.devices.DISCONNECT" => Intent::Disconnect,
            other => {
                return Err(serde::de::Error::custom(format!("unknown fulfillment intent: {other}")))
            }
        };
        Ok(Input { intent })
    }
}

fn device_ids(payload: &Value) -> Vec<String> {
    payload
        .get("devices")
        .and_then(Value::as_array)
        .map(|devices| {
            devices.iter().filter_map(|d| d.get("id").and_then(Value::as_str).map(String::from)).collect()
        })
        .unwrap_or_default()
}

fn execute_groups(payload: &Value) -> Vec<ExecuteCommandGroup> {
    payload
        .get("commands")
        .and_then(Value::as_array)
        .map(|groups| groups.iter().filter_map(parse_execute_group).collect())
        .unwrap_or_default()
}

fn parse_execute_group(group: &Value) -> Option<ExecuteCommandGroup> {
    let device_ids = device_ids(group);
    let execution = group
        .get("execution")?
        .as_array()?
        .iter()
        .filter_map(|e| {
            let command = e.get("command")?.as_str()?.to_owned();
            let params = e.get("params").cloned().unwrap_or(Value::Null);
            Some(Execution { command, params })
        })
        .collect();
    Some(ExecuteCommandGroup { device_ids, execution })
}


impl std::fmt::Debug for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Intent::Enumerate => write!(f, "Enumerate"),
            Intent::Query { .. } => write!(f, "Query"),
            Intent::Execute { .. } => write!(f, "Execute"),
            Intent::Disconnect => write!(f, "Disconnect"),
        }
    }
}
