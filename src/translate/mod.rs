// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Capability translator: pure functions mapping between the gateway's
//! capability-tag vocabulary and the assistant's device-type/trait
//! vocabulary. No I/O, no shared state — a fixed, ordered table of
//! capability detectors plus three projections.
//!
//! This replaces what would otherwise be a polymorphic "trait mapper"
//! hierarchy: each row names a tag, the device type it implies, and the
//! traits it contributes. Rows are checked in order; the first match wins
//! the device type, but every matching row's traits accumulate.

mod table;

use indexmap::IndexSet;
use serde_json::Value;

use crate::error::CommandError;
use crate::ids::{ClientId, DeviceId};
use crate::repository::{is_available, Device};

pub use table::{CapabilityRule, CAPABILITY_TABLE};

/// One assistant-visible device, ready to serialize into an enumerate response.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumerateRecord {
    pub id: String,
    pub device_type: &'static str,
    pub traits: Vec<&'static str>,
    pub name: String,
    pub attributes: Value,
}

/// Project a Device's endpoints into one or more assistant devices. Devices
/// with more than one endpoint enumerate as one logical device per endpoint,
/// id-suffixed `#<endpointId>`; single-endpoint devices enumerate once.
pub fn enumerate_records(
    client_id: &ClientId,
    device_id: &DeviceId,
    device: &Device,
) -> Vec<EnumerateRecord> {
    if device.is_multi_endpoint() {
        device
            .endpoints
            .iter()
            .map(|ep| build_record(client_id, device_id, device, &ep.exposes, &ep.options, Some(ep.id)))
            .collect()
    } else {
        let exposes = device.merged_exposes();
        let exposes: Vec<String> = exposes.into_iter().map(String::from).collect();
        let options = device.endpoints.first().map(|e| e.options.clone()).unwrap_or(Value::Null);
        vec![build_record(client_id, device_id, device, &exposes, &options, None)]
    }
}

fn build_record(
    client_id: &ClientId,
    device_id: &DeviceId,
    device: &Device,
    exposes: &[impl AsRef<str>],
    options: &Value,
    endpoint_id: Option<u32>,
) -> EnumerateRecord {
    let tags: Vec<&str> = exposes.iter().map(AsRef::as_ref).collect();
    let mut device_type: Option<&'static str> = None;
    let mut traits: IndexSet<&'static str> = IndexSet::new();

    for rule in CAPABILITY_TABLE.iter() {
        if tags.contains(&rule.tag) {
            device_type.get_or_insert(rule.device_type);
            for t in rule.traits {
                traits.insert(t);
            }
        }
    }

    let id = match endpoint_id {
        Some(ep) => format!("{client_id}/{device_id}#{ep}"),
        None => format!("{client_id}/{device_id}"),
    };

    EnumerateRecord {
        id,
        device_type: device_type.unwrap_or("action.devices.types.SWITCH"),
        traits: traits.into_iter().collect(),
        name: device.name.clone(),
        attributes: table::attributes_for(&tags, options),
    }
}

/// Project a device's raw state bag onto assistant trait state. Always
/// includes `online` and `status`; trait-specific keys are included only
/// when the underlying gateway keys are present.
pub fn project_state(state: &Value) -> Value {
    let mut out = serde_json::Map::new();
    out.insert("online".into(), Value::Bool(is_available(state)));
    out.insert("status".into(), Value::String("SUCCESS".into()));

    if let Some(on) = state.get("state").and_then(Value::as_str) {
        out.insert("on".into(), Value::Bool(on.eq_ignore_ascii_case("on")));
    }
    if let Some(level) = state.get("brightness").and_then(Value::as_f64) {
        let pct = (level / 255.0 * 100.0).round();
        out.insert("brightness".into(), serde_json::json!(pct as i64));
    }
    if let Some(color) = state.get("color").and_then(Value::as_object) {
        if let (Some(r), Some(g), Some(b)) = (
            color.get("r").and_then(Value::as_u64),
            color.get("g").and_then(Value::as_u64),
            color.get("b").and_then(Value::as_u64),
        ) {
            let packed = (r << 16) | (g << 8) | b;
            out.insert("color".into(), serde_json::json!({"spectrumRgb": packed}));
        }
    } else if let Some(kelvin) = state.get("color_temp").and_then(Value::as_u64) {
        out.insert("color".into(), serde_json::json!({"temperatureK": kelvin}));
    }
    if let Some(position) = state.get("position").and_then(Value::as_f64) {
        out.insert("openPercent".into(), serde_json::json!(position.round() as i64));
    } else if let Some(label) = state.get("state_cover").and_then(Value::as_str) {
        let pct = if label.eq_ignore_ascii_case("open") { 100 } else { 0 };
        out.insert("openPercent".into(), serde_json::json!(pct));
    }
    if let Some(temp) = state.get("temperature").and_then(Value::as_f64) {
        out.insert("thermostatTemperatureAmbient".into(), serde_json::json!(temp));
    }
    if let Some(setpoint) = state.get("occupied_heating_setpoint").and_then(Value::as_f64) {
        out.insert("thermostatTemperatureSetpoint".into(), serde_json::json!(setpoint));
    }
    if let Some(occ) = state.get("occupancy").and_then(Value::as_bool) {
        out.insert(
            "occupancySensorState".into(),
            Value::String(if occ { "OCCUPIED" } else { "UNOCCUPIED" }.into()),
        );
    }
    if let Some(contact) = state.get("contact").and_then(Value::as_bool) {
        out.insert(
            "openState".into(),
            Value::String(if contact { "CLOSED" } else { "OPEN" }.into()),
        );
    }
    if let Some(locked) = state.get("lock_state").and_then(Value::as_str) {
        out.insert(
            "isLocked".into(),
            Value::Bool(locked.eq_ignore_ascii_case("lock")),
        );
    }

    Value::Object(out)
}

/// Lower an assistant command + parameters to a gateway command payload.
/// Every payload carries an `action` key naming the command verb (the part
/// of the `command/<protocol>` publish the gateway actually branches on,
/// per the wire-exact outbound command shape); additional keys carry
/// command-specific parameters. The fulfillment handler merges `device` and
/// `service` into this object before sending. Unknown commands are
/// `NotSupported`.
pub fn lower_command(command: &str, params: &Value) -> Result<Value, CommandError> {
    match command {
        "action.devices.commands.OnOff" => {
            let on = params.get("on").and_then(Value::as_bool).ok_or(CommandError::NotSupported)?;
            Ok(serde_json::json!({"action": if on { "on" } else { "off" }}))
        }
        "action.devices.commands.BrightnessAbsolute" => {
            let brightness =
                params.get("brightness").and_then(Value::as_f64).ok_or(CommandError::NotSupported)?;
            let level = (brightness * 2.55).round() as i64;
            Ok(serde_json::json!({"action": "brightness", "level": level}))
        }
        "action.devices.commands.ColorAbsolute" => {
            let color = params.get("color").ok_or(CommandError::NotSupported)?;
            if let Some(rgb) = color.get("spectrumRgb").and_then(Value::as_u64) {
                let r = (rgb >> 16) & 0xFF;
                let g = (rgb >> 8) & 0xFF;
                let b = rgb & 0xFF;
                Ok(serde_json::json!({"action": "color", "color": {"r": r, "g": g, "b": b}}))
            } else if let Some(kelvin) = color.get("temperature").and_then(Value::as_u64) {
                Ok(serde_json::json!({"action": "color", "colorTemperature": kelvin}))
            } else {
                Err(CommandError::NotSupported)
            }
        }
        "action.devices.commands.OpenClose" => {
            let percent =
                params.get("openPercent").and_then(Value::as_f64).ok_or(CommandError::NotSupported)?;
            Ok(serde_json::json!({"action": "position", "position": percent.round() as i64}))
        }
        "action.devices.commands.ThermostatTemperatureSetpoint" => {
            let setpoint = params
                .get("thermostatTemperatureSetpoint")
                .and_then(Value::as_f64)
                .ok_or(CommandError::NotSupported)?;
            Ok(serde_json::json!({"action": "setpoint", "occupied_heating_setpoint": setpoint}))
        }
        "action.devices.commands.LockUnlock" => {
            let lock = params.get("lock").and_then(Value::as_bool).ok_or(CommandError::NotSupported)?;
            Ok(serde_json::json!({"action": if lock { "lock" } else { "unlock" }}))
        }
        _ => Err(CommandError::NotSupported),
    }
}
