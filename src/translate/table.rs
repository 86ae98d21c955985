// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The ordered capability-detector table. Rows are checked top to bottom;
//! the first matching row decides the device type, every matching row's
//! traits accumulate. Replaces a polymorphic trait-mapper hierarchy with a
//! flat, inspectable table.

use serde_json::Value;

pub struct CapabilityRule {
    pub tag: &'static str,
    pub device_type: &'static str,
    pub traits: &'static [&'static str],
}

pub static CAPABILITY_TABLE: &[CapabilityRule] = &[
    CapabilityRule {
        tag: "lock",
        device_type: "action.devices.types.LOCK",
        traits: &["action.devices.traits.LockUnlock"],
    },
    CapabilityRule {
        tag: "cover",
        device_type: "action.devices.types.BLINDS",
        traits: &["action.devices.traits.OpenClose"],
    },
    CapabilityRule {
        tag: "thermostat",
        device_type: "action.devices.types.THERMOSTAT",
        traits: &["action.devices.traits.TemperatureSetting"],
    },
    CapabilityRule {
        tag: "light",
        device_type: "action.devices.types.LIGHT",
        traits: &["action.devices.traits.OnOff"],
    },
    CapabilityRule {
        tag: "brightness",
        device_type: "action.devices.types.LIGHT",
        traits: &["action.devices.traits.Brightness"],
    },
    CapabilityRule {
        tag: "color_xy",
        device_type: "action.devices.types.LIGHT",
        traits: &["action.devices.traits.ColorSetting"],
    },
    CapabilityRule {
        tag: "color_temp",
        device_type: "action.devices.types.LIGHT",
        traits: &["action.devices.traits.ColorSetting"],
    },
    CapabilityRule {
        tag: "switch",
        device_type: "action.devices.types.SWITCH",
        traits: &["action.devices.traits.OnOff"],
    },
    CapabilityRule {
        tag: "occupancy",
        device_type: "action.devices.types.SENSOR",
        traits: &["action.devices.traits.OccupancySensing"],
    },
    CapabilityRule {
        tag: "contact",
        device_type: "action.devices.types.SENSOR",
        traits: &["action.devices.traits.OpenClose"],
    },
];

/// Attributes a trait consumer needs alongside the device type: color model
/// hints and available thermostat modes, read from endpoint options.
pub fn attributes_for(exposes: &[&str], options: &Value) -> Value {
    let mut attrs = serde_json::Map::new();

    if exposes.contains(&"color_temp") {
        attrs.insert("colorModel".into(), Value::String("temperature".into()));
    } else if exposes.contains(&"color_xy") {
        attrs.insert("colorModel".into(), Value::String("rgb".into()));
    }

    if exposes.contains(&"thermostat") {
        if let Some(modes) = options.get("modes") {
            attrs.insert("availableThermostatModes".into(), modes.clone());
        }
    }

    Value::Object(attrs)
}
