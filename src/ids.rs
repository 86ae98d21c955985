// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Newtype identifiers so routing-table keys aren't raw `String`s at call sites.

use std::fmt;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(UserId);
string_id!(ClientId);

// `<protocol>/<address>`, e.g. `zigbee/84:fd:27:00:00:00:00:01`. Stable
// across reconnects of the same gateway.
string_id!(DeviceId);

impl DeviceId {
    pub fn new(protocol: &str, address: &str) -> Self {
        Self(format!("{protocol}/{address}"))
    }
}
