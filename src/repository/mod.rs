// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device repository: per-`(UserId, ClientId)` device catalog and state store.
//!
//! Mutations for a given `(UserId, ClientId)` are serialized through a
//! sharded async mutex, so writes to one gateway's catalog never take a
//! whole-repository lock that would block unrelated gateways.

mod watchdog;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::ids::{ClientId, DeviceId, UserId};

pub use types::{empty_state, is_available, merge_state, Device, Endpoint, RepositoryEvent};
pub use watchdog::spawn_watchdog;

type ShardKey = (UserId, ClientId);

#[derive(Default)]
struct ClientCatalog {
    devices: HashMap<DeviceId, Device>,
    state: HashMap<DeviceId, Value>,
    liveness: HashMap<DeviceId, Instant>,
}

/// The device catalog and state store for all users, sharded per
/// `(UserId, ClientId)` for both locking and liveness sweeps.
pub struct DeviceRepository {
    shards: RwLock<HashMap<ShardKey, Arc<Mutex<ClientCatalog>>>>,
    events: broadcast::Sender<RepositoryEvent>,
    liveness_timeout: std::time::Duration,
}

impl DeviceRepository {
    pub fn new(liveness_timeout: std::time::Duration) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self { shards: RwLock::new(HashMap::new()), events, liveness_timeout }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RepositoryEvent> {
        self.events.subscribe()
    }

    async fn shard(&self, user_id: &UserId, client_id: &ClientId) -> Arc<Mutex<ClientCatalog>> {
        let key = (user_id.clone(), client_id.clone());
        if let Some(shard) = self.shards.read().await.get(&key) {
            return Arc::clone(shard);
        }
        let mut shards = self.shards.write().await;
        Arc::clone(shards.entry(key).or_insert_with(|| Arc::new(Mutex::new(ClientCatalog::default()))))
    }

    fn emit(&self, event: RepositoryEvent) {
        // No subscribers yet is not an error; the channel just has no readers.
        let _ = self.events.send(event);
    }

    /// Reconcile the device set for `(user, client)` against a freshly
    /// received `status/<protocol>` inventory. Existing matched devices keep
    /// their endpoint list and state untouched — the status message carries
    /// no endpoint data. Newly added devices start with empty endpoints and
    /// `available: true` (seeded only once, from this arrival; never
    /// clobbered again by a later resync of the same device).
    pub async fn sync_client_devices(
        &self,
        user_id: &UserId,
        client_id: &ClientId,
        incoming: Vec<(DeviceId, Device)>,
    ) -> (Vec<DeviceId>, Vec<DeviceId>) {
        let shard = self.shard(user_id, client_id).await;
        let mut catalog = shard.lock().await;

        let incoming_ids: std::collections::HashSet<DeviceId> =
            incoming.iter().map(|(id, _)| id.clone()).collect();
        let removed: Vec<DeviceId> =
            catalog.devices.keys().filter(|id| !incoming_ids.contains(id)).cloned().collect();

        for id in &removed {
            catalog.devices.remove(id);
            catalog.state.remove(id);
            catalog.liveness.remove(id);
        }

        let mut added = Vec::new();
        for (id, mut device) in incoming {
            if let Some(existing) = catalog.devices.get(&id) {
                device.endpoints = existing.endpoints.clone();
                catalog.devices.insert(id, device);
            } else {
                catalog.devices.insert(id.clone(), device);
                catalog.state.insert(id.clone(), serde_json::json!({"available": true}));
                catalog.liveness.insert(id.clone(), Instant::now());
                added.push(id);
            }
        }

        drop(catalog);
        if !added.is_empty() || !removed.is_empty() {
            self.emit(RepositoryEvent::DevicesChanged { user_id: user_id.clone() });
        }
        (added, removed)
    }

    /// Replace a device's endpoint list wholesale (from an
    /// `expose/<protocol>/<address>` message). A no-op device (not yet seen
    /// via status) is dropped silently — expose can race ahead of status.
    pub async fn update_device(
        &self,
        user_id: &UserId,
        client_id: &ClientId,
        device_id: &DeviceId,
        endpoints: Vec<Endpoint>,
    ) {
        let shard = self.shard(user_id, client_id).await;
        let mut catalog = shard.lock().await;
        let Some(device) = catalog.devices.get_mut(device_id) else { return };
        device.endpoints = endpoints;
        drop(catalog);
        self.emit(RepositoryEvent::DevicesChanged { user_id: user_id.clone() });
    }

    /// Record a liveness signal (`device/<protocol>/<address>`) and apply the
    /// carried availability, routed through `updateState` so availability
    /// participates in the same deep-equality change detection as any other
    /// property.
    pub async fn set_available(
        &self,
        user_id: &UserId,
        client_id: &ClientId,
        device_id: &DeviceId,
        available: bool,
    ) {
        let shard = self.shard(user_id, client_id).await;
        {
            let mut catalog = shard.lock().await;
            catalog.liveness.insert(device_id.clone(), Instant::now());
        }
        self.update_state(
            user_id,
            client_id,
            device_id,
            serde_json::json!({"available": available}),
            None,
        )
        .await;
    }

    /// Deep-merge `patch` into the device's state, emitting `StateChanged`
    /// iff the merged result differs from the prior state.
    pub async fn update_state(
        &self,
        user_id: &UserId,
        client_id: &ClientId,
        device_id: &DeviceId,
        patch: Value,
        endpoint_id: Option<u32>,
    ) {
        let shard = self.shard(user_id, client_id).await;
        let mut catalog = shard.lock().await;
        if !catalog.devices.contains_key(device_id) {
            return;
        }
        let prev = catalog.state.entry(device_id.clone()).or_insert_with(empty_state).clone();
        let next = merge_state(&prev, &patch, endpoint_id);
        if next == prev {
            return;
        }
        catalog.state.insert(device_id.clone(), next.clone());
        drop(catalog);
        self.emit(RepositoryEvent::StateChanged {
            user_id: user_id.clone(),
            client_id: client_id.clone(),
            device_id: device_id.clone(),
            prev,
            next,
        });
    }

    /// Look up a device's protocol/address for building a `command/<protocol>`
    /// publish, along with its current state (used by the fulfillment query
    /// intent and by the capability translator).
    pub async fn device_snapshot(
        &self,
        user_id: &UserId,
        client_id: &ClientId,
        device_id: &DeviceId,
    ) -> Option<(Device, Value)> {
        let shard = self.shard(user_id, client_id).await;
        let catalog = shard.lock().await;
        let device = catalog.devices.get(device_id)?.clone();
        let state = catalog.state.get(device_id).cloned().unwrap_or_else(empty_state);
        Some((device, state))
    }

    /// All devices for a `(user, client)` pair, paired with their state, for
    /// the enumerate fulfillment intent.
    pub async fn list_devices(
        &self,
        user_id: &UserId,
        client_id: &ClientId,
    ) -> Vec<(DeviceId, Device, Value)> {
        let shard = self.shard(user_id, client_id).await;
        let catalog = shard.lock().await;
        catalog
            .devices
            .iter()
            .map(|(id, device)| {
                let state = catalog.state.get(id).cloned().unwrap_or_else(empty_state);
                (id.clone(), device.clone(), state)
            })
            .collect()
    }

    /// Drop every device and state entry for a `(user, client)` pair (its
    /// connection closed) and emit `devicesChanged` if it held anything.
    pub async fn purge_client(&self, user_id: &UserId, client_id: &ClientId) {
        let key = (user_id.clone(), client_id.clone());
        let shard = self.shards.write().await.remove(&key);
        let Some(shard) = shard else { return };
        let had_devices = !shard.lock().await.devices.is_empty();
        if had_devices {
            self.emit(RepositoryEvent::DevicesChanged { user_id: user_id.clone() });
        }
    }

    /// One sweep of the liveness watchdog: force `available=false` for any
    /// device whose last liveness signal is older than the configured
    /// timeout. Runs once per repository, not once per device.
    pub(crate) async fn sweep_liveness(&self) {
        let keys: Vec<ShardKey> = self.shards.read().await.keys().cloned().collect();
        for key in keys {
            let shard = {
                let shards = self.shards.read().await;
                let Some(shard) = shards.get(&key) else { continue };
                Arc::clone(shard)
            };
            let stale: Vec<DeviceId> = {
                let catalog = shard.lock().await;
                let now = Instant::now();
                catalog
                    .liveness
                    .iter()
                    .filter(|(_, ts)| now.duration_since(**ts) > self.liveness_timeout)
                    .map(|(id, _)| id.clone())
                    .collect()
            };
            for device_id in stale {
                let (user_id, client_id) = key.clone();
                {
                    let mut catalog = shard.lock().await;
                    catalog.liveness.remove(&device_id);
                }
                self.update_state(
                    &user_id,
                    &client_id,
                    &device_id,
                    serde_json::json!({"available": false}),
                    None,
                )
                .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn device(protocol: &str, address: &str) -> Device {
        Device {
            name: "lamp".into(),
            description: None,
            manufacturer: None,
            model: None,
            firmware: None,
            protocol: protocol.into(),
            address: address.into(),
            endpoints: Vec::new(),
        }
    }

    #[tokio::test]
    async fn sync_adds_devices_with_available_true() {
        let repo = DeviceRepository::new(Duration::from_secs(30));
        let user = UserId::from("alice");
        let client = ClientId::from("gw-1");
        let id = DeviceId::new("zigbee", "00:01");

        repo.sync_client_devices(&user, &client, vec![(id.clone(), device("zigbee", "00:01"))])
            .await;

        let (_, state) = repo.device_snapshot(&user, &client, &id).await.unwrap();
        assert_eq!(state, serde_json::json!({"available": true}));
    }

    #[tokio::test]
    async fn resync_does_not_clobber_existing_state() {
        let repo = DeviceRepository::new(Duration::from_secs(30));
        let user = UserId::from("alice");
        let client = ClientId::from("gw-1");
        let id = DeviceId::new("zigbee", "00:01");

        repo.sync_client_devices(&user, &client, vec![(id.clone(), device("zigbee", "00:01"))])
            .await;
        repo.update_state(&user, &client, &id, serde_json::json!({"on": true}), None).await;
        repo.sync_client_devices(&user, &client, vec![(id.clone(), device("zigbee", "00:01"))])
            .await;

        let (_, state) = repo.device_snapshot(&user, &client, &id).await.unwrap();
        assert_eq!(state, serde_json::json!({"available": true, "on": true}));
    }

    #[tokio::test]
    async fn sync_removes_devices_absent_from_new_inventory() {
        let repo = DeviceRepository::new(Duration::from_secs(30));
        let user = UserId::from("alice");
        let client = ClientId::from("gw-1");
        let id = DeviceId::new("zigbee", "00:01");

        repo.sync_client_devices(&user, &client, vec![(id.clone(), device("zigbee", "00:01"))])
            .await;
        repo.sync_client_devices(&user, &client, vec![]).await;

        assert!(repo.device_snapshot(&user, &client, &id).await.is_none());
    }

    #[tokio::test]
    async fn update_state_is_a_noop_when_equal() {
        let repo = DeviceRepository::new(Duration::from_secs(30));
        let user = UserId::from("alice");
        let client = ClientId::from("gw-1");
        let id = DeviceId::new("zigbee", "00:01");
        repo.sync_client_devices(&user, &client, vec![(id.clone(), device("zigbee", "00:01"))])
            .await;

        let mut rx = repo.subscribe();
        repo.update_state(&user, &client, &id, serde_json::json!({"available": true}), None).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn state_change_emits_event_with_prev_and_next() {
        let repo = DeviceRepository::new(Duration::from_secs(30));
        let user = UserId::from("alice");
        let client = ClientId::from("gw-1");
        let id = DeviceId::new("zigbee", "00:01");
        repo.sync_client_devices(&user, &client, vec![(id.clone(), device("zigbee", "00:01"))])
            .await;

        let mut rx = repo.subscribe();
        repo.update_state(&user, &client, &id, serde_json::json!({"on": true}), None).await;
        match rx.try_recv().unwrap() {
            RepositoryEvent::StateChanged { prev, next, .. } => {
                assert_eq!(prev, serde_json::json!({"available": true}));
                assert_eq!(next, serde_json::json!({"available": true, "on": true}));
            }
            other => panic!("expected StateChanged, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn purge_client_drops_all_its_devices() {
        let repo = DeviceRepository::new(Duration::from_secs(30));
        let user = UserId::from("alice");
        let client = ClientId::from("gw-1");
        let id = DeviceId::new("zigbee", "00:01");
        repo.sync_client_devices(&user, &client, vec![(id.clone(), device("zigbee", "00:01"))])
            .await;

        repo.purge_client(&user, &client).await;

        assert!(repo.device_snapshot(&user, &client, &id).await.is_none());
    }

    #[tokio::test]
    async fn liveness_sweep_forces_unavailable_after_timeout() {
        let repo = DeviceRepository::new(Duration::from_millis(1));
        let user = UserId::from("alice");
        let client = ClientId::from("gw-1");
        let id = DeviceId::new("zigbee", "00:01");
        repo.sync_client_devices(&user, &client, vec![(id.clone(), device("zigbee", "00:01"))])
            .await;

        tokio::time::sleep(Duration::from_millis(5)).await;
        repo.sweep_liveness().await;

        let (_, state) = repo.device_snapshot(&user, &client, &id).await.unwrap();
        assert!(!is_available(&state));
    }
}
