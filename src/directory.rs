// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User directory: bearer-token resolution and the user <-> connection map.
//!
//! This is the single writer for the user<->connection map;
//! all mutation goes through its `RwLock`.

use std::collections::HashMap;
use std::sync::Arc;

use subtle::ConstantTimeEq;
use tokio::sync::RwLock;

use crate::ids::{ClientId, UserId};
use crate::listener::ConnectionHandle;

/// A user known to the bridge. Created externally (out of scope: the web/UI
/// layer that provisions accounts); this directory only resolves and routes.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub client_token: String,
    pub linked: bool,
}

struct Inner {
    users: HashMap<UserId, UserRecord>,
    connections: HashMap<(UserId, ClientId), Arc<ConnectionHandle>>,
}

/// Maps bearer credentials to users, and users to their live gateway connections.
pub struct UserDirectory {
    inner: RwLock<Inner>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self { inner: RwLock::new(Inner { users: HashMap::new(), connections: HashMap::new() }) }
    }

    /// Seed or update a user record. Out-of-scope callers (account
    /// provisioning) are responsible for calling this; the directory itself
    /// never invents users.
    pub async fn upsert_user(&self, user_id: UserId, client_token: String) {
        let mut inner = self.inner.write().await;
        inner
            .users
            .entry(user_id)
            .and_modify(|r| r.client_token = client_token.clone())
            .or_insert(UserRecord { client_token, linked: true });
    }

    /// Resolve a bearer token to a user id, in constant time with respect to
    /// which user (if any) matches, so a timing side-channel can't reveal
    /// whether a given token is registered to a specific account.
    pub async fn resolve_token(&self, token: &str) -> Option<UserId> {
        let inner = self.inner.read().await;
        let mut matched: Option<UserId> = None;
        for (user_id, record) in &inner.users {
            let is_match: bool =
                record.client_token.as_bytes().ct_eq(token.as_bytes()).into();
            if is_match {
                matched = Some(user_id.clone());
            }
        }
        matched
    }

    /// Register a live connection for `(user_id, client_id)`. If one already
    /// exists, it is closed and returned so the caller can tear it down
    /// without holding the directory lock.
    pub async fn attach(
        &self,
        user_id: UserId,
        client_id: ClientId,
        handle: Arc<ConnectionHandle>,
    ) -> Option<Arc<ConnectionHandle>> {
        let mut inner = self.inner.write().await;
        inner.connections.insert((user_id, client_id), handle)
    }

    /// Idempotently remove a connection from the routing table.
    pub async fn detach(&self, user_id: &UserId, client_id: &ClientId) {
        let mut inner = self.inner.write().await;
        inner.connections.remove(&(user_id.clone(), client_id.clone()));
    }

    /// Remove the `(user, client)` routing entry only if `handle` is still
    /// the one registered there. A connection superseded by a session
    /// collision (see [`Self::attach`]) must not remove the entry the new
    /// connection installed in its place when its own teardown eventually
    /// runs. Returns whether the entry was removed.
    pub async fn detach_if_current(
        &self,
        user_id: &UserId,
        client_id: &ClientId,
        handle: &Arc<ConnectionHandle>,
    ) -> bool {
        let mut inner = self.inner.write().await;
        let key = (user_id.clone(), client_id.clone());
        match inner.connections.get(&key) {
            Some(current) if Arc::ptr_eq(current, handle) => {
                inner.connections.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Live connections for a user, used by fulfillment execute and
    /// report-state fan-out to pick a route.
    pub async fn connections_of(&self, user_id: &UserId) -> Vec<Arc<ConnectionHandle>> {
        let inner = self.inner.read().await;
        inner
            .connections
            .iter()
            .filter(|((uid, _), _)| uid == user_id)
            .map(|(_, handle)| Arc::clone(handle))
            .collect()
    }

    /// The connection for one specific `(user, client)` pair, if live.
    pub async fn connection_for(
        &self,
        user_id: &UserId,
        client_id: &ClientId,
    ) -> Option<Arc<ConnectionHandle>> {
        let inner = self.inner.read().await;
        inner.connections.get(&(user_id.clone(), client_id.clone())).cloned()
    }

    /// Mark a user unlinked (the Disconnect intent) and drop its
    /// cached routing state. Live connections are left to close themselves
    /// naturally; this only affects fulfillment-facing state.
    pub async fn unlink(&self, user_id: &UserId) {
        let mut inner = self.inner.write().await;
        if let Some(record) = inner.users.get_mut(user_id) {
            record.linked = false;
        }
    }
}

impl Default for UserDirectory {
    fn default() -> Self {
        Self::new()
    }
}
