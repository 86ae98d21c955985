// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared bridge state: the handles every connection task and HTTP handler
//! needs, bundled once behind an `Arc`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::BridgeConfig;
use crate::directory::UserDirectory;
use crate::fulfillment::FulfillmentHandler;
use crate::repository::DeviceRepository;

pub struct BridgeState {
    pub config: BridgeConfig,
    pub directory: Arc<UserDirectory>,
    pub repository: Arc<DeviceRepository>,
    pub fulfillment: FulfillmentHandler,
    pub shutdown: CancellationToken,
}

impl BridgeState {
    pub fn new(config: BridgeConfig, shutdown: CancellationToken) -> Self {
        let directory = Arc::new(UserDirectory::new());
        let repository = Arc::new(DeviceRepository::new(config.liveness_timeout()));
        let fulfillment = FulfillmentHandler::new(Arc::clone(&directory), Arc::clone(&repository));
        Self { config, directory, repository, fulfillment, shutdown }
    }
}
