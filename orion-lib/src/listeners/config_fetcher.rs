// SPDX-FileCopyrightText: © 2025 Huawei Cloud Computing Technologies Co., Ltd
// SPDX-License-Identifier: Apache-2.0
//
// Copyright 2025 Huawei Cloud Computing Technologies Co., Ltd
//
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
//

use super::listener_supervisor::ListenerUpdateSupervisor;
use crate::{
    secrets::CertificateProviderStore,
    transport::{ServingStatusNotifier, ServingTransport},
    xds::{ListenerWatcher, WatcherId, XdsClient},
    Result,
};
use compact_str::CompactString;
use orion_configuration::config::bootstrap::LISTENING_ADDRESS_PLACEHOLDER;
use parking_lot::Mutex;
use rustc_hash::FxHashMap as HashMap;
use std::{net::SocketAddr, sync::Arc};
use tracing::{debug, info};

struct ListenerWatch {
    resource_name: CompactString,
    id: WatcherId,
    supervisor: Arc<ListenerUpdateSupervisor>,
}

/// Entry point for a server: one listener resource watch per listening address.
pub struct ServerConfigFetcher {
    xds_client: Arc<dyn XdsClient>,
    resource_name_template: CompactString,
    certificate_providers: Arc<CertificateProviderStore>,
    notifier: Option<Arc<dyn ServingStatusNotifier>>,
    watches: Mutex<HashMap<SocketAddr, ListenerWatch>>,
}

impl ServerConfigFetcher {
    pub fn new(
        xds_client: Arc<dyn XdsClient>,
        resource_name_template: impl Into<CompactString>,
        certificate_providers: Arc<CertificateProviderStore>,
        notifier: Option<Arc<dyn ServingStatusNotifier>>,
    ) -> Result<Self> {
        let resource_name_template = resource_name_template.into();
        if resource_name_template.is_empty() {
            return Err("server_listener_resource_name_template not provided in bootstrap".into());
        }
        Ok(Self {
            xds_client,
            resource_name_template,
            certificate_providers,
            notifier,
            watches: Mutex::new(HashMap::default()),
        })
    }

    pub fn resource_name(&self, listening_address: SocketAddr) -> CompactString {
        self.resource_name_template.replace(LISTENING_ADDRESS_PLACEHOLDER, &listening_address.to_string()).into()
    }

    /// Starts following the listener resource for `listening_address`, driving `transport` with what it receives.
    pub fn start_watch(
        &self,
        listening_address: SocketAddr,
        transport: Arc<dyn ServingTransport>,
    ) -> Result<Arc<ListenerUpdateSupervisor>> {
        let mut watches = self.watches.lock();
        if watches.contains_key(&listening_address) {
            return Err(format!("already watching the listener for {listening_address}").into());
        }
        let resource_name = self.resource_name(listening_address);
        let supervisor = ListenerUpdateSupervisor::new(
            listening_address,
            Arc::clone(&self.xds_client),
            Arc::clone(&self.certificate_providers),
            transport,
            self.notifier.clone(),
        );
        let watcher: Arc<dyn ListenerWatcher> = Arc::clone(&supervisor) as _;
        let id = self.xds_client.watch_listener(&resource_name, watcher);
        info!("watching listener {resource_name} for {listening_address}");
        watches.insert(listening_address, ListenerWatch { resource_name, id, supervisor: Arc::clone(&supervisor) });
        Ok(supervisor)
    }

    /// Returns `false` when nothing was watched for `listening_address`.
    pub fn cancel_watch(&self, listening_address: SocketAddr) -> bool {
        let Some(watch) = self.watches.lock().remove(&listening_address) else {
            return false;
        };
        self.xds_client.cancel_listener_watch(&watch.resource_name, watch.id);
        watch.supervisor.shutdown();
        debug!("cancelled listener watch {} ({})", watch.resource_name, watch.id);
        true
    }

    pub fn listening_addresses(&self) -> Vec<SocketAddr> {
        let mut addresses: Vec<_> = self.watches.lock().keys().copied().collect();
        addresses.sort();
        addresses
    }
}

impl Drop for ServerConfigFetcher {
    fn drop(&mut self) {
        for (_, watch) in self.watches.get_mut().drain() {
            self.xds_client.cancel_listener_watch(&watch.resource_name, watch.id);
            watch.supervisor.shutdown();
        }
    }
}
