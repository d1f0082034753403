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

use super::config_resolver::{ConnectionConfigResolver, ResolverReadyObserver};
use crate::{
    secrets::CertificateProviderStore,
    transport::{ServingStatusNotifier, ServingTransport},
    xds::{ListenerWatcher, XdsClient},
};
use orion_configuration::config::listener::ListenerUpdate;
use orion_error::Status;
use parking_lot::Mutex;
use std::{
    net::SocketAddr,
    sync::{Arc, Weak},
};
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct SupervisorState {
    current: Option<Arc<ConnectionConfigResolver>>,
    pending: Option<Arc<ConnectionConfigResolver>>,
    shut_down: bool,
}

impl SupervisorState {
    fn drop_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.orphan();
        }
    }
}

/// Follows the listener resource of one listening address and keeps the transport serving the latest usable
/// configuration.
///
/// A new listener update is only handed to the transport once every route configuration it refers to has been
/// received. Until then the previous configuration keeps serving.
pub struct ListenerUpdateSupervisor {
    this: Weak<Self>,
    listening_address: SocketAddr,
    xds_client: Arc<dyn XdsClient>,
    certificate_providers: Arc<CertificateProviderStore>,
    transport: Arc<dyn ServingTransport>,
    notifier: Option<Arc<dyn ServingStatusNotifier>>,
    state: Mutex<SupervisorState>,
}

impl ListenerUpdateSupervisor {
    pub fn new(
        listening_address: SocketAddr,
        xds_client: Arc<dyn XdsClient>,
        certificate_providers: Arc<CertificateProviderStore>,
        transport: Arc<dyn ServingTransport>,
        notifier: Option<Arc<dyn ServingStatusNotifier>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            listening_address,
            xds_client,
            certificate_providers,
            transport,
            notifier,
            state: Mutex::new(SupervisorState::default()),
        })
    }

    pub fn listening_address(&self) -> SocketAddr {
        self.listening_address
    }

    /// The resolver the transport is serving with, if any.
    pub fn current(&self) -> Option<Arc<ConnectionConfigResolver>> {
        self.state.lock().current.clone()
    }

    /// Orphans both resolvers and stops serving. Later notifications are ignored.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.shut_down {
            return;
        }
        state.shut_down = true;
        state.drop_pending();
        if let Some(current) = state.current.take() {
            current.orphan();
            self.transport.stop_serving();
        }
        info!("stopped supervising listener on {}", self.listening_address);
    }

    fn notify(&self, status: &Status) {
        match &self.notifier {
            Some(notifier) => notifier.on_serving_status_update(self.listening_address, status),
            None if status.is_ok() => {
                info!("listener resource obtained, will start serving on {}", self.listening_address);
            },
            None => {
                error!("error obtaining listener resource: {}, not serving on {}", status, self.listening_address);
            },
        }
    }

    fn promote(&self, state: &mut SupervisorState, resolver: Arc<ConnectionConfigResolver>) {
        let first = match state.current.replace(Arc::clone(&resolver)) {
            Some(previous) => {
                previous.orphan();
                false
            },
            None => true,
        };
        info!(listener = resolver.listener_name(), "serving new configuration on {}", self.listening_address);
        self.transport.update_config(resolver);
        if first {
            self.notify(&Status::ok());
            self.transport.start_serving();
        }
    }

    fn on_fatal_error(&self, state: &mut SupervisorState, status: Status) {
        state.drop_pending();
        error!("fatal error {status}, not serving on {}", self.listening_address);
        if let Some(current) = state.current.take() {
            self.transport.stop_serving();
            current.orphan();
        }
        self.notify(&status);
    }

    /// Replaces any pending configuration with one built from `update`. It is served right away when it needs no
    /// route configuration, otherwise once all of them have arrived.
    pub fn on_listener_changed(&self, update: ListenerUpdate) {
        let mut state = self.state.lock();
        if state.shut_down {
            return;
        }
        state.drop_pending();
        debug!(listener = %update.name, "listener update for {}", self.listening_address);
        if update.address != self.listening_address {
            let status = Status::failed_precondition("Address in LDS update does not match listening address");
            self.on_fatal_error(&mut state, status);
            return;
        }
        if state.current.as_ref().is_some_and(|current| current.serves_same_chains(&update)) {
            debug!(listener = %update.name, "filter chains unchanged");
            return;
        }
        let observer: Weak<dyn ResolverReadyObserver> = self.this.clone();
        let resolver = ConnectionConfigResolver::new(
            &update,
            Arc::clone(&self.xds_client),
            Arc::clone(&self.certificate_providers),
            observer,
        );
        if resolver.is_ready() {
            self.promote(&mut state, resolver);
        } else {
            state.pending = Some(resolver);
        }
    }
}

impl ListenerWatcher for ListenerUpdateSupervisor {
    fn on_changed(&self, update: ListenerUpdate) {
        self.on_listener_changed(update);
    }

    fn on_error(&self, status: Status) {
        let mut state = self.state.lock();
        if state.shut_down {
            return;
        }
        state.drop_pending();
        if state.current.is_some() {
            warn!("listener error {status} on {}, keeping existing configuration", self.listening_address);
        } else {
            self.notify(&Status::unavailable(status.message().to_owned()));
        }
    }

    fn on_resource_does_not_exist(&self) {
        let mut state = self.state.lock();
        if state.shut_down {
            return;
        }
        self.on_fatal_error(&mut state, Status::not_found("Requested listener does not exist"));
    }
}

impl ResolverReadyObserver for ListenerUpdateSupervisor {
    fn on_resolver_ready(&self, resolver: Arc<ConnectionConfigResolver>) {
        let mut state = self.state.lock();
        if state.shut_down || !state.pending.as_ref().is_some_and(|pending| Arc::ptr_eq(pending, &resolver)) {
            debug!(listener = resolver.listener_name(), "ignoring readiness of a superseded resolver");
            return;
        }
        state.pending = None;
        self.promote(&mut state, resolver);
    }
}
