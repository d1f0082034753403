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

//! What the resolver needs from a control plane client: watching listener and route configuration resources.

mod in_memory;

pub use in_memory::InMemoryXdsClient;

use orion_configuration::config::{
    listener::ListenerUpdate, network_filters::http_connection_manager::RouteConfiguration,
};
use orion_error::Status;
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

/// Identifies one registered watcher so that it can be cancelled again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(u64);

impl WatcherId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watcher#{}", self.0)
    }
}

pub trait ListenerWatcher: Send + Sync {
    fn on_changed(&self, update: ListenerUpdate);
    /// Transient problem, the last resource received stays valid.
    fn on_error(&self, status: Status);
    fn on_resource_does_not_exist(&self);
}

pub trait RouteConfigWatcher: Send + Sync {
    fn on_changed(&self, route_config: Arc<RouteConfiguration>);
    /// Transient problem, the last resource received stays valid.
    fn on_error(&self, status: Status);
    fn on_resource_does_not_exist(&self);
}

/// Control plane client.
///
/// Implementations never call a watcher from within `watch_*` or `cancel_*`, notifications always arrive later on
/// a context of their own. Callers rely on this to register watches while holding their own locks.
pub trait XdsClient: Send + Sync {
    fn watch_listener(&self, name: &str, watcher: Arc<dyn ListenerWatcher>) -> WatcherId;
    fn cancel_listener_watch(&self, name: &str, id: WatcherId);
    fn watch_route_config(&self, name: &str, watcher: Arc<dyn RouteConfigWatcher>) -> WatcherId;
    fn cancel_route_config_watch(&self, name: &str, id: WatcherId);
}
