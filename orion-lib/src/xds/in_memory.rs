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

use super::{ListenerWatcher, RouteConfigWatcher, WatcherId, XdsClient};
use crate::format_error_chain;
use abort_on_drop::ChildTask;
use compact_str::CompactString;
use orion_configuration::config::{
    bootstrap::StaticResources,
    listener::{ListenerResource, ListenerUpdate},
    network_filters::http_connection_manager::RouteConfiguration,
    GenericError,
};
use orion_error::Status;
use parking_lot::Mutex;
use rustc_hash::FxHashMap as HashMap;
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

enum Notification<T> {
    Changed(T),
    DoesNotExist,
    Error(Status),
}

/// A notification and the watchers registered at the moment it was queued.
enum ResourceEvent {
    Listener { name: CompactString, targets: Vec<WatcherId>, notification: Notification<ListenerUpdate> },
    RouteConfig { name: CompactString, targets: Vec<WatcherId>, notification: Notification<Arc<RouteConfiguration>> },
    Flush(oneshot::Sender<()>),
}

/// Resources of one type and who is watching them. A resource mapped to `None` has been removed.
struct Registry<T, W: ?Sized> {
    resources: HashMap<CompactString, Option<T>>,
    watchers: HashMap<CompactString, BTreeMap<WatcherId, Arc<W>>>,
}

impl<T, W: ?Sized> Default for Registry<T, W> {
    fn default() -> Self {
        Self { resources: HashMap::default(), watchers: HashMap::default() }
    }
}

impl<T: Clone, W: ?Sized> Registry<T, W> {
    /// Registers the watcher and returns what it has to catch up on, if the resource was ever published.
    fn watch(&mut self, name: &str, watcher: Arc<W>) -> (WatcherId, Option<Notification<T>>) {
        let id = WatcherId::next();
        self.watchers.entry(name.into()).or_default().insert(id, watcher);
        let catch_up = self.resources.get(name).map(|resource| match resource {
            Some(resource) => Notification::Changed(resource.clone()),
            None => Notification::DoesNotExist,
        });
        (id, catch_up)
    }

    fn cancel(&mut self, name: &str, id: WatcherId) -> bool {
        let Some(watchers) = self.watchers.get_mut(name) else {
            return false;
        };
        let removed = watchers.remove(&id).is_some();
        if watchers.is_empty() {
            self.watchers.remove(name);
        }
        removed
    }

    /// Stores the new state of the resource and returns who has to hear about it.
    fn publish(&mut self, name: &str, resource: Option<T>) -> (Vec<WatcherId>, Notification<T>) {
        self.resources.insert(name.into(), resource.clone());
        let notification = resource.map_or(Notification::DoesNotExist, Notification::Changed);
        (self.watcher_ids(name), notification)
    }

    fn watcher_ids(&self, name: &str) -> Vec<WatcherId> {
        self.watchers.get(name).map_or_else(Vec::new, |watchers| watchers.keys().copied().collect())
    }

    /// The watchers among `targets` that have not been cancelled since.
    fn registered(&self, name: &str, targets: &[WatcherId]) -> Vec<Arc<W>> {
        self.watchers.get(name).map_or_else(Vec::new, |watchers| {
            targets.iter().filter_map(|id| watchers.get(id)).cloned().collect()
        })
    }
}

#[derive(Default)]
struct Resources {
    listeners: Registry<ListenerUpdate, dyn ListenerWatcher>,
    route_configs: Registry<Arc<RouteConfiguration>, dyn RouteConfigWatcher>,
}

/// Control plane client serving resources handed to it directly.
///
/// Notifications are delivered one at a time, in order, by a background task. Each one goes to the watchers that
/// were registered when it was queued, so a new watch hears about the current state of a resource exactly once.
pub struct InMemoryXdsClient {
    resources: Arc<Mutex<Resources>>,
    events: mpsc::UnboundedSender<ResourceEvent>,
    _worker: ChildTask<()>,
}

impl InMemoryXdsClient {
    /// Has to be called from within a tokio runtime.
    pub fn new() -> Arc<Self> {
        let resources = Arc::new(Mutex::new(Resources::default()));
        let (events, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(deliver(Arc::clone(&resources), receiver));
        Arc::new(Self { resources, events, _worker: worker.into() })
    }

    pub fn with_static_resources(static_resources: &StaticResources) -> Result<Arc<Self>, GenericError> {
        let client = Self::new();
        for listener in &static_resources.listeners {
            client.set_listener(listener.clone())?;
        }
        for route_config in &static_resources.route_configurations {
            client.set_route_configuration(route_config.clone());
        }
        Ok(client)
    }

    // callers hold the resources lock so the queue order matches the order of changes
    fn send(&self, event: ResourceEvent) {
        if self.events.send(event).is_err() {
            warn!("resource notification worker is gone, dropping notification");
        }
    }

    fn publish_listener(&self, name: CompactString, update: Option<ListenerUpdate>) {
        let mut resources = self.resources.lock();
        let (targets, notification) = resources.listeners.publish(&name, update);
        self.send(ResourceEvent::Listener { name, targets, notification });
    }

    fn publish_route_configuration(&self, name: CompactString, route_config: Option<Arc<RouteConfiguration>>) {
        let mut resources = self.resources.lock();
        let (targets, notification) = resources.route_configs.publish(&name, route_config);
        self.send(ResourceEvent::RouteConfig { name, targets, notification });
    }

    /// Publishes a listener. A resource that fails validation is rejected and reported to the watchers as an error,
    /// they keep the last good version.
    pub fn set_listener(&self, resource: ListenerResource) -> Result<(), GenericError> {
        let name = resource.name.clone();
        match ListenerUpdate::try_from(resource) {
            Ok(update) => {
                debug!("listener {name} updated");
                self.publish_listener(name, Some(update));
                Ok(())
            },
            Err(err) => {
                warn!("rejecting listener {name}: {}", format_error_chain(&err));
                self.report_listener_error(&name, Status::invalid_argument(format_error_chain(&err)));
                Err(err)
            },
        }
    }

    pub fn remove_listener(&self, name: &str) {
        debug!("listener {name} removed");
        self.publish_listener(name.into(), None);
    }

    pub fn report_listener_error(&self, name: &str, status: Status) {
        let resources = self.resources.lock();
        let targets = resources.listeners.watcher_ids(name);
        self.send(ResourceEvent::Listener { name: name.into(), targets, notification: Notification::Error(status) });
    }

    pub fn set_route_configuration(&self, route_config: RouteConfiguration) {
        let name = route_config.name.clone();
        debug!("route configuration {name} updated");
        self.publish_route_configuration(name, Some(Arc::new(route_config)));
    }

    pub fn remove_route_configuration(&self, name: &str) {
        debug!("route configuration {name} removed");
        self.publish_route_configuration(name.into(), None);
    }

    pub fn report_route_error(&self, name: &str, status: Status) {
        let resources = self.resources.lock();
        let targets = resources.route_configs.watcher_ids(name);
        let notification = Notification::Error(status);
        self.send(ResourceEvent::RouteConfig { name: name.into(), targets, notification });
    }

    /// Resolves once every notification queued before the call has been delivered.
    pub async fn flush(&self) {
        let (sender, receiver) = oneshot::channel();
        self.send(ResourceEvent::Flush(sender));
        let _ = receiver.await;
    }
}

impl XdsClient for InMemoryXdsClient {
    fn watch_listener(&self, name: &str, watcher: Arc<dyn ListenerWatcher>) -> WatcherId {
        let mut resources = self.resources.lock();
        let (id, catch_up) = resources.listeners.watch(name, watcher);
        debug!("{id} watching listener {name}");
        if let Some(notification) = catch_up {
            self.send(ResourceEvent::Listener { name: name.into(), targets: vec![id], notification });
        }
        id
    }

    fn cancel_listener_watch(&self, name: &str, id: WatcherId) {
        if self.resources.lock().listeners.cancel(name, id) {
            debug!("{id} stopped watching listener {name}");
        }
    }

    fn watch_route_config(&self, name: &str, watcher: Arc<dyn RouteConfigWatcher>) -> WatcherId {
        let mut resources = self.resources.lock();
        let (id, catch_up) = resources.route_configs.watch(name, watcher);
        debug!("{id} watching route configuration {name}");
        if let Some(notification) = catch_up {
            self.send(ResourceEvent::RouteConfig { name: name.into(), targets: vec![id], notification });
        }
        id
    }

    fn cancel_route_config_watch(&self, name: &str, id: WatcherId) {
        if self.resources.lock().route_configs.cancel(name, id) {
            debug!("{id} stopped watching route configuration {name}");
        }
    }
}

async fn deliver(resources: Arc<Mutex<Resources>>, mut events: mpsc::UnboundedReceiver<ResourceEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ResourceEvent::Listener { name, targets, notification } => {
                let watchers = resources.lock().listeners.registered(&name, &targets);
                for watcher in watchers {
                    match &notification {
                        Notification::Changed(update) => watcher.on_changed(update.clone()),
                        Notification::DoesNotExist => watcher.on_resource_does_not_exist(),
                        Notification::Error(status) => watcher.on_error(status.clone()),
                    }
                }
            },
            ResourceEvent::RouteConfig { name, targets, notification } => {
                let watchers = resources.lock().route_configs.registered(&name, &targets);
                for watcher in watchers {
                    match &notification {
                        Notification::Changed(route_config) => watcher.on_changed(Arc::clone(route_config)),
                        Notification::DoesNotExist => watcher.on_resource_does_not_exist(),
                        Notification::Error(status) => watcher.on_error(status.clone()),
                    }
                }
            },
            ResourceEvent::Flush(done) => {
                let _ = done.send(());
            },
        }
    }
    info!("in-memory control plane stopped");
}
