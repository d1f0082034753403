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

use crate::xds::{ListenerWatcher, RouteConfigWatcher, WatcherId, XdsClient};
use compact_str::CompactString;
use orion_configuration::config::{
    listener::{ListenerResource, ListenerUpdate},
    network_filters::http_connection_manager::RouteConfiguration,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Control plane double: remembers watches and lets tests fire the callbacks by hand.
#[derive(Default)]
pub struct FakeXdsClient {
    pub listener_watches: Mutex<Vec<(CompactString, WatcherId, Arc<dyn ListenerWatcher>)>>,
    pub route_watches: Mutex<Vec<(CompactString, WatcherId, Arc<dyn RouteConfigWatcher>)>>,
    pub cancelled: Mutex<Vec<(CompactString, WatcherId)>>,
}

impl FakeXdsClient {
    pub fn route_watcher(&self, name: &str) -> Arc<dyn RouteConfigWatcher> {
        let watches = self.route_watches.lock();
        let (_, _, watcher) = watches.iter().rev().find(|(watched, _, _)| watched == name).unwrap();
        Arc::clone(watcher)
    }

    pub fn listener_watcher(&self, name: &str) -> Arc<dyn ListenerWatcher> {
        let watches = self.listener_watches.lock();
        let (_, _, watcher) = watches.iter().rev().find(|(watched, _, _)| watched == name).unwrap();
        Arc::clone(watcher)
    }

    pub fn watched_routes(&self) -> Vec<CompactString> {
        let mut names: Vec<_> = self.route_watches.lock().iter().map(|(name, _, _)| name.clone()).collect();
        names.sort();
        names
    }

    /// Calls `notify` for every watch on `name` that has not been cancelled.
    pub fn for_each_route_watcher(&self, name: &str, notify: impl Fn(&dyn RouteConfigWatcher)) {
        let watchers: Vec<_> = {
            let cancelled = self.cancelled.lock();
            self.route_watches
                .lock()
                .iter()
                .filter(|(watched, id, _)| watched == name && !cancelled.contains(&(watched.clone(), *id)))
                .map(|(_, _, watcher)| Arc::clone(watcher))
                .collect()
        };
        for watcher in watchers {
            notify(watcher.as_ref());
        }
    }

    /// Hands `route_config` to every active watch on its name.
    pub fn publish_route(&self, route_config: Arc<RouteConfiguration>) {
        let name = route_config.name.clone();
        self.for_each_route_watcher(&name, |watcher| watcher.on_changed(Arc::clone(&route_config)));
    }

    /// Route watches that have been registered and not cancelled.
    pub fn active_route_watches(&self) -> usize {
        let cancelled = self.cancelled.lock();
        self.route_watches.lock().iter().filter(|(name, id, _)| !cancelled.contains(&(name.clone(), *id))).count()
    }
}

impl XdsClient for FakeXdsClient {
    fn watch_listener(&self, name: &str, watcher: Arc<dyn ListenerWatcher>) -> WatcherId {
        let id = WatcherId::next();
        self.listener_watches.lock().push((name.into(), id, watcher));
        id
    }

    fn cancel_listener_watch(&self, name: &str, id: WatcherId) {
        self.cancelled.lock().push((name.into(), id));
    }

    fn watch_route_config(&self, name: &str, watcher: Arc<dyn RouteConfigWatcher>) -> WatcherId {
        let id = WatcherId::next();
        self.route_watches.lock().push((name.into(), id, watcher));
        id
    }

    fn cancel_route_config_watch(&self, name: &str, id: WatcherId) {
        self.cancelled.lock().push((name.into(), id));
    }
}

pub const LISTENER_ADDRESS: &str = "0.0.0.0:50051";

/// A filter chain running only the router, using the named route configuration or an inline one accepting every
/// call when `rds` is `None`.
pub fn chain_yaml(name: &str, filter_chain_match: &str, rds: Option<&str>) -> String {
    let route_specifier = match rds {
        Some(rds) => format!("{{ route_config_name: {rds} }}"),
        None => String::from(
            r#"{ name: inline, virtual_hosts: [ { domains: [ "*" ], routes: [ { match: { prefix: "/" }, non_forwarding_action: {} } ] } ] }"#,
        ),
    };
    format!(
        r#"
    name: {name}
    filter_chain_match: {filter_chain_match}
    http_connection_manager:
      http_filters: [ {{ name: router, filter_type: router }} ]
      route_specifier: {route_specifier}"#
    )
}

pub fn listener_resource(chains: &[String], default_chain: Option<String>) -> ListenerResource {
    let mut yaml = format!("name: lds\naddress: {LISTENER_ADDRESS}\nfilter_chains:\n");
    for chain in chains {
        yaml.push_str(&format!("  - {}\n", chain.trim_start()));
    }
    if let Some(default_chain) = default_chain {
        yaml.push_str("default_filter_chain:");
        yaml.push_str(&default_chain);
        yaml.push('\n');
    }
    serde_yaml::from_str(&yaml).unwrap()
}

pub fn listener_update(chains: &[String], default_chain: Option<String>) -> ListenerUpdate {
    ListenerUpdate::try_from(listener_resource(chains, default_chain)).unwrap()
}

pub fn route_config(name: &str, domain: &str) -> Arc<RouteConfiguration> {
    let yaml = format!(
        r#"
name: {name}
virtual_hosts:
  - domains: [ "{domain}" ]
    routes: [ {{ match: {{ prefix: "/" }}, non_forwarding_action: {{}} }} ]
"#
    );
    Arc::new(serde_yaml::from_str(&yaml).unwrap())
}
