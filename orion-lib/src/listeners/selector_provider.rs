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

use super::route_selector::{CallConfig, CallMetadata, ServerConfigSelector};
use crate::{
    format_error_chain,
    xds::{RouteConfigWatcher, WatcherId, XdsClient},
};
use compact_str::CompactString;
use orion_configuration::config::network_filters::http_connection_manager::{
    http_filters::HttpFilter, RouteConfiguration,
};
use orion_error::Status;
use parking_lot::Mutex;
use std::{error::Error as StdError, fmt, sync::Arc};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Latest outcome of a route configuration watch. `None` until the first one arrives.
pub type RouteConfigOutcome = Option<Result<Arc<RouteConfiguration>, Status>>;

fn selector_error(err: &crate::Error) -> Status {
    let err: &(dyn StdError + Send + Sync + 'static) = err.as_ref();
    Status::unavailable(format_error_chain(err))
}

fn build_selector(
    http_filters: &[HttpFilter],
    outcome: &RouteConfigOutcome,
) -> Result<Arc<ServerConfigSelector>, Status> {
    match outcome {
        None => Err(Status::unavailable("route configuration has not been received yet")),
        Some(Err(status)) => Err(status.clone()),
        Some(Ok(route_config)) => ServerConfigSelector::new(http_filters, Arc::clone(route_config))
            .map(Arc::new)
            .map_err(|e| selector_error(&e)),
    }
}

/// Feeds one route configuration watch into a channel. Errors do not replace a configuration received earlier.
struct SelectorWatcher {
    updates: watch::Sender<RouteConfigOutcome>,
}

impl RouteConfigWatcher for SelectorWatcher {
    fn on_changed(&self, route_config: Arc<RouteConfiguration>) {
        self.updates.send_replace(Some(Ok(route_config)));
    }

    fn on_error(&self, status: Status) {
        self.updates.send_if_modified(|outcome| {
            if matches!(outcome, Some(Ok(_))) {
                debug!("keeping route configuration after error: {}", status.message());
                return false;
            }
            *outcome = Some(Err(status));
            true
        });
    }

    fn on_resource_does_not_exist(&self) {
        self.updates.send_replace(Some(Err(Status::not_found("Requested route config does not exist"))));
    }
}

/// A route configuration watch that is cancelled when dropped.
struct RouteWatch {
    xds_client: Arc<dyn XdsClient>,
    name: CompactString,
    id: WatcherId,
}

impl fmt::Debug for RouteWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteWatch").field("name", &self.name).field("id", &self.id).finish_non_exhaustive()
    }
}

impl Drop for RouteWatch {
    fn drop(&mut self) {
        self.xds_client.cancel_route_config_watch(&self.name, self.id);
    }
}

/// Selector following its own route configuration watch.
#[derive(Debug)]
pub struct DynamicSelector {
    http_filters: Vec<HttpFilter>,
    state: Mutex<DynamicState>,
    route_watch: RouteWatch,
}

#[derive(Debug)]
struct DynamicState {
    receiver: watch::Receiver<RouteConfigOutcome>,
    selector: Result<Arc<ServerConfigSelector>, Status>,
}

impl DynamicSelector {
    pub fn route_config_name(&self) -> &str {
        &self.route_watch.name
    }

    fn current(&self) -> Result<Arc<ServerConfigSelector>, Status> {
        let mut state = self.state.lock();
        let DynamicState { receiver, selector } = &mut *state;
        let outcome = receiver.borrow_and_update();
        if outcome.has_changed() {
            let rebuilt = build_selector(&self.http_filters, &outcome);
            if let Err(status) = &rebuilt {
                warn!("route configuration update leaves calls failing: {}", status.message());
            }
            *selector = rebuilt;
        }
        selector.clone()
    }
}

/// Hands out the selector a connection uses for its calls.
///
/// A connection using a route configuration that is fetched separately watches that resource itself for as long as
/// it is open, so it keeps following updates after the resolver that accepted it has been replaced.
#[derive(Debug)]
pub enum ServerConfigSelectorProvider {
    Static(Result<Arc<ServerConfigSelector>, Status>),
    Dynamic(DynamicSelector),
}

impl ServerConfigSelectorProvider {
    pub fn new_static(http_filters: &[HttpFilter], route_config: Arc<RouteConfiguration>) -> Self {
        Self::Static(build_selector(http_filters, &Some(Ok(route_config))))
    }

    /// Starts watching `route_config_name`. Until the watch reports something, calls are served from `latest`.
    pub fn new_dynamic(
        http_filters: Vec<HttpFilter>,
        xds_client: Arc<dyn XdsClient>,
        route_config_name: &str,
        latest: RouteConfigOutcome,
    ) -> Self {
        let (updates, mut receiver) = watch::channel(latest);
        let selector = build_selector(&http_filters, &receiver.borrow_and_update());
        let id = xds_client.watch_route_config(route_config_name, Arc::new(SelectorWatcher { updates }));
        debug!(ready = selector.is_ok(), "{id} following route configuration {route_config_name}");
        Self::Dynamic(DynamicSelector {
            http_filters,
            state: Mutex::new(DynamicState { receiver, selector }),
            route_watch: RouteWatch { xds_client, name: route_config_name.into(), id },
        })
    }

    /// The selector built from the latest route configuration.
    pub fn watch(&self) -> Result<Arc<ServerConfigSelector>, Status> {
        match self {
            Self::Static(selector) => selector.clone(),
            Self::Dynamic(dynamic) => dynamic.current(),
        }
    }

    pub fn get_call_config(&self, metadata: &CallMetadata) -> Result<CallConfig, Status> {
        self.watch()?.get_call_config(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listeners::test_support::FakeXdsClient;
    use orion_error::StatusCode;

    fn routes(domain: &str) -> Arc<RouteConfiguration> {
        let yaml = format!(
            r#"
name: routes
virtual_hosts:
  - domains: [ "{domain}" ]
    routes: [ {{ match: {{ prefix: "/" }}, non_forwarding_action: {{}} }} ]
"#
        );
        Arc::new(serde_yaml::from_str(&yaml).unwrap())
    }

    fn router() -> Vec<HttpFilter> {
        serde_yaml::from_str("[ { name: router, filter_type: router } ]").unwrap()
    }

    #[test]
    fn static_provider() {
        let provider = ServerConfigSelectorProvider::new_static(&router(), routes("a.com"));
        assert!(provider.get_call_config(&CallMetadata::new("/s/m", "a.com")).is_ok());
        let err = provider.get_call_config(&CallMetadata::new("/s/m", "b.com")).unwrap_err();
        assert_eq!(err.code(), StatusCode::Unavailable);
    }

    fn dynamic(xds: &Arc<FakeXdsClient>, latest: RouteConfigOutcome) -> ServerConfigSelectorProvider {
        ServerConfigSelectorProvider::new_dynamic(router(), Arc::clone(xds) as Arc<dyn XdsClient>, "routes", latest)
    }

    #[test]
    fn dynamic_provider_follows_updates() {
        let xds = Arc::new(FakeXdsClient::default());
        let provider = dynamic(&xds, Some(Ok(routes("a.com"))));
        assert!(provider.get_call_config(&CallMetadata::new("/s/m", "a.com")).is_ok());
        let watcher = xds.route_watcher("routes");

        watcher.on_changed(routes("b.com"));
        assert!(provider.get_call_config(&CallMetadata::new("/s/m", "a.com")).is_err());
        assert!(provider.get_call_config(&CallMetadata::new("/s/m", "b.com")).is_ok());

        watcher.on_error(Status::unavailable("connection reset"));
        assert!(provider.get_call_config(&CallMetadata::new("/s/m", "b.com")).is_ok());

        watcher.on_resource_does_not_exist();
        let err = provider.get_call_config(&CallMetadata::new("/s/m", "b.com")).unwrap_err();
        assert_eq!(err.code(), StatusCode::NotFound);
        watcher.on_error(Status::unavailable("connection reset"));
        assert_eq!(provider.watch().unwrap_err().code(), StatusCode::Unavailable);

        watcher.on_changed(routes("c.com"));
        assert!(provider.get_call_config(&CallMetadata::new("/s/m", "c.com")).is_ok());
    }

    #[test]
    fn dropping_the_provider_cancels_its_watch() {
        let xds = Arc::new(FakeXdsClient::default());
        let provider = dynamic(&xds, Some(Ok(routes("a.com"))));
        assert!(matches!(
            &provider,
            ServerConfigSelectorProvider::Dynamic(selector) if selector.route_config_name() == "routes"
        ));
        assert_eq!(xds.active_route_watches(), 1);
        let watcher = xds.route_watcher("routes");
        drop(provider);
        assert_eq!(xds.active_route_watches(), 0);
        // late notifications go nowhere
        watcher.on_changed(routes("b.com"));
    }

    #[test]
    fn pending_resource_is_unavailable() {
        let xds = Arc::new(FakeXdsClient::default());
        let provider = dynamic(&xds, None);
        let err = provider.watch().unwrap_err();
        assert_eq!(err.code(), StatusCode::Unavailable);
        xds.route_watcher("routes").on_changed(routes("a.com"));
        assert!(provider.watch().is_ok());
    }

    #[test]
    fn build_errors_carry_their_cause() {
        let filters: Vec<HttpFilter> = serde_yaml::from_str("[ { name: authz, filter_type: router } ]").unwrap();
        let yaml = r#"
name: routes
virtual_hosts:
  - name: vh
    domains: [ "*" ]
    routes:
      - name: r
        match: { prefix: "/" }
        typed_per_filter_config: { authz: { filter_type: rbac, filter_settings: {} } }
        non_forwarding_action: {}
"#;
        let routes = Arc::new(serde_yaml::from_str(yaml).unwrap());
        let provider = ServerConfigSelectorProvider::new_static(&filters, routes);
        let err = provider.watch().unwrap_err();
        assert_eq!(err.code(), StatusCode::Unavailable);
        assert!(err.message().contains("does not apply to filter of type router"), "{}", err.message());
    }
}
