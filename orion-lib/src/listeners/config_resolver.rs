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

use super::{
    filter_chain_match::{select_filter_chain, ConnectionEndpoints},
    route_selector::{CallConfig, CallMetadata},
    selector_provider::{RouteConfigOutcome, ServerConfigSelectorProvider},
};
use crate::{
    secrets::{CertificateProviderCache, CertificateProviderStore, FilterChainCertificateProvider},
    xds::{RouteConfigWatcher, WatcherId, XdsClient},
};
use compact_str::CompactString;
use orion_configuration::config::{
    listener::{FilterChainData, FilterChainMap, ListenerUpdate},
    network_filters::http_connection_manager::{http_filters::HttpFilter, RouteConfiguration, RouteSpecifier},
};
use orion_error::{Status, StatusCode};
use parking_lot::Mutex;
use rustc_hash::FxHashMap as HashMap;
use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Weak},
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Told once when a resolver has received something for every route configuration it depends on.
pub trait ResolverReadyObserver: Send + Sync {
    fn on_resolver_ready(&self, resolver: Arc<ConnectionConfigResolver>);
}

/// What a connection runs with once its filter chain is known.
#[derive(Debug, Clone)]
pub struct ChannelConfigOverlay {
    pub filter_chain: Arc<FilterChainData>,
    /// Filters applied to every call, router excluded, innermost first.
    pub http_filters: Vec<HttpFilter>,
    pub certificate_provider: Option<Arc<FilterChainCertificateProvider>>,
    pub config_selector_provider: Arc<ServerConfigSelectorProvider>,
    /// Keeps the resolver that produced this configuration alive as long as the connection is.
    pub resolver: Arc<ConnectionConfigResolver>,
}

impl ChannelConfigOverlay {
    pub fn get_call_config(&self, metadata: &CallMetadata) -> Result<CallConfig, Status> {
        self.config_selector_provider.get_call_config(metadata)
    }
}

struct RdsResource {
    updates: watch::Sender<RouteConfigOutcome>,
}

struct ResolverState {
    resources_pending: usize,
    ready_observer: Option<Weak<dyn ResolverReadyObserver>>,
    watches: Vec<(CompactString, WatcherId)>,
    orphaned: bool,
}

/// Immutable snapshot of a listener update, plus the route configurations its filter chains point to.
pub struct ConnectionConfigResolver {
    listener_name: CompactString,
    filter_chain_map: FilterChainMap,
    default_filter_chain: Option<Arc<FilterChainData>>,
    xds_client: Arc<dyn XdsClient>,
    certificate_providers: CertificateProviderCache,
    // keyed by filter chain address, the chains are owned by the map above
    inline_selectors: HashMap<usize, Arc<ServerConfigSelectorProvider>>,
    rds: BTreeMap<CompactString, RdsResource>,
    state: Mutex<ResolverState>,
}

impl fmt::Debug for ConnectionConfigResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfigResolver")
            .field("listener_name", &self.listener_name)
            .field("route_configs", &self.rds.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ConnectionConfigResolver {
    /// Builds the resolver and starts watching every route configuration the update refers to.
    ///
    /// A resolver that needs no route configuration is ready straight away and never notifies `ready_observer`.
    pub fn new(
        update: &ListenerUpdate,
        xds_client: Arc<dyn XdsClient>,
        certificate_providers: Arc<CertificateProviderStore>,
        ready_observer: Weak<dyn ResolverReadyObserver>,
    ) -> Arc<Self> {
        let rds: BTreeMap<_, _> = update
            .rds_names()
            .into_iter()
            .map(|name| (CompactString::from(name), RdsResource { updates: watch::channel(None).0 }))
            .collect();
        let inline_selectors = update
            .filter_chain_map
            .filter_chains()
            .chain(update.default_filter_chain.iter())
            .filter_map(|chain| {
                let hcm = &chain.http_connection_manager;
                let RouteSpecifier::RouteConfig(route_config) = &hcm.route_specifier else {
                    return None;
                };
                let provider =
                    ServerConfigSelectorProvider::new_static(&hcm.http_filters, Arc::new(route_config.clone()));
                Some((Arc::as_ptr(chain) as usize, Arc::new(provider)))
            })
            .collect();
        let resolver = Arc::new(Self {
            listener_name: update.name.clone(),
            filter_chain_map: update.filter_chain_map.clone(),
            default_filter_chain: update.default_filter_chain.clone(),
            xds_client,
            certificate_providers: CertificateProviderCache::new(certificate_providers),
            inline_selectors,
            state: Mutex::new(ResolverState {
                resources_pending: rds.len(),
                ready_observer: Some(ready_observer),
                watches: Vec::with_capacity(rds.len()),
                orphaned: false,
            }),
            rds,
        });
        resolver.start_watches();
        resolver
    }

    // watches can only start once there is an Arc for the watchers to point back to
    fn start_watches(self: &Arc<Self>) {
        let watches: Vec<_> = self
            .rds
            .keys()
            .map(|name| {
                let watcher = Arc::new(RouteWatcher { resolver: Arc::downgrade(self), name: name.clone() });
                let id = self.xds_client.watch_route_config(name, watcher);
                debug!(listener = %self.listener_name, "watching route configuration {name}");
                (name.clone(), id)
            })
            .collect();
        self.state.lock().watches = watches;
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().resources_pending == 0
    }

    pub fn listener_name(&self) -> &str {
        &self.listener_name
    }

    /// Whether `update` would produce the same filter chains as this resolver.
    pub fn serves_same_chains(&self, update: &ListenerUpdate) -> bool {
        self.filter_chain_map == update.filter_chain_map && self.default_filter_chain == update.default_filter_chain
    }

    pub fn route_config_names(&self) -> impl Iterator<Item = &str> {
        self.rds.keys().map(CompactString::as_str)
    }

    /// Records the outcome of a route configuration watch.
    ///
    /// With `prefer_existing` an error does not replace a configuration received earlier.
    pub fn on_route_config_update(
        self: &Arc<Self>,
        name: &str,
        outcome: Result<Arc<RouteConfiguration>, Status>,
        prefer_existing: bool,
    ) {
        let Some(resource) = self.rds.get(name) else {
            warn!(listener = %self.listener_name, "update for route configuration {name} which is not watched");
            return;
        };
        let ready_observer = {
            let mut state = self.state.lock();
            if state.orphaned {
                debug!(listener = %self.listener_name, "ignoring route configuration {name}, resolver is orphaned");
                return;
            }
            let previous_ok = resource.updates.borrow().as_ref().map(Result::is_ok);
            if prefer_existing && outcome.is_err() && previous_ok == Some(true) {
                if let Err(status) = &outcome {
                    warn!(
                        listener = %self.listener_name,
                        "keeping route configuration {name} after error: {}",
                        status.message()
                    );
                }
                return;
            }
            resource.updates.send_replace(Some(outcome));
            if previous_ok.is_some() {
                None
            } else {
                state.resources_pending = state.resources_pending.saturating_sub(1);
                if state.resources_pending == 0 { state.ready_observer.take() } else { None }
            }
        };
        // outside the lock, the observer is going to look at this resolver
        if let Some(observer) = ready_observer.and_then(|observer| observer.upgrade()) {
            info!(listener = %self.listener_name, "all route configurations received");
            observer.on_resolver_ready(Arc::clone(self));
        }
    }

    /// Picks the configuration for a new connection.
    pub fn resolve(self: &Arc<Self>, endpoints: &ConnectionEndpoints) -> Result<ChannelConfigOverlay, Status> {
        let Some(filter_chain) =
            select_filter_chain(&self.filter_chain_map, self.default_filter_chain.as_ref(), endpoints)
        else {
            return Err(Status::unavailable("No matching filter chain found"));
        };
        let certificate_provider = if filter_chain.downstream_tls_context.is_some() {
            Some(self.certificate_providers.get_or_create(&filter_chain)?)
        } else {
            None
        };
        let hcm = &filter_chain.http_connection_manager;
        let config_selector_provider = match &hcm.route_specifier {
            RouteSpecifier::RouteConfig(_) => {
                self.inline_selectors.get(&(Arc::as_ptr(&filter_chain) as usize)).cloned().ok_or_else(|| {
                    Status::new(StatusCode::Internal, format!("no selector for filter chain {}", filter_chain.name))
                })?
            },
            RouteSpecifier::Rds(rds) => {
                let Some(resource) = self.rds.get(&rds.route_config_name) else {
                    return Err(Status::new(
                        StatusCode::Internal,
                        format!("route configuration {} is not watched", rds.route_config_name),
                    ));
                };
                let latest = resource.updates.borrow().clone();
                Arc::new(ServerConfigSelectorProvider::new_dynamic(
                    hcm.http_filters.clone(),
                    Arc::clone(&self.xds_client),
                    &rds.route_config_name,
                    latest,
                ))
            },
        };
        let http_filters =
            hcm.http_filters.iter().filter(|filter| !filter.filter.is_terminal()).rev().cloned().collect();
        Ok(ChannelConfigOverlay {
            filter_chain,
            http_filters,
            certificate_provider,
            config_selector_provider,
            resolver: Arc::clone(self),
        })
    }

    /// Stops the route configuration watches of this resolver. Connections it configured keep their own watches.
    pub fn orphan(&self) {
        let watches = {
            let mut state = self.state.lock();
            if state.orphaned {
                return;
            }
            state.orphaned = true;
            state.ready_observer = None;
            std::mem::take(&mut state.watches)
        };
        for (name, id) in watches {
            self.xds_client.cancel_route_config_watch(&name, id);
        }
        debug!(listener = %self.listener_name, "resolver orphaned");
    }
}

impl Drop for ConnectionConfigResolver {
    fn drop(&mut self) {
        self.orphan();
    }
}

struct RouteWatcher {
    resolver: Weak<ConnectionConfigResolver>,
    name: CompactString,
}

impl RouteConfigWatcher for RouteWatcher {
    fn on_changed(&self, route_config: Arc<RouteConfiguration>) {
        if let Some(resolver) = self.resolver.upgrade() {
            resolver.on_route_config_update(&self.name, Ok(route_config), false);
        }
    }

    fn on_error(&self, status: Status) {
        if let Some(resolver) = self.resolver.upgrade() {
            resolver.on_route_config_update(&self.name, Err(status), true);
        }
    }

    fn on_resource_does_not_exist(&self) {
        if let Some(resolver) = self.resolver.upgrade() {
            let status = Status::not_found("Requested route config does not exist");
            resolver.on_route_config_update(&self.name, Err(status), false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listeners::test_support::*;
    use std::{
        net::SocketAddr,
        sync::atomic::{AtomicUsize, Ordering},
    };

    #[derive(Default)]
    struct CountingObserver(AtomicUsize);

    impl ResolverReadyObserver for CountingObserver {
        fn on_resolver_ready(&self, resolver: Arc<ConnectionConfigResolver>) {
            assert!(resolver.is_ready());
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        xds: Arc<FakeXdsClient>,
        observer: Arc<CountingObserver>,
    }

    impl Fixture {
        fn new() -> Self {
            Self { xds: Arc::new(FakeXdsClient::default()), observer: Arc::new(CountingObserver::default()) }
        }

        fn resolver(&self, update: &ListenerUpdate) -> Arc<ConnectionConfigResolver> {
            let observer: Arc<dyn ResolverReadyObserver> = Arc::clone(&self.observer) as _;
            ConnectionConfigResolver::new(
                update,
                Arc::clone(&self.xds) as Arc<dyn XdsClient>,
                Arc::new(CertificateProviderStore::default()),
                Arc::downgrade(&observer),
            )
        }

        fn notifications(&self) -> usize {
            self.observer.0.load(Ordering::SeqCst)
        }
    }

    fn endpoints(local: &str, peer: &str) -> ConnectionEndpoints {
        ConnectionEndpoints::new(local.parse::<SocketAddr>().unwrap(), peer.parse::<SocketAddr>().unwrap())
    }

    #[test]
    fn inline_routes_are_ready_immediately() {
        let fixture = Fixture::new();
        let resolver = fixture.resolver(&listener_update(&[chain_yaml("inline", "{}", None)], None));
        assert!(resolver.is_ready());
        assert!(fixture.xds.watched_routes().is_empty());
        let overlay = resolver.resolve(&endpoints("10.0.0.1:50051", "10.0.0.2:4000")).unwrap();
        assert_eq!(overlay.filter_chain.name, "inline");
        assert!(overlay.http_filters.is_empty());
        assert!(overlay.certificate_provider.is_none());
        assert!(overlay.get_call_config(&CallMetadata::new("/s/m", "anything")).is_ok());
        assert_eq!(fixture.notifications(), 0);
    }

    #[test]
    fn route_names_are_watched_once() {
        let fixture = Fixture::new();
        let update = listener_update(
            &[
                chain_yaml("a", "{ prefix_ranges: [10.0.0.0/8] }", Some("shared")),
                chain_yaml("b", "{ prefix_ranges: [192.168.0.0/16] }", Some("shared")),
                chain_yaml("c", "{}", Some("other")),
            ],
            Some(chain_yaml("default", "{}", Some("shared"))),
        );
        let resolver = fixture.resolver(&update);
        assert_eq!(fixture.xds.watched_routes(), vec!["other", "shared"]);
        assert_eq!(resolver.route_config_names().collect::<Vec<_>>(), vec!["other", "shared"]);
        assert!(!resolver.is_ready());
    }

    #[test]
    fn ready_once_every_resource_has_an_outcome() {
        let fixture = Fixture::new();
        let update = listener_update(
            &[chain_yaml("a", "{ prefix_ranges: [10.0.0.0/8] }", Some("one")), chain_yaml("b", "{}", Some("two"))],
            None,
        );
        let resolver = fixture.resolver(&update);
        fixture.xds.route_watcher("one").on_changed(route_config("one", "*"));
        assert!(!resolver.is_ready());
        fixture.xds.route_watcher("two").on_error(Status::unavailable("timeout"));
        assert!(resolver.is_ready());
        assert_eq!(fixture.notifications(), 1);

        // the failed resource fails its calls, the other one works
        let overlay = resolver.resolve(&endpoints("192.168.0.1:50051", "10.0.0.2:4000")).unwrap();
        let err = overlay.get_call_config(&CallMetadata::new("/s/m", "host")).unwrap_err();
        assert_eq!(err.message(), "timeout");
        let overlay = resolver.resolve(&endpoints("10.0.0.1:50051", "10.0.0.2:4000")).unwrap();
        assert!(overlay.get_call_config(&CallMetadata::new("/s/m", "host")).is_ok());

        fixture.xds.publish_route(route_config("two", "*"));
        fixture.xds.publish_route(route_config("one", "*"));
        assert_eq!(fixture.notifications(), 1);
    }

    #[test]
    fn transient_errors_keep_the_last_good_configuration() {
        let fixture = Fixture::new();
        let resolver = fixture.resolver(&listener_update(&[chain_yaml("a", "{}", Some("routes"))], None));
        fixture.xds.publish_route(route_config("routes", "*"));
        let overlay = resolver.resolve(&endpoints("10.0.0.1:50051", "10.0.0.2:4000")).unwrap();
        let metadata = CallMetadata::new("/s/m", "host");
        let reset = |watcher: &dyn RouteConfigWatcher| watcher.on_error(Status::unavailable("connection reset"));

        fixture.xds.for_each_route_watcher("routes", reset);
        assert!(overlay.get_call_config(&metadata).is_ok());

        fixture.xds.for_each_route_watcher("routes", |watcher| watcher.on_resource_does_not_exist());
        let err = overlay.get_call_config(&metadata).unwrap_err();
        assert_eq!((err.code(), err.message()), (StatusCode::NotFound, "Requested route config does not exist"));

        // nothing good to keep anymore, so errors go through
        fixture.xds.for_each_route_watcher("routes", reset);
        assert_eq!(overlay.get_call_config(&metadata).unwrap_err().code(), StatusCode::Unavailable);
        let err = resolver.resolve(&endpoints("10.0.0.1:50051", "10.0.0.3:4000")).unwrap().get_call_config(&metadata);
        assert_eq!(err.unwrap_err().code(), StatusCode::Unavailable);

        fixture.xds.publish_route(route_config("routes", "*"));
        assert!(overlay.get_call_config(&metadata).is_ok());
    }

    #[test]
    fn connections_start_from_the_latest_route_configuration() {
        let fixture = Fixture::new();
        let resolver = fixture.resolver(&listener_update(&[chain_yaml("a", "{}", Some("routes"))], None));
        let metadata = CallMetadata::new("/s/m", "a.com");
        let early = resolver.resolve(&endpoints("10.0.0.1:50051", "10.0.0.2:4000")).unwrap();
        assert_eq!(early.get_call_config(&metadata).unwrap_err().code(), StatusCode::Unavailable);

        fixture.xds.publish_route(route_config("routes", "a.com"));
        assert!(early.get_call_config(&metadata).is_ok());
        let late = resolver.resolve(&endpoints("10.0.0.1:50051", "10.0.0.3:4000")).unwrap();
        assert!(late.get_call_config(&metadata).is_ok());
        // the resolver and both connections
        assert_eq!(fixture.xds.active_route_watches(), 3);
    }

    #[test]
    fn open_connections_follow_routes_after_orphan() {
        let fixture = Fixture::new();
        let resolver = fixture.resolver(&listener_update(&[chain_yaml("a", "{}", Some("routes"))], None));
        fixture.xds.publish_route(route_config("routes", "a.com"));
        let overlay = resolver.resolve(&endpoints("10.0.0.1:50051", "10.0.0.2:4000")).unwrap();
        resolver.orphan();
        assert_eq!(fixture.xds.active_route_watches(), 1);

        fixture.xds.publish_route(route_config("routes", "b.com"));
        assert!(overlay.get_call_config(&CallMetadata::new("/s/m", "b.com")).is_ok());
        let err = overlay.get_call_config(&CallMetadata::new("/s/m", "a.com")).unwrap_err();
        assert_eq!(err.message(), "could not find VirtualHost for a.com in RouteConfiguration");

        drop(resolver);
        drop(overlay);
        assert_eq!(fixture.xds.active_route_watches(), 0);
    }

    #[test]
    fn no_chain_rejects_connection() {
        let fixture = Fixture::new();
        let update = listener_update(&[chain_yaml("a", "{ prefix_ranges: [10.0.0.0/8] }", None)], None);
        let resolver = fixture.resolver(&update);
        let err = resolver.resolve(&endpoints("192.168.0.1:50051", "10.0.0.2:4000")).unwrap_err();
        assert_eq!((err.code(), err.message()), (StatusCode::Unavailable, "No matching filter chain found"));
    }

    #[test]
    fn unknown_certificate_provider_rejects_connection() {
        let fixture = Fixture::new();
        let chain = chain_yaml("secure", "{}", None)
            + r#"
    tls_context:
      common_tls_context:
        tls_certificate_provider_instance: { instance_name: missing, certificate_name: default }"#;
        let resolver = fixture.resolver(&listener_update(&[chain], None));
        let err = resolver.resolve(&endpoints("10.0.0.1:50051", "10.0.0.2:4000")).unwrap_err();
        assert_eq!(err.code(), StatusCode::NotFound);
    }

    #[test]
    fn filters_are_listed_innermost_first_without_router() {
        let fixture = Fixture::new();
        let chain = chain_yaml("a", "{}", None).replace(
            "http_filters: [ { name: router, filter_type: router } ]",
            r#"http_filters:
        - { name: first, filter_type: rbac, filter_settings: {} }
        - { name: second, filter_type: rbac, filter_settings: {} }
        - { name: router, filter_type: router }"#,
        );
        let resolver = fixture.resolver(&listener_update(&[chain], None));
        let overlay = resolver.resolve(&endpoints("10.0.0.1:50051", "10.0.0.2:4000")).unwrap();
        let names: Vec<_> = overlay.http_filters.iter().map(|filter| filter.name.as_str()).collect();
        assert_eq!(names, vec!["second", "first"]);
    }

    #[test]
    fn orphan_cancels_watches_once() {
        let fixture = Fixture::new();
        let update = listener_update(
            &[chain_yaml("a", "{}", Some("one")), chain_yaml("b", "{ source_ports: [1] }", Some("two"))],
            None,
        );
        let resolver = fixture.resolver(&update);
        assert_eq!(fixture.xds.active_route_watches(), 2);
        resolver.orphan();
        resolver.orphan();
        assert_eq!(fixture.xds.cancelled.lock().len(), 2);
        assert_eq!(fixture.xds.active_route_watches(), 0);

        // late callbacks are ignored
        fixture.xds.route_watcher("one").on_changed(route_config("one", "*"));
        fixture.xds.route_watcher("two").on_changed(route_config("two", "*"));
        assert!(!resolver.is_ready());
        assert_eq!(fixture.notifications(), 0);

        drop(resolver);
        assert_eq!(fixture.xds.cancelled.lock().len(), 2);
    }

    #[test]
    fn dropping_the_resolver_cancels_watches() {
        let fixture = Fixture::new();
        let resolver = fixture.resolver(&listener_update(&[chain_yaml("a", "{}", Some("routes"))], None));
        let watcher = fixture.xds.route_watcher("routes");
        drop(resolver);
        assert_eq!(fixture.xds.active_route_watches(), 0);
        // the watcher outlives the resolver and does nothing
        watcher.on_changed(route_config("routes", "*"));
        assert_eq!(fixture.notifications(), 0);
    }
}
