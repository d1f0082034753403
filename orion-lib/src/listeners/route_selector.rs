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

use crate::Result;
use compact_str::CompactString;
use http::HeaderMap;
use orion_configuration::config::network_filters::http_connection_manager::{
    http_filters::{HttpFilter, MethodConfigEntry},
    Route, RouteConfiguration, VirtualHost,
};
use orion_error::{ResultExtension, Status};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// What the server knows about a call when it picks its configuration.
#[derive(Debug, Clone, Default)]
pub struct CallMetadata {
    pub path: Option<CompactString>,
    pub authority: Option<CompactString>,
    pub headers: HeaderMap,
}

impl CallMetadata {
    pub fn new(path: impl Into<CompactString>, authority: impl Into<CompactString>) -> Self {
        Self { path: Some(path.into()), authority: Some(authority.into()), headers: HeaderMap::new() }
    }

    #[must_use]
    pub fn with_headers(self, headers: HeaderMap) -> Self {
        Self { headers, ..self }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MethodName {
    service: Option<CompactString>,
    method: Option<CompactString>,
}

impl MethodName {
    fn parse(value: &Value) -> Result<Self> {
        let Value::Object(name) = value else {
            return Err("method config name must be an object".into());
        };
        let field = |key: &str| match name.get(key) {
            None => Ok(None),
            Some(Value::String(s)) if s.is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(CompactString::from(s.as_str()))),
            Some(_) => Err(format!("method config name field \"{key}\" must be a string")),
        };
        let service = field("service")?;
        let method = field("method")?;
        if service.is_none() && method.is_some() {
            return Err("method config name has a method but no service".into());
        }
        Ok(Self { service, method })
    }

    /// 2 for an exact method match, 1 for a whole service, 0 for the default entry.
    fn specificity(&self, service: &str, method: &str) -> Option<u8> {
        match (&self.service, &self.method) {
            (None, _) => Some(0),
            (Some(s), None) => (s == service).then_some(1),
            (Some(s), Some(m)) => (s == service && m == method).then_some(2),
        }
    }
}

/// A service config generated for one route. Only the `methodConfig` list is interpreted.
#[derive(Debug, PartialEq)]
pub struct ServiceConfig {
    json: Value,
    method_configs: Vec<(Vec<MethodName>, Arc<Value>)>,
}

impl ServiceConfig {
    pub fn from_json(json: Value) -> Result<Self> {
        let mut method_configs = Vec::new();
        if let Some(list) = json.get("methodConfig") {
            let Value::Array(list) = list else {
                return Err("methodConfig must be a list".into());
            };
            for (index, method_config) in list.iter().enumerate() {
                let names = match method_config.get("name") {
                    Some(Value::Array(names)) => {
                        names.iter().map(MethodName::parse).collect::<Result<Vec<_>>>()
                    },
                    _ => Err("method config without a name list".into()),
                }
                .with_context(|| format!("invalid methodConfig entry {index}"))?;
                method_configs.push((names, Arc::new(method_config.clone())));
            }
        }
        Ok(Self { json, method_configs })
    }

    pub fn json(&self) -> &Value {
        &self.json
    }

    /// The most specific method config that names the service and method of `path` (`/<service>/<method>`).
    pub fn method_config(&self, path: &str) -> Option<&Arc<Value>> {
        let (service, method) = path.strip_prefix('/').and_then(|p| p.split_once('/')).unwrap_or(("", ""));
        let mut best: Option<(u8, &Arc<Value>)> = None;
        for (names, method_config) in &self.method_configs {
            let Some(score) = names.iter().filter_map(|name| name.specificity(service, method)).max() else {
                continue;
            };
            if best.is_none_or(|(best_score, _)| score > best_score) {
                best = Some((score, method_config));
            }
        }
        best.map(|(_, method_config)| method_config)
    }
}

/// Configuration applied to a single call.
#[derive(Debug, Clone, Default)]
pub struct CallConfig {
    pub method_config: Option<Arc<Value>>,
    pub service_config: Option<Arc<ServiceConfig>>,
}

/// Builds the service config a route hands to its calls out of what each filter contributes.
///
/// Entries of the same field are grouped in filter order, so two rbac filters produce one `rbacPolicy` list with
/// two policies.
fn route_service_config(
    http_filters: &[HttpFilter],
    virtual_host: &VirtualHost,
    route: &Route,
) -> Result<Option<Arc<ServiceConfig>>> {
    let mut fields: Vec<(&'static str, Vec<Value>)> = Vec::new();
    for filter in http_filters {
        let filter_override = route
            .typed_per_filter_config
            .get(&filter.name)
            .or_else(|| virtual_host.typed_per_filter_config.get(&filter.name));
        let Some(MethodConfigEntry { field, value }) = filter.method_config_entry(filter_override)? else {
            continue;
        };
        match fields.iter_mut().find(|(existing, _)| *existing == field) {
            Some((_, values)) => values.push(value),
            None => fields.push((field, vec![value])),
        }
    }
    if fields.is_empty() {
        return Ok(None);
    }
    let mut method_config = Map::new();
    method_config.insert("name".into(), json!([{}]));
    for (field, values) in fields {
        method_config.insert(field.into(), Value::Array(values));
    }
    let json = json!({ "methodConfig": [Value::Object(method_config)] });
    ServiceConfig::from_json(json).map(Arc::new).map(Some)
}

/// Picks the configuration of each call from one snapshot of a route configuration.
#[derive(Debug)]
pub struct ServerConfigSelector {
    route_config: Arc<RouteConfiguration>,
    // indexed like route_config.virtual_hosts[..].routes[..]
    service_configs: Vec<Vec<Option<Arc<ServiceConfig>>>>,
}

impl ServerConfigSelector {
    pub fn new(http_filters: &[HttpFilter], route_config: Arc<RouteConfiguration>) -> Result<Self> {
        let service_configs = route_config
            .virtual_hosts
            .iter()
            .map(|virtual_host| {
                virtual_host
                    .routes
                    .iter()
                    .map(|route| {
                        // routes that can't serve calls never get to use their config
                        if route.action.is_non_forwarding() {
                            route_service_config(http_filters, virtual_host, route).with_context(|| {
                                format!("route \"{}\" of virtual host \"{}\"", route.name, virtual_host.name)
                            })
                        } else {
                            Ok(None)
                        }
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("failed to build server config selector for \"{}\"", route_config.name))?;
        Ok(Self { route_config, service_configs })
    }

    pub fn route_config(&self) -> &Arc<RouteConfiguration> {
        &self.route_config
    }

    pub fn get_call_config(&self, metadata: &CallMetadata) -> std::result::Result<CallConfig, Status> {
        let Some(path) = metadata.path.as_deref() else {
            return Err(Status::unavailable("No path found"));
        };
        let Some(authority) = metadata.authority.as_deref() else {
            return Err(Status::unavailable("No authority found"));
        };
        let Some((vh_index, virtual_host)) = self.route_config.find_virtual_host(authority) else {
            return Err(Status::unavailable(format!(
                "could not find VirtualHost for {authority} in RouteConfiguration"
            )));
        };
        let Some((route_index, route)) =
            virtual_host.routes.iter().enumerate().find(|(_, route)| route.route_match.matches(path, &metadata.headers))
        else {
            return Err(Status::unavailable("No route matched"));
        };
        if !route.action.is_non_forwarding() {
            return Err(Status::unavailable("Matching route has inappropriate_action"));
        }
        let service_config =
            self.service_configs.get(vh_index).and_then(|routes| routes.get(route_index)).cloned().flatten();
        let method_config = service_config.as_ref().and_then(|config| config.method_config(path)).cloned();
        Ok(CallConfig { method_config, service_config })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use orion_error::StatusCode;

    const FILTERS: &str = r#"
- name: authz
  filter_type: rbac
  filter_settings:
    rules:
      action: ALLOW
      policies:
        all: { permissions: [ { any: true } ], principals: [ { any: true } ] }
- name: router
  filter_type: router
"#;

    const ROUTES: &str = r#"
name: greeter_routes
virtual_hosts:
  - name: greeter
    domains: [ "greeter.example.com", "*.greeter.example.com" ]
    routes:
      - name: admin
        match: { prefix: "/admin.Admin/" }
        typed_per_filter_config:
          authz:
            filter_type: rbac
            filter_settings:
              rules: { action: DENY, policies: { everyone: { permissions: [ { any: true } ], principals: [ { any: true } ] } } }
        non_forwarding_action: {}
      - name: forwarded
        match: { prefix: "/forward.Forward/" }
        route: { cluster: elsewhere }
      - name: canary
        match:
          prefix: "/"
          headers: [ { name: x-canary, exact: "true" } ]
        typed_per_filter_config:
          authz: { filter_type: rbac, filter_settings: {} }
        non_forwarding_action: {}
      - name: default
        match: { prefix: "/" }
        non_forwarding_action: {}
  - name: fallback
    domains: [ "*" ]
    routes:
      - match: { exact: "/health.Health/Check" }
        non_forwarding_action: {}
"#;

    fn selector() -> ServerConfigSelector {
        let filters: Vec<HttpFilter> = serde_yaml::from_str(FILTERS).unwrap();
        let routes: RouteConfiguration = serde_yaml::from_str(ROUTES).unwrap();
        ServerConfigSelector::new(&filters, Arc::new(routes)).unwrap()
    }

    fn rbac_policy(config: &CallConfig) -> Option<Value> {
        config.method_config.as_ref().map(|method_config| method_config["rbacPolicy"].clone())
    }

    #[test]
    fn missing_path_or_authority() {
        let selector = selector();
        let err = selector.get_call_config(&CallMetadata::default()).unwrap_err();
        assert_eq!((err.code(), err.message()), (StatusCode::Unavailable, "No path found"));
        let metadata = CallMetadata { path: Some("/a/b".into()), ..Default::default() };
        let err = selector.get_call_config(&metadata).unwrap_err();
        assert_eq!((err.code(), err.message()), (StatusCode::Unavailable, "No authority found"));
    }

    #[test]
    fn route_overrides_connection_manager_policy() {
        let selector = selector();
        let config = selector.get_call_config(&CallMetadata::new("/admin.Admin/Reset", "greeter.example.com")).unwrap();
        assert_eq!(
            rbac_policy(&config),
            Some(json!([{ "rules": { "action": 1, "policies": {
                "everyone": { "permissions": [ { "any": true } ], "principals": [ { "any": true } ] }
            } } }]))
        );
        assert!(config.service_config.is_some());
    }

    #[test]
    fn connection_manager_policy_applies_without_override() {
        let selector = selector();
        let metadata = CallMetadata::new("/helloworld.Greeter/SayHello", "eu.greeter.example.com");
        let config = selector.get_call_config(&metadata).unwrap();
        let policy = rbac_policy(&config).unwrap();
        assert_eq!(policy[0]["rules"]["action"], json!(0));
        let service_config = config.service_config.unwrap();
        assert_eq!(service_config.json()["methodConfig"][0]["name"], json!([{}]));
    }

    #[test]
    fn header_matchers_select_routes() {
        let selector = selector();
        let mut headers = HeaderMap::new();
        headers.insert("x-canary", HeaderValue::from_static("true"));
        let metadata = CallMetadata::new("/helloworld.Greeter/SayHello", "greeter.example.com").with_headers(headers);
        let config = selector.get_call_config(&metadata).unwrap();
        assert_eq!(rbac_policy(&config), Some(json!([{}])));
    }

    #[test]
    fn forwarding_route_is_inappropriate() {
        let selector = selector();
        let metadata = CallMetadata::new("/forward.Forward/Call", "greeter.example.com");
        let err = selector.get_call_config(&metadata).unwrap_err();
        assert_eq!((err.code(), err.message()), (StatusCode::Unavailable, "Matching route has inappropriate_action"));
    }

    #[test]
    fn unmatched_route_and_virtual_host() {
        let selector = selector();
        let err = selector.get_call_config(&CallMetadata::new("/other.Other/Call", "localhost:50051")).unwrap_err();
        assert_eq!((err.code(), err.message()), (StatusCode::Unavailable, "No route matched"));

        let config = selector.get_call_config(&CallMetadata::new("/health.Health/Check", "localhost:50051")).unwrap();
        // only the rbac filter without override applies, so there still is a config
        assert!(config.method_config.is_some());

        let routes = RouteConfiguration { name: "empty".into(), virtual_hosts: Vec::new() };
        let selector = ServerConfigSelector::new(&[], Arc::new(routes)).unwrap();
        let err = selector.get_call_config(&CallMetadata::new("/a/b", "localhost")).unwrap_err();
        assert_eq!(err.message(), "could not find VirtualHost for localhost in RouteConfiguration");
    }

    #[test]
    fn router_only_has_no_method_config() {
        let filters: Vec<HttpFilter> = serde_yaml::from_str("[ { name: router, filter_type: router } ]").unwrap();
        let routes: RouteConfiguration = serde_yaml::from_str(ROUTES).unwrap();
        let selector = ServerConfigSelector::new(&filters, Arc::new(routes)).unwrap();
        let metadata = CallMetadata::new("/helloworld.Greeter/SayHello", "greeter.example.com");
        let config = selector.get_call_config(&metadata).unwrap();
        assert!(config.method_config.is_none());
        assert!(config.service_config.is_none());
    }

    #[test]
    fn override_for_unknown_kind_fails_the_build() {
        let filters: Vec<HttpFilter> = serde_yaml::from_str("[ { name: authz, filter_type: router } ]").unwrap();
        let routes: RouteConfiguration = serde_yaml::from_str(ROUTES).unwrap();
        assert!(ServerConfigSelector::new(&filters, Arc::new(routes)).is_err());
    }

    #[test]
    fn method_config_lookup_prefers_specific_names() {
        let service_config = ServiceConfig::from_json(json!({ "methodConfig": [
            { "name": [ {} ], "timeout": "1s" },
            { "name": [ { "service": "a.A" } ], "timeout": "2s" },
            { "name": [ { "service": "a.A", "method": "Get" } ], "timeout": "3s" },
        ]}))
        .unwrap();
        let timeout = |path| service_config.method_config(path).map(|config| config["timeout"].clone());
        assert_eq!(timeout("/a.A/Get"), Some(json!("3s")));
        assert_eq!(timeout("/a.A/Put"), Some(json!("2s")));
        assert_eq!(timeout("/b.B/Get"), Some(json!("1s")));
        assert!(ServiceConfig::from_json(json!({ "methodConfig": [ { "timeout": "1s" } ] })).is_err());
    }
}
