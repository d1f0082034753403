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

use crate::config::{
    certificate_provider::CertificateProviderPluginConfig,
    common::{is_default, GenericError, WithNodeOnResult},
    listener::ListenerResource,
    network_filters::http_connection_manager::RouteConfiguration,
};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, net::SocketAddr};

pub const LISTENING_ADDRESS_PLACEHOLDER: &str = "%s";

#[derive(Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct Bootstrap {
    #[serde(skip_serializing_if = "Option::is_none", default = "Default::default")]
    pub node: Option<Node>,
    #[serde(skip_serializing_if = "CompactString::is_empty", default)]
    pub server_listener_resource_name_template: CompactString,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub certificate_providers: BTreeMap<CompactString, CertificateProviderPluginConfig>,
    /// Addresses the server listens on, one listener resource is watched per address.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub servers: Vec<SocketAddr>,
    #[serde(skip_serializing_if = "is_default", default)]
    pub static_resources: StaticResources,
}

impl Bootstrap {
    pub fn validate(&self) -> Result<(), GenericError> {
        if !self.servers.is_empty() && self.server_listener_resource_name_template.is_empty() {
            return Err(GenericError::from_msg("server_listener_resource_name_template not provided in bootstrap"))
                .with_node("server_listener_resource_name_template");
        }
        for (index, listener) in self.static_resources.listeners.iter().enumerate() {
            listener.validate_certificate_providers(&self.certificate_providers).with_index(index)?;
        }
        Ok(())
    }

    /// The listener resource name watched for `address`.
    pub fn listener_resource_name(&self, address: SocketAddr) -> CompactString {
        self.server_listener_resource_name_template.replace(LISTENING_ADDRESS_PLACEHOLDER, &address.to_string()).into()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub id: CompactString,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cluster: Option<CompactString>,
}

/// Resources the in process control plane is seeded with.
#[derive(Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct StaticResources {
    #[serde(skip_serializing_if = "Vec::is_empty", default = "Default::default")]
    pub listeners: Vec<ListenerResource>,
    #[serde(skip_serializing_if = "Vec::is_empty", default = "Default::default")]
    pub route_configurations: Vec<RouteConfiguration>,
}

impl ListenerResource {
    /// Statically configured listeners may only reference certificate providers declared in the bootstrap.
    fn validate_certificate_providers(
        &self,
        providers: &BTreeMap<CompactString, CertificateProviderPluginConfig>,
    ) -> Result<(), GenericError> {
        let chains = self.filter_chains.iter().chain(self.default_filter_chain.iter());
        for chain in chains {
            let Some(tls) = &chain.tls_context else { continue };
            let tls = &tls.common_tls_context;
            let instances = tls.identity_provider().into_iter().chain(tls.root_provider());
            for instance in instances {
                if !providers.contains_key(&instance.instance_name) {
                    return Err(GenericError::from_msg(format!(
                        "certificate provider instance \"{}\" is not declared in the bootstrap",
                        instance.instance_name
                    )))
                    .with_name(chain.name.to_string())
                    .with_node("listeners");
                }
            }
        }
        Ok(())
    }
}
