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

pub mod filter_chain_map;
pub use filter_chain_map::{
    DestinationIpEntry, FilterChainMap, PrefixMatch, SourceIpEntry, SourcePorts, SourceTypeTable,
};

use super::{network_filters::HttpConnectionManager, transport::DownstreamTlsContext, GenericError, WithNodeOnResult};
use compact_str::CompactString;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, net::SocketAddr, sync::Arc};

/// A listener as it is served by the control plane: a flat list of filter chains.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListenerResource {
    pub name: CompactString,
    pub address: SocketAddr,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub filter_chains: Vec<FilterChain>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub default_filter_chain: Option<FilterChain>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct FilterChain {
    #[serde(skip_serializing_if = "CompactString::is_empty", default)]
    pub name: CompactString,
    #[serde(skip_serializing_if = "super::is_default", default)]
    pub filter_chain_match: FilterChainMatch,
    pub http_connection_manager: HttpConnectionManager,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tls_context: Option<DownstreamTlsContext>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct FilterChainMatch {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub prefix_ranges: Vec<IpNet>,
    #[serde(skip_serializing_if = "super::is_default", default)]
    pub source_type: SourceType,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub source_prefix_ranges: Vec<IpNet>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub source_ports: Vec<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    #[default]
    Any,
    SameIpOrLoopback,
    External,
}

/// Everything a connection needs once its filter chain has been selected.
///
/// A chain is shared through an `Arc` and the allocation is what identifies it, so two chains with
/// equal contents are still cached separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterChainData {
    pub name: CompactString,
    pub http_connection_manager: HttpConnectionManager,
    pub downstream_tls_context: Option<DownstreamTlsContext>,
}

impl TryFrom<FilterChain> for FilterChainData {
    type Error = GenericError;
    fn try_from(value: FilterChain) -> Result<Self, Self::Error> {
        let FilterChain { name, filter_chain_match: _, http_connection_manager, tls_context } = value;
        http_connection_manager.validate().with_node("http_connection_manager")?;
        Ok(Self { name, http_connection_manager, downstream_tls_context: tls_context })
    }
}

/// A validated listener, ready to be matched against connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerUpdate {
    pub name: CompactString,
    pub address: SocketAddr,
    pub filter_chain_map: FilterChainMap,
    pub default_filter_chain: Option<Arc<FilterChainData>>,
}

impl ListenerUpdate {
    /// Name of every route configuration that has to be fetched separately, each one listed once.
    pub fn rds_names(&self) -> BTreeSet<&str> {
        self.filter_chain_map
            .filter_chains()
            .chain(self.default_filter_chain.iter())
            .filter_map(|chain| chain.http_connection_manager.rds_name())
            .collect()
    }
}

impl TryFrom<ListenerResource> for ListenerUpdate {
    type Error = GenericError;
    fn try_from(value: ListenerResource) -> Result<Self, Self::Error> {
        let ListenerResource { name, address, filter_chains, default_filter_chain } = value;
        let name_for_errors = name.to_string();
        (|| -> Result<_, GenericError> {
            let filter_chain_map = FilterChainMap::try_from(filter_chains).with_node("filter_chains")?;
            let default_filter_chain = default_filter_chain
                .map(|chain| FilterChainData::try_from(chain).map(Arc::new))
                .transpose()
                .with_node("default_filter_chain")?;
            Ok(Self { name, address, filter_chain_map, default_filter_chain })
        })()
        .with_name(name_for_errors)
    }
}
