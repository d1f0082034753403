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

use compact_str::{CompactString, ToCompactString};
use orion_configuration::config::listener::{FilterChainData, FilterChainMap, PrefixMatch, SourceTypeTable};
use std::{
    fmt::{self, Display},
    net::{IpAddr, SocketAddr},
    str::FromStr,
    sync::Arc,
};
use tracing::debug;

/// One side of a connection, as reported by the transport.
///
/// Transports that are not ip based (unix sockets, in-process channels) report [`EndpointAddress::Other`], such
/// connections never match a filter chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointAddress {
    Inet(SocketAddr),
    Other(CompactString),
}

impl FromStr for EndpointAddress {
    type Err = std::convert::Infallible;

    /// Accepts `ipv4:1.2.3.4:80`, `ipv6:[::1]:80` as well as plain socket addresses.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address = s.strip_prefix("ipv4:").or_else(|| s.strip_prefix("ipv6:")).unwrap_or(s);
        Ok(address.parse().map(Self::Inet).unwrap_or_else(|_| Self::Other(s.to_compact_string())))
    }
}

impl From<SocketAddr> for EndpointAddress {
    fn from(value: SocketAddr) -> Self {
        Self::Inet(value)
    }
}

impl Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inet(addr) => addr.fmt(f),
            Self::Other(addr) => f.write_str(addr),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEndpoints {
    pub local: EndpointAddress,
    pub peer: EndpointAddress,
}

impl ConnectionEndpoints {
    pub fn new(local: impl Into<EndpointAddress>, peer: impl Into<EndpointAddress>) -> Self {
        Self { local: local.into(), peer: peer.into() }
    }
}

fn best_prefix<T>(entries: &[T], prefix: impl Fn(&T) -> &PrefixMatch, ip: IpAddr) -> Option<&T> {
    let mut best: Option<(u16, &T)> = None;
    for entry in entries {
        if let Some(len) = prefix(entry).match_len(ip) {
            if best.is_none_or(|(best_len, _)| len > best_len) {
                best = Some((len, entry));
            }
        }
    }
    best.map(|(_, entry)| entry)
}

/// Picks the filter chain for a connection.
///
/// Levels are matched outermost first and a miss at any level is final: the default chain is used and no other
/// destination entry is tried. Connections whose endpoints are not ip addresses get no chain at all.
pub fn select_filter_chain(
    filter_chain_map: &FilterChainMap,
    default_filter_chain: Option<&Arc<FilterChainData>>,
    endpoints: &ConnectionEndpoints,
) -> Option<Arc<FilterChainData>> {
    let (EndpointAddress::Inet(local), EndpointAddress::Inet(peer)) = (&endpoints.local, &endpoints.peer) else {
        debug!(local = %endpoints.local, peer = %endpoints.peer, "not an ip connection, no filter chain applies");
        return None;
    };
    let local_ip = local.ip().to_canonical();
    let peer_ip = peer.ip().to_canonical();

    let matched = best_prefix(&filter_chain_map.destination_ip_entries, |entry| &entry.prefix, local_ip)
        .and_then(|destination| {
            let sources = match &destination.source_types {
                SourceTypeTable::Any(sources) => sources,
                SourceTypeTable::Classified { same_ip_or_loopback, external } => {
                    if peer_ip.is_loopback() || peer_ip == local_ip {
                        same_ip_or_loopback
                    } else {
                        external
                    }
                },
            };
            best_prefix(sources, |entry| &entry.prefix, peer_ip)
        })
        .and_then(|source| source.ports.get(peer.port()));

    matched.or(default_filter_chain).cloned()
}
