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

//! The nested lookup structure connections are matched against.
//!
//! Levels, outermost first: destination ip prefix, source type, source ip prefix, source port.
//! Every level may have one catch-all entry which is only used when no prefixed entry matches.

use super::{FilterChain, FilterChainData, SourceType};
use crate::config::{GenericError, WithNodeOnResult};
use ipnet::IpNet;
use std::{
    collections::{btree_map::Entry, BTreeMap},
    net::IpAddr,
    sync::Arc,
};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrefixMatch {
    CatchAll,
    Prefix(IpNet),
}

impl PrefixMatch {
    /// How specific the match of `ip` is, `None` if it doesn't match at all.
    /// A prefix of length 0 still beats the catch-all.
    pub fn match_len(&self, ip: IpAddr) -> Option<u16> {
        match self {
            Self::CatchAll => Some(0),
            Self::Prefix(net) => net.contains(&ip).then(|| u16::from(net.prefix_len()) + 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterChainMap {
    pub destination_ip_entries: Vec<DestinationIpEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationIpEntry {
    pub prefix: PrefixMatch,
    pub source_types: SourceTypeTable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceTypeTable {
    /// Only chains without a source type restriction exist for this destination.
    Any(Vec<SourceIpEntry>),
    Classified { same_ip_or_loopback: Vec<SourceIpEntry>, external: Vec<SourceIpEntry> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceIpEntry {
    pub prefix: PrefixMatch,
    pub ports: SourcePorts,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourcePorts {
    pub by_port: BTreeMap<u16, Arc<FilterChainData>>,
    /// Chain registered for port 0, used when no port matches exactly.
    pub catch_all: Option<Arc<FilterChainData>>,
}

impl SourcePorts {
    pub fn get(&self, port: u16) -> Option<&Arc<FilterChainData>> {
        self.by_port.get(&port).or(self.catch_all.as_ref())
    }

    fn insert(&mut self, port: u16, chain: &Arc<FilterChainData>) -> Result<(), GenericError> {
        let slot = if port == 0 {
            &mut self.catch_all
        } else {
            match self.by_port.entry(port) {
                Entry::Vacant(vacant) => {
                    vacant.insert(Arc::clone(chain));
                    return Ok(());
                },
                Entry::Occupied(_) => return Err(duplicate_rule(chain)),
            }
        };
        if slot.is_some() {
            return Err(duplicate_rule(chain));
        }
        *slot = Some(Arc::clone(chain));
        Ok(())
    }

    fn chains(&self) -> impl Iterator<Item = &Arc<FilterChainData>> {
        self.by_port.values().chain(self.catch_all.iter())
    }
}

fn duplicate_rule(chain: &FilterChainData) -> GenericError {
    GenericError::from_msg(format!("duplicate matching rules detected when adding filter chain \"{}\"", chain.name))
}

fn prefixes(ranges: &[IpNet]) -> Vec<PrefixMatch> {
    if ranges.is_empty() {
        vec![PrefixMatch::CatchAll]
    } else {
        ranges.iter().map(|net| PrefixMatch::Prefix(net.trunc())).collect()
    }
}

impl FilterChainMap {
    /// Every chain reachable through the map. Chains registered under several keys show up several times.
    pub fn filter_chains(&self) -> impl Iterator<Item = &Arc<FilterChainData>> {
        self.destination_ip_entries.iter().flat_map(|dest| {
            let (first, second): (&[SourceIpEntry], &[SourceIpEntry]) = match &dest.source_types {
                SourceTypeTable::Any(entries) => (entries.as_slice(), &[]),
                SourceTypeTable::Classified { same_ip_or_loopback, external } => {
                    (same_ip_or_loopback.as_slice(), external.as_slice())
                },
            };
            first.iter().chain(second).flat_map(|source| source.ports.chains())
        })
    }
}

type SourceIpTable = BTreeMap<PrefixMatch, SourcePorts>;

#[derive(Default)]
struct SourceTypeBuckets {
    any: SourceIpTable,
    same_ip_or_loopback: SourceIpTable,
    external: SourceIpTable,
}

impl SourceTypeBuckets {
    fn bucket(&mut self, source_type: SourceType) -> &mut SourceIpTable {
        match source_type {
            SourceType::Any => &mut self.any,
            SourceType::SameIpOrLoopback => &mut self.same_ip_or_loopback,
            SourceType::External => &mut self.external,
        }
    }

    fn finish(self, destination: PrefixMatch) -> SourceTypeTable {
        fn entries(table: SourceIpTable) -> Vec<SourceIpEntry> {
            table.into_iter().map(|(prefix, ports)| SourceIpEntry { prefix, ports }).collect()
        }
        let Self { any, same_ip_or_loopback, external } = self;
        if same_ip_or_loopback.is_empty() && external.is_empty() {
            return SourceTypeTable::Any(entries(any));
        }
        if !any.is_empty() {
            warn!(
                ?destination,
                "filter chains without a source type are unreachable next to chains with a source type and are dropped"
            );
        }
        SourceTypeTable::Classified { same_ip_or_loopback: entries(same_ip_or_loopback), external: entries(external) }
    }
}

impl TryFrom<Vec<FilterChain>> for FilterChainMap {
    type Error = GenericError;
    fn try_from(filter_chains: Vec<FilterChain>) -> Result<Self, Self::Error> {
        let mut destinations: BTreeMap<PrefixMatch, SourceTypeBuckets> = BTreeMap::new();
        for (index, chain) in filter_chains.into_iter().enumerate() {
            let fcm = chain.filter_chain_match.clone();
            let chain = FilterChainData::try_from(chain).map(Arc::new).with_index(index)?;
            let source_prefixes = prefixes(&fcm.source_prefix_ranges);
            let ports = if fcm.source_ports.is_empty() { vec![0] } else { fcm.source_ports.clone() };
            for destination in prefixes(&fcm.prefix_ranges) {
                let table = destinations.entry(destination).or_default().bucket(fcm.source_type);
                for source in &source_prefixes {
                    let source_ports = table.entry(*source).or_default();
                    for port in &ports {
                        source_ports.insert(*port, &chain).with_index(index)?;
                    }
                }
            }
        }
        let destination_ip_entries = destinations
            .into_iter()
            .map(|(prefix, buckets)| DestinationIpEntry { prefix, source_types: buckets.finish(prefix) })
            .collect();
        Ok(Self { destination_ip_entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::listener::FilterChainMatch;
    use tracing_test::traced_test;

    fn chain(name: &str, fcm: &str) -> FilterChain {
        serde_yaml::from_str(&format!(
            r#"
name: {name}
filter_chain_match: {fcm}
http_connection_manager:
  http_filters:
    - {{ name: router, filter_type: router }}
  route_specifier:
    route_config_name: {name}
"#
        ))
        .unwrap()
    }

    #[test]
    fn empty_match_is_catch_all_everywhere() {
        let map = FilterChainMap::try_from(vec![chain("all", "{}")]).unwrap();
        assert_eq!(map.destination_ip_entries.len(), 1);
        let dest = &map.destination_ip_entries[0];
        assert_eq!(dest.prefix, PrefixMatch::CatchAll);
        let SourceTypeTable::Any(sources) = &dest.source_types else { panic!("expected any") };
        assert_eq!(sources[0].prefix, PrefixMatch::CatchAll);
        assert!(sources[0].ports.by_port.is_empty());
        assert_eq!(sources[0].ports.catch_all.as_ref().map(|c| c.name.as_str()), Some("all"));
    }

    #[test]
    fn prefixes_are_normalized() {
        let map = FilterChainMap::try_from(vec![chain("a", "{prefix_ranges: [10.1.2.3/8]}")]).unwrap();
        assert_eq!(map.destination_ip_entries[0].prefix, PrefixMatch::Prefix("10.0.0.0/8".parse().unwrap()));
    }

    #[test]
    fn duplicate_rules_are_rejected() {
        let err = FilterChainMap::try_from(vec![
            chain("a", "{prefix_ranges: [10.0.0.0/8], source_ports: [80, 443]}"),
            chain("b", "{prefix_ranges: [10.1.0.0/8], source_ports: [443]}"),
        ])
        .unwrap_err();
        assert!(format!("{err:?}").contains("duplicate matching rules"), "{err:?}");

        assert!(FilterChainMap::try_from(vec![chain("a", "{}"), chain("b", "{}")]).is_err());
        assert!(FilterChainMap::try_from(vec![chain("a", "{}"), chain("b", "{source_ports: [8080]}")]).is_ok());
    }

    #[test]
    #[traced_test]
    fn any_source_type_dropped_next_to_classified() {
        let map = FilterChainMap::try_from(vec![
            chain("any", "{}"),
            chain("local", "{source_type: SAME_IP_OR_LOOPBACK}"),
        ])
        .unwrap();
        let SourceTypeTable::Classified { same_ip_or_loopback, external } = &map.destination_ip_entries[0].source_types
        else {
            panic!("expected classified table")
        };
        assert_eq!(same_ip_or_loopback.len(), 1);
        assert!(external.is_empty());
        assert_eq!(map.filter_chains().count(), 1);
        assert!(logs_contain("unreachable"));
    }

    #[test]
    fn prefix_match_len() {
        let ip: IpAddr = "192.168.1.7".parse().unwrap();
        assert_eq!(PrefixMatch::CatchAll.match_len(ip), Some(0));
        assert_eq!(PrefixMatch::Prefix("0.0.0.0/0".parse().unwrap()).match_len(ip), Some(1));
        assert_eq!(PrefixMatch::Prefix("192.168.0.0/16".parse().unwrap()).match_len(ip), Some(17));
        assert_eq!(PrefixMatch::Prefix("10.0.0.0/8".parse().unwrap()).match_len(ip), None);
        let fcm = FilterChainMatch::default();
        assert_eq!(prefixes(&fcm.prefix_ranges), vec![PrefixMatch::CatchAll]);
    }
}
