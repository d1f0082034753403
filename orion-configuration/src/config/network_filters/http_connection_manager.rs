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

pub mod header_matcher;
pub mod http_filters;
pub mod route;

use compact_str::CompactString;
use http::HeaderValue;
use http_filters::{FilterOverride, HttpFilter, HttpFilterType};
use route::{Action, RouteMatch};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    str::FromStr,
};

use crate::config::common::*;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct HttpConnectionManager {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub http_filters: Vec<HttpFilter>,
    pub route_specifier: RouteSpecifier,
}

impl HttpConnectionManager {
    /// The filter list has to be terminated by exactly one router filter and every filter needs a unique name.
    pub fn validate(&self) -> Result<(), GenericError> {
        let Some((last, rest)) = self.http_filters.split_last() else {
            return Err(GenericError::from_msg("http_filters can't be empty")).with_node("http_filters");
        };
        let mut seen = HashSet::with_capacity(self.http_filters.len());
        for (index, filter) in self.http_filters.iter().enumerate() {
            if !seen.insert(filter.name.as_str()) {
                return Err(GenericError::from_msg(format!("duplicate http filter name \"{}\"", filter.name)))
                    .with_index(index)
                    .with_node("http_filters");
            }
        }
        if !matches!(last.filter, HttpFilterType::Router) {
            return Err(GenericError::from_msg("the last http filter has to be the router"))
                .with_name(last.name.to_string())
                .with_node("http_filters");
        }
        if let Some(router) = rest.iter().find(|f| matches!(f.filter, HttpFilterType::Router)) {
            return Err(GenericError::from_msg("router filter has to be the last filter in the chain"))
                .with_name(router.name.to_string())
                .with_node("http_filters");
        }
        Ok(())
    }

    pub fn rds_name(&self) -> Option<&str> {
        match &self.route_specifier {
            RouteSpecifier::Rds(rds) => Some(rds.route_config_name.as_str()),
            RouteSpecifier::RouteConfig(_) => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RouteSpecifier {
    Rds(RdsSpecifier),
    RouteConfig(RouteConfiguration),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RdsSpecifier {
    pub route_config_name: CompactString,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Default)]
pub struct RouteConfiguration {
    pub name: CompactString,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub virtual_hosts: Vec<VirtualHost>,
}

impl RouteConfiguration {
    /// Picks the virtual host with the most specific domain match for `authority`, along with its position.
    pub fn find_virtual_host(&self, authority: &str) -> Option<(usize, &VirtualHost)> {
        let mut best: Option<(usize, MatchHostScoreLPM)> = None;
        for (index, vh) in self.virtual_hosts.iter().enumerate() {
            let Some(score) = vh.domains.iter().filter_map(|d| d.eval_lpm_host(authority)).max() else {
                continue;
            };
            // on equal scores the first virtual host wins
            if best.as_ref().is_none_or(|(_, best_score)| score > *best_score) {
                best = Some((index, score));
            }
        }
        best.and_then(|(index, _)| self.virtual_hosts.get(index).map(|vh| (index, vh)))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchHost {
    Wildcard,
    Prefix(CompactString),
    Suffix(CompactString),
    Exact(CompactString),
}

impl Serialize for MatchHost {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::Wildcard => serializer.serialize_str("*"),
            Self::Exact(cs) => serializer.serialize_str(cs.as_str()),
            Self::Prefix(cs) => serializer.serialize_str(&format!("{cs}*")),
            Self::Suffix(cs) => serializer.serialize_str(&format!("*{cs}")),
        }
    }
}

impl<'de> Deserialize<'de> for MatchHost {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let cs = CompactString::deserialize(deserializer)?;
        Self::try_from_compact_str(cs).map_err(|e| serde::de::Error::custom(format!("{e}")))
    }
}

impl MatchHost {
    pub fn try_from_compact_str(value: CompactString) -> Result<Self, GenericError> {
        let _ = HeaderValue::from_str(&value)
            .map_err(|_| GenericError::from_msg(format!("failed to parse \"{value}\" as an authority")))?;

        if value == "*" {
            return Ok(Self::Wildcard);
        }

        if value.chars().filter(|c| *c == '*').count() > 1 {
            return Err(GenericError::from_msg("only one wildcard supported at the beginning or at the end"));
        }

        // domains are matched case-insensitively
        let value = value.to_lowercase();

        if let Some(host) = value.strip_prefix('*') {
            return Ok(Self::Suffix(host.into()));
        }

        if let Some(host) = value.strip_suffix('*') {
            return Ok(Self::Prefix(host.into()));
        }

        if value.contains('*') {
            return Err(GenericError::from_msg("only one wildcard supported at the beginning or at the end"));
        }

        Ok(Self::Exact(value))
    }
}

impl TryFrom<&str> for MatchHost {
    type Error = GenericError;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from_compact_str(value.into())
    }
}

impl FromStr for MatchHost {
    type Err = GenericError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s)
    }
}

#[repr(u32)]
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
/// Score given to the call authority matching a domain rule of a virtual host.
///
/// Exact match always gets prioritized over Suffix matches. The integer content
/// represents how many characters of the rule matched the authority.
/// Matching order is derived implicitly from the enum lexicographic order,
/// discriminants are fixed to avoid unwanted reordering.
pub enum MatchHostScoreLPM {
    Wildcard = 0,
    Prefix(usize) = 1,
    Suffix(usize) = 2,
    Exact(usize) = 3,
}

impl MatchHost {
    pub fn eval_lpm_host(&self, host: &str) -> Option<MatchHostScoreLPM> {
        let host = host.to_lowercase();
        let mut host = host.as_str();
        match self {
            Self::Exact(h) => {
                host = host.strip_suffix('.').unwrap_or(host);
                (h == host).then_some(MatchHostScoreLPM::Exact(h.len()))
            },

            // a wildcard never matches the empty string
            Self::Suffix(suffix) => {
                host = host.strip_suffix('.').unwrap_or(host);
                (host.len() > suffix.len() && host.ends_with(suffix.as_str()))
                    .then_some(MatchHostScoreLPM::Suffix(suffix.len()))
            },

            Self::Prefix(prefix) => (host.len() > prefix.len() && host.starts_with(prefix.as_str()))
                .then_some(MatchHostScoreLPM::Prefix(prefix.len())),

            Self::Wildcard => Some(MatchHostScoreLPM::Wildcard),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Default)]
pub struct VirtualHost {
    #[serde(skip_serializing_if = "is_default", default)]
    pub name: CompactString,
    pub domains: Vec<MatchHost>,
    #[serde(skip_serializing_if = "Vec::is_empty", default = "Default::default")]
    pub routes: Vec<Route>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default = "Default::default")]
    pub typed_per_filter_config: HashMap<CompactString, FilterOverride>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Route {
    #[serde(skip_serializing_if = "is_default", default)]
    pub name: CompactString,
    #[serde(rename = "match", default)]
    pub route_match: RouteMatch,
    #[serde(skip_serializing_if = "HashMap::is_empty", default = "Default::default")]
    pub typed_per_filter_config: HashMap<CompactString, FilterOverride>,
    #[serde(flatten)]
    pub action: Action,
}
