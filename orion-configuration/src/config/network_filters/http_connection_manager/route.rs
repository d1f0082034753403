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

use super::header_matcher::HeaderMatcher;
use crate::config::{common::*, core::CaseSensitive};
use compact_str::CompactString;
use http::HeaderMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Route(RouteAction),
    NonForwardingAction(NonForwardingAction),
}

impl Action {
    /// Servers only accept routes that terminate the call locally.
    pub fn is_non_forwarding(&self) -> bool {
        matches!(self, Self::NonForwardingAction(_))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RouteAction {
    pub cluster: CompactString,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct NonForwardingAction {}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RouteMatch {
    #[serde(flatten)]
    #[serde(skip_serializing_if = "Option::is_none", default = "Default::default")]
    pub path_matcher: Option<PathMatcher>,
    #[serde(skip_serializing_if = "Vec::is_empty", default = "Default::default")]
    pub headers: Vec<HeaderMatcher>,
}

impl Default for RouteMatch {
    fn default() -> Self {
        Self {
            path_matcher: Some(PathMatcher { specifier: PathSpecifier::Prefix("".into()), ignore_case: false }),
            headers: Vec::new(),
        }
    }
}

impl RouteMatch {
    pub fn matches(&self, path: &str, headers: &HeaderMap) -> bool {
        //short circuit if path match fails
        self.path_matcher.as_ref().is_none_or(|matcher| matcher.matches(path))
            && self.headers.iter().all(|matcher| matcher.call_matches(path, headers))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PathMatcher {
    #[serde(flatten)]
    pub specifier: PathSpecifier,
    #[serde(skip_serializing_if = "std::ops::Not::not", default = "Default::default")]
    pub ignore_case: bool,
}

impl PathMatcher {
    pub fn matches(&self, path: &str) -> bool {
        let case_matcher = CaseSensitive(!self.ignore_case, path);
        match &self.specifier {
            PathSpecifier::Exact(s) => case_matcher.equals(s),
            PathSpecifier::Prefix(p) => case_matcher.starts_with(p),
            PathSpecifier::PathSeparatedPrefix(psp) => {
                case_matcher.equals(psp) || case_matcher.starts_with(&format!("{psp}/"))
            },
            PathSpecifier::Regex(r) => r.matches_full(path),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathSpecifier {
    Prefix(CompactString),
    Exact(CompactString),
    Regex(#[serde(with = "serde_regex")] Regex),
    PathSeparatedPrefix(CompactString),
}

impl PartialEq for PathSpecifier {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Regex(r1), Self::Regex(r2)) => r1.as_str().eq(r2.as_str()),
            (Self::Prefix(s1), Self::Prefix(s2))
            | (Self::Exact(s1), Self::Exact(s2))
            | (Self::PathSeparatedPrefix(s1), Self::PathSeparatedPrefix(s2)) => s1.eq(s2),
            _ => false,
        }
    }
}

impl Eq for PathSpecifier {}
