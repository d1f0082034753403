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

pub mod http_rbac;
use http_rbac::HttpRbac;

use crate::config::common::*;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "filter_type", content = "filter_settings")]
pub enum FilterOverride {
    Rbac(HttpRbac),
}

impl FilterOverride {
    fn kind(&self) -> &'static str {
        match self {
            Self::Rbac(_) => "rbac",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct HttpFilter {
    pub name: CompactString,
    #[serde(flatten)]
    pub filter: HttpFilterType,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "filter_type", content = "filter_settings")]
pub enum HttpFilterType {
    Rbac(HttpRbac),
    Router,
}

/// One `"<field>": <value>` contribution of a filter to the method config of a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodConfigEntry {
    pub field: &'static str,
    pub value: serde_json::Value,
}

impl HttpFilterType {
    fn kind(&self) -> &'static str {
        match self {
            Self::Rbac(_) => "rbac",
            Self::Router => "router",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Router)
    }
}

impl HttpFilter {
    /// Computes what this filter adds to the method config of a route, using `filter_override` in place of the
    /// connection manager level settings when present.
    ///
    /// The router filter doesn't contribute anything.
    pub fn method_config_entry(
        &self,
        filter_override: Option<&FilterOverride>,
    ) -> Result<Option<MethodConfigEntry>, GenericError> {
        match (&self.filter, filter_override) {
            (HttpFilterType::Rbac(_), Some(FilterOverride::Rbac(rbac))) | (HttpFilterType::Rbac(rbac), None) => {
                Ok(Some(MethodConfigEntry { field: "rbacPolicy", value: rbac.policy_json() }))
            },
            (HttpFilterType::Router, None) => Ok(None),
            (filter, Some(filter_override)) => Err(GenericError::from_msg(format!(
                "filter override of type {} does not apply to filter of type {}",
                filter_override.kind(),
                filter.kind()
            ))
            .with_name(self.name.to_string())),
        }
    }
}
