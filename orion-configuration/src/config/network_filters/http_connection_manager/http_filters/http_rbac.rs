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

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// RBAC settings of an http filter. An empty config leaves calls unrestricted.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct HttpRbac {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rules: Option<RbacRules>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RbacRules {
    pub action: RbacAction,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub policies: BTreeMap<CompactString, Value>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RbacAction {
    Allow,
    Deny,
    Log,
}

impl RbacAction {
    fn as_json_code(self) -> i64 {
        match self {
            Self::Allow => 0,
            Self::Deny => 1,
            Self::Log => 2,
        }
    }
}

impl HttpRbac {
    /// The `rbacPolicy` entry handed to the rbac filter through the method config.
    pub fn policy_json(&self) -> Value {
        match &self.rules {
            // logging only is the same as having no rbac at all
            None | Some(RbacRules { action: RbacAction::Log, .. }) => Value::Object(Map::new()),
            Some(RbacRules { action, policies }) => {
                let mut rules = Map::new();
                rules.insert("action".into(), json!(action.as_json_code()));
                if !policies.is_empty() {
                    let policies = policies.iter().map(|(name, policy)| (name.to_string(), policy.clone())).collect();
                    rules.insert("policies".into(), Value::Object(policies));
                }
                json!({ "rules": rules })
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_json() {
        assert_eq!(HttpRbac::default().policy_json(), json!({}));
        let log: HttpRbac = serde_yaml::from_str("rules: { action: LOG }").unwrap();
        assert_eq!(log.policy_json(), json!({}));
        let allow: HttpRbac = serde_yaml::from_str(
            r#"
rules:
  action: ALLOW
  policies:
    allow-admin:
      permissions: [ { any: true } ]
      principals: [ { authenticated: { principal_name: { exact: admin } } } ]
"#,
        )
        .unwrap();
        assert_eq!(
            allow.policy_json(),
            json!({
                "rules": {
                    "action": 0,
                    "policies": {
                        "allow-admin": {
                            "permissions": [ { "any": true } ],
                            "principals": [ { "authenticated": { "principal_name": { "exact": "admin" } } } ]
                        }
                    }
                }
            })
        );
    }
}
