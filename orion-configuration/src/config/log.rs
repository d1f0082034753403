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

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct Log {
    #[serde(with = "env_filter", skip_serializing_if = "Option::is_none", default)]
    pub log_level: Option<EnvFilter>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub log_directory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub log_file: Option<String>,
}

// EnvFilter has neither PartialEq nor Clone, compare the directives it renders to instead
impl PartialEq for Log {
    fn eq(&self, other: &Self) -> bool {
        let level = |log: &Self| log.log_level.as_ref().map(EnvFilter::to_string);
        self.log_file == other.log_file && self.log_directory == other.log_directory && level(self) == level(other)
    }
}
impl Eq for Log {}

mod env_filter {
    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};
    use tracing_subscriber::EnvFilter;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<EnvFilter>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|directives| {
                EnvFilter::builder()
                    .parse(&directives)
                    .map_err(|e| D::Error::custom(format!("failed to deserialize log level \"{directives}\": {e}")))
            })
            .transpose()
    }

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<EnvFilter>, serializer: S) -> Result<S::Ok, S::Error> {
        value.as_ref().map(EnvFilter::to_string).serialize(serializer)
    }
}
