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

//! Certificate provider instances declared in the bootstrap and referenced by name from TLS contexts.

use crate::config::core::DataSource;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "plugin_name", content = "config", rename_all = "snake_case")]
pub enum CertificateProviderPluginConfig {
    FileWatcher(FileWatcherConfig),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct FileWatcherConfig {
    #[serde(with = "serde_yaml::with::singleton_map", skip_serializing_if = "Option::is_none", default)]
    pub certificate_file: Option<DataSource>,
    #[serde(with = "serde_yaml::with::singleton_map", skip_serializing_if = "Option::is_none", default)]
    pub private_key_file: Option<DataSource>,
    #[serde(with = "serde_yaml::with::singleton_map", skip_serializing_if = "Option::is_none", default)]
    pub ca_certificate_file: Option<DataSource>,
    #[serde(with = "humantime_serde", default = "default_refresh_interval")]
    pub refresh_interval: Duration,
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(600)
}

impl FileWatcherConfig {
    pub fn provides_identity(&self) -> bool {
        self.certificate_file.is_some() && self.private_key_file.is_some()
    }

    pub fn provides_root(&self) -> bool {
        self.ca_certificate_file.is_some()
    }
}
