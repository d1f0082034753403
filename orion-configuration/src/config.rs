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

pub mod bootstrap;
pub use bootstrap::Bootstrap;
pub mod certificate_provider;
pub mod common;
pub mod core;
pub mod listener;
pub use listener::{ListenerResource, ListenerUpdate};
pub mod log;
pub use log::Log;
pub mod network_filters;
pub mod runtime;
pub use runtime::Runtime;
pub mod transport;

pub use crate::config::common::*;
use crate::{options::Options, Result};
use orion_error::ResultExtension;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{fs::File, path::Path};

#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct Config {
    #[serde(skip_serializing_if = "is_default", default)]
    pub runtime: Runtime,
    #[serde(skip_serializing_if = "is_default", default)]
    pub logging: Log,
    #[serde(skip_serializing_if = "is_default", default)]
    pub bootstrap: Bootstrap,
}

impl Config {
    fn apply_options(self, opt: &Options) -> Self {
        let runtime = self.runtime.update_from_env_and_options(opt);
        let max_cpus = num_cpus::get();
        if runtime.num_cpus() > max_cpus {
            let requested = runtime.num_cpus();
            tracing::warn!(max_cpus, ORION_SERVER_CORES = requested, "Requested more cores than available CPUs");
        }
        Self { runtime, ..self }
    }

    pub fn new(opt: &Options) -> Result<Self> {
        let path = &opt.config_files.config;
        let config: Self =
            deserialize_yaml(path).with_context(|| format!("failed to read config from \"{}\"", path.display()))?;
        config.bootstrap.validate().context("invalid bootstrap")?;
        Ok(config.apply_options(opt))
    }
}

pub fn deserialize_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    serde_path_to_error::deserialize(serde_yaml::Deserializer::from_reader(&file)).map_err(crate::Error::from)
}
