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
use std::{
    env::var,
    num::{NonZeroU32, NonZeroUsize},
};

use crate::options::Options;

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone)]
pub struct Runtime {
    #[serde(default = "available_cpus")]
    pub num_cpus: NonZeroUsize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub global_queue_interval: Option<NonZeroU32>,
    //may be zero?
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub event_interval: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max_io_events_per_tick: Option<NonZeroUsize>,
}

fn env_override<T: std::str::FromStr>(name: &str) -> Option<T> {
    var(name).ok().and_then(|v| v.parse::<T>().ok())
}

impl Runtime {
    /// Environment variables take precedence over command line options, which take precedence over the file.
    #[must_use]
    pub fn update_from_env_and_options(self, opt: &Options) -> Self {
        Runtime {
            num_cpus: env_override("ORION_SERVER_CORES").or(opt.num_cpus).unwrap_or(self.num_cpus),
            global_queue_interval: env_override("ORION_RT_GLOBAL_QUEUE_INTERVAL")
                .or(opt.global_queue_interval)
                .or(self.global_queue_interval),
            event_interval: env_override("ORION_RT_EVENT_INTERVAL").or(opt.event_interval).or(self.event_interval),
            max_io_events_per_tick: env_override("ORION_RT_MAX_IO_EVENT_PER_TICK")
                .or(opt.max_io_events_per_tick)
                .or(self.max_io_events_per_tick),
        }
    }

    pub fn num_cpus(&self) -> usize {
        self.num_cpus.get()
    }
}

pub(crate) fn available_cpus() -> NonZeroUsize {
    NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::MIN)
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            num_cpus: available_cpus(),
            global_queue_interval: None,
            event_interval: None,
            max_io_events_per_tick: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_override_file_values() {
        let mut options = Options::from_path("unused.yaml");
        options.event_interval = Some(7);
        let runtime = Runtime { event_interval: Some(61), ..Runtime::default() }.update_from_env_and_options(&options);
        assert_eq!(runtime.event_interval, Some(7));
        assert!(runtime.num_cpus() >= 1);
    }
}
