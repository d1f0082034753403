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

use orion_configuration::config::Runtime as RuntimeConfig;
use orion_error::ResultExtension;
use orion_lib::Result;
use tokio::runtime::{Builder, Runtime};
use tracing::info;

/// A single configured cpu gets a current thread runtime, anything above a multi thread one.
pub fn build_tokio_runtime(thread_name: &str, config: &RuntimeConfig) -> Result<Runtime> {
    let num_threads = config.num_cpus();
    let mut builder = if num_threads <= 1 {
        Builder::new_current_thread()
    } else {
        let mut builder = Builder::new_multi_thread();
        builder.worker_threads(num_threads).max_blocking_threads(num_threads);
        builder
    };
    builder.enable_all();

    config.global_queue_interval.map(|val| builder.global_queue_interval(val.into()));
    config.event_interval.map(|val| builder.event_interval(val));
    config.max_io_events_per_tick.map(|val| builder.max_io_events_per_tick(val.into()));

    info!("{thread_name}: building runtime with {num_threads} threads");
    builder.thread_name(thread_name).build().context("failed to build tokio runtime")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;

    #[test]
    fn runtimes_follow_the_cpu_count() {
        for num_cpus in [1, 2] {
            let config = RuntimeConfig {
                num_cpus: NonZeroUsize::new(num_cpus).unwrap(),
                event_interval: Some(31),
                ..RuntimeConfig::default()
            };
            let runtime = build_tokio_runtime("test", &config).unwrap();
            assert_eq!(runtime.block_on(async { 40 + 2 }), 42);
        }
    }
}
