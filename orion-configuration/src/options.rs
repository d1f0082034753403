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

use std::{
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
};

use clap::Parser;

#[derive(Debug, Clone, clap::Args)]
pub struct ConfigFiles {
    #[arg(help = "Configuration file", short = 'c', long = "config", env = "ORION_SERVER_CONFIG")]
    pub config: PathBuf,
}

#[derive(Parser, Debug, Clone)]
#[command(about = "Serves listeners resolved from xDS listener and route resources")]
pub struct Options {
    #[clap(flatten)]
    pub config_files: ConfigFiles,
    #[arg(help = "Number of CPU to use", short = 'C', long = "num-cpus")]
    pub num_cpus: Option<NonZeroUsize>,
    #[arg(help = "Tokio global queue interval (ticks)", long = "global-queue-interval")]
    pub global_queue_interval: Option<NonZeroU32>,
    #[arg(help = "Tokio event interval (ticks)", long = "event-interval")]
    pub event_interval: Option<u32>,
    #[arg(help = "Tokio max. io events per ticks", long = "max-io-events-per-tick")]
    pub max_io_events_per_tick: Option<NonZeroUsize>,
}

impl Options {
    pub fn parse_options() -> Self {
        Options::parse()
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_files: ConfigFiles { config: path.into() },
            num_cpus: None,
            global_queue_interval: None,
            event_interval: None,
            max_io_events_per_tick: None,
        }
    }
}
