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

mod config_fetcher;
mod config_resolver;
mod filter_chain_match;
mod listener_supervisor;
mod route_selector;
mod selector_provider;
#[cfg(test)]
pub(crate) mod test_support;

pub use config_fetcher::ServerConfigFetcher;
pub use config_resolver::{ChannelConfigOverlay, ConnectionConfigResolver, ResolverReadyObserver};
pub use filter_chain_match::{select_filter_chain, ConnectionEndpoints, EndpointAddress};
pub use listener_supervisor::ListenerUpdateSupervisor;
pub use route_selector::{CallConfig, CallMetadata, ServerConfigSelector, ServiceConfig};
pub use selector_provider::{DynamicSelector, RouteConfigOutcome, ServerConfigSelectorProvider};
