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

//! Resolution of xDS listener and route configuration into per-connection and per-call configuration for a
//! server.

pub mod listeners;
pub mod secrets;
pub mod transport;
pub mod xds;

pub use listeners::{
    CallConfig, CallMetadata, ChannelConfigOverlay, ConnectionConfigResolver, ConnectionEndpoints,
    ListenerUpdateSupervisor, ServerConfigFetcher, ServerConfigSelectorProvider,
};
pub use secrets::CertificateProviderStore;
pub use transport::{AcceptedConnection, ServingStatusNotifier, ServingTransport, TcpServingTransport};
pub use xds::{InMemoryXdsClient, XdsClient};

pub type Error = orion_error::Error;
pub type Result<T> = ::core::result::Result<T, Error>;

/// Renders `err` followed by each of its sources, separated by `": "`.
pub(crate) fn format_error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    for source in std::iter::successors(err.source(), |&e| e.source()) {
        message.push_str(": ");
        message.push_str(&source.to_string());
    }
    message
}
