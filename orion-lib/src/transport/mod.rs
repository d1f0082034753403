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

mod tcp_listener;

pub use tcp_listener::{AcceptedConnection, TcpServingTransport};

use crate::listeners::ConnectionConfigResolver;
use orion_error::Status;
use std::{net::SocketAddr, sync::Arc};
use tokio::io::{AsyncRead, AsyncWrite};

pub trait AsyncReadWrite: AsyncRead + AsyncWrite + Send + Sync + Unpin {}
impl<T> AsyncReadWrite for T where T: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

pub type AsyncStream = Box<dyn AsyncReadWrite>;

/// The part of a server that accepts connections on one listening address.
pub trait ServingTransport: Send + Sync {
    fn start_serving(&self);
    /// Stops accepting. Connections already accepted are left alone.
    fn stop_serving(&self);
    /// Connections accepted from now on are configured by `resolver`.
    fn update_config(&self, resolver: Arc<ConnectionConfigResolver>);
}

/// Observer of whether a listening address is serving. `status` is OK while serving.
pub trait ServingStatusNotifier: Send + Sync {
    fn on_serving_status_update(&self, listening_address: SocketAddr, status: &Status);
}
