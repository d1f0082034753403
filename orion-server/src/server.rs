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

use crate::runtime;
use orion_configuration::config::{Bootstrap, Runtime as RuntimeConfig};
use orion_error::{ResultExtension, Status};
use orion_lib::{
    AcceptedConnection, CertificateProviderStore, InMemoryXdsClient, Result, ServerConfigFetcher,
    ServingStatusNotifier, TcpServingTransport, XdsClient,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const CONNECTION_BACKLOG: usize = 128;

struct LoggingNotifier;

impl ServingStatusNotifier for LoggingNotifier {
    fn on_serving_status_update(&self, listening_address: SocketAddr, status: &Status) {
        if status.is_ok() {
            info!("serving on {listening_address}");
        } else {
            warn!("not serving on {listening_address}: {status}");
        }
    }
}

pub fn run_server(runtime_config: &RuntimeConfig, bootstrap: Bootstrap) -> Result<()> {
    let runtime = runtime::build_tokio_runtime("orion", runtime_config)?;
    runtime.block_on(async {
        tokio::select! {
            result = serve(bootstrap) => result,
            result = tokio::signal::ctrl_c() => {
                info!("CTRL+C caught, shutting down");
                result.context("failed to listen for CTRL+C")
            }
        }
    })
}

async fn serve(bootstrap: Bootstrap) -> Result<()> {
    if bootstrap.servers.is_empty() {
        return Err("no server addresses configured".into());
    }
    if let Some(node) = &bootstrap.node {
        info!("starting as node {}", node.id);
    }
    let certificate_providers = Arc::new(CertificateProviderStore::new(bootstrap.certificate_providers.clone()));
    let xds_client = InMemoryXdsClient::with_static_resources(&bootstrap.static_resources)
        .context("failed to load static resources")?;
    let fetcher = ServerConfigFetcher::new(
        xds_client as Arc<dyn XdsClient>,
        bootstrap.server_listener_resource_name_template.clone(),
        certificate_providers,
        Some(Arc::new(LoggingNotifier)),
    )?;

    let (connections, accepted) = mpsc::channel(CONNECTION_BACKLOG);
    for &address in &bootstrap.servers {
        let transport = TcpServingTransport::new(address, connections.clone());
        fetcher.start_watch(address, transport)?;
    }
    drop(connections);

    // the fetcher and its watches live as long as connections are being taken
    log_connections(accepted).await;
    Ok(())
}

async fn log_connections(mut accepted: mpsc::Receiver<AcceptedConnection>) {
    while let Some(connection) = accepted.recv().await {
        let AcceptedConnection { local_address, peer_address, config, .. } = &connection;
        info!(
            listener = config.resolver.listener_name(),
            filter_chain = %config.filter_chain.name,
            tls = config.certificate_provider.is_some(),
            "accepted connection {peer_address} -> {local_address}"
        );
        debug!("http filters: {:?}", config.http_filters.iter().map(|filter| &filter.name).collect::<Vec<_>>());
    }
}
