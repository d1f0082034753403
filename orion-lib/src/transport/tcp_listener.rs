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

use super::{AsyncStream, ServingTransport};
use crate::{
    listeners::{ChannelConfigOverlay, ConnectionConfigResolver, ConnectionEndpoints},
    Result,
};
use abort_on_drop::ChildTask;
use parking_lot::Mutex;
use rustls::server::Acceptor;
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, TcpSocket, TcpStream},
    runtime::Handle,
    sync::{mpsc, watch},
};
use tracing::{debug, info, warn};

/// A connection that made it through filter chain selection and, when the chain asks for it, the TLS handshake.
pub struct AcceptedConnection {
    pub stream: AsyncStream,
    pub local_address: SocketAddr,
    pub peer_address: SocketAddr,
    pub config: ChannelConfigOverlay,
}

struct Listening {
    local_address: SocketAddr,
    _task: ChildTask<()>,
}

/// Accepts TCP connections and hands the configured ones to a consumer.
pub struct TcpServingTransport {
    address: SocketAddr,
    resolver: watch::Sender<Option<Arc<ConnectionConfigResolver>>>,
    connections: mpsc::Sender<AcceptedConnection>,
    listening: Mutex<Option<Listening>>,
}

impl TcpServingTransport {
    pub fn new(address: SocketAddr, connections: mpsc::Sender<AcceptedConnection>) -> Arc<Self> {
        Arc::new(Self { address, resolver: watch::channel(None).0, connections, listening: Mutex::new(None) })
    }

    /// Address the listening socket is bound to, `None` when not serving.
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.listening.lock().as_ref().map(|listening| listening.local_address)
    }

    fn listen(&self) -> Result<Listening> {
        let handle = Handle::try_current()?;
        let _guard = handle.enter();
        let listener = configure_and_start_tcp_listener(self.address)?;
        let local_address = listener.local_addr()?;
        let task = handle.spawn(accept_connections(listener, self.resolver.subscribe(), self.connections.clone()));
        Ok(Listening { local_address, _task: task.into() })
    }
}

impl ServingTransport for TcpServingTransport {
    fn start_serving(&self) {
        let mut listening = self.listening.lock();
        if listening.is_some() {
            return;
        }
        match self.listen() {
            Ok(started) => {
                info!("serving on {}", started.local_address);
                *listening = Some(started);
            },
            Err(e) => warn!("failed to listen on {}: {e}", self.address),
        }
    }

    fn stop_serving(&self) {
        if let Some(stopped) = self.listening.lock().take() {
            info!("stopped serving on {}", stopped.local_address);
        }
    }

    fn update_config(&self, resolver: Arc<ConnectionConfigResolver>) {
        debug!("{}: new configuration for listener {}", self.address, resolver.listener_name());
        self.resolver.send_replace(Some(resolver));
    }
}

fn configure_and_start_tcp_listener(addr: SocketAddr) -> Result<TcpListener> {
    let socket = if addr.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
    socket.set_reuseaddr(true)?;
    socket.set_keepalive(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(128)?)
}

async fn accept_connections(
    listener: TcpListener,
    current: watch::Receiver<Option<Arc<ConnectionConfigResolver>>>,
    connections: mpsc::Sender<AcceptedConnection>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer_address)) => {
                let Some(resolver) = current.borrow().clone() else {
                    debug!("no configuration yet, closing connection from {peer_address}");
                    continue;
                };
                let connections = connections.clone();
                // spawn right away, a slow TLS client must not hold up accepting
                tokio::spawn(async move {
                    if let Err(e) = configure_connection(resolver, stream, peer_address, connections).await {
                        debug!("connection from {peer_address} closed: {e}");
                    }
                });
            },
            Err(e) => warn!("failed to accept tcp connection: {e}"),
        }
    }
}

async fn configure_connection(
    resolver: Arc<ConnectionConfigResolver>,
    stream: TcpStream,
    peer_address: SocketAddr,
    connections: mpsc::Sender<AcceptedConnection>,
) -> Result<()> {
    let local_address = stream.local_addr()?;
    let config = match resolver.resolve(&ConnectionEndpoints::new(local_address, peer_address)) {
        Ok(config) => config,
        Err(status) => {
            // dropping the stream closes the connection
            return Err(format!("rejected: {}", status.message()).into());
        },
    };
    debug!("mapping connection from {peer_address} to filter chain {}", config.filter_chain.name);
    let stream: AsyncStream = match &config.certificate_provider {
        Some(certificate_provider) => {
            let certificate_provider = Arc::clone(certificate_provider);
            let server_config = tokio::task::spawn_blocking(move || certificate_provider.server_config())
                .await
                .map_err(|e| format!("can't load certificates: {e}"))??;
            let acceptor = tokio_rustls::LazyConfigAcceptor::new(Acceptor::default(), stream);
            tokio::pin!(acceptor);
            let accepted = acceptor.as_mut().await.map_err(|e| format!("can't start tls: {e}"))?;
            debug!("tls server_name {}", accepted.client_hello().server_name().unwrap_or("none"));
            Box::new(accepted.into_stream(server_config).await.map_err(|e| format!("tls handshake failed: {e}"))?)
        },
        None => Box::new(stream),
    };
    connections
        .send(AcceptedConnection { stream, local_address, peer_address, config })
        .await
        .map_err(|_| "nobody is taking accepted connections anymore")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        listeners::{test_support::*, CallMetadata, ResolverReadyObserver},
        secrets::CertificateProviderStore,
        xds::XdsClient,
    };
    use std::{sync::Weak, time::Duration};
    use tokio::io::AsyncReadExt;

    struct NoObserver;

    impl ResolverReadyObserver for NoObserver {
        fn on_resolver_ready(&self, _: Arc<ConnectionConfigResolver>) {}
    }

    fn resolver(chains: &[String]) -> Arc<ConnectionConfigResolver> {
        ConnectionConfigResolver::new(
            &listener_update(chains, None),
            Arc::new(FakeXdsClient::default()) as Arc<dyn XdsClient>,
            Arc::new(CertificateProviderStore::default()),
            Weak::<NoObserver>::new() as Weak<dyn ResolverReadyObserver>,
        )
    }

    #[tokio::test]
    async fn accepted_connections_carry_their_configuration() {
        let (sender, mut receiver) = mpsc::channel(4);
        let transport = TcpServingTransport::new("127.0.0.1:0".parse().unwrap(), sender);
        transport.update_config(resolver(&[chain_yaml("local", "{ prefix_ranges: [127.0.0.0/8] }", None)]));
        transport.start_serving();
        let address = transport.local_address().unwrap();

        let _client = TcpStream::connect(address).await.unwrap();
        let accepted = tokio::time::timeout(Duration::from_secs(5), receiver.recv()).await.unwrap().unwrap();
        assert_eq!(accepted.config.filter_chain.name, "local");
        assert_eq!(accepted.local_address, address);
        assert!(accepted.config.get_call_config(&CallMetadata::new("/s/m", "localhost")).is_ok());

        transport.stop_serving();
        assert!(transport.local_address().is_none());
    }

    #[tokio::test]
    async fn unmatched_connections_are_closed() {
        let (sender, mut receiver) = mpsc::channel(4);
        let transport = TcpServingTransport::new("127.0.0.1:0".parse().unwrap(), sender);
        transport.update_config(resolver(&[chain_yaml("remote", "{ prefix_ranges: [10.0.0.0/8] }", None)]));
        transport.start_serving();

        let mut client = TcpStream::connect(transport.local_address().unwrap()).await.unwrap();
        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf)).await.unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
        assert!(receiver.try_recv().is_err());
    }
}
