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

use super::{CertificateProvider, CertificateProviderStore, IdentityCertificate};
use crate::Result;
use compact_str::CompactString;
use orion_configuration::config::{listener::FilterChainData, transport::CertificateProviderPluginInstance};
use orion_error::Status;
use parking_lot::Mutex;
use rustc_hash::FxHashMap as HashMap;
use rustls::{server::WebPkiClientVerifier, RootCertStore, ServerConfig};
use std::sync::Arc;
use tracing::debug;

/// One certificate provider instance together with the certificate it is asked for.
#[derive(Debug, Clone)]
pub struct BoundCertificateProvider {
    pub provider: Arc<dyn CertificateProvider>,
    pub certificate_name: CompactString,
}

/// TLS material of a single filter chain: where root and identity certificates come from and whether peers have to
/// present a certificate.
#[derive(Debug)]
pub struct FilterChainCertificateProvider {
    pub root: Option<BoundCertificateProvider>,
    pub identity: Option<BoundCertificateProvider>,
    pub require_client_certificate: bool,
    built: Mutex<Option<BuiltServerConfig>>,
}

/// A server config and the certificates it was built from.
#[derive(Debug)]
struct BuiltServerConfig {
    identity: Arc<IdentityCertificate>,
    roots: Option<Arc<RootCertStore>>,
    config: Arc<ServerConfig>,
}

impl BuiltServerConfig {
    fn built_from(&self, identity: &Arc<IdentityCertificate>, roots: Option<&Arc<RootCertStore>>) -> bool {
        Arc::ptr_eq(&self.identity, identity)
            && match (&self.roots, roots) {
                (Some(cached), Some(current)) => Arc::ptr_eq(cached, current),
                (None, None) => true,
                _ => false,
            }
    }
}

impl FilterChainCertificateProvider {
    pub fn new(
        root: Option<BoundCertificateProvider>,
        identity: Option<BoundCertificateProvider>,
        require_client_certificate: bool,
    ) -> Self {
        Self { root, identity, require_client_certificate, built: Mutex::new(None) }
    }

    /// Server config for the certificates the providers currently serve. It is rebuilt only when the providers hand
    /// out different certificates than last time.
    ///
    /// Providers may read files, call this from a blocking context.
    pub fn server_config(&self) -> Result<Arc<ServerConfig>> {
        let Some(identity) = &self.identity else {
            return Err("no identity certificate provider configured".into());
        };
        let identity = identity.provider.identity_certificate(&identity.certificate_name)?;
        let roots = self.root.as_ref().map(|root| root.provider.root_certificates(&root.certificate_name)).transpose()?;

        let mut built = self.built.lock();
        if let Some(built) = built.as_ref().filter(|built| built.built_from(&identity, roots.as_ref())) {
            return Ok(Arc::clone(&built.config));
        }
        let config = Arc::new(self.build(&identity, roots.clone())?);
        debug!("built tls server config");
        *built = Some(BuiltServerConfig { identity, roots, config: Arc::clone(&config) });
        Ok(config)
    }

    fn build(&self, identity: &IdentityCertificate, roots: Option<Arc<RootCertStore>>) -> Result<ServerConfig> {
        let builder = ServerConfig::builder();
        let verifier = match (self.require_client_certificate, roots) {
            (true, None) => {
                return Err("require_client_certificate is true but no root certificate provider is configured".into())
            },
            (true, Some(roots)) => Some(WebPkiClientVerifier::builder(roots).build()?),
            (false, Some(roots)) => Some(WebPkiClientVerifier::builder(roots).allow_unauthenticated().build()?),
            (false, None) => None,
        };
        let builder = if let Some(verifier) = verifier {
            builder.with_client_cert_verifier(verifier)
        } else {
            builder.with_no_client_auth()
        };
        let mut config = builder.with_single_cert(identity.certs.clone(), identity.key.clone_key())?;
        config.alpn_protocols = vec![b"h2".to_vec()];
        Ok(config)
    }
}

struct CacheEntry {
    // keeps the allocation the key was taken from alive
    _filter_chain: Arc<FilterChainData>,
    provider: Arc<FilterChainCertificateProvider>,
}

/// Per resolver cache of certificate providers, keyed by filter chain identity rather than content.
///
/// Entries live as long as the cache, there is no eviction.
pub struct CertificateProviderCache {
    store: Arc<CertificateProviderStore>,
    entries: Mutex<HashMap<usize, CacheEntry>>,
}

impl CertificateProviderCache {
    pub fn new(store: Arc<CertificateProviderStore>) -> Self {
        Self { store, entries: Mutex::default() }
    }

    pub fn get_or_create(
        &self,
        filter_chain: &Arc<FilterChainData>,
    ) -> std::result::Result<Arc<FilterChainCertificateProvider>, Status> {
        let key = Arc::as_ptr(filter_chain) as usize;
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(&key) {
            return Ok(Arc::clone(&entry.provider));
        }
        let bind = |instance: Option<&CertificateProviderPluginInstance>| {
            instance
                .map(|instance| {
                    self.store.get_provider(&instance.instance_name).map(|provider| BoundCertificateProvider {
                        provider,
                        certificate_name: instance.certificate_name.clone(),
                    })
                })
                .transpose()
        };
        let tls = filter_chain.downstream_tls_context.as_ref();
        let provider = Arc::new(FilterChainCertificateProvider::new(
            bind(tls.and_then(|tls| tls.common_tls_context.root_provider()))?,
            bind(tls.and_then(|tls| tls.common_tls_context.identity_provider()))?,
            tls.is_some_and(|tls| tls.require_client_certificate),
        ));
        debug!(filter_chain = %filter_chain.name, "created certificate provider for filter chain");
        entries.insert(key, CacheEntry { _filter_chain: Arc::clone(filter_chain), provider: Arc::clone(&provider) });
        Ok(provider)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orion_configuration::config::listener::FilterChain;
    use orion_error::StatusCode;
    use rustls::pki_types::PrivatePkcs8KeyDer;

    #[derive(Debug)]
    struct Empty;

    impl CertificateProvider for Empty {
        fn root_certificates(&self, _: &str) -> Result<Arc<RootCertStore>> {
            Ok(Arc::new(RootCertStore::empty()))
        }
        fn identity_certificate(&self, _: &str) -> Result<Arc<IdentityCertificate>> {
            Err("no identity".into())
        }
    }

    fn chain(instance_name: &str) -> Arc<FilterChainData> {
        let chain: FilterChain = serde_yaml::from_str(&format!(
            r#"
name: secure
http_connection_manager:
  http_filters: [ {{ name: router, filter_type: router }} ]
  route_specifier: {{ route_config_name: routes }}
tls_context:
  require_client_certificate: true
  common_tls_context:
    tls_certificate_provider_instance: {{ instance_name: {instance_name}, certificate_name: identity }}
    validation_context:
      ca_certificate_provider_instance: {{ instance_name: {instance_name}, certificate_name: roots }}
"#
        ))
        .unwrap();
        Arc::new(FilterChainData::try_from(chain).unwrap())
    }

    fn cache() -> CertificateProviderCache {
        let store = CertificateProviderStore::default();
        store.register("known", Arc::new(Empty));
        CertificateProviderCache::new(Arc::new(store))
    }

    #[test]
    fn same_chain_same_handle() {
        let cache = cache();
        let chain = chain("known");
        let first = cache.get_or_create(&chain).unwrap();
        let second = cache.get_or_create(&chain).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.require_client_certificate);
        assert_eq!(first.identity.as_ref().map(|i| i.certificate_name.as_str()), Some("identity"));
        assert_eq!(first.root.as_ref().map(|r| r.certificate_name.as_str()), Some("roots"));
    }

    #[test]
    fn equal_content_different_identity() {
        let cache = cache();
        let (a, b) = (chain("known"), chain("known"));
        assert_eq!(a, b);
        let first = cache.get_or_create(&a).unwrap();
        let second = cache.get_or_create(&b).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn unknown_instance_is_not_cached() {
        let cache = cache();
        let err = cache.get_or_create(&chain("unknown")).unwrap_err();
        assert_eq!(err.code(), StatusCode::NotFound);
        assert_eq!(err.message(), "Certificate provider instance name: \"unknown\" not recognized.");
        assert!(cache.is_empty());
    }

    #[derive(Debug)]
    struct Rotating(Mutex<Arc<IdentityCertificate>>);

    impl Rotating {
        fn self_signed() -> Arc<IdentityCertificate> {
            let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()]).unwrap();
            Arc::new(IdentityCertificate {
                certs: vec![generated.cert.der().clone()],
                key: PrivatePkcs8KeyDer::from(generated.key_pair.serialize_der()).into(),
            })
        }

        fn rotate(&self) {
            *self.0.lock() = Self::self_signed();
        }
    }

    impl CertificateProvider for Rotating {
        fn root_certificates(&self, _: &str) -> Result<Arc<RootCertStore>> {
            Err("no roots".into())
        }
        fn identity_certificate(&self, _: &str) -> Result<Arc<IdentityCertificate>> {
            Ok(Arc::clone(&self.0.lock()))
        }
    }

    #[test]
    fn server_config_is_rebuilt_only_for_new_certificates() {
        let rotating = Arc::new(Rotating(Mutex::new(Rotating::self_signed())));
        let identity = BoundCertificateProvider {
            provider: Arc::clone(&rotating) as Arc<dyn CertificateProvider>,
            certificate_name: "identity".into(),
        };
        let provider = FilterChainCertificateProvider::new(None, Some(identity), false);

        let first = provider.server_config().unwrap();
        let second = provider.server_config().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.alpn_protocols, vec![b"h2".to_vec()]);

        rotating.rotate();
        let rotated = provider.server_config().unwrap();
        assert!(!Arc::ptr_eq(&first, &rotated));
        assert!(Arc::ptr_eq(&rotated, &provider.server_config().unwrap()));
    }

    #[test]
    fn server_config_needs_identity() {
        let cache = cache();
        let provider = cache.get_or_create(&chain("known")).unwrap();
        assert!(provider.server_config().is_err());
    }
}
