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

use crate::Result;
use compact_str::CompactString;
use orion_configuration::config::{
    certificate_provider::{CertificateProviderPluginConfig, FileWatcherConfig},
    core::DataSource,
};
use orion_error::{ResultExtension, Status};
use parking_lot::Mutex;
use rustc_hash::FxHashMap as HashMap;
use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer},
    RootCertStore,
};
use rustls_pemfile::{certs, private_key};
use std::{
    collections::BTreeMap,
    fmt::Debug,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

/// Source of TLS material for one certificate provider instance.
pub trait CertificateProvider: Send + Sync + Debug {
    fn root_certificates(&self, certificate_name: &str) -> Result<Arc<RootCertStore>>;
    fn identity_certificate(&self, certificate_name: &str) -> Result<Arc<IdentityCertificate>>;
}

#[derive(Debug)]
pub struct IdentityCertificate {
    pub certs: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

impl TryFrom<(&DataSource, &DataSource)> for IdentityCertificate {
    type Error = crate::Error;

    fn try_from((certificate_chain, private_key_source): (&DataSource, &DataSource)) -> Result<Self> {
        let mut cert_reader = certificate_chain.reader()?;
        let mut key_reader = private_key_source.reader()?;
        let key = private_key(&mut key_reader)
            .map_err(|e| format!("Can't parse private key: {e}"))?
            .ok_or("No private key has been configured")?;

        let certs = certs(&mut cert_reader)
            .map(|f| f.map_err(|e| format!("Can't parse certificate {e:?}").into()))
            .collect::<Result<Vec<_>>>()?;

        if certs.is_empty() {
            return Err("No certificates have been configured".into());
        }
        Ok(Self { certs, key })
    }
}

fn load_root_store(ca_certificates: &DataSource) -> Result<RootCertStore> {
    let mut ca_reader = ca_certificates.reader()?;
    let mut root_store = RootCertStore::empty();
    let ca_certs = certs(&mut ca_reader)
        .map(|f| f.map_err(|e| format!("Can't parse certificate {e:?}").into()))
        .collect::<Result<Vec<_>>>()?;

    if ca_certs.is_empty() {
        return Err("No certificates have been configured".into());
    }

    let (good, bad) = root_store.add_parsable_certificates(ca_certs);
    debug!("Added certs {good} rejected certs {bad}");
    if bad > 0 {
        Err("Some certs in the trust store were invalid".into())
    } else {
        Ok(root_store)
    }
}

#[derive(Debug, Default)]
struct LoadedMaterial {
    roots: Option<Arc<RootCertStore>>,
    identity: Option<Arc<IdentityCertificate>>,
}

impl LoadedMaterial {
    fn load(config: &FileWatcherConfig) -> Result<Self> {
        let roots = config
            .ca_certificate_file
            .as_ref()
            .map(|ca| load_root_store(ca).map(Arc::new))
            .transpose()
            .context("failed to load ca_certificate_file")?;
        let identity = match (&config.certificate_file, &config.private_key_file) {
            (Some(cert), Some(key)) => Some(Arc::new(
                IdentityCertificate::try_from((cert, key)).context("failed to load the identity certificate")?,
            )),
            (None, None) => None,
            _ => return Err("certificate_file and private_key_file have to be configured together".into()),
        };
        Ok(Self { roots, identity })
    }
}

/// Serves certificates read from files, re-reading them once `refresh_interval` has passed.
///
/// A failed refresh keeps serving the material loaded last.
#[derive(Debug)]
pub struct FileWatcherCertificateProvider {
    config: FileWatcherConfig,
    state: Mutex<(Instant, LoadedMaterial)>,
}

impl FileWatcherCertificateProvider {
    pub fn new(config: FileWatcherConfig) -> Result<Self> {
        let material = LoadedMaterial::load(&config)?;
        Ok(Self { config, state: Mutex::new((Instant::now(), material)) })
    }

    fn refreshed<T>(&self, get: impl Fn(&LoadedMaterial) -> Option<T>) -> Option<T> {
        let mut state = self.state.lock();
        let (loaded_at, material) = &mut *state;
        if loaded_at.elapsed() >= self.config.refresh_interval.max(Duration::from_secs(1)) {
            match LoadedMaterial::load(&self.config) {
                Ok(reloaded) => {
                    debug!("reloaded certificate files");
                    *material = reloaded;
                },
                Err(e) => warn!("failed to reload certificate files, keeping the previous ones: {e}"),
            }
            *loaded_at = Instant::now();
        }
        get(material)
    }
}

impl CertificateProvider for FileWatcherCertificateProvider {
    // file watcher instances serve a single certificate, the name is ignored
    fn root_certificates(&self, _certificate_name: &str) -> Result<Arc<RootCertStore>> {
        self.refreshed(|material| material.roots.clone()).ok_or_else(|| "no ca_certificate_file configured".into())
    }

    fn identity_certificate(&self, _certificate_name: &str) -> Result<Arc<IdentityCertificate>> {
        self.refreshed(|material| material.identity.clone())
            .ok_or_else(|| "no certificate_file/private_key_file configured".into())
    }
}

/// Registry of the certificate provider instances declared in the bootstrap.
///
/// Instances are created on first use and then shared by everyone asking for the same name.
#[derive(Debug, Default)]
pub struct CertificateProviderStore {
    configs: BTreeMap<CompactString, CertificateProviderPluginConfig>,
    instances: Mutex<HashMap<CompactString, Arc<dyn CertificateProvider>>>,
}

impl CertificateProviderStore {
    pub fn new(configs: BTreeMap<CompactString, CertificateProviderPluginConfig>) -> Self {
        Self { configs, instances: Mutex::default() }
    }

    /// Makes an already built provider available under `instance_name`.
    pub fn register(&self, instance_name: impl Into<CompactString>, provider: Arc<dyn CertificateProvider>) {
        let instance_name = instance_name.into();
        info!("registering certificate provider instance {instance_name}");
        self.instances.lock().insert(instance_name, provider);
    }

    pub fn get_provider(&self, instance_name: &str) -> std::result::Result<Arc<dyn CertificateProvider>, Status> {
        let mut instances = self.instances.lock();
        if let Some(provider) = instances.get(instance_name) {
            return Ok(Arc::clone(provider));
        }
        let Some(config) = self.configs.get(instance_name) else {
            return Err(Status::not_found(format!(
                "Certificate provider instance name: \"{instance_name}\" not recognized."
            )));
        };
        let provider: Arc<dyn CertificateProvider> = match config {
            CertificateProviderPluginConfig::FileWatcher(config) => Arc::new(
                FileWatcherCertificateProvider::new(config.clone()).map_err(|e| {
                    Status::unavailable(format!("failed to start certificate provider \"{instance_name}\": {e}"))
                })?,
            ),
        };
        debug!("created certificate provider instance {instance_name}");
        instances.insert(instance_name.into(), Arc::clone(&provider));
        Ok(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orion_error::StatusCode;
    use std::path::PathBuf;

    fn file_watcher(certificate: &str) -> CertificateProviderPluginConfig {
        serde_yaml::from_str(&format!(
            r#"
plugin_name: file_watcher
config:
  certificate_file: {{ path: {certificate} }}
  private_key_file: {{ path: {certificate} }}
"#
        ))
        .unwrap()
    }

    #[test]
    fn unknown_instance_is_not_found() {
        let store = CertificateProviderStore::default();
        let err = store.get_provider("missing").unwrap_err();
        assert_eq!(err.code(), StatusCode::NotFound);
        assert_eq!(err.message(), "Certificate provider instance name: \"missing\" not recognized.");
    }

    #[test]
    fn broken_files_fail_provider_creation() {
        let path: PathBuf = std::env::temp_dir().join("orion-lib-empty-certificate.pem");
        std::fs::write(&path, b"not a pem file").unwrap();
        let configs = BTreeMap::from([("broken".into(), file_watcher(&path.display().to_string()))]);
        let store = CertificateProviderStore::new(configs);
        let err = store.get_provider("broken").unwrap_err();
        assert_eq!(err.code(), StatusCode::Unavailable);

        let configs = BTreeMap::from([("missing".into(), file_watcher("/does/not/exist.pem"))]);
        let store = CertificateProviderStore::new(configs);
        assert!(store.get_provider("missing").is_err());
    }

    #[derive(Debug)]
    struct Nothing;

    impl CertificateProvider for Nothing {
        fn root_certificates(&self, _: &str) -> Result<Arc<RootCertStore>> {
            Err("none".into())
        }
        fn identity_certificate(&self, _: &str) -> Result<Arc<IdentityCertificate>> {
            Err("none".into())
        }
    }

    #[test]
    fn registered_instances_are_shared() {
        let store = CertificateProviderStore::default();
        store.register("mine", Arc::new(Nothing));
        let first = store.get_provider("mine").unwrap();
        let second = store.get_provider("mine").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
