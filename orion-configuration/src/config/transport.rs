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

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Refers to a certificate provider instance declared in the bootstrap, and the certificate it should serve.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct CertificateProviderPluginInstance {
    pub instance_name: CompactString,
    #[serde(skip_serializing_if = "CompactString::is_empty", default)]
    pub certificate_name: CompactString,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct CertificateValidationContext {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ca_certificate_provider_instance: Option<CertificateProviderPluginInstance>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct CommonTlsContext {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tls_certificate_provider_instance: Option<CertificateProviderPluginInstance>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub validation_context: Option<CertificateValidationContext>,
}

impl CommonTlsContext {
    pub fn root_provider(&self) -> Option<&CertificateProviderPluginInstance> {
        self.validation_context.as_ref().and_then(|ctx| ctx.ca_certificate_provider_instance.as_ref())
    }

    pub fn identity_provider(&self) -> Option<&CertificateProviderPluginInstance> {
        self.tls_certificate_provider_instance.as_ref()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct DownstreamTlsContext {
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub require_client_certificate: bool,
    pub common_tls_context: CommonTlsContext,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mtls_context_from_yaml() {
        let ctx: DownstreamTlsContext = serde_yaml::from_str(
            r#"
require_client_certificate: true
common_tls_context:
  tls_certificate_provider_instance:
    instance_name: google_cloud_private_spiffe
    certificate_name: default
  validation_context:
    ca_certificate_provider_instance:
      instance_name: google_cloud_private_spiffe
"#,
        )
        .unwrap();
        assert!(ctx.require_client_certificate);
        assert_eq!(ctx.common_tls_context.identity_provider().map(|p| p.certificate_name.as_str()), Some("default"));
        assert_eq!(ctx.common_tls_context.root_provider().map(|p| p.certificate_name.as_str()), Some(""));
    }
}
