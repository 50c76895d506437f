//! Federation control-plane credentials
//!
//! Credentials live in a ConfigMap (by default `kube-system/federation-credentials`):
//!
//! ```yaml
//! data:
//!   type: tls            # or "basic"
//!   host: https://federation.example.com
//!   cadata: |            # tls only, PEM
//!     -----BEGIN CERTIFICATE-----
//!   certdata: ...        # tls only, PEM
//!   keydata: ...         # tls only, PEM
//!   username: admin      # basic only
//!   password: secret     # basic only
//! ```
//!
//! They are loaded once at startup and handed to the connector explicitly.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};
use serde_json::json;
use tracing::info;

use rudder_common::retry::{retry_if, RetryConfig};
use rudder_common::{Error, Result};

/// How the module authenticates to the control plane
#[derive(Clone, PartialEq, Eq)]
pub enum FederationAuth {
    /// HTTP basic auth
    Basic {
        /// Username
        username: String,
        /// Password
        password: String,
    },
    /// Client certificate auth, all fields PEM encoded
    Tls {
        /// CA bundle used to verify the control plane
        ca_data: String,
        /// Client certificate
        cert_data: String,
        /// Client private key
        key_data: String,
    },
}

/// Address and secrets for the federation control plane
#[derive(Clone, PartialEq, Eq)]
pub struct FederationCredentials {
    /// API server URL
    pub host: String,
    /// Authentication material
    pub auth: FederationAuth,
}

impl std::fmt::Debug for FederationAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secrets stay out of logs
        match self {
            FederationAuth::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            FederationAuth::Tls { .. } => f.debug_struct("Tls").finish_non_exhaustive(),
        }
    }
}

impl std::fmt::Debug for FederationCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationCredentials")
            .field("host", &self.host)
            .field("auth", &self.auth)
            .finish()
    }
}

impl FederationCredentials {
    /// Build credentials from ConfigMap data
    pub fn from_config_map_data(data: &BTreeMap<String, String>) -> Result<Self> {
        let get = |key: &str| -> Result<String> {
            data.get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| Error::configuration(format!("credentials missing '{}'", key)))
        };

        let host = get("host")?;
        let auth = match data.get("type").map(String::as_str) {
            Some("basic") => FederationAuth::Basic {
                username: get("username")?,
                password: get("password")?,
            },
            Some("tls") => FederationAuth::Tls {
                ca_data: get("cadata")?,
                cert_data: get("certdata")?,
                key_data: get("keydata")?,
            },
            Some(other) => {
                return Err(Error::configuration(format!(
                    "unknown credentials type '{}'",
                    other
                )))
            }
            None => return Err(Error::configuration("credentials missing 'type'")),
        };

        Ok(Self { host, auth })
    }

    /// Read credentials from a ConfigMap, retrying transient API failures
    pub async fn load(client: &Client, namespace: &str, name: &str) -> Result<Self> {
        info!(namespace = %namespace, config_map = %name, "loading federation credentials");

        let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
        let config_map = retry_if(
            &RetryConfig::default(),
            "load-federation-credentials",
            || {
                let api = api.clone();
                async move { api.get(name).await.map_err(Error::from) }
            },
            Error::is_retryable,
        )
        .await?;

        Self::from_config_map_data(&config_map.data.unwrap_or_default())
    }

    /// In-memory kubeconfig for the control plane, named `context`
    pub fn kubeconfig(&self, context: &str) -> serde_json::Value {
        let (cluster, user) = match &self.auth {
            FederationAuth::Basic { username, password } => (
                json!({ "server": self.host }),
                json!({ "username": username, "password": password }),
            ),
            FederationAuth::Tls {
                ca_data,
                cert_data,
                key_data,
            } => (
                json!({
                    "server": self.host,
                    "certificate-authority-data": STANDARD.encode(ca_data),
                }),
                json!({
                    "client-certificate-data": STANDARD.encode(cert_data),
                    "client-key-data": STANDARD.encode(key_data),
                }),
            ),
        };

        kubeconfig_document(context, cluster, user)
    }
}

/// Assemble a single-context kubeconfig document
pub(crate) fn kubeconfig_document(
    name: &str,
    cluster: serde_json::Value,
    user: serde_json::Value,
) -> serde_json::Value {
    json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{ "name": name, "cluster": cluster }],
        "users": [{ "name": name, "user": user }],
        "contexts": [{ "name": name, "context": { "cluster": name, "user": name } }],
        "current-context": name,
    })
}
