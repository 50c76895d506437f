//! Install-time manifest rewriting
//!
//! A release config may carry a list of `replace` rules. Each rule's `to` is a
//! minijinja template rendered against the federation controller Deployment,
//! and its `from` is a regex; every match in the manifest is replaced with the
//! rendered text. Rules run in list order, each over the output of the last.
//!
//! ```yaml
//! fed-namespace: federation-system
//! fed-controller-name: federation-controller-manager
//! replace:
//!   - from: 'federations: ""'
//!     to: 'federations: {{ metadata.annotations["federations"] }}'
//! ```

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{Api, Client};
use minijinja::{Environment, UndefinedBehavior};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use rudder_common::yaml::parse_yaml;
use rudder_common::{Error, Result};

/// Namespace of the federation controller when the config names none
pub const DEFAULT_CONTROLLER_NAMESPACE: &str = "federation-system";
/// Federation controller Deployment name when the config names none
pub const DEFAULT_CONTROLLER_NAME: &str = "federation-controller-manager";

/// One `from` regex / `to` template pair
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Replacement {
    /// Regex matched against the manifest
    pub from: String,
    /// Template rendered against the controller Deployment
    pub to: String,
}

/// Substitution settings read from the release config
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SubstitutionConfig {
    /// Rules applied in order
    #[serde(rename = "replace")]
    pub replacements: Vec<Replacement>,
    /// Namespace of the controller Deployment
    #[serde(rename = "fed-namespace")]
    pub controller_namespace: String,
    /// Name of the controller Deployment
    #[serde(rename = "fed-controller-name")]
    pub controller_name: String,
}

impl Default for SubstitutionConfig {
    fn default() -> Self {
        Self {
            replacements: Vec::new(),
            controller_namespace: DEFAULT_CONTROLLER_NAMESPACE.to_string(),
            controller_name: DEFAULT_CONTROLLER_NAME.to_string(),
        }
    }
}

impl SubstitutionConfig {
    /// Read settings from a raw release config.
    ///
    /// A config that does not parse is logged and treated as empty.
    pub fn from_raw(raw: &str) -> Self {
        let value = match parse_yaml(raw) {
            Ok(serde_json::Value::Null) => return Self::default(),
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "could not parse release config, skipping substitution");
                return Self::default();
            }
        };

        serde_json::from_value(value).unwrap_or_else(|e| {
            warn!(error = %e, "unexpected release config shape, skipping substitution");
            Self::default()
        })
    }
}

/// Reads the object substitution templates render against
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectLookup: Send + Sync {
    /// Fetch a Deployment as JSON
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<serde_json::Value>;
}

/// [`ObjectLookup`] against the cluster the module runs in
pub struct KubeObjectLookup {
    client: Client,
}

impl KubeObjectLookup {
    /// Create a lookup backed by `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectLookup for KubeObjectLookup {
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<serde_json::Value> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deployment = api.get(name).await?;
        serde_json::to_value(&deployment)
            .map_err(|e| Error::serialization_for_kind("Deployment", e.to_string()))
    }
}

/// Renders replacement templates and rewrites manifests
pub struct Substitutor {
    env: Environment<'static>,
}

impl Default for Substitutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Substitutor {
    /// Create a substitutor with strict undefined handling
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        // `to` values often end in a newline that must survive rendering
        env.set_keep_trailing_newline(true);
        Self { env }
    }

    /// Apply `rules` to `manifest` in order, rendering against `context`
    pub fn apply(
        &self,
        manifest: &str,
        rules: &[Replacement],
        context: &serde_json::Value,
    ) -> Result<String> {
        let mut manifest = manifest.to_string();

        for rule in rules {
            let rendered = self.env.render_str(&rule.to, context).map_err(|e| {
                Error::substitution_for_pattern(&rule.to, format!("template failed: {}", e))
            })?;
            let from = Regex::new(&rule.from).map_err(|e| {
                Error::substitution_for_pattern(&rule.from, format!("invalid regex: {}", e))
            })?;

            manifest = from.replace_all(&manifest, rendered.as_str()).into_owned();
        }

        Ok(manifest)
    }

    /// Rewrite an install manifest according to the release config.
    ///
    /// Without rules the manifest is returned untouched and no lookup is made.
    pub async fn substitute(
        &self,
        manifest: &str,
        raw_config: &str,
        lookup: &dyn ObjectLookup,
    ) -> Result<String> {
        let config = SubstitutionConfig::from_raw(raw_config);
        if config.replacements.is_empty() {
            return Ok(manifest.to_string());
        }

        debug!(
            rules = config.replacements.len(),
            namespace = %config.controller_namespace,
            controller = %config.controller_name,
            "applying manifest substitutions"
        );

        let controller = lookup
            .get_deployment(&config.controller_namespace, &config.controller_name)
            .await
            .map_err(|e| {
                Error::substitution(format!(
                    "cannot read deployment {}/{}: {}",
                    config.controller_namespace, config.controller_name, e
                ))
            })?;

        self.apply(manifest, &config.replacements, &controller)
    }
}
