//! [`ClusterApply`] backed by kube-rs dynamic objects
//!
//! Manifests are parsed document by document, resolved through API discovery
//! and sent as `DynamicObject`s, so any kind the target cluster serves can be
//! part of a release.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{
    Api, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams, PostParams,
};
use kube::discovery::{Discovery, Scope};
use kube::Client;
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use rudder_common::kube_utils::{parse_api_version, poll_until, run_discovery};
use rudder_common::yaml::parse_yaml;
use rudder_common::{Error, Result, FIELD_MANAGER};

use super::{ClusterApply, UpdateOptions, WaitOptions};
use crate::manifest::parse_documents;

/// Interval between readiness checks
const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Workload kinds whose pods `recreate` restarts
const WORKLOAD_KINDS: &[&str] = &["Deployment", "StatefulSet", "DaemonSet", "ReplicaSet"];

/// One resource parsed out of a manifest
#[derive(Clone, Debug)]
struct Resource {
    api_version: String,
    kind: String,
    name: String,
    namespace: Option<String>,
    value: Value,
}

impl Resource {
    fn parse(doc: &str) -> Result<Option<Self>> {
        let value = parse_yaml(doc).map_err(|e| Error::serialization(e.to_string()))?;
        if value.is_null() {
            return Ok(None);
        }

        let field = |pointer: &str| value.pointer(pointer).and_then(Value::as_str);
        let kind = field("/kind").unwrap_or_default().to_string();
        let api_version = field("/apiVersion")
            .ok_or_else(|| Error::serialization_for_kind(&kind, "missing apiVersion"))?
            .to_string();
        let name = field("/metadata/name")
            .ok_or_else(|| Error::serialization_for_kind(&kind, "missing metadata.name"))?
            .to_string();
        let namespace = field("/metadata/namespace").map(str::to_string);

        Ok(Some(Self {
            api_version,
            kind,
            name,
            namespace,
            value,
        }))
    }

    fn gvk(&self) -> GroupVersionKind {
        let (group, version) = parse_api_version(&self.api_version);
        GroupVersionKind {
            group,
            version,
            kind: self.kind.clone(),
        }
    }

    /// Identity of the live object: kind, namespace and name. The apiVersion
    /// is left out, a chart may move a kind between API groups.
    fn key(&self, default_namespace: &str) -> (String, String, String) {
        (
            self.kind.clone(),
            self.namespace
                .clone()
                .unwrap_or_else(|| default_namespace.to_string()),
            self.name.clone(),
        )
    }

    fn describe(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }
}

/// Resources of `current` that no resource of `target` replaces
fn stale_resources<'a>(
    current: &'a [Resource],
    target: &[Resource],
    namespace: &str,
) -> Vec<&'a Resource> {
    let kept: HashSet<_> = target.iter().map(|r| r.key(namespace)).collect();
    current
        .iter()
        .filter(|r| !kept.contains(&r.key(namespace)))
        .collect()
}

fn parse_resources(manifest: &str) -> Result<Vec<Resource>> {
    let mut resources = Vec::new();
    for doc in parse_documents(manifest)? {
        if let Some(resource) = Resource::parse(&doc.content)? {
            resources.push(resource);
        }
    }
    Ok(resources)
}

/// Apply order: namespaces and config before workloads
fn kind_priority(kind: &str) -> u8 {
    match kind {
        "Namespace" => 0,
        "CustomResourceDefinition" => 1,
        "ServiceAccount" => 2,
        "ClusterRole" | "Role" => 3,
        "ClusterRoleBinding" | "RoleBinding" => 4,
        "ConfigMap" | "Secret" => 5,
        "PersistentVolume" | "PersistentVolumeClaim" => 6,
        "Service" => 7,
        _ => 10,
    }
}

fn sort_for_apply(resources: &mut [Resource]) {
    resources.sort_by_key(|r| kind_priority(&r.kind));
}

/// Whether a live object has reached a usable state
fn is_ready(kind: &str, obj: &Value) -> bool {
    let int = |pointer: &str| obj.pointer(pointer).and_then(Value::as_i64).unwrap_or(0);
    let text = |pointer: &str| obj.pointer(pointer).and_then(Value::as_str);

    match kind {
        "Deployment" | "StatefulSet" | "ReplicaSet" => {
            let desired = obj
                .pointer("/spec/replicas")
                .and_then(Value::as_i64)
                .unwrap_or(1);
            int("/status/readyReplicas") >= desired
        }
        "DaemonSet" => int("/status/numberReady") >= int("/status/desiredNumberScheduled"),
        "PersistentVolumeClaim" => text("/status/phase") == Some("Bound"),
        "Pod" => matches!(text("/status/phase"), Some("Running") | Some("Succeeded")),
        "Service" if text("/spec/type") == Some("LoadBalancer") => obj
            .pointer("/status/loadBalancer/ingress")
            .and_then(Value::as_array)
            .is_some_and(|ingress| !ingress.is_empty()),
        _ => true,
    }
}

/// Short age such as `45s`, `12m`, `3h` or `9d`
fn format_age(age: chrono::Duration) -> String {
    let secs = age.num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}

fn label_selector(obj: &Value) -> Option<String> {
    let labels = obj.pointer("/spec/selector/matchLabels")?.as_object()?;
    if labels.is_empty() {
        return None;
    }
    Some(
        labels
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|v| format!("{}={}", k, v)))
            .collect::<Vec<_>>()
            .join(","),
    )
}

fn is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == 404)
}

fn is_unpatchable(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == 409 || ae.code == 422)
}

/// Applies manifests to one cluster through its kube client
pub struct KubeApplier {
    client: Client,
    host: String,
}

impl KubeApplier {
    /// Create an applier for the cluster at `host`
    pub fn new(client: Client, host: impl Into<String>) -> Self {
        Self {
            client,
            host: host.into(),
        }
    }

    fn failed(&self, operation: &str, msg: impl std::fmt::Display) -> Error {
        Error::execution_for(&self.host, operation, msg.to_string())
    }

    async fn discover(&self, operation: &str) -> Result<Discovery> {
        run_discovery(&self.client)
            .await
            .map_err(|e| self.failed(operation, e))
    }

    /// Resolve the API for a resource, defaulting namespaced kinds to the
    /// release namespace. The returned value carries that namespace too.
    fn api_for(
        &self,
        discovery: &Discovery,
        resource: &Resource,
        namespace: &str,
        operation: &str,
    ) -> Result<(Api<DynamicObject>, Value)> {
        let (ar, caps) = discovery.resolve_gvk(&resource.gvk()).ok_or_else(|| {
            self.failed(
                operation,
                format!(
                    "unknown resource type {}/{}",
                    resource.api_version, resource.kind
                ),
            )
        })?;

        let mut value = resource.value.clone();
        let api = match caps.scope {
            Scope::Namespaced => {
                let ns = resource.namespace.as_deref().unwrap_or(namespace);
                if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
                    meta.insert("namespace".to_string(), Value::String(ns.to_string()));
                }
                Api::namespaced_with(self.client.clone(), ns, &ar)
            }
            Scope::Cluster => Api::all_with(self.client.clone(), &ar),
        };
        Ok((api, value))
    }

    async fn create_one(
        &self,
        discovery: &Discovery,
        resource: &Resource,
        namespace: &str,
        operation: &str,
    ) -> Result<()> {
        let (api, value) = self.api_for(discovery, resource, namespace, operation)?;
        let obj: DynamicObject = serde_json::from_value(value)
            .map_err(|e| Error::serialization_for_kind(&resource.kind, e.to_string()))?;

        api.create(&PostParams::default(), &obj)
            .await
            .map_err(|e| self.failed(operation, format!("{}: {}", resource.describe(), e)))?;

        trace!(host = %self.host, resource = %resource.describe(), "created");
        Ok(())
    }

    async fn apply_one(
        &self,
        discovery: &Discovery,
        resource: &Resource,
        namespace: &str,
        force: bool,
    ) -> Result<()> {
        let (api, value) = self.api_for(discovery, resource, namespace, "update")?;
        let mut params = PatchParams::apply(FIELD_MANAGER);
        if force {
            params = params.force();
        }

        match api.patch(&resource.name, &params, &Patch::Apply(&value)).await {
            Ok(_) => {
                trace!(host = %self.host, resource = %resource.describe(), "applied");
                Ok(())
            }
            Err(e) if force && is_unpatchable(&e) => {
                debug!(
                    host = %self.host,
                    resource = %resource.describe(),
                    error = %e,
                    "patch rejected, recreating"
                );
                self.delete_one(discovery, resource, namespace)
                    .await
                    .map_err(|e| self.failed("update", e))?;
                self.create_one(discovery, resource, namespace, "update")
                    .await
            }
            Err(e) => Err(self.failed("update", format!("{}: {}", resource.describe(), e))),
        }
    }

    /// Delete one resource; a missing object is not an error
    async fn delete_one(
        &self,
        discovery: &Discovery,
        resource: &Resource,
        namespace: &str,
    ) -> std::result::Result<(), String> {
        let (api, _) = self
            .api_for(discovery, resource, namespace, "delete")
            .map_err(|e| format!("{}: {}", resource.describe(), e))?;

        match api.delete(&resource.name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                trace!(resource = %resource.describe(), "already gone");
                Ok(())
            }
            Err(e) => Err(format!("{}: {}", resource.describe(), e)),
        }
    }

    async fn recreate_pods(&self, resource: &Resource, namespace: &str) -> Result<()> {
        let Some(selector) = label_selector(&resource.value) else {
            return Ok(());
        };
        let ns = resource.namespace.as_deref().unwrap_or(namespace);
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), ns);

        pods.delete_collection(&DeleteParams::background(), &ListParams::default().labels(&selector))
            .await
            .map_err(|e| self.failed("update", format!("recreate pods of {}: {}", resource.describe(), e)))?;

        debug!(host = %self.host, resource = %resource.describe(), "recreated pods");
        Ok(())
    }

    async fn wait_ready(
        &self,
        discovery: &Discovery,
        resources: &[Resource],
        namespace: &str,
        wait: WaitOptions,
        operation: &str,
    ) -> Result<()> {
        if !wait.wait {
            return Ok(());
        }

        for resource in resources {
            let (api, _) = self.api_for(discovery, resource, namespace, operation)?;
            let name = resource.name.clone();
            let kind = resource.kind.clone();

            poll_until(
                wait.timeout,
                READY_POLL_INTERVAL,
                format!("{} not ready after {:?}", resource.describe(), wait.timeout),
                || {
                    let api = api.clone();
                    let name = name.clone();
                    let kind = kind.clone();
                    async move {
                        let obj = api.get(&name).await?;
                        let value = serde_json::to_value(&obj)
                            .map_err(|e| Error::serialization_for_kind(&kind, e.to_string()))?;
                        Ok(is_ready(&kind, &value))
                    }
                },
            )
            .await
            .map_err(|e| self.failed(operation, e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterApply for KubeApplier {
    async fn create(&self, namespace: &str, manifest: &str, wait: WaitOptions) -> Result<()> {
        let mut resources = parse_resources(manifest)?;
        if resources.is_empty() {
            return Ok(());
        }
        sort_for_apply(&mut resources);

        let discovery = self.discover("create").await?;
        for resource in &resources {
            self.create_one(&discovery, resource, namespace, "create")
                .await?;
        }
        info!(host = %self.host, count = resources.len(), "created resources");

        self.wait_ready(&discovery, &resources, namespace, wait, "create")
            .await
    }

    async fn update(
        &self,
        namespace: &str,
        current: &str,
        target: &str,
        options: UpdateOptions,
    ) -> Result<()> {
        let current = parse_resources(current)?;
        let mut target = parse_resources(target)?;
        sort_for_apply(&mut target);

        let discovery = self.discover("update").await?;

        for resource in &target {
            self.apply_one(&discovery, resource, namespace, options.force)
                .await?;
        }

        let mut stale = Vec::new();
        for resource in stale_resources(&current, &target, namespace) {
            if let Err(e) = self.delete_one(&discovery, resource, namespace).await {
                stale.push(e);
            }
        }
        if !stale.is_empty() {
            return Err(self.failed(
                "update",
                format!("could not remove stale resources: {}", stale.join("; ")),
            ));
        }

        if options.recreate {
            for resource in target
                .iter()
                .filter(|r| WORKLOAD_KINDS.contains(&r.kind.as_str()))
            {
                self.recreate_pods(resource, namespace).await?;
            }
        }

        info!(host = %self.host, applied = target.len(), "updated resources");
        self.wait_ready(&discovery, &target, namespace, options.wait, "update")
            .await
    }

    async fn get(&self, namespace: &str, manifest: &str) -> Result<String> {
        let resources = parse_resources(manifest)?;
        if resources.is_empty() {
            return Ok(String::new());
        }
        let discovery = self.discover("get").await?;

        let mut tables: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
        let mut missing = Vec::new();

        for resource in &resources {
            let (api, _) = self.api_for(&discovery, resource, namespace, "get")?;
            match api.get(&resource.name).await {
                Ok(obj) => {
                    let age = obj
                        .metadata
                        .creation_timestamp
                        .as_ref()
                        .map(|t| format_age(Utc::now().signed_duration_since(t.0)))
                        .unwrap_or_else(|| "<unknown>".to_string());
                    tables
                        .entry(format!("{}/{}", resource.api_version, resource.kind))
                        .or_default()
                        .push((resource.name.clone(), age));
                }
                Err(e) if is_not_found(&e) => missing.push(resource),
                Err(e) => {
                    return Err(self.failed("get", format!("{}: {}", resource.describe(), e)))
                }
            }
        }

        let mut out = String::new();
        for (header, rows) in &tables {
            let width = rows
                .iter()
                .map(|(name, _)| name.len())
                .max()
                .unwrap_or(0)
                .max("NAME".len());
            out.push_str(&format!("==> {}\n", header));
            out.push_str(&format!("{:<width$}  AGE\n", "NAME", width = width));
            for (name, age) in rows {
                out.push_str(&format!("{:<width$}  {}\n", name, age, width = width));
            }
            out.push('\n');
        }
        if !missing.is_empty() {
            out.push_str("==> MISSING\nKIND\tNAME\n");
            for resource in missing {
                out.push_str(&format!("{}\t{}\n", resource.kind, resource.name));
            }
        }
        Ok(out)
    }

    async fn delete(&self, namespace: &str, manifest: &str) -> Result<Vec<String>> {
        let mut resources = parse_resources(manifest)?;
        if resources.is_empty() {
            return Ok(Vec::new());
        }
        sort_for_apply(&mut resources);
        resources.reverse();

        let discovery = self.discover("delete").await?;
        let mut failures = Vec::new();
        for resource in &resources {
            if let Err(e) = self.delete_one(&discovery, resource, namespace).await {
                warn!(host = %self.host, error = %e, "delete failed");
                failures.push(e);
            }
        }

        info!(
            host = %self.host,
            deleted = resources.len() - failures.len(),
            failed = failures.len(),
            "deleted resources"
        );
        Ok(failures)
    }
}
