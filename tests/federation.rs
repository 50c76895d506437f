//! Integration tests for federated release lifecycles
//!
//! These tests tell the story of one release moving through its lifecycle on a
//! federation of in-memory clusters. Each cluster records what was created,
//! updated and deleted on it, so the tests can check exactly which documents
//! reached the control plane and which reached every member.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tonic::Request;

use rudder_common::yaml::parse_yaml;
use rudder_common::{Error, Result};
use rudder_federation::apply::{ClusterApply, UpdateOptions, WaitOptions};
use rudder_federation::fanout::STATUS_SEPARATOR;
use rudder_federation::federation::{
    ClusterConnector, ClusterDescriptor, ClusterRegistry, FleetResolver,
};
use rudder_federation::grpc::ReleaseServer;
use rudder_federation::lifecycle::{LifecycleService, ReleaseManifest};
use rudder_federation::manifest::{parse_documents, ClassificationPolicy, ObjectLookup};
use rudder_proto::{ReleaseModuleService, ReleaseStatusRequest};

// =============================================================================
// Test Fixtures
// =============================================================================

const WORDPRESS: &str = r#"---
apiVersion: v1
kind: Secret
metadata:
  name: wp4-mariadb
type: Opaque
data:
  mariadb-root-password: c2VjcmV0
---
apiVersion: v1
kind: Service
metadata:
  name: wp4-wordpress
spec:
  ports:
    - port: 80
---
apiVersion: v1
kind: PersistentVolumeClaim
metadata:
  name: wp4-wordpress
spec:
  accessModes: ["ReadWriteOnce"]
  resources:
    requests:
      storage: 10Gi
"#;

const UPGRADED: &str = r#"---
apiVersion: v1
kind: Secret
metadata:
  name: wp4-mariadb
type: Opaque
data:
  mariadb-root-password: bmV3LXNlY3JldA==
---
apiVersion: v1
kind: PersistentVolumeClaim
metadata:
  name: wp4-data
spec:
  accessModes: ["ReadWriteOnce"]
"#;

/// In-memory cluster recording every object it holds
struct RecordingCluster {
    identity: String,
    objects: Mutex<BTreeMap<String, String>>,
    journal: Mutex<Vec<String>>,
    failing: Option<&'static str>,
}

impl RecordingCluster {
    fn new(identity: &str) -> Arc<Self> {
        Self::with_failure(identity, None)
    }

    fn with_failure(identity: &str, failing: Option<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            identity: identity.to_string(),
            objects: Mutex::new(BTreeMap::new()),
            journal: Mutex::new(Vec::new()),
            failing,
        })
    }

    fn keys(manifest: &str) -> Result<Vec<(String, String)>> {
        let mut keys = Vec::new();
        for doc in parse_documents(manifest)? {
            let value = parse_yaml(&doc.content).map_err(|e| Error::serialization(e.to_string()))?;
            let name = value
                .pointer("/metadata/name")
                .and_then(|n| n.as_str())
                .unwrap_or_default();
            keys.push((format!("{}/{}", doc.kind, name), doc.content));
        }
        Ok(keys)
    }

    fn enter(&self, operation: &'static str) -> Result<()> {
        self.journal.lock().unwrap().push(operation.to_string());
        if self.failing == Some(operation) {
            return Err(Error::execution_for(&self.identity, operation, "injected failure"));
        }
        Ok(())
    }

    fn objects(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterApply for RecordingCluster {
    async fn create(&self, _namespace: &str, manifest: &str, _wait: WaitOptions) -> Result<()> {
        self.enter("create")?;
        let mut objects = self.objects.lock().unwrap();
        for (key, content) in Self::keys(manifest)? {
            if objects.contains_key(&key) {
                return Err(Error::execution_for(
                    &self.identity,
                    "create",
                    format!("{} already exists", key),
                ));
            }
            objects.insert(key, content);
        }
        Ok(())
    }

    async fn update(
        &self,
        _namespace: &str,
        current: &str,
        target: &str,
        _options: UpdateOptions,
    ) -> Result<()> {
        self.enter("update")?;
        let wanted = Self::keys(target)?;
        let mut objects = self.objects.lock().unwrap();
        for (key, _) in Self::keys(current)? {
            if !wanted.iter().any(|(k, _)| *k == key) {
                objects.remove(&key);
            }
        }
        objects.extend(wanted);
        Ok(())
    }

    async fn get(&self, _namespace: &str, manifest: &str) -> Result<String> {
        self.enter("get")?;
        let objects = self.objects.lock().unwrap();
        let lines: Vec<String> = Self::keys(manifest)?
            .into_iter()
            .map(|(key, _)| {
                if objects.contains_key(&key) {
                    key
                } else {
                    format!("MISSING {}", key)
                }
            })
            .collect();
        Ok(lines.join("\n"))
    }

    async fn delete(&self, _namespace: &str, manifest: &str) -> Result<Vec<String>> {
        self.enter("delete")?;
        let mut objects = self.objects.lock().unwrap();
        for (key, _) in Self::keys(manifest)? {
            objects.remove(&key);
        }
        Ok(vec![])
    }
}

/// A federation whose membership can change between calls
struct Federation {
    control_plane: Arc<RecordingCluster>,
    members: Mutex<Vec<(ClusterDescriptor, Arc<RecordingCluster>)>>,
}

impl Federation {
    fn new(control_plane: Arc<RecordingCluster>, members: Vec<Arc<RecordingCluster>>) -> Arc<Self> {
        let federation = Arc::new(Self {
            control_plane,
            members: Mutex::new(Vec::new()),
        });
        for cluster in members {
            federation.join(cluster);
        }
        federation
    }

    fn join(&self, cluster: Arc<RecordingCluster>) {
        let descriptor = ClusterDescriptor {
            name: cluster.identity.trim_start_matches("https://").to_string(),
            server_address: cluster.identity.clone(),
        };
        self.members.lock().unwrap().push((descriptor, cluster));
    }

    fn leave(&self, identity: &str) {
        self.members
            .lock()
            .unwrap()
            .retain(|(_, cluster)| cluster.identity != identity);
    }
}

#[async_trait]
impl ClusterRegistry for Federation {
    async fn list_member_clusters(&self) -> Result<Vec<ClusterDescriptor>> {
        Ok(self
            .members
            .lock()
            .unwrap()
            .iter()
            .map(|(d, _)| d.clone())
            .collect())
    }
}

#[async_trait]
impl ClusterConnector for Federation {
    fn control_plane_host(&self) -> String {
        self.control_plane.identity.clone()
    }

    async fn connect_control_plane(&self) -> Result<Arc<dyn ClusterApply>> {
        Ok(self.control_plane.clone())
    }

    async fn connect_member(&self, cluster: &ClusterDescriptor) -> Result<Arc<dyn ClusterApply>> {
        self.members
            .lock()
            .unwrap()
            .iter()
            .find(|(d, _)| d == cluster)
            .map(|(_, c)| c.clone() as Arc<dyn ClusterApply>)
            .ok_or_else(|| Error::discovery(format!("{} is not reachable", cluster.name)))
    }
}

/// Lookup answering with a fixed controller deployment
struct StaticLookup(serde_json::Value);

#[async_trait]
impl ObjectLookup for StaticLookup {
    async fn get_deployment(&self, _namespace: &str, _name: &str) -> Result<serde_json::Value> {
        Ok(self.0.clone())
    }
}

fn lifecycle(federation: &Arc<Federation>) -> LifecycleService {
    LifecycleService::new(
        FleetResolver::new(federation.clone(), federation.clone()),
        ClassificationPolicy::federated_kinds(),
        Arc::new(StaticLookup(serde_json::json!({
            "metadata": { "annotations": { "federation.kubernetes.io/name": "galaxy" } }
        }))),
    )
}

fn release(manifest: &str) -> ReleaseManifest {
    ReleaseManifest {
        name: "wp4".to_string(),
        namespace: "blog".to_string(),
        manifest: manifest.to_string(),
        config: String::new(),
    }
}

// =============================================================================
// Story: A release lives its whole life across the federation
// =============================================================================

/// Story: Install, upgrade, status and delete on two members
#[tokio::test]
async fn story_release_lifecycle_across_federation() {
    let control = RecordingCluster::new("https://federation:443");
    let east = RecordingCluster::new("https://us-east:6443");
    let west = RecordingCluster::new("https://eu-west:6443");
    let federation = Federation::new(control.clone(), vec![east.clone(), west.clone()]);
    let service = lifecycle(&federation);

    // Chapter 1: install places the claim on members and the rest upstream
    service.install(&release(WORDPRESS)).await.unwrap();
    assert_eq!(control.objects(), ["Secret/wp4-mariadb", "Service/wp4-wordpress"]);
    assert_eq!(east.objects(), ["PersistentVolumeClaim/wp4-wordpress"]);
    assert_eq!(west.objects(), east.objects());

    // Chapter 2: upgrade drops the Service and renames the claim
    service
        .upgrade(&release(WORDPRESS), &release(UPGRADED), UpdateOptions::default())
        .await
        .unwrap();
    assert_eq!(control.objects(), ["Secret/wp4-mariadb"]);
    assert_eq!(east.objects(), ["PersistentVolumeClaim/wp4-data"]);

    // Chapter 3: status shows every cluster, control plane first
    let status = service.status(&release(UPGRADED)).await.unwrap();
    let blocks: Vec<_> = status.split(STATUS_SEPARATOR).collect();
    assert_eq!(
        blocks,
        [
            "Cluster https://federation:443:\nSecret/wp4-mariadb",
            "Cluster https://us-east:6443:\nPersistentVolumeClaim/wp4-data",
            "Cluster https://eu-west:6443:\nPersistentVolumeClaim/wp4-data",
        ]
    );

    // Chapter 4: delete empties every cluster
    let leftovers = service.delete(&release(UPGRADED)).await.unwrap();
    assert!(leftovers.is_empty());
    assert!(control.objects().is_empty());
    assert!(east.objects().is_empty());
    assert!(west.objects().is_empty());
}

/// Story: One broken member fails the install without touching the others
#[tokio::test]
async fn story_partial_install_failure_keeps_successful_clusters() {
    let control = RecordingCluster::new("https://federation:443");
    let broken = RecordingCluster::with_failure("https://broken:6443", Some("create"));
    let healthy = RecordingCluster::new("https://healthy:6443");
    let federation = Federation::new(control.clone(), vec![broken.clone(), healthy.clone()]);

    let err = lifecycle(&federation)
        .install(&release(WORDPRESS))
        .await
        .unwrap_err();
    assert_eq!(err.target(), Some("https://broken:6443"));

    // Every cluster was attempted exactly once and nothing was reverted
    assert_eq!(control.journal(), ["create"]);
    assert_eq!(broken.journal(), ["create"]);
    assert_eq!(healthy.journal(), ["create"]);
    assert_eq!(control.objects().len(), 2);
    assert_eq!(healthy.objects(), ["PersistentVolumeClaim/wp4-wordpress"]);
    assert!(broken.objects().is_empty());
}

/// Story: Installing twice surfaces the conflict from every cluster
#[tokio::test]
async fn story_reinstall_conflicts_everywhere() {
    let control = RecordingCluster::new("https://federation:443");
    let east = RecordingCluster::new("https://us-east:6443");
    let federation = Federation::new(control.clone(), vec![east.clone()]);
    let service = lifecycle(&federation);

    service.install(&release(WORDPRESS)).await.unwrap();
    let err = service.install(&release(WORDPRESS)).await.unwrap_err();
    assert!(err.to_string().contains("already exists"));
    assert_eq!(east.journal(), ["create", "create"]);
}

/// Story: A malformed manifest is rejected before any cluster sees it
#[tokio::test]
async fn story_malformed_manifest_touches_nothing() {
    let control = RecordingCluster::new("https://federation:443");
    let east = RecordingCluster::new("https://us-east:6443");
    let federation = Federation::new(control.clone(), vec![east.clone()]);

    let manifest = format!("{}---\nkind: [unclosed\n", WORDPRESS);
    let err = lifecycle(&federation)
        .install(&release(&manifest))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Classification { .. }));
    assert!(control.journal().is_empty());
    assert!(east.journal().is_empty());
}

/// Story: Install substitutions read the controller deployment
#[tokio::test]
async fn story_install_substitutes_federation_name() {
    let control = RecordingCluster::new("https://federation:443");
    let federation = Federation::new(control.clone(), vec![]);

    let mut rel = release(&WORDPRESS.replace("wp4-mariadb", "FEDNAME-mariadb"));
    rel.config = concat!(
        "replace:\n",
        "  - from: FEDNAME\n",
        "    to: '{{ metadata.annotations[\"federation.kubernetes.io/name\"] }}'\n",
    )
    .to_string();

    lifecycle(&federation).install(&rel).await.unwrap();
    assert!(control.objects().contains(&"Secret/galaxy-mariadb".to_string()));
}

/// Story: Tiller asking for status gets the merged report in the release info
#[tokio::test]
async fn story_grpc_status_carries_merged_report() {
    let control = RecordingCluster::new("https://federation:443");
    let east = RecordingCluster::new("https://us-east:6443");
    let federation = Federation::new(control.clone(), vec![east.clone()]);
    let service = Arc::new(lifecycle(&federation));
    service.install(&release(WORDPRESS)).await.unwrap();

    let server = ReleaseServer::new(service);
    let response = server
        .release_status(Request::new(ReleaseStatusRequest {
            release: Some(rudder_proto::Release {
                name: "wp4".to_string(),
                namespace: "blog".to_string(),
                manifest: WORDPRESS.to_string(),
                ..Default::default()
            }),
        }))
        .await
        .unwrap()
        .into_inner();

    let resources = response.info.unwrap().status.unwrap().resources;
    assert!(resources.starts_with("Cluster https://federation:443:\nSecret/wp4-mariadb"));
    assert!(resources.ends_with("Cluster https://us-east:6443:\nPersistentVolumeClaim/wp4-wordpress"));
}

// =============================================================================
// Story: Membership changes between calls
// =============================================================================

/// Story: A member joining after install shows up in the next status, and a
/// member leaving is no longer reached
#[tokio::test]
async fn story_membership_is_read_on_every_call() {
    let control = RecordingCluster::new("https://federation:443");
    let east = RecordingCluster::new("https://us-east:6443");
    let west = RecordingCluster::new("https://eu-west:6443");
    let federation = Federation::new(control.clone(), vec![east.clone()]);
    let service = lifecycle(&federation);

    service.install(&release(WORDPRESS)).await.unwrap();
    assert!(west.journal().is_empty());

    // Chapter 1: west joins, status now reports it (with nothing installed)
    federation.join(west.clone());
    let status = service.status(&release(WORDPRESS)).await.unwrap();
    let blocks: Vec<_> = status.split(STATUS_SEPARATOR).collect();
    assert_eq!(
        blocks,
        [
            "Cluster https://federation:443:\nSecret/wp4-mariadb\nService/wp4-wordpress",
            "Cluster https://us-east:6443:\nPersistentVolumeClaim/wp4-wordpress",
            "Cluster https://eu-west:6443:\nMISSING PersistentVolumeClaim/wp4-wordpress",
        ]
    );

    // Chapter 2: east leaves, delete reaches only the current members
    federation.leave("https://us-east:6443");
    service.delete(&release(WORDPRESS)).await.unwrap();
    assert_eq!(east.journal(), ["create", "get"]);
    assert_eq!(west.journal(), ["get", "delete"]);
    assert_eq!(east.objects(), ["PersistentVolumeClaim/wp4-wordpress"]);
    assert!(control.objects().is_empty());
}
