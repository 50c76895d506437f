//! Manifest partitioning by resource kind
//!
//! A release manifest is a stream of YAML documents separated by `---`. Each
//! document is routed either to the federation control plane or to every
//! member cluster, depending on its `kind` and the active
//! [`ClassificationPolicy`].

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use tracing::trace;

use rudder_common::yaml::parse_yaml;
use rudder_common::{Error, Result};

/// Document separator marker
pub const SEPARATOR: &str = "---";

/// Characters stripped from both ends of every document body
const BODY_TRIM: &[char] = &['-', ' ', '\t', '\n'];

fn separator_regex() -> &'static Regex {
    static SEP: OnceLock<Regex> = OnceLock::new();
    SEP.get_or_init(|| Regex::new(r"(?:^|\s*\n)---\s*").expect("separator pattern is valid"))
}

/// Which side of the federation a document is created on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Created once, in the federation control plane
    ControlPlane,
    /// Created directly in every member cluster
    Member,
}

/// Total mapping from resource kind to [`Scope`].
///
/// Each variant lists the kinds of one side explicitly; every other kind,
/// including the empty kind of a document without `kind`, goes to the other
/// side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClassificationPolicy {
    /// Listed kinds are control-plane scoped, everything else is member scoped
    ControlPlaneKinds(BTreeSet<String>),
    /// Listed kinds are member scoped, everything else is control-plane scoped
    MemberKinds(BTreeSet<String>),
}

/// Kinds served by the federation API
const FEDERATION_API_KINDS: &[&str] = &[
    "Cluster",
    "ClusterList",
    "ConfigMap",
    "ConfigMapList",
    "DaemonSet",
    "DaemonSetList",
    "Deployment",
    "DeploymentList",
    "DeploymentRollback",
    "Event",
    "EventList",
    "Ingress",
    "IngressList",
    "Namespace",
    "NamespaceList",
    "ReplicaSet",
    "ReplicaSetList",
    "Scale",
    "Secret",
    "SecretList",
    "Service",
    "ServiceList",
];

impl ClassificationPolicy {
    /// Kinds the federation API serves go to the control plane; everything
    /// else is created in each member.
    pub fn federated_kinds() -> Self {
        Self::control_plane_kinds(FEDERATION_API_KINDS.iter().copied())
    }

    /// Only volume claims are created per member; everything else goes
    /// through the control plane.
    pub fn local_volume_claims() -> Self {
        Self::member_kinds(["PersistentVolumeClaim"])
    }

    /// Build a policy from an explicit list of control-plane kinds
    pub fn control_plane_kinds<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::ControlPlaneKinds(kinds.into_iter().map(Into::into).collect())
    }

    /// Build a policy from an explicit list of member kinds
    pub fn member_kinds<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::MemberKinds(kinds.into_iter().map(Into::into).collect())
    }

    /// Scope a document of `kind` belongs to
    pub fn scope_of(&self, kind: &str) -> Scope {
        match self {
            Self::ControlPlaneKinds(kinds) if kinds.contains(kind) => Scope::ControlPlane,
            Self::ControlPlaneKinds(_) => Scope::Member,
            Self::MemberKinds(kinds) if kinds.contains(kind) => Scope::Member,
            Self::MemberKinds(_) => Scope::ControlPlane,
        }
    }
}

impl Default for ClassificationPolicy {
    fn default() -> Self {
        Self::federated_kinds()
    }
}

/// One document of a manifest
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestDocument {
    /// Declared `kind`, empty when the document has none
    pub kind: String,
    /// Raw document text, without separators
    pub content: String,
}

/// Both halves of a partitioned manifest
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitManifest {
    /// Documents created in the federation control plane
    pub control_plane: String,
    /// Documents created in every member cluster
    pub member: String,
}

impl SplitManifest {
    /// Manifest for a target of the given scope
    pub fn for_scope(&self, scope: Scope) -> &str {
        match scope {
            Scope::ControlPlane => &self.control_plane,
            Scope::Member => &self.member,
        }
    }
}

/// Read the typed header of a document: `kind` and `apiVersion` must be
/// strings and `metadata` a mapping when present.
fn header_kind(
    map: &serde_json::Map<String, serde_json::Value>,
) -> std::result::Result<String, String> {
    use serde_json::Value;

    for field in ["kind", "apiVersion"] {
        match map.get(field) {
            None | Some(Value::Null) | Some(Value::String(_)) => {}
            Some(other) => return Err(format!("{} must be a string, got {}", field, other)),
        }
    }
    match map.get("metadata") {
        None | Some(Value::Null) | Some(Value::Object(_)) => {}
        Some(other) => return Err(format!("metadata must be a mapping, got {}", other)),
    }

    Ok(map
        .get("kind")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string())
}

/// Parse a manifest into its documents, in input order.
///
/// Empty documents are skipped. A document that is not valid YAML, whose top
/// level is not a mapping, or whose header fields have the wrong type, fails
/// the whole call.
pub fn parse_documents(manifest: &str) -> Result<Vec<ManifestDocument>> {
    let mut documents = Vec::new();

    for (index, content) in separator_regex()
        .split(manifest.trim())
        .filter(|doc| !doc.trim().is_empty())
        .enumerate()
    {
        let head = parse_yaml(content)
            .map_err(|e| Error::classification_at(index, format!("invalid YAML: {}", e)))?;

        let kind = match &head {
            serde_json::Value::Object(map) => {
                header_kind(map).map_err(|msg| Error::classification_at(index, msg))?
            }
            serde_json::Value::Null => String::new(),
            _ => {
                return Err(Error::classification_at(
                    index,
                    "document is not a mapping",
                ))
            }
        };

        trace!(index, kind = %kind, "parsed manifest document");
        documents.push(ManifestDocument {
            kind,
            content: content.to_string(),
        });
    }

    Ok(documents)
}

/// Partition `manifest` into its control-plane and member halves.
///
/// Both halves start with a bare separator and every document is re-wrapped
/// as `"\n" + body + "\n---"`, so an empty half is just `---`.
pub fn split(manifest: &str, policy: &ClassificationPolicy) -> Result<SplitManifest> {
    let mut out = SplitManifest {
        control_plane: SEPARATOR.to_string(),
        member: SEPARATOR.to_string(),
    };

    for doc in parse_documents(manifest)? {
        let side = match policy.scope_of(&doc.kind) {
            Scope::ControlPlane => &mut out.control_plane,
            Scope::Member => &mut out.member,
        };
        side.push('\n');
        side.push_str(doc.content.trim_matches(BODY_TRIM));
        side.push('\n');
        side.push_str(SEPARATOR);
    }

    Ok(out)
}
