//! DynamicClusterRole Custom Resource Definition
//!
//! A DynamicClusterRole declares an allow-list and a deny-list of RBAC
//! policy rules. The controller compiles them against the live cluster's
//! resource inventory into one (or two, when scopes are separated)
//! purely-additive ClusterRoles.

use std::collections::BTreeMap;

use k8s_openapi::api::rbac::v1::PolicyRule;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, SynchronizationSpec};

/// Specification for a DynamicClusterRole
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kuberbac.prosimcorp.com",
    version = "v1alpha1",
    kind = "DynamicClusterRole",
    plural = "dynamicclusterroles",
    namespaced,
    status = "DynamicClusterRoleStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"ResourceSynced\")].status"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.conditions[?(@.type==\"ResourceSynced\")].reason"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DynamicClusterRoleSpec {
    /// Synchronization behavior (periodic resync interval)
    pub synchronization: SynchronizationSpec,

    /// The ClusterRole(s) to produce
    pub target: RoleTarget,

    /// Policy rules to grant; wildcards are expanded against the inventory
    pub allow: Vec<PolicyRule>,

    /// Policy rules to subtract from the allow set
    pub deny: Vec<PolicyRule>,
}

/// Target section of a DynamicClusterRole
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoleTarget {
    /// Name of the produced ClusterRole. With `separateScopes`, the
    /// `-cluster` and `-namespace` suffixes are appended.
    pub name: String,

    /// Extra annotations carried by the produced ClusterRole(s)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,

    /// Extra labels carried by the produced ClusterRole(s)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,

    /// Emit two ClusterRoles, one with the cluster-scoped rules and one
    /// with the namespace-scoped rules, instead of a single combined role
    #[serde(default)]
    pub separate_scopes: bool,
}

/// Status for a DynamicClusterRole
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DynamicClusterRoleStatus {
    /// Conditions representing the latest observed synchronization state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
