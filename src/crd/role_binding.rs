//! DynamicRoleBinding Custom Resource Definition
//!
//! A DynamicRoleBinding selects subjects (service accounts dynamically, or
//! statically-named users/groups) and materializes them into one
//! ClusterRoleBinding or into RoleBindings across a selected namespace set.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    Condition, MetaSelector, NameSelector, NamespaceSelector, SynchronizationSpec,
};

/// Specification for a DynamicRoleBinding
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kuberbac.prosimcorp.com",
    version = "v1alpha1",
    kind = "DynamicRoleBinding",
    plural = "dynamicrolebindings",
    namespaced,
    status = "DynamicRoleBindingStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"ResourceSynced\")].status"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.conditions[?(@.type==\"ResourceSynced\")].reason"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DynamicRoleBindingSpec {
    /// Synchronization behavior (periodic resync interval)
    pub synchronization: SynchronizationSpec,

    /// The ClusterRole to bind and the subjects to bind it to
    pub source: BindingSource,

    /// Where and how the bindings are materialized
    pub targets: BindingTargets,
}

/// Source section of a DynamicRoleBinding
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BindingSource {
    /// Name of an existing ClusterRole to reference from the bindings
    pub cluster_role: String,

    /// Subject selection
    pub subject: SubjectSelector,
}

/// Subject selection inside a DynamicRoleBinding source
///
/// `kind` must be one of ServiceAccount, User or Group. Selector usage
/// depends on the kind: User/Group only accept `nameSelector.matchList`,
/// while ServiceAccount accepts a namespace selector plus either a name or
/// a meta selector.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSelector {
    /// API group carried on the produced subjects
    #[serde(default)]
    pub api_group: String,

    /// Subject kind: ServiceAccount, User or Group
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_selector: Option<NameSelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_selector: Option<MetaSelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<NamespaceSelector>,
}

/// Targets section of a DynamicRoleBinding
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BindingTargets {
    /// Name of every produced binding
    pub name: String,

    /// Extra annotations carried by the produced bindings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,

    /// Extra labels carried by the produced bindings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,

    /// Produce a single ClusterRoleBinding instead of per-namespace
    /// RoleBindings
    #[serde(default)]
    pub cluster_scoped: bool,

    /// Namespaces receiving a RoleBinding; absent means every namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<NamespaceSelector>,
}

/// Status for a DynamicRoleBinding
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DynamicRoleBindingStatus {
    /// Conditions representing the latest observed synchronization state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
