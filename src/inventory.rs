//! Resource inventory: a snapshot of the cluster's API surface
//!
//! The inventory is rebuilt from discovery on every reconcile rather than
//! cached: wildcard expansion must reflect CRDs installed since the last
//! run, and a stale snapshot would compile rules for resources that no
//! longer exist.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use kube::discovery::Scope;
use kube::{Client, Discovery};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::error::Error;

/// One API resource as reported by discovery, before indexing
#[derive(Clone, Debug, PartialEq)]
pub struct DiscoveredResource {
    /// Resource name, optionally `resource/subresource`
    pub name: String,
    /// Kind of the resource's objects
    pub kind: String,
    /// Whether objects live inside a namespace
    pub namespaced: bool,
    /// Verbs the API server accepts for this resource
    pub verbs: Vec<String>,
}

/// One group/version worth of discovered resources
#[derive(Clone, Debug, PartialEq)]
pub struct DiscoveredGroup {
    /// `group/version` header; a single segment means the core group
    pub group_version: String,
    /// Resources served under this group/version
    pub resources: Vec<DiscoveredResource>,
}

/// Capability interface over the cluster's discovery endpoint
///
/// The real implementation wraps [`kube::Discovery`]; tests supply fakes
/// with synthetic API surfaces.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    /// Enumerate every group/version and the resources it serves
    async fn groups_and_resources(&self) -> Result<Vec<DiscoveredGroup>, Error>;
}

/// Discovery client backed by the Kubernetes API
pub struct KubeDiscovery {
    client: Client,
}

impl KubeDiscovery {
    /// Create a new KubeDiscovery wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DiscoveryClient for KubeDiscovery {
    async fn groups_and_resources(&self) -> Result<Vec<DiscoveredGroup>, Error> {
        let discovery = Discovery::new(self.client.clone())
            .run()
            .await
            .map_err(|e| Error::discovery(e.to_string()))?;

        let mut groups = Vec::new();
        for group in discovery.groups() {
            let version = group.preferred_version_or_latest();
            let group_version = if group.name().is_empty() {
                version.to_string()
            } else {
                format!("{}/{}", group.name(), version)
            };

            let mut resources = Vec::new();
            for (ar, caps) in group.versioned_resources(version) {
                resources.push(DiscoveredResource {
                    name: ar.plural.clone(),
                    kind: ar.kind.clone(),
                    namespaced: matches!(caps.scope, Scope::Namespaced),
                    verbs: caps.operations.clone(),
                });

                for (sub_ar, sub_caps) in &caps.subresources {
                    // kube reports subresource plurals either bare or
                    // already in parent/sub form depending on version
                    let name = if sub_ar.plural.contains('/') {
                        sub_ar.plural.clone()
                    } else {
                        format!("{}/{}", ar.plural, sub_ar.plural)
                    };
                    resources.push(DiscoveredResource {
                        name,
                        kind: sub_ar.kind.clone(),
                        namespaced: matches!(caps.scope, Scope::Namespaced),
                        verbs: sub_caps.operations.clone(),
                    });
                }
            }

            groups.push(DiscoveredGroup {
                group_version,
                resources,
            });
        }

        Ok(groups)
    }
}

/// A resource type inside the cluster
///
/// Uniquely identified by `(group, resource[/subresource])`.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceDescriptor {
    /// API group; empty string for the core group
    pub group: String,
    /// Served version recorded from the discovery header
    pub version: String,
    /// Kind of the resource's objects
    pub kind: String,
    /// Plural resource name without subresource
    pub resource: String,
    /// Subresource, when this entry describes one
    pub subresource: Option<String>,
    /// Whether objects live inside a namespace
    pub namespaced: bool,
    /// Verbs the API server accepts for this resource
    pub permitted_verbs: Vec<String>,
}

impl ResourceDescriptor {
    /// The `resource[/subresource]` form used in policy rules
    pub fn full_resource(&self) -> String {
        match &self.subresource {
            Some(sub) => format!("{}/{}", self.resource, sub),
            None => self.resource.clone(),
        }
    }
}

/// Snapshot of the cluster's API surface
///
/// Two indices over [`ResourceDescriptor`]: by group for wildcard
/// expansion, and a flat set of `resource[/subresource]` strings for
/// existence checks. Sorted containers keep every iteration order stable
/// so compiled output is byte-identical across reconciles.
#[derive(Clone, Debug, Default)]
pub struct Inventory {
    by_group: BTreeMap<String, Vec<ResourceDescriptor>>,
    resource_names: BTreeSet<String>,
}

impl Inventory {
    /// Build a fresh inventory through the discovery capability
    pub async fn discover(discovery: &dyn DiscoveryClient) -> Result<Self, Error> {
        let groups = discovery.groups_and_resources().await?;
        let inventory = Self::from_groups(groups);
        debug!(
            groups = inventory.by_group.len(),
            resources = inventory.resource_names.len(),
            "built resource inventory"
        );
        Ok(inventory)
    }

    /// Index a set of discovered group lists
    pub fn from_groups(groups: Vec<DiscoveredGroup>) -> Self {
        let mut by_group: BTreeMap<String, Vec<ResourceDescriptor>> = BTreeMap::new();

        for list in groups {
            let mut segments = list.group_version.splitn(2, '/');
            let first = segments.next().unwrap_or_default().to_string();
            let (group, version) = match segments.next() {
                // "group/version" header
                Some(version) => (first, version.to_string()),
                // single segment: the core group
                None => (String::new(), first),
            };

            let entry = by_group.entry(group.clone()).or_default();
            entry.clear();

            for resource in list.resources {
                let mut parts = resource.name.splitn(2, '/');
                let bare = parts.next().unwrap_or_default().to_string();
                let subresource = parts.next().map(str::to_string);

                entry.push(ResourceDescriptor {
                    group: group.clone(),
                    version: version.clone(),
                    kind: resource.kind,
                    resource: bare,
                    subresource,
                    namespaced: resource.namespaced,
                    permitted_verbs: resource.verbs,
                });
            }
        }

        let resource_names = by_group
            .values()
            .flatten()
            .map(ResourceDescriptor::full_resource)
            .collect();

        Self {
            by_group,
            resource_names,
        }
    }

    /// All known API groups, in sorted order
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.by_group.keys().map(String::as_str)
    }

    /// Whether the group exists in the cluster
    pub fn has_group(&self, group: &str) -> bool {
        self.by_group.contains_key(group)
    }

    /// The descriptors served by a group; empty when the group is unknown
    pub fn group_resources(&self, group: &str) -> &[ResourceDescriptor] {
        self.by_group.get(group).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether any group serves the given `resource[/subresource]`
    pub fn contains_resource(&self, full_resource: &str) -> bool {
        self.resource_names.contains(full_resource)
    }

    /// Whether the given group serves the given `resource[/subresource]`
    pub fn contains(&self, group: &str, full_resource: &str) -> bool {
        self.group_resources(group)
            .iter()
            .any(|d| d.full_resource() == full_resource)
    }

    /// Find the descriptor for a bare resource name inside a group,
    /// ignoring subresource entries
    pub fn find(&self, group: &str, bare_resource: &str) -> Option<&ResourceDescriptor> {
        self.group_resources(group)
            .iter()
            .find(|d| d.subresource.is_none() && d.resource == bare_resource)
    }

    /// Whether the group serves the bare resource name, under any
    /// subresource
    pub fn group_owns(&self, group: &str, bare_resource: &str) -> bool {
        self.group_resources(group)
            .iter()
            .any(|d| d.resource == bare_resource)
    }
}
