//! Scope splitter: partitions compiled rules by resource scope
//!
//! Scope is a property of the resource in the inventory, not of the policy
//! rule, so the split consults the descriptor recorded at discovery time.

use k8s_openapi::api::rbac::v1::PolicyRule;

use crate::inventory::Inventory;

/// Compiled rules partitioned by the scope of the resource they grant
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScopedRules {
    /// Rules over cluster-scoped resources and all non-resource URLs
    pub cluster: Vec<PolicyRule>,
    /// Rules over namespaced resources
    pub namespaced: Vec<PolicyRule>,
}

/// Partition atomic rules into cluster-scoped and namespace-scoped sets
///
/// Subresources inherit the scope of their parent resource. Non-resource
/// URLs have no namespace to live in and always land in the cluster set.
/// Rules whose resource is no longer in the inventory are dropped.
pub fn split_by_scope(inventory: &Inventory, rules: &[PolicyRule]) -> ScopedRules {
    let mut scoped = ScopedRules::default();

    for rule in rules {
        if rule
            .non_resource_urls
            .as_ref()
            .is_some_and(|urls| !urls.is_empty())
        {
            scoped.cluster.push(rule.clone());
            continue;
        }

        let group = rule
            .api_groups
            .as_ref()
            .and_then(|groups| groups.first())
            .map(String::as_str)
            .unwrap_or_default();
        let resource = rule
            .resources
            .as_ref()
            .and_then(|resources| resources.first())
            .map(String::as_str)
            .unwrap_or_default();
        let bare = resource.split('/').next().unwrap_or(resource);

        match inventory.find(group, bare) {
            Some(descriptor) if descriptor.namespaced => scoped.namespaced.push(rule.clone()),
            Some(_) => scoped.cluster.push(rule.clone()),
            None => {}
        }
    }

    scoped
}
