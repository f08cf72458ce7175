//! The policy-rule compiler
//!
//! Kubernetes RBAC can only grant. This module compiles an allow-list minus
//! a deny-list into an equivalent purely-additive rule set, closed under the
//! cluster's current [`Inventory`]:
//!
//! ```text
//! (allow, deny)
//!      │ expand      wildcards -> concrete groups/resources/verbs
//!      ▼
//!      │ stretch     compound rules -> atomic rules
//!      ▼
//!      │ key+merge   atomic key -> rule, verbs unioned
//!      ▼
//!      │ evaluate    name-scoped denies expanded, then key-by-key
//!      ▼             verb subtraction
//!   additive rules
//! ```
//!
//! Every output rule is atomic: one group, one resource, at most one
//! resource name - or one non-resource URL. Atomic keys use `#`, which
//! cannot appear in Kubernetes identifiers.

mod split;

pub use split::{split_by_scope, ScopedRules};

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::rbac::v1::PolicyRule;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::error::Error;
use crate::inventory::{Inventory, ResourceDescriptor};

/// The canonical verb set `*` expands to
pub const CANONICAL_VERBS: [&str; 8] = [
    "create",
    "delete",
    "deletecollection",
    "get",
    "list",
    "patch",
    "update",
    "watch",
];

/// Key prefix marking non-resource-URL rules
const URL_KEY_PREFIX: &str = "nonresourceurl#";

/// Capability interface enumerating live instances of a resource type
///
/// Needed only for the name-scoped deny special case, where subtracting a
/// single instance from a name-agnostic allow requires naming every other
/// instance explicitly.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InstanceLister: Send + Sync {
    /// List the names of all live objects of the described resource type
    async fn instance_names(&self, descriptor: &ResourceDescriptor) -> Result<Vec<String>, Error>;
}

/// Compiles allow/deny policy rules against a resource inventory
pub struct RuleCompiler<'a> {
    inventory: &'a Inventory,
    instances: &'a dyn InstanceLister,
}

impl<'a> RuleCompiler<'a> {
    /// Create a compiler over the given inventory snapshot
    pub fn new(inventory: &'a Inventory, instances: &'a dyn InstanceLister) -> Self {
        Self {
            inventory,
            instances,
        }
    }

    /// Compile `allow \ deny` into an additive, atomic, inventory-closed
    /// rule set
    ///
    /// The output is sorted by atomic key and every verb list is sorted, so
    /// identical inputs produce byte-identical rules across reconciles.
    pub async fn compile(
        &self,
        allow: &[PolicyRule],
        deny: &[PolicyRule],
    ) -> Result<Vec<PolicyRule>, Error> {
        let allow = self.stretch(&self.expand(allow));
        let deny = self.stretch(&self.expand(deny));

        let mut allow_map = key_and_merge(allow);
        let deny_map = key_and_merge(deny);

        self.expand_denied_names(&mut allow_map, &deny_map).await?;
        subtract(&mut allow_map, &deny_map);

        debug!(rules = allow_map.len(), "compiled policy rules");
        Ok(allow_map.into_values().collect())
    }

    /// Stage A: replace `*` items with the concrete groups, resources and
    /// verbs present in the inventory, dropping rules that fail validation
    fn expand(&self, rules: &[PolicyRule]) -> Vec<PolicyRule> {
        rules
            .iter()
            .filter_map(|rule| self.expand_rule(rule))
            .collect()
    }

    fn expand_rule(&self, rule: &PolicyRule) -> Option<PolicyRule> {
        let groups = as_slice(&rule.api_groups);
        let resources = as_slice(&rule.resources);
        let names = as_slice(&rule.resource_names);
        let urls = as_slice(&rule.non_resource_urls);

        // A verbless rule grants nothing; Kubernetes ignores it, so do we
        if rule.verbs.is_empty() {
            return None;
        }
        // URL rules cannot carry any of the resource fields
        if !urls.is_empty() && (!groups.is_empty() || !resources.is_empty() || !names.is_empty()) {
            return None;
        }
        // Resource rules require both groups and resources, which also
        // covers rules carrying resource names
        if urls.is_empty() && (groups.is_empty() || resources.is_empty()) {
            return None;
        }

        let expanded_groups: Vec<String> = if contains_wildcard(groups) {
            self.inventory.groups().map(str::to_string).collect()
        } else {
            groups
                .iter()
                .filter(|g| self.inventory.has_group(g))
                .cloned()
                .collect()
        };

        let expanded_resources: Vec<String> = if contains_wildcard(resources) {
            expanded_groups
                .iter()
                .flat_map(|g| self.inventory.group_resources(g))
                .map(ResourceDescriptor::full_resource)
                .collect()
        } else {
            resources
                .iter()
                .filter(|r| self.inventory.contains_resource(r))
                .cloned()
                .collect()
        };

        let tightened_groups = self.tighten_groups(expanded_groups, &expanded_resources);

        let verbs = if contains_wildcard(&rule.verbs) {
            CANONICAL_VERBS.iter().map(|v| v.to_string()).collect()
        } else {
            rule.verbs.clone()
        };

        Some(PolicyRule {
            api_groups: opt(tightened_groups),
            resources: opt(expanded_resources),
            resource_names: rule.resource_names.clone(),
            non_resource_urls: rule.non_resource_urls.clone(),
            verbs,
        })
    }

    /// Keep only groups that own at least one of the retained resources
    ///
    /// Without this, `apiGroups=["*"] resources=["pods"]` would claim one
    /// rule per group for `pods`, most of which name a group that does not
    /// serve that resource.
    fn tighten_groups(&self, groups: Vec<String>, resources: &[String]) -> Vec<String> {
        groups
            .into_iter()
            .filter(|group| {
                resources.iter().any(|resource| {
                    let bare = resource.split('/').next().unwrap_or(resource);
                    self.inventory.group_owns(group, bare)
                })
            })
            .collect()
    }

    /// Stage B: atomize expanded rules into one `(group, resource)` pair -
    /// or one URL - per rule, verifying each pair against the inventory
    fn stretch(&self, rules: &[PolicyRule]) -> Vec<PolicyRule> {
        let mut result = Vec::new();

        for rule in rules {
            let urls = as_slice(&rule.non_resource_urls);
            if !urls.is_empty() {
                for url in urls {
                    result.push(PolicyRule {
                        non_resource_urls: Some(vec![url.clone()]),
                        verbs: rule.verbs.clone(),
                        ..PolicyRule::default()
                    });
                }
                continue;
            }

            for resource in as_slice(&rule.resources) {
                for group in as_slice(&rule.api_groups) {
                    if !self.inventory.contains(group, resource) {
                        continue;
                    }

                    let names = as_slice(&rule.resource_names);
                    if names.is_empty() {
                        result.push(atomic(group, resource, None, rule.verbs.clone()));
                    } else {
                        for name in names {
                            result.push(atomic(group, resource, Some(name), rule.verbs.clone()));
                        }
                    }
                }
            }
        }

        result
    }

    /// Stage D prelude: expand name-agnostic allows hit by a name-scoped
    /// deny into one allow per live instance
    ///
    /// A deny on `group#resource#NAME` cannot subtract from the broad allow
    /// `group#resource#` key-by-key, because the broad allow covers every
    /// instance implicitly. Enumerating the live instances turns the broad
    /// allow into per-name allows the main evaluation can subtract from.
    async fn expand_denied_names(
        &self,
        allow: &mut BTreeMap<String, PolicyRule>,
        deny: &BTreeMap<String, PolicyRule>,
    ) -> Result<(), Error> {
        for deny_key in deny.keys() {
            if deny_key.starts_with(URL_KEY_PREFIX) {
                continue;
            }
            let Some((group, resource, name)) = split_resource_key(deny_key) else {
                continue;
            };
            if name.is_empty() {
                continue;
            }

            let broad_key = format!("{group}#{resource}#");
            if !allow.contains_key(&broad_key) {
                continue;
            }

            let bare = resource.split('/').next().unwrap_or(resource);
            let Some(descriptor) = self.inventory.find(group, bare) else {
                continue;
            };

            let instance_names = self.instances.instance_names(descriptor).await?;
            let Some(broad) = allow.remove(&broad_key) else {
                continue;
            };

            for instance in instance_names {
                let key = format!("{group}#{resource}#{instance}");
                allow.insert(
                    key,
                    PolicyRule {
                        resource_names: Some(vec![instance]),
                        ..broad.clone()
                    },
                );
            }
        }

        Ok(())
    }
}

/// Stage C: index atomic rules by key, unioning verbs across duplicates
fn key_and_merge(rules: Vec<PolicyRule>) -> BTreeMap<String, PolicyRule> {
    let mut map: BTreeMap<String, PolicyRule> = BTreeMap::new();

    for mut rule in rules {
        rule.verbs.sort();
        rule.verbs.dedup();

        match map.entry(atomic_key(&rule)) {
            Entry::Vacant(entry) => {
                entry.insert(rule);
            }
            Entry::Occupied(mut entry) => {
                let merged = entry.get_mut();
                merged.verbs.extend(rule.verbs);
                merged.verbs.sort();
                merged.verbs.dedup();
            }
        }
    }

    map
}

/// Textual identity of an atomic rule
///
/// `group#resource#resourceName` for resource rules (the name segment may
/// be empty), `nonresourceurl#url` for URL rules.
fn atomic_key(rule: &PolicyRule) -> String {
    if let Some(url) = as_slice(&rule.non_resource_urls).first() {
        return format!("{URL_KEY_PREFIX}{url}");
    }

    let group = as_slice(&rule.api_groups).first().cloned().unwrap_or_default();
    let resource = as_slice(&rule.resources).first().cloned().unwrap_or_default();
    let name = as_slice(&rule.resource_names)
        .first()
        .cloned()
        .unwrap_or_default();
    format!("{group}#{resource}#{name}")
}

/// Stage D: subtract deny verbs from the matching allow entries
fn subtract(allow: &mut BTreeMap<String, PolicyRule>, deny: &BTreeMap<String, PolicyRule>) {
    for (deny_key, deny_rule) in deny {
        if deny_key.starts_with(URL_KEY_PREFIX) {
            // a trailing '*' denies every URL sharing the prefix
            match deny_key.strip_suffix('*') {
                Some(prefix) => subtract_prefix(allow, prefix, &deny_rule.verbs),
                None => subtract_exact(allow, deny_key, &deny_rule.verbs),
            }
            continue;
        }

        let Some((_, _, name)) = split_resource_key(deny_key) else {
            continue;
        };
        if name.is_empty() {
            // nameless deny covers the broad allow and every per-name allow
            subtract_prefix(allow, deny_key, &deny_rule.verbs);
        } else {
            subtract_exact(allow, deny_key, &deny_rule.verbs);
        }
    }
}

fn subtract_prefix(allow: &mut BTreeMap<String, PolicyRule>, prefix: &str, deny_verbs: &[String]) {
    let matching: Vec<String> = allow
        .keys()
        .filter(|key| key.starts_with(prefix))
        .cloned()
        .collect();
    for key in matching {
        subtract_exact(allow, &key, deny_verbs);
    }
}

fn subtract_exact(allow: &mut BTreeMap<String, PolicyRule>, key: &str, deny_verbs: &[String]) {
    if let Some(rule) = allow.get_mut(key) {
        rule.verbs = surviving_verbs(&rule.verbs, deny_verbs);
        if rule.verbs.is_empty() {
            allow.remove(key);
        }
    }
}

/// Allowed verbs that are not in the deny set, in their original order
fn surviving_verbs(allow_verbs: &[String], deny_verbs: &[String]) -> Vec<String> {
    allow_verbs
        .iter()
        .filter(|verb| !deny_verbs.iter().any(|denied| denied == *verb))
        .cloned()
        .collect()
}

fn atomic(group: &str, resource: &str, name: Option<&String>, verbs: Vec<String>) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![group.to_string()]),
        resources: Some(vec![resource.to_string()]),
        resource_names: name.map(|n| vec![n.clone()]),
        verbs,
        ..PolicyRule::default()
    }
}

fn split_resource_key(key: &str) -> Option<(&str, &str, &str)> {
    let mut parts = key.splitn(3, '#');
    Some((parts.next()?, parts.next()?, parts.next()?))
}

fn as_slice(field: &Option<Vec<String>>) -> &[String] {
    field.as_deref().unwrap_or(&[])
}

fn contains_wildcard(items: &[String]) -> bool {
    items.iter().any(|item| item == "*")
}

fn opt(items: Vec<String>) -> Option<Vec<String>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{DiscoveredGroup, DiscoveredResource};

    fn discovered(name: &str, kind: &str, namespaced: bool) -> DiscoveredResource {
        DiscoveredResource {
            name: name.to_string(),
            kind: kind.to_string(),
            namespaced,
            verbs: CANONICAL_VERBS.iter().map(|v| v.to_string()).collect(),
        }
    }

    /// Synthetic inventory: core group with pods/configmaps/nodes (and a
    /// pod subresource), apps group with deployments
    fn inventory() -> Inventory {
        Inventory::from_groups(vec![
            DiscoveredGroup {
                group_version: "v1".to_string(),
                resources: vec![
                    discovered("pods", "Pod", true),
                    discovered("pods/log", "Pod", true),
                    discovered("configmaps", "ConfigMap", true),
                    discovered("nodes", "Node", false),
                ],
            },
            DiscoveredGroup {
                group_version: "apps/v1".to_string(),
                resources: vec![discovered("deployments", "Deployment", true)],
            },
        ])
    }

    fn no_instances() -> MockInstanceLister {
        MockInstanceLister::new()
    }

    fn rule(groups: &[&str], resources: &[&str], names: &[&str], verbs: &[&str]) -> PolicyRule {
        PolicyRule {
            api_groups: Some(groups.iter().map(|s| s.to_string()).collect()),
            resources: Some(resources.iter().map(|s| s.to_string()).collect()),
            resource_names: if names.is_empty() {
                None
            } else {
                Some(names.iter().map(|s| s.to_string()).collect())
            },
            verbs: verbs.iter().map(|s| s.to_string()).collect(),
            ..PolicyRule::default()
        }
    }

    fn url_rule(urls: &[&str], verbs: &[&str]) -> PolicyRule {
        PolicyRule {
            non_resource_urls: Some(urls.iter().map(|s| s.to_string()).collect()),
            verbs: verbs.iter().map(|s| s.to_string()).collect(),
            ..PolicyRule::default()
        }
    }

    fn verbs_of<'r>(rules: &'r [PolicyRule], key_group: &str, key_resource: &str, key_name: &str) -> Option<&'r Vec<String>> {
        rules
            .iter()
            .find(|r| {
                atomic_key(r) == format!("{key_group}#{key_resource}#{key_name}")
            })
            .map(|r| &r.verbs)
    }

    mod expansion {
        use super::*;

        #[tokio::test]
        async fn wildcard_groups_close_over_the_owning_group_only() {
            let inventory = inventory();
            let lister = no_instances();
            let compiler = RuleCompiler::new(&inventory, &lister);

            let compiled = compiler
                .compile(&[rule(&["*"], &["pods"], &[], &["get"])], &[])
                .await
                .unwrap();

            // pods lives only in the core group; no other group may claim it
            assert_eq!(compiled.len(), 1);
            assert_eq!(compiled[0].api_groups, Some(vec![String::new()]));
            assert_eq!(compiled[0].resources, Some(vec!["pods".to_string()]));
        }

        #[tokio::test]
        async fn wildcard_verbs_expand_to_the_canonical_eight() {
            let inventory = inventory();
            let lister = no_instances();
            let compiler = RuleCompiler::new(&inventory, &lister);

            let compiled = compiler
                .compile(&[rule(&[""], &["pods"], &[], &["*"])], &[])
                .await
                .unwrap();

            let expected: Vec<String> = CANONICAL_VERBS.iter().map(|v| v.to_string()).collect();
            assert_eq!(compiled[0].verbs, expected);
        }

        #[tokio::test]
        async fn wildcard_resources_emit_every_resource_of_the_group() {
            let inventory = inventory();
            let lister = no_instances();
            let compiler = RuleCompiler::new(&inventory, &lister);

            let compiled = compiler
                .compile(&[rule(&["apps"], &["*"], &[], &["get"])], &[])
                .await
                .unwrap();

            assert_eq!(compiled.len(), 1);
            assert_eq!(
                compiled[0].resources,
                Some(vec!["deployments".to_string()])
            );
        }

        #[tokio::test]
        async fn unknown_groups_and_resources_are_dropped() {
            let inventory = inventory();
            let lister = no_instances();
            let compiler = RuleCompiler::new(&inventory, &lister);

            let compiled = compiler
                .compile(
                    &[
                        rule(&["no-such-group"], &["pods"], &[], &["get"]),
                        rule(&[""], &["no-such-resource"], &[], &["get"]),
                    ],
                    &[],
                )
                .await
                .unwrap();

            assert!(compiled.is_empty());
        }

        #[tokio::test]
        async fn invalid_rules_are_dropped() {
            let inventory = inventory();
            let lister = no_instances();
            let compiler = RuleCompiler::new(&inventory, &lister);

            let mixed = PolicyRule {
                api_groups: Some(vec![String::new()]),
                resources: Some(vec!["pods".to_string()]),
                non_resource_urls: Some(vec!["/healthz".to_string()]),
                verbs: vec!["get".to_string()],
                ..PolicyRule::default()
            };
            let verbless = rule(&[""], &["pods"], &[], &[]);
            let groupless = PolicyRule {
                resources: Some(vec!["pods".to_string()]),
                verbs: vec!["get".to_string()],
                ..PolicyRule::default()
            };

            let compiled = compiler
                .compile(&[mixed, verbless, groupless], &[])
                .await
                .unwrap();

            assert!(compiled.is_empty());
        }

        #[tokio::test]
        async fn subresources_survive_expansion_and_stretching() {
            let inventory = inventory();
            let lister = no_instances();
            let compiler = RuleCompiler::new(&inventory, &lister);

            let compiled = compiler
                .compile(&[rule(&[""], &["pods/log"], &[], &["get"])], &[])
                .await
                .unwrap();

            assert_eq!(compiled.len(), 1);
            assert_eq!(compiled[0].resources, Some(vec!["pods/log".to_string()]));
        }
    }

    mod additivity {
        use super::*;

        #[tokio::test]
        async fn concrete_rules_without_deny_compile_to_their_key_merge() {
            let inventory = inventory();
            let lister = no_instances();
            let compiler = RuleCompiler::new(&inventory, &lister);

            let compiled = compiler
                .compile(
                    &[
                        rule(&[""], &["pods"], &[], &["get", "list"]),
                        rule(&[""], &["pods"], &[], &["watch", "get"]),
                        rule(&["apps"], &["deployments"], &[], &["update"]),
                    ],
                    &[],
                )
                .await
                .unwrap();

            assert_eq!(compiled.len(), 2);
            assert_eq!(
                verbs_of(&compiled, "", "pods", "").unwrap(),
                &vec!["get".to_string(), "list".to_string(), "watch".to_string()]
            );
            assert_eq!(
                verbs_of(&compiled, "apps", "deployments", "").unwrap(),
                &vec!["update".to_string()]
            );
        }

        #[tokio::test]
        async fn every_output_rule_is_atomic() {
            let inventory = inventory();
            let lister = no_instances();
            let compiler = RuleCompiler::new(&inventory, &lister);

            let compiled = compiler
                .compile(
                    &[
                        rule(&["", "apps"], &["pods", "deployments"], &[], &["get"]),
                        url_rule(&["/healthz", "/readyz"], &["get"]),
                    ],
                    &[],
                )
                .await
                .unwrap();

            for rule in &compiled {
                if let Some(urls) = &rule.non_resource_urls {
                    assert_eq!(urls.len(), 1);
                    assert!(rule.api_groups.is_none());
                } else {
                    assert_eq!(rule.api_groups.as_ref().unwrap().len(), 1);
                    assert_eq!(rule.resources.as_ref().unwrap().len(), 1);
                    assert!(rule.resource_names.as_ref().map_or(true, |n| n.len() <= 1));
                }
            }
        }
    }

    mod subtraction {
        use super::*;

        #[tokio::test]
        async fn deny_subtracts_verbs_on_the_same_key() {
            let inventory = inventory();
            let lister = no_instances();
            let compiler = RuleCompiler::new(&inventory, &lister);

            let compiled = compiler
                .compile(
                    &[rule(&[""], &["pods"], &[], &["get", "list", "watch"])],
                    &[rule(&[""], &["pods"], &[], &["list"])],
                )
                .await
                .unwrap();

            assert_eq!(
                verbs_of(&compiled, "", "pods", "").unwrap(),
                &vec!["get".to_string(), "watch".to_string()]
            );
        }

        #[tokio::test]
        async fn disjoint_deny_leaves_the_allow_untouched() {
            let inventory = inventory();
            let lister = no_instances();
            let compiler = RuleCompiler::new(&inventory, &lister);

            let allow = [rule(&[""], &["pods"], &[], &["get", "list"])];
            let with_deny = compiler
                .compile(&allow, &[rule(&[""], &["configmaps"], &[], &["get"])])
                .await
                .unwrap();
            let without_deny = compiler.compile(&allow, &[]).await.unwrap();

            assert_eq!(with_deny, without_deny);
        }

        #[tokio::test]
        async fn fully_denied_rules_disappear() {
            let inventory = inventory();
            let lister = no_instances();
            let compiler = RuleCompiler::new(&inventory, &lister);

            let compiled = compiler
                .compile(
                    &[rule(&[""], &["pods"], &[], &["get"])],
                    &[rule(&[""], &["pods"], &[], &["get"])],
                )
                .await
                .unwrap();

            assert!(compiled.is_empty());
        }

        #[tokio::test]
        async fn nameless_deny_also_covers_per_name_allows() {
            let inventory = inventory();
            let lister = no_instances();
            let compiler = RuleCompiler::new(&inventory, &lister);

            let compiled = compiler
                .compile(
                    &[rule(&[""], &["configmaps"], &["app-config"], &["get", "delete"])],
                    &[rule(&[""], &["configmaps"], &[], &["delete"])],
                )
                .await
                .unwrap();

            assert_eq!(
                verbs_of(&compiled, "", "configmaps", "app-config").unwrap(),
                &vec!["get".to_string()]
            );
        }
    }

    mod name_scoped_deny {
        use super::*;

        #[tokio::test]
        async fn broad_allow_is_expanded_per_instance_minus_the_denied_verbs() {
            let inventory = inventory();
            let mut lister = MockInstanceLister::new();
            lister
                .expect_instance_names()
                .withf(|d| d.resource == "configmaps")
                .returning(|_| Ok(vec!["a".to_string(), "b".to_string(), "c".to_string()]));
            let compiler = RuleCompiler::new(&inventory, &lister);

            let compiled = compiler
                .compile(
                    &[rule(&[""], &["configmaps"], &[], &["*"])],
                    &[rule(&[""], &["configmaps"], &["a"], &["delete"])],
                )
                .await
                .unwrap();

            // the broad allow is gone
            assert!(verbs_of(&compiled, "", "configmaps", "").is_none());

            // 'a' lost exactly the denied verb
            let expected_a: Vec<String> = CANONICAL_VERBS
                .iter()
                .filter(|v| **v != "delete")
                .map(|v| v.to_string())
                .collect();
            assert_eq!(verbs_of(&compiled, "", "configmaps", "a").unwrap(), &expected_a);

            // the other instances keep the full verb set
            let all: Vec<String> = CANONICAL_VERBS.iter().map(|v| v.to_string()).collect();
            assert_eq!(verbs_of(&compiled, "", "configmaps", "b").unwrap(), &all);
            assert_eq!(verbs_of(&compiled, "", "configmaps", "c").unwrap(), &all);
        }

        #[tokio::test]
        async fn name_scoped_deny_without_a_broad_allow_subtracts_exactly() {
            let inventory = inventory();
            let lister = no_instances();
            let compiler = RuleCompiler::new(&inventory, &lister);

            let compiled = compiler
                .compile(
                    &[rule(&[""], &["configmaps"], &["a"], &["get", "delete"])],
                    &[rule(&[""], &["configmaps"], &["a"], &["delete"])],
                )
                .await
                .unwrap();

            assert_eq!(
                verbs_of(&compiled, "", "configmaps", "a").unwrap(),
                &vec!["get".to_string()]
            );
        }
    }

    mod non_resource_urls {
        use super::*;

        #[tokio::test]
        async fn prefix_deny_removes_only_the_matching_branch() {
            let inventory = inventory();
            let lister = no_instances();
            let compiler = RuleCompiler::new(&inventory, &lister);

            let compiled = compiler
                .compile(
                    &[
                        url_rule(&["/api/*"], &["get"]),
                        url_rule(&["/api/secrets/leaked"], &["get"]),
                    ],
                    &[url_rule(&["/api/secrets*"], &["get"])],
                )
                .await
                .unwrap();

            assert_eq!(compiled.len(), 1);
            assert_eq!(
                compiled[0].non_resource_urls,
                Some(vec!["/api/*".to_string()])
            );
        }

        #[tokio::test]
        async fn exact_deny_subtracts_verbs_on_the_same_url() {
            let inventory = inventory();
            let lister = no_instances();
            let compiler = RuleCompiler::new(&inventory, &lister);

            let compiled = compiler
                .compile(
                    &[url_rule(&["/healthz"], &["get", "head"])],
                    &[url_rule(&["/healthz"], &["head"])],
                )
                .await
                .unwrap();

            assert_eq!(compiled.len(), 1);
            assert_eq!(compiled[0].verbs, vec!["get".to_string()]);
        }

        #[tokio::test]
        async fn url_rules_with_several_urls_are_atomized() {
            let inventory = inventory();
            let lister = no_instances();
            let compiler = RuleCompiler::new(&inventory, &lister);

            let compiled = compiler
                .compile(&[url_rule(&["/healthz", "/readyz"], &["get"])], &[])
                .await
                .unwrap();

            assert_eq!(compiled.len(), 2);
        }
    }
}
