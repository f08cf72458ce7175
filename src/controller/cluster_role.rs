//! DynamicClusterRole reconciliation: compile policy rules into ClusterRoles
//!
//! The synthesis path rebuilds the resource inventory, compiles the
//! allow/deny rule sets, and writes one ClusterRole - or a `-cluster` /
//! `-namespace` pair when the source asks for separated scopes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::rbac::v1::{ClusterRole, PolicyRule};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument};

use super::context::RbacClient;
use super::{
    merged_annotations, ownership_annotations, reconcile_source, Shell, Synthesizer,
    RETRY_INTERVAL,
};
use crate::compiler::{split_by_scope, InstanceLister, RuleCompiler};
use crate::crd::DynamicClusterRole;
use crate::error::Error;
use crate::inventory::{DiscoveryClient, Inventory};
use crate::selector::is_subset;

/// Synthesizes ClusterRoles from a DynamicClusterRole source
pub struct ClusterRoleSynthesizer {
    discovery: Arc<dyn DiscoveryClient>,
    instances: Arc<dyn InstanceLister>,
    rbac: Arc<dyn RbacClient>,
}

impl ClusterRoleSynthesizer {
    /// Create a synthesizer over the given capability clients
    pub fn new(
        discovery: Arc<dyn DiscoveryClient>,
        instances: Arc<dyn InstanceLister>,
        rbac: Arc<dyn RbacClient>,
    ) -> Self {
        Self {
            discovery,
            instances,
            rbac,
        }
    }
}

#[async_trait]
impl Synthesizer<DynamicClusterRole> for ClusterRoleSynthesizer {
    fn sync_interval(&self, source: &DynamicClusterRole) -> Result<Duration, Error> {
        source.spec.synchronization.interval()
    }

    async fn synthesize(&self, source: &DynamicClusterRole) -> Result<Option<String>, Error> {
        // fresh inventory every pass: wildcard expansion must see CRDs
        // installed since the previous reconcile
        let inventory = Inventory::discover(self.discovery.as_ref()).await?;

        let compiler = RuleCompiler::new(&inventory, self.instances.as_ref());
        let rules = compiler
            .compile(&source.spec.allow, &source.spec.deny)
            .await?;

        for role in build_cluster_roles(source, rules, &inventory) {
            debug!(role = %role.name_any(), "updating ClusterRole");
            self.rbac.upsert_cluster_role(role).await?;
        }

        Ok(None)
    }

    async fn teardown(&self, source: &DynamicClusterRole) -> Result<(), Error> {
        let ownership = ownership_annotations(source);

        let mut errors = Vec::new();
        for role in self.rbac.list_cluster_roles().await? {
            if !is_subset(&ownership, role.metadata.annotations.as_ref()) {
                continue;
            }
            let name = role.name_any();
            info!(role = %name, "deleting owned ClusterRole");
            if let Err(err) = self.rbac.delete_cluster_role(&name).await {
                errors.push(err);
            }
        }

        Error::join(errors)
    }
}

/// Build the target ClusterRole(s) carrying the compiled rules
///
/// With `separateScopes` the rules are partitioned by resource scope into a
/// `<name>-cluster` and a `<name>-namespace` role; otherwise a single
/// combined role named `<name>` is produced.
fn build_cluster_roles(
    source: &DynamicClusterRole,
    rules: Vec<PolicyRule>,
    inventory: &Inventory,
) -> Vec<ClusterRole> {
    let target = &source.spec.target;
    let annotations =
        merged_annotations(target.annotations.as_ref(), &ownership_annotations(source));

    let metadata = |name: String| ObjectMeta {
        name: Some(name),
        annotations: Some(annotations.clone()),
        labels: target.labels.clone(),
        ..ObjectMeta::default()
    };

    if !target.separate_scopes {
        return vec![ClusterRole {
            metadata: metadata(target.name.clone()),
            rules: Some(rules),
            ..ClusterRole::default()
        }];
    }

    let scoped = split_by_scope(inventory, &rules);
    vec![
        ClusterRole {
            metadata: metadata(format!("{}-cluster", target.name)),
            rules: Some(scoped.cluster),
            ..ClusterRole::default()
        },
        ClusterRole {
            metadata: metadata(format!("{}-namespace", target.name)),
            rules: Some(scoped.namespaced),
            ..ClusterRole::default()
        },
    ]
}

/// Reconcile one DynamicClusterRole resource
#[instrument(skip(source, shell), fields(source = %source.name_any()))]
pub async fn reconcile(
    source: Arc<DynamicClusterRole>,
    shell: Arc<Shell<DynamicClusterRole>>,
) -> Result<Action, Error> {
    info!("reconciling DynamicClusterRole");
    reconcile_source(source.as_ref(), &shell).await
}

/// Requeue strategy after a failed reconcile
pub fn error_policy(
    source: Arc<DynamicClusterRole>,
    error: &Error,
    _shell: Arc<Shell<DynamicClusterRole>>,
) -> Action {
    error!(error = %error, source = %source.name_any(), "reconciliation failed");
    Action::requeue(RETRY_INTERVAL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::MockInstanceLister;
    use crate::controller::context::MockRbacClient;
    use crate::controller::{OWNER_KIND_ANNOTATION, OWNER_NAME_ANNOTATION};
    use crate::crd::{DynamicClusterRoleSpec, RoleTarget, SynchronizationSpec};
    use crate::inventory::{DiscoveredGroup, DiscoveredResource, MockDiscoveryClient};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn discovered(name: &str, kind: &str, namespaced: bool) -> DiscoveredResource {
        DiscoveredResource {
            name: name.to_string(),
            kind: kind.to_string(),
            namespaced,
            verbs: vec!["get".to_string(), "list".to_string()],
        }
    }

    fn core_group() -> Vec<DiscoveredGroup> {
        vec![DiscoveredGroup {
            group_version: "v1".to_string(),
            resources: vec![
                discovered("pods", "Pod", true),
                discovered("nodes", "Node", false),
            ],
        }]
    }

    fn sample_inventory() -> Inventory {
        Inventory::from_groups(core_group())
    }

    fn policy_rule(group: &str, resource: &str, verbs: &[&str]) -> PolicyRule {
        PolicyRule {
            api_groups: Some(vec![group.to_string()]),
            resources: Some(vec![resource.to_string()]),
            verbs: verbs.iter().map(|v| v.to_string()).collect(),
            ..PolicyRule::default()
        }
    }

    fn sample_source(separate_scopes: bool) -> DynamicClusterRole {
        let mut source = DynamicClusterRole::new(
            "developers",
            DynamicClusterRoleSpec {
                synchronization: SynchronizationSpec {
                    time: "30s".to_string(),
                },
                target: RoleTarget {
                    name: "developers".to_string(),
                    annotations: Some(BTreeMap::from([(
                        "team".to_string(),
                        "platform".to_string(),
                    )])),
                    labels: Some(BTreeMap::from([(
                        "managed".to_string(),
                        "kuberbac".to_string(),
                    )])),
                    separate_scopes,
                },
                allow: vec![
                    policy_rule("", "pods", &["get", "list"]),
                    policy_rule("", "nodes", &["get"]),
                ],
                deny: Vec::new(),
            },
        );
        source.metadata.namespace = Some("default".to_string());
        source
    }

    mod building {
        use super::*;

        #[test]
        fn combined_role_carries_rules_and_merged_annotations() {
            let source = sample_source(false);
            let rules = vec![policy_rule("", "pods", &["get"])];

            let roles = build_cluster_roles(&source, rules.clone(), &sample_inventory());

            assert_eq!(roles.len(), 1);
            assert_eq!(roles[0].metadata.name.as_deref(), Some("developers"));
            assert_eq!(roles[0].rules, Some(rules));

            let annotations = roles[0].metadata.annotations.as_ref().unwrap();
            assert_eq!(annotations.get("team").unwrap(), "platform");
            assert_eq!(
                annotations.get(OWNER_KIND_ANNOTATION).unwrap(),
                "DynamicClusterRole"
            );
            assert_eq!(annotations.get(OWNER_NAME_ANNOTATION).unwrap(), "developers");
        }

        #[test]
        fn separate_scopes_partitions_rules_into_two_roles() {
            let source = sample_source(true);
            let rules = vec![
                policy_rule("", "pods", &["get"]),
                policy_rule("", "nodes", &["get"]),
            ];

            let roles = build_cluster_roles(&source, rules, &sample_inventory());

            assert_eq!(roles.len(), 2);
            assert_eq!(
                roles[0].metadata.name.as_deref(),
                Some("developers-cluster")
            );
            assert_eq!(
                roles[0].rules,
                Some(vec![policy_rule("", "nodes", &["get"])])
            );
            assert_eq!(
                roles[1].metadata.name.as_deref(),
                Some("developers-namespace")
            );
            assert_eq!(roles[1].rules, Some(vec![policy_rule("", "pods", &["get"])]));
        }
    }

    mod synthesis {
        use super::*;

        #[tokio::test]
        async fn compiled_roles_are_written_through_the_rbac_client() {
            let mut discovery = MockDiscoveryClient::new();
            discovery
                .expect_groups_and_resources()
                .returning(|| Ok(core_group()));

            let instances = MockInstanceLister::new();

            let written = Arc::new(Mutex::new(Vec::<ClusterRole>::new()));
            let sink = written.clone();
            let mut rbac = MockRbacClient::new();
            rbac.expect_upsert_cluster_role().returning(move |role| {
                sink.lock().unwrap().push(role);
                Ok(())
            });

            let synthesizer = ClusterRoleSynthesizer::new(
                Arc::new(discovery),
                Arc::new(instances),
                Arc::new(rbac),
            );

            let warning = synthesizer.synthesize(&sample_source(false)).await.unwrap();
            assert!(warning.is_none());

            let written = written.lock().unwrap();
            assert_eq!(written.len(), 1);
            let rules = written[0].rules.as_ref().unwrap();
            assert_eq!(rules.len(), 2);
            // rules come out sorted by atomic key: nodes before pods
            assert_eq!(rules[0].resources, Some(vec!["nodes".to_string()]));
            assert_eq!(rules[1].resources, Some(vec!["pods".to_string()]));
            assert_eq!(
                rules[1].verbs,
                vec!["get".to_string(), "list".to_string()]
            );
        }

        #[tokio::test]
        async fn discovery_failures_abort_the_pass() {
            let mut discovery = MockDiscoveryClient::new();
            discovery
                .expect_groups_and_resources()
                .returning(|| Err(Error::discovery("connection refused")));

            let synthesizer = ClusterRoleSynthesizer::new(
                Arc::new(discovery),
                Arc::new(MockInstanceLister::new()),
                Arc::new(MockRbacClient::new()),
            );

            let error = synthesizer
                .synthesize(&sample_source(false))
                .await
                .unwrap_err();
            assert!(matches!(error, Error::Discovery(_)));
        }
    }

    mod teardown {
        use super::*;

        fn role_named(name: &str, annotations: Option<BTreeMap<String, String>>) -> ClusterRole {
            ClusterRole {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    annotations,
                    ..ObjectMeta::default()
                },
                ..ClusterRole::default()
            }
        }

        #[tokio::test]
        async fn only_owned_cluster_roles_are_deleted() {
            let source = sample_source(false);
            let ownership = ownership_annotations(&source);

            let mut rbac = MockRbacClient::new();
            let owned = role_named("developers", Some(ownership));
            let foreign = role_named("cluster-admin", None);
            rbac.expect_list_cluster_roles()
                .returning(move || Ok(vec![owned.clone(), foreign.clone()]));

            let deleted = Arc::new(Mutex::new(Vec::<String>::new()));
            let sink = deleted.clone();
            rbac.expect_delete_cluster_role().returning(move |name| {
                sink.lock().unwrap().push(name.to_string());
                Ok(())
            });

            let synthesizer = ClusterRoleSynthesizer::new(
                Arc::new(MockDiscoveryClient::new()),
                Arc::new(MockInstanceLister::new()),
                Arc::new(rbac),
            );

            synthesizer.teardown(&source).await.unwrap();
            assert_eq!(
                deleted.lock().unwrap().as_slice(),
                &["developers".to_string()]
            );
        }

        #[tokio::test]
        async fn deletion_failures_are_collected_not_shortcircuited() {
            let source = sample_source(false);
            let ownership = ownership_annotations(&source);

            let mut rbac = MockRbacClient::new();
            let first = role_named("developers-cluster", Some(ownership.clone()));
            let second = role_named("developers-namespace", Some(ownership));
            rbac.expect_list_cluster_roles()
                .returning(move || Ok(vec![first.clone(), second.clone()]));

            let deleted = Arc::new(Mutex::new(Vec::<String>::new()));
            let sink = deleted.clone();
            rbac.expect_delete_cluster_role().returning(move |name| {
                sink.lock().unwrap().push(name.to_string());
                Err(Error::discovery(format!("failed to delete {name}")))
            });

            let synthesizer = ClusterRoleSynthesizer::new(
                Arc::new(MockDiscoveryClient::new()),
                Arc::new(MockInstanceLister::new()),
                Arc::new(rbac),
            );

            let error = synthesizer.teardown(&source).await.unwrap_err();
            assert!(matches!(error, Error::Aggregate(_)));
            // both deletions were attempted despite the first failure
            assert_eq!(deleted.lock().unwrap().len(), 2);
        }
    }
}
