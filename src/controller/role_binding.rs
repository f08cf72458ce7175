//! DynamicRoleBinding reconciliation: materialize subjects into bindings
//!
//! The synthesis path expands the source's subject selection into concrete
//! RBAC subjects, then writes either one ClusterRoleBinding or one
//! RoleBinding per selected target namespace. Owned bindings left in
//! namespaces that fell out of the target set are reaped afterwards, so a
//! binding moved from namespace A to B never leaves a ghost in A.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use super::context::{CoreClient, RbacClient};
use super::{
    merged_annotations, ownership_annotations, reconcile_source, Shell, Synthesizer,
    RETRY_INTERVAL,
};
use crate::crd::{DynamicRoleBinding, SubjectSelector};
use crate::error::Error;
use crate::selector::{is_subset, MetaMatcher, NameMatcher, NamespaceMatcher};

const SERVICE_ACCOUNT_KIND: &str = "ServiceAccount";
const USER_KIND: &str = "User";
const GROUP_KIND: &str = "Group";

const ROLE_REF_API_GROUP: &str = "rbac.authorization.k8s.io";
const CLUSTER_ROLE_KIND: &str = "ClusterRole";

/// Synthesizes role bindings from a DynamicRoleBinding source
pub struct BindingSynthesizer {
    core: Arc<dyn CoreClient>,
    rbac: Arc<dyn RbacClient>,
}

impl BindingSynthesizer {
    /// Create a synthesizer over the given capability clients
    pub fn new(core: Arc<dyn CoreClient>, rbac: Arc<dyn RbacClient>) -> Self {
        Self { core, rbac }
    }

    /// Expand the subject selection into concrete RBAC subjects
    async fn expand_subjects(
        &self,
        subject: &SubjectSelector,
        namespaces: &[Namespace],
    ) -> Result<Vec<Subject>, Error> {
        match subject.kind.as_str() {
            USER_KIND | GROUP_KIND => expand_static_subjects(subject),
            SERVICE_ACCOUNT_KIND => self.expand_service_accounts(subject, namespaces).await,
            other => Err(Error::validation(format!(
                "source.subject.kind must be one of the following values: \
                 ServiceAccount, User, Group (got '{other}')"
            ))),
        }
    }

    /// Enumerate the cluster's service accounts and keep those matching the
    /// source selectors
    async fn expand_service_accounts(
        &self,
        subject: &SubjectSelector,
        namespaces: &[Namespace],
    ) -> Result<Vec<Subject>, Error> {
        if subject.name_selector.is_some() && subject.meta_selector.is_some() {
            return Err(Error::validation(
                "nameSelector and metaSelector are mutually exclusive",
            ));
        }

        // absent selector means every namespace
        let namespace_matcher = NamespaceMatcher::new(subject.namespace_selector.as_ref())?;
        let selected_namespaces: BTreeSet<String> =
            namespace_matcher.filter(namespaces).into_iter().collect();

        let name_matcher = subject
            .name_selector
            .as_ref()
            .map(NameMatcher::new)
            .transpose()?;
        let meta_matcher = subject
            .meta_selector
            .as_ref()
            .map(MetaMatcher::new)
            .transpose()?;

        let mut subjects = Vec::new();
        for account in self.core.list_service_accounts().await? {
            let Some(name) = account.metadata.name.as_deref() else {
                continue;
            };
            let Some(namespace) = account.metadata.namespace.as_deref() else {
                continue;
            };
            if !selected_namespaces.contains(namespace) {
                continue;
            }

            let selected = match (&meta_matcher, &name_matcher) {
                (Some(meta), _) => meta.matches(
                    account.metadata.labels.as_ref(),
                    account.metadata.annotations.as_ref(),
                ),
                (None, Some(by_name)) => by_name.matches(name),
                (None, None) => true,
            };
            if !selected {
                continue;
            }

            subjects.push(Subject {
                kind: SERVICE_ACCOUNT_KIND.to_string(),
                api_group: subject_api_group(subject),
                name: name.to_string(),
                namespace: Some(namespace.to_string()),
            });
        }

        Ok(subjects)
    }

    async fn synthesize_bindings(
        &self,
        source: &DynamicRoleBinding,
    ) -> Result<Option<String>, Error> {
        let namespaces = self.core.list_namespaces().await?;
        let subjects = self
            .expand_subjects(&source.spec.source.subject, &namespaces)
            .await?;

        let targets = &source.spec.targets;
        let ownership = ownership_annotations(source);
        let annotations = merged_annotations(targets.annotations.as_ref(), &ownership);

        let role_ref = RoleRef {
            api_group: ROLE_REF_API_GROUP.to_string(),
            kind: CLUSTER_ROLE_KIND.to_string(),
            name: source.spec.source.cluster_role.clone(),
        };

        if targets.cluster_scoped {
            // never clobber a foreign object carrying the target name
            if let Some(existing) = self.rbac.get_cluster_role_binding(&targets.name).await? {
                if !is_subset(&ownership, existing.metadata.annotations.as_ref()) {
                    warn!(
                        name = %targets.name,
                        "existing ClusterRoleBinding is not owned by this source, skipping update"
                    );
                    return Ok(Some(format!(
                        "ClusterRoleBinding '{}' exists and is not owned by this source; \
                         it was not updated",
                        targets.name
                    )));
                }
            }

            let binding = ClusterRoleBinding {
                metadata: ObjectMeta {
                    name: Some(targets.name.clone()),
                    annotations: Some(annotations),
                    labels: targets.labels.clone(),
                    ..ObjectMeta::default()
                },
                role_ref,
                subjects: Some(subjects),
            };
            debug!(name = %targets.name, "updating ClusterRoleBinding");
            self.rbac.upsert_cluster_role_binding(binding).await?;
            return Ok(None);
        }

        let target_matcher = NamespaceMatcher::new(targets.namespace_selector.as_ref())?;
        let target_namespaces: BTreeSet<String> =
            target_matcher.filter(&namespaces).into_iter().collect();

        let existing = self.rbac.list_role_bindings().await?;

        let mut warnings = Vec::new();
        for namespace in &target_namespaces {
            let foreign = existing.iter().any(|binding| {
                binding.metadata.namespace.as_deref() == Some(namespace.as_str())
                    && binding.metadata.name.as_deref() == Some(targets.name.as_str())
                    && !is_subset(&ownership, binding.metadata.annotations.as_ref())
            });
            if foreign {
                warn!(
                    namespace = %namespace,
                    name = %targets.name,
                    "existing RoleBinding is not owned by this source, skipping update"
                );
                warnings.push(format!(
                    "RoleBinding '{namespace}/{}' exists and is not owned by this source; \
                     it was not updated",
                    targets.name
                ));
                continue;
            }

            let binding = RoleBinding {
                metadata: ObjectMeta {
                    name: Some(targets.name.clone()),
                    namespace: Some(namespace.clone()),
                    annotations: Some(annotations.clone()),
                    labels: targets.labels.clone(),
                    ..ObjectMeta::default()
                },
                role_ref: role_ref.clone(),
                subjects: Some(subjects.clone()),
            };
            debug!(namespace = %namespace, name = %targets.name, "updating RoleBinding");
            self.rbac.upsert_role_binding(binding).await?;
        }

        // reap owned bindings outside the current target set; runs after
        // the upserts so a moved binding never leaves a ghost behind
        let mut errors = Vec::new();
        for binding in &existing {
            if !is_subset(&ownership, binding.metadata.annotations.as_ref()) {
                continue;
            }
            let Some(namespace) = binding.metadata.namespace.as_deref() else {
                continue;
            };
            if target_namespaces.contains(namespace) {
                continue;
            }

            let name = binding.name_any();
            info!(namespace = %namespace, name = %name, "deleting orphaned RoleBinding");
            if let Err(err) = self.rbac.delete_role_binding(namespace, &name).await {
                errors.push(err);
            }
        }
        Error::join(errors)?;

        if warnings.is_empty() {
            Ok(None)
        } else {
            Ok(Some(warnings.join("; ")))
        }
    }
}

/// Produce one subject per statically-named User or Group entry
fn expand_static_subjects(subject: &SubjectSelector) -> Result<Vec<Subject>, Error> {
    if subject.namespace_selector.is_some() || subject.meta_selector.is_some() {
        return Err(Error::validation(
            "namespaceSelector and metaSelector are only allowed for ServiceAccount subjects",
        ));
    }

    let Some(selector) = subject.name_selector.as_ref() else {
        return Err(Error::validation(
            "matchList nameSelector is required for User and Group subjects",
        ));
    };
    if selector
        .match_regex
        .as_ref()
        .is_some_and(|regex| !regex.expression.is_empty())
    {
        return Err(Error::validation(
            "matchRegex nameSelector is not allowed for User and Group subjects",
        ));
    }
    let names = selector
        .match_list
        .as_ref()
        .filter(|list| !list.is_empty())
        .ok_or_else(|| {
            Error::validation("matchList nameSelector is required for User and Group subjects")
        })?;

    Ok(names
        .iter()
        .map(|name| Subject {
            kind: subject.kind.clone(),
            api_group: subject_api_group(subject),
            name: name.clone(),
            namespace: None,
        })
        .collect())
}

fn subject_api_group(subject: &SubjectSelector) -> Option<String> {
    if subject.api_group.is_empty() {
        None
    } else {
        Some(subject.api_group.clone())
    }
}

#[async_trait]
impl Synthesizer<DynamicRoleBinding> for BindingSynthesizer {
    fn sync_interval(&self, source: &DynamicRoleBinding) -> Result<Duration, Error> {
        source.spec.synchronization.interval()
    }

    async fn synthesize(&self, source: &DynamicRoleBinding) -> Result<Option<String>, Error> {
        self.synthesize_bindings(source).await
    }

    async fn teardown(&self, source: &DynamicRoleBinding) -> Result<(), Error> {
        let ownership = ownership_annotations(source);
        let mut errors = Vec::new();

        for binding in self.rbac.list_cluster_role_bindings().await? {
            if !is_subset(&ownership, binding.metadata.annotations.as_ref()) {
                continue;
            }
            let name = binding.name_any();
            info!(name = %name, "deleting owned ClusterRoleBinding");
            if let Err(err) = self.rbac.delete_cluster_role_binding(&name).await {
                errors.push(err);
            }
        }

        for binding in self.rbac.list_role_bindings().await? {
            if !is_subset(&ownership, binding.metadata.annotations.as_ref()) {
                continue;
            }
            let Some(namespace) = binding.metadata.namespace.as_deref() else {
                continue;
            };
            let name = binding.name_any();
            info!(namespace = %namespace, name = %name, "deleting owned RoleBinding");
            if let Err(err) = self.rbac.delete_role_binding(namespace, &name).await {
                errors.push(err);
            }
        }

        Error::join(errors)
    }
}

/// Reconcile one DynamicRoleBinding resource
#[instrument(skip(source, shell), fields(source = %source.name_any()))]
pub async fn reconcile(
    source: Arc<DynamicRoleBinding>,
    shell: Arc<Shell<DynamicRoleBinding>>,
) -> Result<Action, Error> {
    info!("reconciling DynamicRoleBinding");
    reconcile_source(source.as_ref(), &shell).await
}

/// Requeue strategy after a failed reconcile
pub fn error_policy(
    source: Arc<DynamicRoleBinding>,
    error: &Error,
    _shell: Arc<Shell<DynamicRoleBinding>>,
) -> Action {
    error!(error = %error, source = %source.name_any(), "reconciliation failed");
    Action::requeue(RETRY_INTERVAL)
}
