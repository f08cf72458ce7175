//! Controller implementations for the kuberbac CRDs
//!
//! The two reconcilers differ only in how targets are synthesized and torn
//! down, so the shell is generic: per-CR behavior is plugged in through the
//! [`Synthesizer`] capability and writes to the source CR go through
//! [`SourceApi`]. Tests supply fakes for both.

mod cluster_role;
mod context;
mod role_binding;

pub use cluster_role::ClusterRoleSynthesizer;
pub use context::{
    CoreClient, DynamicInstanceLister, KubeCoreClient, KubeRbacClient, KubeSourceApi, RbacClient,
};
pub use role_binding::BindingSynthesizer;

pub use cluster_role::{
    error_policy as cluster_role_error_policy, reconcile as reconcile_cluster_role,
};
pub use role_binding::{
    error_policy as role_binding_error_policy, reconcile as reconcile_role_binding,
};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{info, warn};

use crate::crd::{
    Condition, ConditionStatus, DynamicClusterRole, DynamicRoleBinding,
};
use crate::error::Error;
use crate::FINALIZER;

/// Condition type reported on every source CR
pub const CONDITION_RESOURCE_SYNCED: &str = "ResourceSynced";
/// Condition reason on successful synchronization
pub const REASON_TARGET_SYNCED: &str = "TargetSynced";
/// Condition reason when a call against the cluster failed
pub const REASON_API_CALL_ERROR: &str = "KubernetesApiCallError";
/// Condition reason when the source spec failed validation
pub const REASON_VALIDATION_FAILED: &str = "ValidationFailed";

/// Annotation identifying the apiVersion of the owning source CR
pub const OWNER_API_VERSION_ANNOTATION: &str = "kuberbac.prosimcorp.com/owner-apiversion";
/// Annotation identifying the kind of the owning source CR
pub const OWNER_KIND_ANNOTATION: &str = "kuberbac.prosimcorp.com/owner-kind";
/// Annotation identifying the name of the owning source CR
pub const OWNER_NAME_ANNOTATION: &str = "kuberbac.prosimcorp.com/owner-name";
/// Annotation identifying the namespace of the owning source CR
pub const OWNER_NAMESPACE_ANNOTATION: &str = "kuberbac.prosimcorp.com/owner-namespace";

/// Requeue delay after a failed reconcile
pub const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Per-CR synthesis behavior plugged into the generic reconcile shell
#[async_trait]
pub trait Synthesizer<S>: Send + Sync {
    /// Parse the periodic resync interval from the source spec
    fn sync_interval(&self, source: &S) -> Result<Duration, Error>;

    /// Create or update the targets. A returned message is a warning
    /// surfaced through the success condition.
    async fn synthesize(&self, source: &S) -> Result<Option<String>, Error>;

    /// Delete every target owned by the source
    async fn teardown(&self, source: &S) -> Result<(), Error>;
}

/// Write capability over a source CR's metadata and status
#[async_trait]
pub trait SourceApi<S>: Send + Sync {
    /// Replace the finalizer list on the source
    async fn set_finalizers(&self, source: &S, finalizers: Vec<String>) -> Result<(), Error>;

    /// Merge a condition into the source's status conditions
    async fn update_status(&self, source: &S, condition: Condition) -> Result<(), Error>;
}

/// Access to the conditions list of a source CR's status
pub trait HasConditions {
    /// Conditions currently recorded on the resource
    fn conditions(&self) -> &[Condition];
}

impl HasConditions for DynamicClusterRole {
    fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|status| status.conditions.as_slice())
            .unwrap_or(&[])
    }
}

impl HasConditions for DynamicRoleBinding {
    fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|status| status.conditions.as_slice())
            .unwrap_or(&[])
    }
}

/// Controller context: the source write capability plus the synthesis path
pub struct Shell<S> {
    /// Finalizer and status writes against the source CR
    pub sources: Arc<dyn SourceApi<S>>,
    /// The CR-specific synthesis behavior
    pub synthesizer: Arc<dyn Synthesizer<S>>,
}

/// The four ownership annotations identifying a source CR
///
/// Teardown and orphan reaping use these, as a subset match against a
/// candidate's annotations, as the sole ownership predicate.
pub fn ownership_annotations<S>(source: &S) -> BTreeMap<String, String>
where
    S: Resource<DynamicType = ()>,
{
    BTreeMap::from([
        (
            OWNER_API_VERSION_ANNOTATION.to_string(),
            S::api_version(&()).into_owned(),
        ),
        (OWNER_KIND_ANNOTATION.to_string(), S::kind(&()).into_owned()),
        (OWNER_NAME_ANNOTATION.to_string(), source.name_any()),
        (
            OWNER_NAMESPACE_ANNOTATION.to_string(),
            source.namespace().unwrap_or_default(),
        ),
    ])
}

/// Merge ownership annotations over user-provided target annotations
///
/// Ownership keys win on conflict; anything else would let a user-supplied
/// annotation break the reaping predicate.
pub fn merged_annotations(
    user: Option<&BTreeMap<String, String>>,
    ownership: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = user.cloned().unwrap_or_default();
    merged.extend(ownership.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

fn has_finalizer<S: Resource<DynamicType = ()>>(source: &S) -> bool {
    source.finalizers().iter().any(|f| f == FINALIZER)
}

/// One reconcile pass over a source CR
///
/// Deletion drives teardown before the finalizer is released; otherwise the
/// finalizer is ensured, targets are synthesized, and the `ResourceSynced`
/// condition is updated. Validation failures are reported through the
/// condition and retried on the periodic timer only; API failures are
/// returned so the runtime re-enqueues with backoff.
pub async fn reconcile_source<S>(source: &S, shell: &Shell<S>) -> Result<Action, Error>
where
    S: Resource<DynamicType = ()>,
{
    if source.meta().deletion_timestamp.is_some() {
        if has_finalizer(source) {
            shell.synthesizer.teardown(source).await?;

            let remaining: Vec<String> = source
                .finalizers()
                .iter()
                .filter(|f| *f != FINALIZER)
                .cloned()
                .collect();
            shell.sources.set_finalizers(source, remaining).await?;
        }
        return Ok(Action::await_change());
    }

    if !has_finalizer(source) {
        let mut finalizers = source.finalizers().to_vec();
        finalizers.push(FINALIZER.to_string());
        shell.sources.set_finalizers(source, finalizers).await?;
    }

    let interval = shell.synthesizer.sync_interval(source)?;
    let generation = source.meta().generation;

    match shell.synthesizer.synthesize(source).await {
        Ok(warning) => {
            let message = match warning {
                Some(warning) => format!("Target was synchronized with warnings: {warning}"),
                None => "Target was synchronized".to_string(),
            };
            let condition = Condition::new(
                CONDITION_RESOURCE_SYNCED,
                ConditionStatus::True,
                REASON_TARGET_SYNCED,
                message,
            )
            .with_observed_generation(generation);
            shell.sources.update_status(source, condition).await?;

            info!(requeue = ?interval, "scheduled next synchronization");
            Ok(Action::requeue(interval))
        }
        Err(error) if error.is_validation() => {
            warn!(error = %error, "source spec failed validation");
            let condition = Condition::new(
                CONDITION_RESOURCE_SYNCED,
                ConditionStatus::False,
                REASON_VALIDATION_FAILED,
                error.to_string(),
            )
            .with_observed_generation(generation);
            shell.sources.update_status(source, condition).await?;

            // nothing to retry until the spec changes; the periodic timer
            // picks up corrections
            Ok(Action::requeue(interval))
        }
        Err(error) => {
            let condition = Condition::new(
                CONDITION_RESOURCE_SYNCED,
                ConditionStatus::False,
                REASON_API_CALL_ERROR,
                error.to_string(),
            )
            .with_observed_generation(generation);
            if let Err(status_error) = shell.sources.update_status(source, condition).await {
                warn!(error = %status_error, "failed to record the failure condition");
            }
            Err(error)
        }
    }
}
