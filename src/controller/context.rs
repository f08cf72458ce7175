//! Kubernetes-backed capability clients
//!
//! The reconcilers never touch [`kube::Client`] directly: every cluster
//! interaction goes through one of the traits below so tests can supply
//! fakes. Target writes are last-writer-wins replacements, and deletions of
//! already-absent objects are absorbed.

use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, RoleBinding};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[cfg(test)]
use mockall::automock;

use super::{HasConditions, SourceApi};
use crate::compiler::InstanceLister;
use crate::crd::{set_condition, Condition};
use crate::error::Error;
use crate::inventory::ResourceDescriptor;

/// Read access to the core resources the binding synthesizer selects over
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CoreClient: Send + Sync {
    /// List every namespace in the cluster
    async fn list_namespaces(&self) -> Result<Vec<Namespace>, Error>;

    /// List every service account in the cluster, across all namespaces
    async fn list_service_accounts(&self) -> Result<Vec<ServiceAccount>, Error>;
}

/// Write and list access to the RBAC target resources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RbacClient: Send + Sync {
    /// Create or replace a ClusterRole
    async fn upsert_cluster_role(&self, role: ClusterRole) -> Result<(), Error>;

    /// List every ClusterRole in the cluster
    async fn list_cluster_roles(&self) -> Result<Vec<ClusterRole>, Error>;

    /// Delete a ClusterRole; absence is not an error
    async fn delete_cluster_role(&self, name: &str) -> Result<(), Error>;

    /// Fetch a ClusterRoleBinding by name
    async fn get_cluster_role_binding(
        &self,
        name: &str,
    ) -> Result<Option<ClusterRoleBinding>, Error>;

    /// Create or replace a ClusterRoleBinding
    async fn upsert_cluster_role_binding(&self, binding: ClusterRoleBinding)
        -> Result<(), Error>;

    /// List every ClusterRoleBinding in the cluster
    async fn list_cluster_role_bindings(&self) -> Result<Vec<ClusterRoleBinding>, Error>;

    /// Delete a ClusterRoleBinding; absence is not an error
    async fn delete_cluster_role_binding(&self, name: &str) -> Result<(), Error>;

    /// Create or replace a RoleBinding in its namespace
    async fn upsert_role_binding(&self, binding: RoleBinding) -> Result<(), Error>;

    /// List every RoleBinding, across all namespaces
    async fn list_role_bindings(&self) -> Result<Vec<RoleBinding>, Error>;

    /// Delete a RoleBinding; absence is not an error
    async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// Real core client wrapping the kube Client
pub struct KubeCoreClient {
    client: Client,
}

impl KubeCoreClient {
    /// Create a new KubeCoreClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CoreClient for KubeCoreClient {
    async fn list_namespaces(&self) -> Result<Vec<Namespace>, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_service_accounts(&self) -> Result<Vec<ServiceAccount>, Error> {
        let api: Api<ServiceAccount> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }
}

/// Real RBAC client wrapping the kube Client
pub struct KubeRbacClient {
    client: Client,
}

impl KubeRbacClient {
    /// Create a new KubeRbacClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Replace the object, creating it when the name does not exist yet
///
/// A plain replace without a resourceVersion gives the last-writer-wins
/// write policy the targets require.
async fn replace_or_create<K>(api: &Api<K>, object: K) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let name = object.meta().name.clone().unwrap_or_default();
    match api.replace(&name, &PostParams::default(), &object).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            api.create(&PostParams::default(), &object).await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn delete_absorbing_absent<K>(api: &Api<K>, name: &str) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl RbacClient for KubeRbacClient {
    async fn upsert_cluster_role(&self, role: ClusterRole) -> Result<(), Error> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        replace_or_create(&api, role).await
    }

    async fn list_cluster_roles(&self) -> Result<Vec<ClusterRole>, Error> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn delete_cluster_role(&self, name: &str) -> Result<(), Error> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        delete_absorbing_absent(&api, name).await
    }

    async fn get_cluster_role_binding(
        &self,
        name: &str,
    ) -> Result<Option<ClusterRoleBinding>, Error> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn upsert_cluster_role_binding(
        &self,
        binding: ClusterRoleBinding,
    ) -> Result<(), Error> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        replace_or_create(&api, binding).await
    }

    async fn list_cluster_role_bindings(&self) -> Result<Vec<ClusterRoleBinding>, Error> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn delete_cluster_role_binding(&self, name: &str) -> Result<(), Error> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        delete_absorbing_absent(&api, name).await
    }

    async fn upsert_role_binding(&self, binding: RoleBinding) -> Result<(), Error> {
        let namespace = binding.namespace().unwrap_or_default();
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), &namespace);
        replace_or_create(&api, binding).await
    }

    async fn list_role_bindings(&self) -> Result<Vec<RoleBinding>, Error> {
        let api: Api<RoleBinding> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        delete_absorbing_absent(&api, name).await
    }
}

/// Instance lister backed by untyped dynamic-object access
///
/// The name-expansion special case needs the names of every live object of
/// an arbitrary resource type; the type is only known at runtime from the
/// inventory descriptor, so the listing goes through [`DynamicObject`].
pub struct DynamicInstanceLister {
    client: Client,
}

impl DynamicInstanceLister {
    /// Create a new DynamicInstanceLister wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl InstanceLister for DynamicInstanceLister {
    async fn instance_names(&self, descriptor: &ResourceDescriptor) -> Result<Vec<String>, Error> {
        let api_version = if descriptor.group.is_empty() {
            descriptor.version.clone()
        } else {
            format!("{}/{}", descriptor.group, descriptor.version)
        };

        let resource = ApiResource {
            group: descriptor.group.clone(),
            version: descriptor.version.clone(),
            api_version,
            kind: descriptor.kind.clone(),
            plural: descriptor.resource.clone(),
        };

        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);
        let objects = api.list(&ListParams::default()).await?;

        Ok(objects
            .items
            .into_iter()
            .filter_map(|object| object.metadata.name)
            .collect())
    }
}

/// Real source-CR write capability for any namespaced CRD with conditions
pub struct KubeSourceApi<S> {
    client: Client,
    _source: PhantomData<S>,
}

impl<S> KubeSourceApi<S> {
    /// Create a new KubeSourceApi wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _source: PhantomData,
        }
    }
}

impl<S> KubeSourceApi<S>
where
    S: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Debug,
{
    fn scoped_api(&self, source: &S) -> Api<S> {
        match source.namespace() {
            Some(namespace) => Api::namespaced(self.client.clone(), &namespace),
            None => Api::default_namespaced(self.client.clone()),
        }
    }
}

#[async_trait]
impl<S> SourceApi<S> for KubeSourceApi<S>
where
    S: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + HasConditions
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync,
{
    async fn set_finalizers(&self, source: &S, finalizers: Vec<String>) -> Result<(), Error> {
        let patch = serde_json::json!({"metadata": {"finalizers": finalizers}});
        self.scoped_api(source)
            .patch(
                &source.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }

    async fn update_status(&self, source: &S, condition: Condition) -> Result<(), Error> {
        let mut conditions = source.conditions().to_vec();
        set_condition(&mut conditions, condition);

        let patch = serde_json::json!({"status": {"conditions": conditions}});
        self.scoped_api(source)
            .patch_status(
                &source.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }
}
