//! Kuberbac operator - compiles RBAC policies and materializes bindings

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kuberbac::controller::{
    cluster_role_error_policy, reconcile_cluster_role, reconcile_role_binding,
    role_binding_error_policy, BindingSynthesizer, ClusterRoleSynthesizer, DynamicInstanceLister,
    KubeCoreClient, KubeRbacClient, KubeSourceApi, Shell,
};
use kuberbac::crd::{DynamicClusterRole, DynamicRoleBinding};
use kuberbac::inventory::KubeDiscovery;

/// Kuberbac - dynamic RBAC policy compilation for Kubernetes
#[derive(Parser, Debug)]
#[command(name = "kuberbac", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        // Generate CRD YAML for both source resources
        let cluster_role_crd = serde_yaml::to_string(&DynamicClusterRole::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {e}"))?;
        let role_binding_crd = serde_yaml::to_string(&DynamicRoleBinding::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {e}"))?;
        println!("{cluster_role_crd}---\n{role_binding_crd}");
        return Ok(());
    }

    tracing::info!("kuberbac operator starting...");

    // Create Kubernetes client
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {e}"))?;

    let rbac = Arc::new(KubeRbacClient::new(client.clone()));

    let cluster_role_shell = Arc::new(Shell {
        sources: Arc::new(KubeSourceApi::<DynamicClusterRole>::new(client.clone())),
        synthesizer: Arc::new(ClusterRoleSynthesizer::new(
            Arc::new(KubeDiscovery::new(client.clone())),
            Arc::new(DynamicInstanceLister::new(client.clone())),
            rbac.clone(),
        )),
    });

    let role_binding_shell = Arc::new(Shell {
        sources: Arc::new(KubeSourceApi::<DynamicRoleBinding>::new(client.clone())),
        synthesizer: Arc::new(BindingSynthesizer::new(
            Arc::new(KubeCoreClient::new(client.clone())),
            rbac,
        )),
    });

    let cluster_roles: Api<DynamicClusterRole> = Api::all(client.clone());
    let role_bindings: Api<DynamicRoleBinding> = Api::all(client);

    tracing::info!("starting DynamicClusterRole and DynamicRoleBinding controllers");

    let cluster_role_controller = Controller::new(cluster_roles, WatcherConfig::default())
        .shutdown_on_signal()
        .run(
            reconcile_cluster_role,
            cluster_role_error_policy,
            cluster_role_shell,
        )
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "DynamicClusterRole reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "DynamicClusterRole reconciliation error");
                }
            }
        });

    let role_binding_controller = Controller::new(role_bindings, WatcherConfig::default())
        .shutdown_on_signal()
        .run(
            reconcile_role_binding,
            role_binding_error_policy,
            role_binding_shell,
        )
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "DynamicRoleBinding reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "DynamicRoleBinding reconciliation error");
                }
            }
        });

    // Drive both controllers until shutdown
    futures::join!(cluster_role_controller, role_binding_controller);

    tracing::info!("kuberbac operator shutting down");
    Ok(())
}
