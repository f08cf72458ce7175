//! Kuberbac - Kubernetes RBAC policy compiler and binding synthesizer
//!
//! Kubernetes RBAC is purely additive: rules can only grant, never subtract.
//! Kuberbac closes that gap with two CRD-driven controllers:
//!
//! - [`DynamicClusterRole`](crd::DynamicClusterRole): an allow-list minus a
//!   deny-list of policy rules, compiled against the live cluster's resource
//!   inventory into an equivalent purely-additive ClusterRole.
//! - [`DynamicRoleBinding`](crd::DynamicRoleBinding): a dynamically-selected
//!   set of subjects (service accounts by label/name/regex, static
//!   users/groups) materialized into bindings across a dynamically-selected
//!   set of namespaces.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions and shared spec types
//! - [`inventory`] - Snapshot of the cluster's API surface, built per reconcile
//! - [`compiler`] - The allow/deny rule compiler and scope splitter
//! - [`selector`] - Name, meta, and namespace selector evaluation
//! - [`controller`] - Reconciliation shells and the synthesis paths
//! - [`error`] - Error types for the operator

pub mod compiler;
pub mod controller;
pub mod crd;
pub mod error;
pub mod inventory;
pub mod selector;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group served by the operator's custom resources
pub const API_GROUP: &str = "kuberbac.prosimcorp.com";

/// Finalizer attached to every managed source CR
pub const FINALIZER: &str = "kuberbac.prosimcorp.com/finalizer";
