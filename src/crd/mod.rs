//! Custom Resource Definitions for kuberbac
//!
//! This module contains the two source CRDs the operator reconciles and the
//! spec/status types they share.

mod cluster_role;
mod role_binding;
mod types;

pub use cluster_role::{
    DynamicClusterRole, DynamicClusterRoleSpec, DynamicClusterRoleStatus, RoleTarget,
};
pub use role_binding::{
    BindingSource, BindingTargets, DynamicRoleBinding, DynamicRoleBindingSpec,
    DynamicRoleBindingStatus, SubjectSelector,
};
pub use types::{
    parse_duration, set_condition, Condition, ConditionStatus, MatchRegex, MetaSelector,
    NameSelector, NamespaceSelector, SynchronizationSpec,
};
