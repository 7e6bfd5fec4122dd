//! ReplicaSet controller for the mutant detector
//!
//! Controllers follow the Kubernetes controller pattern: observe current
//! state, derive the verdict, and write it back.

mod ownership;
mod replicaset;

pub use ownership::{label_selector_string, managed_pods, selector_as_map};
pub use replicaset::{
    apply_verdict, error_policy, reconcile, reconcile_key, Context, GroupKey, KubeMutantClient,
    MutantClient, Outcome,
};
