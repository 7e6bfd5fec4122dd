//! Consistency verdict over the images a ReplicaSet's pods are running

mod status;

pub use status::{ContainerImageId, MutantStatus};

/// Label holding the verdict as `"true"` or `"false"`
pub const LABEL_IS_MUTANT: &str = "is-mutant";

/// Annotation holding the JSON encoded [`MutantStatus`]
pub const ANNOTATION_MUTANT_STATUS: &str = "mutant/status";
