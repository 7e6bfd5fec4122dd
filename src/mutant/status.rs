//! Mutant status of a ReplicaSet
//!
//! The status is the set of image digests each pod is actually running,
//! keyed by pod name. A ReplicaSet is mutant when the same container name
//! resolves to more than one image digest across its pods.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Image a single container is running, as reported by the kubelet
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerImageId {
    /// Container name from the pod template
    #[serde(rename = "Name")]
    pub name: String,
    /// Resolved image reference (usually digest qualified)
    #[serde(rename = "ImageID")]
    pub image_id: String,
}

impl ContainerImageId {
    /// Create a new container image pair
    pub fn new(name: impl Into<String>, image_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image_id: image_id.into(),
        }
    }
}

/// Running images of every pod managed by a ReplicaSet
///
/// Pod names are kept sorted so the serialized form does not depend on the
/// order the API server listed the pods in.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutantStatus(BTreeMap<String, Vec<ContainerImageId>>);

impl MutantStatus {
    /// Build the status from the pods currently managed by a ReplicaSet
    ///
    /// Container order within a pod is kept as reported. Pods that have not
    /// started any container yet appear with an empty list.
    pub fn from_pods(pods: &[Pod]) -> Self {
        let status = pods
            .iter()
            .map(|pod| {
                let containers = pod
                    .status
                    .as_ref()
                    .and_then(|s| s.container_statuses.as_ref())
                    .map(|statuses| {
                        statuses
                            .iter()
                            .map(|cs| ContainerImageId::new(&cs.name, &cs.image_id))
                            .collect()
                    })
                    .unwrap_or_default();
                (pod.name_any(), containers)
            })
            .collect();
        Self(status)
    }

    /// Whether some container name runs more than one distinct image
    ///
    /// Containers without an image ID yet (still being created or pulling)
    /// are not running anything and take no part in the comparison.
    pub fn is_mutant(&self) -> bool {
        let mut seen: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for container in self.0.values().flatten().filter(|c| !c.image_id.is_empty()) {
            seen.entry(container.name.as_str())
                .or_default()
                .insert(container.image_id.as_str());
        }
        seen.values().any(|images| images.len() > 1)
    }

    /// Canonical JSON form stored in the `mutant/status` annotation
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::serialization(e.to_string()))
    }

    /// Containers reported for a pod
    pub fn containers(&self, pod: &str) -> Option<&[ContainerImageId]> {
        self.0.get(pod).map(Vec::as_slice)
    }

    /// Number of pods in the status
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no pods were observed
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
