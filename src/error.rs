//! Error types for the mutant detector
//!
//! Every variant carries the `namespace/name` of the ReplicaSet being
//! reconciled so failures can be traced back to a group from the logs alone.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific ReplicaSet is known
pub const UNKNOWN_GROUP: &str = "unknown";

/// Main error type for reconciliation
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Fetching the ReplicaSet failed for a reason other than not-found
    #[error("failed to fetch ReplicaSet {group}: {message}")]
    Fetch {
        /// ReplicaSet key (`namespace/name`)
        group: String,
        /// Underlying failure
        message: String,
    },

    /// Listing the pods managed by the ReplicaSet failed
    #[error("failed to list pods for ReplicaSet {group}: {message}")]
    InstanceList {
        /// ReplicaSet key (`namespace/name`)
        group: String,
        /// Underlying failure
        message: String,
    },

    /// The label selector cannot be flattened into equality labels
    #[error("selector of ReplicaSet {group} cannot be converted to labels: {message}")]
    SelectorConversion {
        /// ReplicaSet key (`namespace/name`)
        group: String,
        /// What could not be converted
        message: String,
    },

    /// The write-back lost an optimistic concurrency race
    #[error("conflict updating ReplicaSet {group}: {message}")]
    UpdateConflict {
        /// ReplicaSet key (`namespace/name`)
        group: String,
        /// Message returned by the API server
        message: String,
    },

    /// The write-back failed for any other reason
    #[error("failed to update ReplicaSet {group}: {message}")]
    Update {
        /// ReplicaSet key (`namespace/name`)
        group: String,
        /// Underlying failure
        message: String,
    },

    /// The verdict could not be encoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a fetch error for a ReplicaSet
    pub fn fetch(group: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Fetch {
            group: group.into(),
            message: msg.into(),
        }
    }

    /// Create a pod list error for a ReplicaSet
    pub fn instance_list(group: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InstanceList {
            group: group.into(),
            message: msg.into(),
        }
    }

    /// Create a selector conversion error
    ///
    /// Selector flattening has no knowledge of the owning ReplicaSet, so the
    /// group defaults to [`UNKNOWN_GROUP`] until [`Error::for_group`] fills it in.
    pub fn selector_conversion(msg: impl Into<String>) -> Self {
        Self::SelectorConversion {
            group: UNKNOWN_GROUP.to_string(),
            message: msg.into(),
        }
    }

    /// Create an update conflict error
    pub fn update_conflict(group: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::UpdateConflict {
            group: group.into(),
            message: msg.into(),
        }
    }

    /// Create an update error
    pub fn update(group: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Update {
            group: group.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Attach the ReplicaSet key to an error that was raised without one
    pub fn for_group(self, key: impl Into<String>) -> Self {
        match self {
            Error::SelectorConversion { group, message } if group == UNKNOWN_GROUP => {
                Error::SelectorConversion {
                    group: key.into(),
                    message,
                }
            }
            other => other,
        }
    }

    /// Get the ReplicaSet key if this error is associated with one
    pub fn group(&self) -> Option<&str> {
        match self {
            Error::Fetch { group, .. }
            | Error::InstanceList { group, .. }
            | Error::SelectorConversion { group, .. }
            | Error::UpdateConflict { group, .. }
            | Error::Update { group, .. } => Some(group),
            Error::Serialization(_) => None,
        }
    }

    /// Check if retrying can plausibly succeed without a spec change
    ///
    /// Selector conversion only recovers once the selector is edited, and
    /// serialization failures are code bugs.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Fetch { .. }
            | Error::InstanceList { .. }
            | Error::UpdateConflict { .. }
            | Error::Update { .. } => true,
            Error::SelectorConversion { .. } | Error::Serialization(_) => false,
        }
    }

    /// Delay before the work queue should retry the ReplicaSet
    ///
    /// Conflicts mean the object moved under us, so the next pass is retried
    /// almost immediately. Non-retryable errors are still requeued, slowly,
    /// because the selector may be fixed at any time.
    pub fn requeue_after(&self) -> Duration {
        match self {
            Error::UpdateConflict { .. } => Duration::from_secs(1),
            Error::SelectorConversion { .. } | Error::Serialization(_) => {
                Duration::from_secs(300)
            }
            _ => Duration::from_secs(5),
        }
    }

    /// Short label used for the error counter
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Fetch { .. } => "fetch",
            Error::InstanceList { .. } => "instance_list",
            Error::SelectorConversion { .. } => "selector_conversion",
            Error::UpdateConflict { .. } => "update_conflict",
            Error::Update { .. } => "update",
            Error::Serialization(_) => "serialization",
        }
    }
}
