//! ReplicaSet controller implementation
//!
//! Each pass re-derives the pods a ReplicaSet manages, computes whether they
//! disagree on the image any container is running, and records the verdict
//! on the ReplicaSet itself:
//!
//! - annotation `mutant/status`: JSON map of pod name to running images
//! - label `is-mutant`: `"true"` or `"false"`
//!
//! Reconciliation is level-triggered. Nothing is remembered between passes;
//! the ReplicaSet's metadata is the only state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use super::ownership::{label_selector_string, managed_pods};
use crate::metrics;
use crate::mutant::{MutantStatus, ANNOTATION_MUTANT_STATUS, LABEL_IS_MUTANT};
use crate::{Error, DEFAULT_NAMESPACE};

/// Trait abstracting the object store operations the controller needs
///
/// The real implementation talks to the API server; tests substitute mocks
/// or an in-memory store.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MutantClient: Send + Sync {
    /// Fetch a ReplicaSet, returning `None` if it does not exist
    async fn get_replica_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ReplicaSet>, kube::Error>;

    /// List pods in a namespace whose labels satisfy every selector entry
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, kube::Error>;

    /// Replace a ReplicaSet in full
    ///
    /// The object's `resourceVersion` is sent along, so a concurrent write
    /// makes this fail with a 409 instead of overwriting it.
    async fn replace_replica_set(&self, replica_set: &ReplicaSet)
        -> Result<ReplicaSet, kube::Error>;
}

/// Real Kubernetes client implementation
pub struct KubeMutantClient {
    client: Client,
    field_manager: String,
}

impl KubeMutantClient {
    /// Create a new KubeMutantClient wrapping the given kube Client
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }
}

#[async_trait]
impl MutantClient for KubeMutantClient {
    async fn get_replica_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ReplicaSet>, kube::Error> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, kube::Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&label_selector_string(selector));
        Ok(api.list(&params).await?.items)
    }

    async fn replace_replica_set(
        &self,
        replica_set: &ReplicaSet,
    ) -> Result<ReplicaSet, kube::Error> {
        let key = GroupKey::from_resource(replica_set);
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), &key.namespace);
        let params = PostParams {
            dry_run: false,
            field_manager: Some(self.field_manager.clone()),
        };
        api.replace(&key.name, &params, replica_set).await
    }
}

/// Namespace-qualified identity of a ReplicaSet
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupKey {
    /// Namespace of the ReplicaSet
    pub namespace: String,
    /// Name of the ReplicaSet
    pub name: String,
}

impl GroupKey {
    /// Create a key from its parts
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an existing object
    pub fn from_resource(replica_set: &ReplicaSet) -> Self {
        Self {
            namespace: replica_set
                .namespace()
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            name: replica_set.name_any(),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Result of a successful reconciliation pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The ReplicaSet no longer exists; nothing was written
    Deleted,
    /// The stored verdict was already current; nothing was written
    Unchanged {
        /// Whether the ReplicaSet is mutant
        mutant: bool,
    },
    /// The verdict was written back to the ReplicaSet
    Updated {
        /// Whether the ReplicaSet is mutant
        mutant: bool,
    },
}

/// Controller context shared across reconciliations
///
/// Holds the object store capability and nothing else: reconciles of
/// different ReplicaSets share no mutable state.
pub struct Context {
    /// Object store operations (trait object for testability)
    pub client: Arc<dyn MutantClient>,
}

impl Context {
    /// Create a context backed by the API server
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self::with_client(Arc::new(KubeMutantClient::new(client, field_manager)))
    }

    /// Create a context over any [`MutantClient`] implementation
    pub fn with_client(client: Arc<dyn MutantClient>) -> Self {
        Self { client }
    }
}

/// Reconcile a ReplicaSet
///
/// Entry point for `kube::runtime::Controller`. The cached object is used
/// only for its key; the ReplicaSet is re-fetched so the write-back carries
/// a current `resourceVersion`.
#[instrument(skip(replica_set, ctx), fields(replicaset = %GroupKey::from_resource(&replica_set)))]
pub async fn reconcile(replica_set: Arc<ReplicaSet>, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = GroupKey::from_resource(&replica_set);
    let started = Instant::now();

    let result = reconcile_key(&key, &ctx).await;
    metrics::record_reconcile(started.elapsed(), result.is_ok());

    let outcome = result?;
    debug!(?outcome, "reconciliation finished");
    Ok(Action::await_change())
}

/// Run one reconciliation pass for the ReplicaSet identified by `key`
///
/// The caller must not run two passes for the same key concurrently: the
/// write-back is a read-modify-write guarded only by `resourceVersion`.
pub async fn reconcile_key(key: &GroupKey, ctx: &Context) -> Result<Outcome, Error> {
    let fetched = ctx
        .client
        .get_replica_set(&key.namespace, &key.name)
        .await
        .map_err(|e| Error::fetch(key.to_string(), e.to_string()))?;

    let Some(mut replica_set) = fetched else {
        debug!(replicaset = %key, "ReplicaSet not found, assuming deleted");
        return Ok(Outcome::Deleted);
    };

    let pods = managed_pods(ctx.client.as_ref(), &replica_set).await?;
    let status = MutantStatus::from_pods(&pods);
    let mutant = status.is_mutant();

    info!(replicaset = %key, pods = pods.len(), mutant, "evaluated ReplicaSet");
    metrics::record_verdict(mutant);

    if !apply_verdict(&mut replica_set, &status)? {
        debug!(replicaset = %key, "verdict already recorded, skipping update");
        return Ok(Outcome::Unchanged { mutant });
    }

    ctx.client
        .replace_replica_set(&replica_set)
        .await
        .map_err(|e| update_error(key, e))?;

    info!(replicaset = %key, mutant, "recorded mutant verdict");
    Ok(Outcome::Updated { mutant })
}

/// Write the verdict into the ReplicaSet's metadata
///
/// Returns whether anything changed. Every other field is left untouched.
pub fn apply_verdict(replica_set: &mut ReplicaSet, status: &MutantStatus) -> Result<bool, Error> {
    let status_json = status.to_json()?;
    let is_mutant = status.is_mutant().to_string();

    let annotation_changed = replica_set
        .annotations_mut()
        .insert(ANNOTATION_MUTANT_STATUS.to_string(), status_json.clone())
        .as_ref()
        != Some(&status_json);
    let label_changed = replica_set
        .labels_mut()
        .insert(LABEL_IS_MUTANT.to_string(), is_mutant.clone())
        .as_ref()
        != Some(&is_mutant);

    Ok(annotation_changed || label_changed)
}

fn update_error(key: &GroupKey, err: kube::Error) -> Error {
    match &err {
        kube::Error::Api(ae) if ae.code == 409 => {
            Error::update_conflict(key.to_string(), &ae.message)
        }
        _ => Error::update(key.to_string(), err.to_string()),
    }
}

/// Error policy for the ReplicaSet controller
///
/// The controller's scheduler owns retries; this only decides how long to
/// wait. Selector problems are logged as warnings; only an edit to the
/// ReplicaSet clears them.
pub fn error_policy(replica_set: Arc<ReplicaSet>, error: &Error, _ctx: Arc<Context>) -> Action {
    let key = GroupKey::from_resource(&replica_set);

    if error.is_retryable() {
        error!(?error, replicaset = %key, "reconciliation failed");
    } else {
        warn!(
            error = %error,
            replicaset = %key,
            "reconciliation cannot succeed until the ReplicaSet changes"
        );
    }
    metrics::record_error(error);

    Action::requeue(error.requeue_after())
}
