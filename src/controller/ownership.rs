//! Pod ownership resolution for ReplicaSets
//!
//! A pod belongs to a ReplicaSet when its labels are a superset of the
//! ReplicaSet's selector. Membership is re-derived on every reconcile and
//! never cached, since pods can be relabelled without either object's
//! identity changing.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use tracing::debug;

use super::replicaset::{GroupKey, MutantClient};
use crate::Error;

/// List the pods currently managed by a ReplicaSet
///
/// Pods are listed in the ReplicaSet's own namespace. An empty list is a
/// valid result.
pub async fn managed_pods(
    client: &dyn MutantClient,
    replica_set: &ReplicaSet,
) -> Result<Vec<Pod>, Error> {
    let key = GroupKey::from_resource(replica_set);

    let selector = replica_set
        .spec
        .as_ref()
        .map(|spec| &spec.selector)
        .ok_or_else(|| {
            Error::selector_conversion("ReplicaSet has no spec").for_group(key.to_string())
        })?;
    let labels = selector_as_map(selector).map_err(|e| e.for_group(key.to_string()))?;

    debug!(selector = %label_selector_string(&labels), "listing managed pods");

    client
        .list_pods(&key.namespace, &labels)
        .await
        .map_err(|e| Error::instance_list(key.to_string(), e.to_string()))
}

/// Flatten a label selector into equality requirements
///
/// `matchLabels` are copied as-is. A `matchExpressions` entry is accepted
/// only when it uses `In` with exactly one value; every other form has no
/// equality equivalent and is rejected.
pub fn selector_as_map(selector: &LabelSelector) -> Result<BTreeMap<String, String>, Error> {
    let mut labels = selector.match_labels.clone().unwrap_or_default();

    for expr in selector.match_expressions.iter().flatten() {
        match expr.operator.as_str() {
            "In" => {
                let value = match expr.values.as_deref() {
                    Some([value]) => value,
                    _ => {
                        return Err(Error::selector_conversion(format!(
                            "operator \"In\" on key {:?} without a single value cannot be converted",
                            expr.key
                        )))
                    }
                };
                if let Some(existing) = labels.get(&expr.key) {
                    if existing != value {
                        return Err(Error::selector_conversion(format!(
                            "key {:?} requires both {:?} and {:?}",
                            expr.key, existing, value
                        )));
                    }
                }
                labels.insert(expr.key.clone(), value.clone());
            }
            "NotIn" | "Exists" | "DoesNotExist" => {
                return Err(Error::selector_conversion(format!(
                    "operator {:?} on key {:?} cannot be converted",
                    expr.operator, expr.key
                )))
            }
            other => {
                return Err(Error::selector_conversion(format!(
                    "{:?} is not a valid selector operator",
                    other
                )))
            }
        }
    }

    Ok(labels)
}

/// Render equality requirements as an API server label selector
///
/// Keys are emitted in sorted order.
pub fn label_selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Check whether a label set satisfies every equality requirement
#[cfg(test)]
pub(crate) fn selector_matches(
    selector: &BTreeMap<String, String>,
    labels: Option<&BTreeMap<String, String>>,
) -> bool {
    selector.iter().all(|(key, value)| {
        labels
            .and_then(|l| l.get(key))
            .is_some_and(|actual| actual == value)
    })
}
