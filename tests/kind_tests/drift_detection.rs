//! Integration tests for drift detection
//!
//! A ReplicaSet is created from a single template, then one of its pods has
//! its image edited in place. The detector must notice that the pods no
//! longer agree and record it on the ReplicaSet.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{ReplicaSet, ReplicaSetSpec};
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::ResourceExt;

use mutant_detector::controller::{reconcile_key, Context, GroupKey, Outcome};
use mutant_detector::mutant::{MutantStatus, ANNOTATION_MUTANT_STATUS, LABEL_IS_MUTANT};

use super::helpers::{
    delete_namespace, ensure_namespace, ensure_test_cluster, poll_until, remove_stale_replica_set,
    running_pods,
};

const NAMESPACE: &str = "mutant-detector-e2e";
const ORIGINAL_IMAGE: &str = "registry.k8s.io/pause:3.9";
const DRIFTED_IMAGE: &str = "registry.k8s.io/pause:3.10";

fn web_labels() -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), "web".to_string())])
}

fn web_replica_set() -> ReplicaSet {
    ReplicaSet {
        metadata: ObjectMeta {
            name: Some("web".to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: Some(ReplicaSetSpec {
            replicas: Some(2),
            selector: LabelSelector {
                match_labels: Some(web_labels()),
                match_expressions: None,
            },
            template: Some(PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(web_labels()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "app".to_string(),
                        image: Some(ORIGINAL_IMAGE.to_string()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            }),
            ..Default::default()
        }),
        status: None,
    }
}

/// Story: an operator hot-patches one pod's image and the ReplicaSet turns mutant
#[tokio::test]
#[ignore]
async fn story_in_place_image_edit_is_detected() {
    let client = ensure_test_cluster().await.expect("test cluster");
    ensure_namespace(&client, NAMESPACE).await.expect("namespace");
    remove_stale_replica_set(&client, NAMESPACE, "web").await;

    let replica_sets: Api<ReplicaSet> = Api::namespaced(client.clone(), NAMESPACE);
    replica_sets
        .create(&PostParams::default(), &web_replica_set())
        .await
        .expect("create ReplicaSet");

    let pods = poll_until(Duration::from_secs(180), "two running web pods", || {
        let client = client.clone();
        async move {
            let pods = running_pods(&client, NAMESPACE, "app=web").await;
            (pods.len() == 2).then_some(pods)
        }
    })
    .await;

    let ctx = Context::new(client.clone(), "mutant-detector-e2e");
    let key = GroupKey::new(NAMESPACE, "web");

    // Act 1: a freshly rolled out ReplicaSet is consistent
    let outcome = reconcile_key(&key, &ctx).await.expect("first reconcile");
    assert_eq!(outcome, Outcome::Updated { mutant: false });

    let rs = replica_sets.get("web").await.expect("get ReplicaSet");
    assert_eq!(rs.labels().get(LABEL_IS_MUTANT).map(String::as_str), Some("false"));
    let recorded: MutantStatus =
        serde_json::from_str(&rs.annotations()[ANNOTATION_MUTANT_STATUS]).expect("status JSON");
    assert_eq!(recorded.len(), 2);

    // Act 2: re-running without changes writes nothing
    let outcome = reconcile_key(&key, &ctx).await.expect("second reconcile");
    assert_eq!(outcome, Outcome::Unchanged { mutant: false });

    // Act 3: one pod's image is changed in place
    let drifted = pods[0].name_any();
    let original_image_id = image_id_of(&pods[0]);
    let pod_api: Api<Pod> = Api::namespaced(client.clone(), NAMESPACE);
    let patch = serde_json::json!({
        "spec": { "containers": [{ "name": "app", "image": DRIFTED_IMAGE }] }
    });
    pod_api
        .patch(&drifted, &PatchParams::default(), &Patch::Strategic(&patch))
        .await
        .expect("patch pod image");

    poll_until(Duration::from_secs(180), "drifted pod to restart", || {
        let pod_api = pod_api.clone();
        let drifted = drifted.clone();
        let original_image_id = original_image_id.clone();
        async move {
            let pod = pod_api.get(&drifted).await.ok()?;
            let current = image_id_of(&pod);
            (!current.is_empty() && current != original_image_id).then_some(())
        }
    })
    .await;

    let outcome = reconcile_key(&key, &ctx).await.expect("reconcile after drift");
    assert_eq!(outcome, Outcome::Updated { mutant: true });

    let rs = replica_sets.get("web").await.expect("get ReplicaSet");
    assert_eq!(rs.labels().get(LABEL_IS_MUTANT).map(String::as_str), Some("true"));

    delete_namespace(&client, NAMESPACE).await;
}

/// Story: a ReplicaSet deleted before its event is processed is skipped
#[tokio::test]
#[ignore]
async fn story_missing_replicaset_is_a_noop() {
    let client = ensure_test_cluster().await.expect("test cluster");
    let ctx = Context::with_client(Arc::new(mutant_detector::controller::KubeMutantClient::new(
        client,
        "mutant-detector-e2e",
    )));

    let outcome = reconcile_key(&GroupKey::new("default", "does-not-exist"), &ctx)
        .await
        .expect("reconcile");

    assert_eq!(outcome, Outcome::Deleted);
}

fn image_id_of(pod: &Pod) -> String {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|statuses| statuses.iter().find(|cs| cs.name == "app"))
        .map(|cs| cs.image_id.clone())
        .unwrap_or_default()
}
