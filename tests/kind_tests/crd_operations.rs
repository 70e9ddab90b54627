//! Integration tests for CRD operations
//!
//! Stories about how users and unpackers interact with Bundle and
//! BundleInstance resources through the Kubernetes API.

use kube::api::{Api, PostParams};

use plank::crd::{Bundle, BundleInstance, BundlePhase, SourceType};

use super::helpers::{
    cleanup, ensure_test_cluster, sample_bundle, sample_instance, set_bundle_phase,
};

/// Story: an unpacker reports progress on a Bundle through its status
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_unpacker_marks_bundle_unpacked() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<Bundle> = Api::all(client.clone());
    let name = "crd-ops-bundle";
    cleanup::<Bundle>(&client, name).await;

    let created = api
        .create(&PostParams::default(), &sample_bundle(name))
        .await
        .expect("failed to create bundle");
    assert_eq!(created.spec.source.type_, SourceType::Image);
    assert!(!created.is_unpacked());

    set_bundle_phase(&client, name, BundlePhase::Unpacked)
        .await
        .expect("failed to set phase");

    let fetched = api.get(name).await.expect("failed to get bundle");
    assert!(fetched.is_unpacked());

    cleanup::<Bundle>(&client, name).await;
}

/// Story: a user requests installation of a Bundle
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_user_creates_bundle_instance() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<BundleInstance> = Api::all(client.clone());
    let name = "crd-ops-instance";
    cleanup::<BundleInstance>(&client, name).await;

    let created = api
        .create(&PostParams::default(), &sample_instance(name, "some-bundle"))
        .await
        .expect("failed to create instance");
    assert_eq!(created.spec.bundle_name, "some-bundle");
    assert!(created.is_provisioned_by(plank::PROVISIONER_ID));
    assert!(created.metadata.namespace.is_none());

    cleanup::<BundleInstance>(&client, name).await;
}
