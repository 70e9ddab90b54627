//! Test helpers for integration tests
//!
//! Provides utilities for managing the kind cluster and Plank resources.

use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams};
use kube::{Client, Config, CustomResourceExt};
use tokio::sync::OnceCell;
use tokio::time::sleep;

use plank::crd::{
    Bundle, BundleInstance, BundleInstanceSpec, BundlePhase, BundleSource, BundleSpec,
    BundleStatus, ImageSource, SourceType,
};
use plank::{FIELD_MANAGER, PROVISIONER_ID};

/// Name of the kind cluster used for integration tests
pub const TEST_CLUSTER_NAME: &str = "plank-integration-test";

/// Namespace used for both release records and bundle storage in tests
pub const TEST_NAMESPACE: &str = "plank-system";

/// Global lock to ensure cluster is created only once
static CLUSTER_INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Track if CRDs have been installed (async-safe)
static CRDS_INSTALLED: OnceCell<Result<(), String>> = OnceCell::const_new();

/// Check if a kind cluster with the given name exists
pub fn kind_cluster_exists(name: &str) -> bool {
    let output = Command::new("kind")
        .args(["get", "clusters"])
        .output()
        .expect("failed to run kind");

    let clusters = String::from_utf8_lossy(&output.stdout);
    clusters.lines().any(|line| line.trim() == name)
}

/// Create a kind cluster for testing
pub fn create_kind_cluster(name: &str) -> Result<(), String> {
    if kind_cluster_exists(name) {
        println!("Kind cluster '{name}' already exists, reusing it");
        return Ok(());
    }

    println!("Creating kind cluster '{name}'...");
    let output = Command::new("kind")
        .args(["create", "cluster", "--name", name, "--wait", "60s"])
        .output()
        .map_err(|e| format!("failed to run kind: {e}"))?;

    if !output.status.success() {
        return Err(format!(
            "failed to create kind cluster: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    println!("Kind cluster '{name}' created successfully");
    Ok(())
}

/// Install the Plank CRDs and the test namespace
pub async fn install_crds(client: &Client) -> Result<(), kube::Error> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    println!("Installing Plank CRDs...");
    crds.patch("bundles.plank.dev", &params, &Patch::Apply(&Bundle::crd()))
        .await?;
    crds.patch(
        "bundleinstances.plank.dev",
        &params,
        &Patch::Apply(&BundleInstance::crd()),
    )
    .await?;

    let namespaces: Api<Namespace> = Api::all(client.clone());
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    namespaces
        .patch(TEST_NAMESPACE, &params, &Patch::Apply(&ns))
        .await?;

    // Wait for CRDs to be established
    sleep(Duration::from_secs(2)).await;
    Ok(())
}

/// Create a Kubernetes client connected to the test cluster
pub async fn create_test_client() -> Result<Client, String> {
    let context_name = format!("kind-{TEST_CLUSTER_NAME}");

    let config = Config::from_kubeconfig(&kube::config::KubeConfigOptions {
        context: Some(context_name),
        ..Default::default()
    })
    .await
    .map_err(|e| format!("failed to load kubeconfig: {e}"))?;

    Client::try_from(config).map_err(|e| format!("failed to create client: {e}"))
}

/// Ensure the test cluster is ready (thread-safe, cluster created once)
pub async fn ensure_test_cluster() -> Result<Client, String> {
    let cluster_result = CLUSTER_INIT.get_or_init(|| create_kind_cluster(TEST_CLUSTER_NAME));
    cluster_result.clone()?;

    let client = create_test_client().await?;

    let crd_result = CRDS_INSTALLED
        .get_or_init(|| async {
            let client = create_test_client().await?;
            install_crds(&client)
                .await
                .map_err(|e| format!("failed to install CRDs: {e}"))
        })
        .await;
    crd_result.clone()?;

    Ok(client)
}

/// Build a Bundle fixture
pub fn sample_bundle(name: &str) -> Bundle {
    Bundle::new(
        name,
        BundleSpec {
            provisioner_class_name: PROVISIONER_ID.to_string(),
            source: BundleSource {
                type_: SourceType::Image,
                image: Some(ImageSource {
                    ref_: format!("quay.io/plank-test/{name}:v1"),
                }),
                git: None,
            },
        },
    )
}

/// Build a BundleInstance fixture
pub fn sample_instance(name: &str, bundle: &str) -> BundleInstance {
    BundleInstance::new(
        name,
        BundleInstanceSpec {
            provisioner_class_name: PROVISIONER_ID.to_string(),
            bundle_name: bundle.to_string(),
        },
    )
}

/// Set a Bundle's phase the way an unpacker would
pub async fn set_bundle_phase(
    client: &Client,
    name: &str,
    phase: BundlePhase,
) -> Result<(), kube::Error> {
    let api: Api<Bundle> = Api::all(client.clone());
    let status = BundleStatus {
        phase: Some(phase),
        ..Default::default()
    };
    let body = serde_json::json!({
        "apiVersion": plank::API_VERSION,
        "kind": "Bundle",
        "status": status,
    });
    api.patch_status(
        name,
        &PatchParams::apply("plank-test-unpacker").force(),
        &Patch::Apply(&body),
    )
    .await?;
    Ok(())
}

/// Delete a cluster-scoped Plank resource, ignoring errors
pub async fn cleanup<K>(client: &Client, name: &str)
where
    K: kube::Resource<DynamicType = ()>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug,
{
    let api: Api<K> = Api::all(client.clone());
    let _ = api.delete(name, &DeleteParams::default()).await;
}

/// Poll until `check` returns true or the timeout expires
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        sleep(Duration::from_millis(500)).await;
    }
    false
}
