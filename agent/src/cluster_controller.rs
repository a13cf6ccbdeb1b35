//! Replicates the cluster descriptor to the registry.
//!
//! The descriptor is fingerprinted after CA injection; only a fingerprint
//! different from the stored annotation is sent. Deleting the descriptor
//! sends a final update with `status=Deleted` before the finalizer is
//! released.

use crate::config::ClusterControllerConfig;
use crate::crd::Cluster;
use crate::errors::AgentError;
use crate::metrics_defs::{
    EVENTS_EMITTED, EVENTS_FILTERED, RECONCILE_DURATION, RECONCILE_ERRORS, RECONCILES,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::{StreamExt, TryStreamExt, future};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::finalizer::{Event as FinalizerEvent, finalizer};
use kube::runtime::reflector;
use kube::runtime::WatchStreamExt;
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use model::types::Status;
use model::{ClusterSpec, EVENT_CLUSTER_UPDATE, HASH_ANNOTATION, SKIP_CA_CERT_ANNOTATION};
use queue::Producer;
use serde_json::json;
use shared::{counter, histogram};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const FINALIZER: &str = "registry.ethos.adobe.com/finalizer";

const CONTROLLER: &str = "cluster";
const FIELD_MANAGER: &str = "cluster-registry-controller";
const SEND_TIMEOUT: Duration = Duration::from_secs(10);
/// Picks up a rotated CA bundle without a descriptor change.
const RESYNC_INTERVAL: Duration = Duration::from_secs(3600);
const ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// Reads the CA bundle and returns it base64 encoded.
pub async fn read_ca_bundle(path: &Path) -> Result<String, AgentError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| AgentError::CaBundle {
            path: path.display().to_string(),
            source,
        })?;
    Ok(STANDARD.encode(bytes))
}

pub fn skips_ca(cluster: &Cluster) -> bool {
    cluster
        .annotations()
        .get(SKIP_CA_CERT_ANNOTATION)
        .is_some_and(|v| v == "true")
}

/// The spec sent for `cluster`, named after the object when the spec has no
/// name of its own.
pub fn desired_spec(cluster: &Cluster, ca_data: Option<&str>) -> ClusterSpec {
    let mut spec = cluster.spec.spec.clone();
    if spec.name.is_empty() {
        spec.name = cluster.name_any();
    }
    if let Some(ca_data) = ca_data {
        spec.api_server.certificate_authority_data = ca_data.to_string();
    }
    spec
}

/// Fingerprint over the identity, labels, annotations and `spec`, which
/// leaves out everything the API server rewrites on its own.
pub fn fingerprint_of(cluster: &Cluster, spec: &ClusterSpec) -> Result<String, AgentError> {
    let view = json!({
        "metadata": {
            "name": cluster.name_any(),
            "namespace": cluster.namespace(),
            "labels": cluster.labels(),
            "annotations": cluster.annotations(),
        },
        "spec": spec.to_value()?,
    });
    Ok(model::fingerprint::fingerprint(&view, HASH_ANNOTATION))
}

/// Watch event filter: deletions, objects without the finalizer and
/// descriptors whose fingerprint moved.
pub fn needs_sync(cluster: &Cluster) -> bool {
    if cluster.metadata.deletion_timestamp.is_some() || !cluster.finalizers().iter().any(|f| f == FINALIZER) {
        return true;
    }
    let stored = cluster.annotations().get(HASH_ANNOTATION);
    match fingerprint_of(cluster, &desired_spec(cluster, None)) {
        Ok(fingerprint) => stored != Some(&fingerprint),
        Err(_) => true,
    }
}

/// The final update of a deleted descriptor.
pub fn deleted_spec(cluster: &Cluster) -> ClusterSpec {
    let mut spec = desired_spec(cluster, None);
    spec.status = Status::Deleted.as_str().to_string();
    spec
}

pub async fn send_update(producer: &Producer, spec: &ClusterSpec) -> Result<(), AgentError> {
    tokio::time::timeout(SEND_TIMEOUT, producer.send(spec, None))
        .await
        .map_err(|_| AgentError::SendTimeout(EVENT_CLUSTER_UPDATE))??;

    counter!(EVENTS_EMITTED, "type" => EVENT_CLUSTER_UPDATE).increment(1);
    Ok(())
}

struct Context {
    client: Client,
    producer: Producer,
    ca_bundle_path: PathBuf,
}

pub async fn run(
    client: Client,
    producer: Producer,
    config: ClusterControllerConfig,
) -> Result<(), AgentError> {
    let clusters: Api<Cluster> = Api::namespaced(client.clone(), &config.namespace);

    let (reader, writer) = reflector::store::<Cluster>();
    let events = watcher::watcher(clusters, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .try_filter(|cluster| {
            let admit = needs_sync(cluster);
            if !admit {
                counter!(EVENTS_FILTERED, "controller" => CONTROLLER).increment(1);
            }
            future::ready(admit)
        });

    let ctx = Arc::new(Context {
        client,
        producer,
        ca_bundle_path: config.ca_bundle_path.clone(),
    });

    tracing::info!(namespace = %config.namespace, "Cluster controller started");
    Controller::for_stream(events, reader)
        .with_config(controller::Config::default().concurrency(config.concurrency))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => tracing::debug!(name = %obj.name, ?action, "Cluster reconciled"),
                Err(e) => tracing::warn!(error = %e, "Cluster reconcile failed"),
            }
        })
        .await;
    tracing::info!("Cluster controller stopped");
    Ok(())
}

async fn reconcile(cluster: Arc<Cluster>, ctx: Arc<Context>) -> Result<Action, AgentError> {
    let start = Instant::now();
    counter!(RECONCILES, "controller" => CONTROLLER).increment(1);

    let namespace = cluster.namespace().ok_or_else(|| AgentError::MissingNamespace {
        kind: "Cluster",
        name: cluster.name_any(),
    })?;
    let api: Api<Cluster> = Api::namespaced(ctx.client.clone(), &namespace);

    let result = finalizer(&api, FINALIZER, cluster, |event| async {
        match event {
            FinalizerEvent::Apply(cluster) => apply(cluster, &api, &ctx).await,
            FinalizerEvent::Cleanup(cluster) => cleanup(cluster, &ctx).await,
        }
    })
    .await
    .map_err(|e| AgentError::Finalizer(e.to_string()));

    histogram!(RECONCILE_DURATION, "controller" => CONTROLLER).record(start.elapsed().as_secs_f64());
    if result.is_err() {
        counter!(RECONCILE_ERRORS, "controller" => CONTROLLER).increment(1);
    }
    result
}

#[tracing::instrument(skip_all, fields(cluster = %cluster.name_any()))]
async fn apply(cluster: Arc<Cluster>, api: &Api<Cluster>, ctx: &Context) -> Result<Action, AgentError> {
    let ca_data = if skips_ca(&cluster) {
        None
    } else {
        Some(read_ca_bundle(&ctx.ca_bundle_path).await?)
    };
    let spec = desired_spec(&cluster, ca_data.as_deref());
    let fingerprint = fingerprint_of(&cluster, &spec)?;

    if cluster.annotations().get(HASH_ANNOTATION) == Some(&fingerprint) {
        tracing::debug!("Descriptor unchanged");
        return Ok(Action::requeue(RESYNC_INTERVAL));
    }

    send_update(&ctx.producer, &spec).await?;
    tracing::info!(fingerprint = %fingerprint, "Sent cluster update");

    let mut patch = json!({"metadata": {"annotations": {HASH_ANNOTATION: fingerprint}}});
    if let Some(ca_data) = ca_data.filter(|ca| *ca != cluster.spec.spec.api_server.certificate_authority_data) {
        patch["spec"] = json!({"apiServer": {"certificateAuthorityData": ca_data}});
    }
    api.patch(&cluster.name_any(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;

    Ok(Action::requeue(RESYNC_INTERVAL))
}

#[tracing::instrument(skip_all, fields(cluster = %cluster.name_any()))]
async fn cleanup(cluster: Arc<Cluster>, ctx: &Context) -> Result<Action, AgentError> {
    send_update(&ctx.producer, &deleted_spec(&cluster)).await?;
    tracing::info!("Sent deletion of cluster");
    Ok(Action::await_change())
}

fn error_policy(cluster: Arc<Cluster>, error: &AgentError, _ctx: Arc<Context>) -> Action {
    tracing::warn!(cluster = %cluster.name_any(), error = %error, "Cluster reconcile error, will retry");
    Action::requeue(ERROR_REQUEUE)
}
