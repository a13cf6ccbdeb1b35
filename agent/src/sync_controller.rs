//! Projects watched in-cluster resources into partial cluster updates.
//!
//! Every `ClusterSync` names the objects to extract from. A reconcile runs
//! each of them through its handler, fuses the partial specs, merges the
//! result onto the sync's initial data and, when the projection's
//! fingerprint moved, emits a `partial-cluster-update`. The fingerprint and
//! projection are written back only after the event was accepted by the
//! queue, so a failed write re-emits on the next reconcile.

use crate::config::SyncControllerConfig;
use crate::crd::{ClusterSync, ClusterSyncSpec, WatchedResource};
use crate::errors::AgentError;
use crate::handlers::HandlerRegistry;
use crate::metrics_defs::{
    EVENTS_EMITTED, EVENTS_FILTERED, RECONCILE_DURATION, RECONCILE_ERRORS, RECONCILES,
};
use crate::selector::{affected_syncs, to_query};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use kube::api::{Api, ApiResource, DynamicObject, ListParams, Patch, PatchParams};
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::reflector;
use kube::runtime::WatchStreamExt;
use kube::runtime::watcher::{self, Event};
use kube::{Client, ResourceExt};
use model::{EVENT_PARTIAL_CLUSTER_UPDATE, FINGERPRINT_ANNOTATION};
use queue::Producer;
use serde_json::{Value, json};
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};

const CONTROLLER: &str = "cluster-sync";
const FIELD_MANAGER: &str = "cluster-registry-sync";
const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const RESYNC_INTERVAL: Duration = Duration::from_secs(600);
const ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// Looks up the objects a watched resource refers to.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    async fn resolve(
        &self,
        namespace: &str,
        resource: &ApiResource,
        watched: &WatchedResource,
    ) -> Result<Vec<DynamicObject>, AgentError>;
}

pub struct KubeObjectSource {
    client: Client,
}

impl KubeObjectSource {
    pub fn new(client: Client) -> Self {
        KubeObjectSource { client }
    }
}

#[async_trait]
impl ObjectSource for KubeObjectSource {
    async fn resolve(
        &self,
        namespace: &str,
        resource: &ApiResource,
        watched: &WatchedResource,
    ) -> Result<Vec<DynamicObject>, AgentError> {
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, resource);

        if let Some(name) = &watched.name {
            return Ok(api.get_opt(name).await?.into_iter().collect());
        }

        let mut params = ListParams::default();
        if let Some(selector) = &watched.label_selector {
            let query = to_query(selector)?;
            if !query.is_empty() {
                params = params.labels(&query);
            }
        }
        Ok(api.list(&params).await?.items)
    }
}

/// The merged view of one `ClusterSync`.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub value: Value,
    /// `value` rendered as YAML, as stored in the status.
    pub data: String,
    pub fingerprint: String,
}

/// Runs every watched resource through its handler and merges the fused
/// partials onto the initial data.
pub async fn project(
    spec: &ClusterSyncSpec,
    namespace: &str,
    source: &dyn ObjectSource,
    registry: &HandlerRegistry,
) -> Result<Projection, AgentError> {
    let mut patches = Vec::with_capacity(spec.watched_resources.len());
    for watched in &spec.watched_resources {
        let handler = registry
            .get(&watched.api_version, &watched.kind)
            .ok_or_else(|| AgentError::UnknownResource {
                api_version: watched.api_version.clone(),
                kind: watched.kind.clone(),
            })?;

        let objects = source
            .resolve(namespace, &handler.api_resource(), watched)
            .await?;
        let partial = handler.extract(&objects)?;
        tracing::debug!(
            kind = handler.kind(),
            objects = objects.len(),
            "Extracted partial spec"
        );
        patches.push(partial.to_value()?);
    }
    let fused = model::merge::fuse_patches(&patches)?;

    let mut value = match spec.initial_data.as_deref().map(str::trim) {
        Some(yaml) if !yaml.is_empty() => serde_yaml::from_str(yaml)?,
        _ => json!({}),
    };
    json_patch::merge(&mut value, &fused);

    let data = serde_yaml::to_string(&value)?;
    let fingerprint = model::fingerprint::fingerprint(&value, FINGERPRINT_ANNOTATION);
    Ok(Projection {
        value,
        data,
        fingerprint,
    })
}

/// What a reconcile has to do for a computed projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPlan {
    pub emit: bool,
    pub write_back: bool,
}

pub fn plan(sync: &ClusterSync, projection: &Projection) -> SyncPlan {
    let stored_fingerprint = sync.annotations().get(FINGERPRINT_ANNOTATION);
    let stored_data = sync.status.as_ref().and_then(|s| s.data.as_ref());

    let emit = stored_fingerprint != Some(&projection.fingerprint);
    SyncPlan {
        emit,
        write_back: emit || stored_data != Some(&projection.data),
    }
}

/// Sends the projection as a merge patch for the sync's cluster.
pub async fn emit(producer: &Producer, spec: &ClusterSyncSpec, projection: &Projection) -> Result<(), AgentError> {
    tokio::time::timeout(
        SEND_TIMEOUT,
        producer.send_patch(&spec.cluster_name, &projection.value, None),
    )
    .await
    .map_err(|_| AgentError::SendTimeout(EVENT_PARTIAL_CLUSTER_UPDATE))??;

    counter!(EVENTS_EMITTED, "type" => EVENT_PARTIAL_CLUSTER_UPDATE).increment(1);
    Ok(())
}

/// Remembers the last admitted state of every `ClusterSync` so that watch
/// events which change neither the fingerprint nor the spec are dropped.
#[derive(Default)]
pub struct SyncEventFilter {
    seen: DashMap<String, (Option<String>, String)>,
}

impl SyncEventFilter {
    fn key(sync: &ClusterSync) -> String {
        format!("{}/{}", sync.namespace().unwrap_or_default(), sync.name_any())
    }

    pub fn admit(&self, sync: &ClusterSync) -> bool {
        let fingerprint = sync.annotations().get(FINGERPRINT_ANNOTATION).cloned();
        let spec = serde_json::to_string(&sync.spec).unwrap_or_default();
        let state = (fingerprint, spec);

        match self.seen.insert(Self::key(sync), state.clone()) {
            Some(previous) => previous != state,
            None => true,
        }
    }

    pub fn forget(&self, sync: &ClusterSync) {
        self.seen.remove(&Self::key(sync));
    }

    /// Maps a watch event to the object to reconcile, if any.
    ///
    /// Deletes only reset the remembered state. A `ClusterSync` carries no
    /// finalizer and nothing is emitted for its removal, so by the time the
    /// event arrives the reflector has already dropped the object and there
    /// is nothing left to reconcile.
    pub fn filter_event(&self, event: Event<ClusterSync>) -> Option<ClusterSync> {
        match event {
            Event::Apply(sync) | Event::InitApply(sync) => {
                if self.admit(&sync) {
                    Some(sync)
                } else {
                    counter!(EVENTS_FILTERED, "controller" => CONTROLLER).increment(1);
                    None
                }
            }
            Event::Delete(sync) => {
                self.forget(&sync);
                None
            }
            _ => None,
        }
    }
}

struct Context {
    client: Client,
    producer: Producer,
    registry: Arc<HandlerRegistry>,
    source: KubeObjectSource,
}

pub async fn run(client: Client, producer: Producer, config: SyncControllerConfig) -> Result<(), AgentError> {
    let registry = Arc::new(HandlerRegistry::with_defaults());
    let syncs: Api<ClusterSync> = Api::namespaced(client.clone(), &config.namespace);

    let filter = Arc::new(SyncEventFilter::default());
    let (reader, writer) = reflector::store::<ClusterSync>();
    let events = watcher::watcher(syncs, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .filter_map(move |event| {
            let filter = filter.clone();
            async move {
                match event {
                    Ok(event) => filter.filter_event(event).map(Ok),
                    Err(e) => Some(Err(e)),
                }
            }
        });

    let mut controller = Controller::for_stream(events, reader.clone())
        .with_config(controller::Config::default().concurrency(config.concurrency));

    for handler in registry.iter() {
        let resource = handler.api_resource();
        let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), &config.namespace, &resource);
        let store = reader.clone();
        let (api_version, kind) = (handler.api_version(), handler.kind());

        controller = controller.watches_with(
            api,
            resource,
            watcher::Config::default(),
            move |child: DynamicObject| affected_syncs(&store.state(), &child, api_version, kind),
        );
    }

    let ctx = Arc::new(Context {
        source: KubeObjectSource::new(client.clone()),
        client,
        producer,
        registry,
    });

    tracing::info!(namespace = %config.namespace, concurrency = config.concurrency, "Sync controller started");
    controller
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    tracing::debug!(name = %obj.name, ?action, "ClusterSync reconciled")
                }
                Err(e) => tracing::warn!(error = %e, "ClusterSync reconcile failed"),
            }
        })
        .await;
    tracing::info!("Sync controller stopped");
    Ok(())
}

async fn reconcile(sync: Arc<ClusterSync>, ctx: Arc<Context>) -> Result<Action, AgentError> {
    let start = Instant::now();
    counter!(RECONCILES, "controller" => CONTROLLER).increment(1);

    let result = sync_one(&sync, &ctx).await;

    histogram!(RECONCILE_DURATION, "controller" => CONTROLLER).record(start.elapsed().as_secs_f64());
    if result.is_err() {
        counter!(RECONCILE_ERRORS, "controller" => CONTROLLER).increment(1);
    }
    result
}

#[tracing::instrument(skip_all, fields(sync = %sync.name_any(), cluster = %sync.spec.cluster_name))]
async fn sync_one(sync: &ClusterSync, ctx: &Context) -> Result<Action, AgentError> {
    let name = sync.name_any();
    let namespace = sync.namespace().ok_or_else(|| AgentError::MissingNamespace {
        kind: "ClusterSync",
        name: name.clone(),
    })?;
    let api: Api<ClusterSync> = Api::namespaced(ctx.client.clone(), &namespace);

    let projection = match project(&sync.spec, &namespace, &ctx.source, &ctx.registry).await {
        Ok(projection) => projection,
        Err(e) => {
            let status = json!({"status": {"error": e.to_string()}});
            if let Err(patch_err) = api
                .patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&status))
                .await
            {
                tracing::warn!(error = %patch_err, "Failed to record sync error");
            }
            return Err(e);
        }
    };

    let plan = plan(sync, &projection);
    if plan.emit {
        emit(&ctx.producer, &sync.spec, &projection).await?;
        tracing::info!(fingerprint = %projection.fingerprint, "Emitted partial cluster update");
    }

    if plan.write_back {
        let params = PatchParams::apply(FIELD_MANAGER);
        let metadata = json!({
            "metadata": {"annotations": {FINGERPRINT_ANNOTATION: projection.fingerprint}}
        });
        api.patch(&name, &params, &Patch::Merge(&metadata)).await?;

        let status = json!({"status": {
            "data": projection.data,
            "lastSyncTime": model::time::now_rfc3339_nano(),
            "error": null
        }});
        api.patch_status(&name, &params, &Patch::Merge(&status)).await?;
    }

    Ok(Action::requeue(RESYNC_INTERVAL))
}

fn error_policy(sync: Arc<ClusterSync>, error: &AgentError, _ctx: Arc<Context>) -> Action {
    tracing::warn!(sync = %sync.name_any(), error = %error, "ClusterSync reconcile error, will retry");
    Action::requeue(ERROR_REQUEUE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::tests::object;
    use crate::selector::selects;
    use queue::MemoryQueue;

    /// Serves a fixed set of objects, selected the way the API server would.
    struct StaticSource {
        objects: Vec<DynamicObject>,
    }

    #[async_trait]
    impl ObjectSource for StaticSource {
        async fn resolve(
            &self,
            namespace: &str,
            resource: &ApiResource,
            watched: &WatchedResource,
        ) -> Result<Vec<DynamicObject>, AgentError> {
            Ok(self
                .objects
                .iter()
                .filter(|o| o.namespace().as_deref() == Some(namespace))
                .filter(|o| {
                    let types = o.types.as_ref();
                    types.map(|t| t.kind.as_str()) == Some(resource.kind.as_str())
                        && selects(
                            watched,
                            &resource.api_version,
                            &resource.kind,
                            &o.name_any(),
                            o.labels(),
                        )
                })
                .cloned()
                .collect())
        }
    }

    fn source() -> StaticSource {
        StaticSource {
            objects: vec![
                object(json!({
                    "apiVersion": "ec2.services.k8s.aws/v1alpha1",
                    "kind": "VPC",
                    "metadata": {"name": "main", "namespace": "cluster-registry"},
                    "spec": {"cidrBlocks": ["10.0.0.0/16"]},
                    "status": {"vpcID": "vpc-0abc"}
                })),
                object(json!({
                    "apiVersion": "ec2.services.k8s.aws/v1alpha1",
                    "kind": "Subnet",
                    "metadata": {
                        "name": "cluster01-private-a",
                        "namespace": "cluster-registry",
                        "labels": {"owner": "registry"}
                    },
                    "spec": {"availabilityZone": "us-east-1a"},
                    "status": {"subnetID": "subnet-1"}
                })),
                object(json!({
                    "apiVersion": "infrastructure.cluster.x-k8s.io/v1beta2",
                    "kind": "AWSManagedMachinePool",
                    "metadata": {"name": "worker", "namespace": "cluster-registry"},
                    "spec": {"instanceType": "m5.xlarge", "scaling": {"minSize": 3, "maxSize": 12}}
                })),
                object(json!({
                    "apiVersion": "bootstrap.cluster.x-k8s.io/v1beta2",
                    "kind": "EKSConfig",
                    "metadata": {"name": "worker", "namespace": "cluster-registry"},
                    "spec": {"containerRuntime": "cri-o"}
                })),
            ],
        }
    }

    fn sync_spec(initial_data: Option<&str>) -> ClusterSyncSpec {
        serde_json::from_value(json!({
            "clusterName": "cluster01-prod-useast1",
            "initialData": initial_data,
            "watchedResources": [
                {"apiVersion": "ec2.services.k8s.aws/v1alpha1", "kind": "VPC", "name": "main"},
                {
                    "apiVersion": "ec2.services.k8s.aws/v1alpha1",
                    "kind": "Subnet",
                    "labelSelector": {"matchLabels": {"owner": "registry"}}
                },
                {"apiVersion": "infrastructure.cluster.x-k8s.io/v1beta2", "kind": "AWSManagedMachinePool"},
                {"apiVersion": "bootstrap.cluster.x-k8s.io/v1beta2", "kind": "EKSConfig"}
            ]
        }))
        .unwrap()
    }

    fn cluster_sync(spec: ClusterSyncSpec, fingerprint: Option<&str>, data: Option<&str>) -> ClusterSync {
        let mut sync = ClusterSync::new("cluster01", spec);
        sync.metadata.namespace = Some("cluster-registry".into());
        if let Some(fingerprint) = fingerprint {
            sync.annotations_mut()
                .insert(FINGERPRINT_ANNOTATION.into(), fingerprint.into());
        }
        sync.status = data.map(|d| crate::crd::ClusterSyncStatus {
            data: Some(d.into()),
            ..Default::default()
        });
        sync
    }

    #[tokio::test]
    async fn test_projection_fuses_handlers() {
        let registry = HandlerRegistry::with_defaults();
        let projection = project(&sync_spec(None), "cluster-registry", &source(), &registry)
            .await
            .unwrap();

        assert_eq!(
            projection.value,
            json!({
                "virtualNetworks": [{"id": "vpc-0abc", "cidrs": ["10.0.0.0/16"]}],
                "availabilityZones": [{"name": "us-east-1a", "id": "subnet-1"}],
                "tiers": [{
                    "name": "worker",
                    "instanceType": "m5.xlarge",
                    "minCapacity": 3,
                    "maxCapacity": 12,
                    "containerRuntime": "cri-o"
                }]
            })
        );
        assert_eq!(
            projection.fingerprint,
            model::fingerprint::fingerprint(&projection.value, FINGERPRINT_ANNOTATION)
        );
    }

    #[tokio::test]
    async fn test_projection_keeps_initial_data() {
        let registry = HandlerRegistry::with_defaults();
        let spec = sync_spec(Some("businessUnit: ethos\noffering:\n  - caas\n"));
        let projection = project(&spec, "cluster-registry", &source(), &registry)
            .await
            .unwrap();

        assert_eq!(projection.value["businessUnit"], "ethos");
        assert_eq!(projection.value["offering"], json!(["caas"]));
        assert_eq!(projection.value["tiers"][0]["name"], "worker");
        assert!(projection.data.contains("businessUnit: ethos"));
    }

    #[tokio::test]
    async fn test_projection_ignores_other_namespaces() {
        let registry = HandlerRegistry::with_defaults();
        let projection = project(&sync_spec(None), "default", &source(), &registry)
            .await
            .unwrap();
        assert_eq!(projection.value, json!({}));
    }

    #[tokio::test]
    async fn test_unknown_kind_is_an_error() {
        let registry = HandlerRegistry::with_defaults();
        let spec: ClusterSyncSpec = serde_json::from_value(json!({
            "clusterName": "cluster01-prod-useast1",
            "watchedResources": [{"apiVersion": "v1", "kind": "ConfigMap"}]
        }))
        .unwrap();

        let err = project(&spec, "cluster-registry", &source(), &registry)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::UnknownResource { ref kind, .. } if kind == "ConfigMap"));
    }

    #[tokio::test]
    async fn test_plan() {
        let registry = HandlerRegistry::with_defaults();
        let projection = project(&sync_spec(None), "cluster-registry", &source(), &registry)
            .await
            .unwrap();

        let fresh = cluster_sync(sync_spec(None), None, None);
        assert_eq!(
            plan(&fresh, &projection),
            SyncPlan {
                emit: true,
                write_back: true
            }
        );

        let synced = cluster_sync(
            sync_spec(None),
            Some(&projection.fingerprint),
            Some(&projection.data),
        );
        assert_eq!(
            plan(&synced, &projection),
            SyncPlan {
                emit: false,
                write_back: false
            }
        );

        // Fingerprint matches but the stored projection was lost.
        let stale_status = cluster_sync(sync_spec(None), Some(&projection.fingerprint), None);
        assert_eq!(
            plan(&stale_status, &projection),
            SyncPlan {
                emit: false,
                write_back: true
            }
        );
    }

    #[tokio::test]
    async fn test_emit_sends_partial_update() {
        let queue = Arc::new(MemoryQueue::new());
        let producer = Producer::new(queue.clone());
        let registry = HandlerRegistry::with_defaults();
        let spec = sync_spec(None);
        let projection = project(&spec, "cluster-registry", &source(), &registry)
            .await
            .unwrap();

        emit(&producer, &spec, &projection).await.unwrap();

        let pending = queue.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].event_type, EVENT_PARTIAL_CLUSTER_UPDATE);
        assert_eq!(pending[0].cluster_name, "cluster01-prod-useast1");
        let body: Value = serde_json::from_str(&pending[0].body).unwrap();
        assert_eq!(body, projection.value);
    }

    #[test]
    fn test_event_filter() {
        let filter = SyncEventFilter::default();
        let sync = cluster_sync(sync_spec(None), Some("abc"), None);

        assert!(filter.admit(&sync));
        assert!(!filter.admit(&sync));

        let annotated = cluster_sync(sync_spec(None), Some("def"), None);
        assert!(filter.admit(&annotated));

        let mut respecced = annotated.clone();
        respecced.spec.watched_resources.pop();
        assert!(filter.admit(&respecced));

        // Status only changes are not reconciled.
        let mut status_only = respecced.clone();
        status_only.status = Some(Default::default());
        assert!(!filter.admit(&status_only));

        filter.forget(&status_only);
        assert!(filter.admit(&status_only));
    }

    #[test]
    fn test_filter_event_resets_on_delete() {
        let filter = SyncEventFilter::default();
        let sync = cluster_sync(sync_spec(None), Some("abc"), None);

        assert!(filter.filter_event(Event::InitApply(sync.clone())).is_some());
        assert!(filter.filter_event(Event::Apply(sync.clone())).is_none());
        assert!(filter.filter_event(Event::InitDone).is_none());

        assert!(filter.filter_event(Event::Delete(sync.clone())).is_none());
        // recreated under the same name
        assert!(filter.filter_event(Event::Apply(sync)).is_some());
    }
}
