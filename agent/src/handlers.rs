//! Extraction handlers: each one turns the objects of one kind into a
//! partial `ClusterSpec`.

use crate::errors::AgentError;
use indexmap::IndexMap;
use kube::ResourceExt;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use model::types::{AvailabilityZone, ContainerRuntime, Tier, VirtualNetwork};
use model::ClusterSpec;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const SHORT_NAME_LABEL: &str = "registry.ethos.adobe.com/short-name";
pub const REGION_LABEL: &str = "registry.ethos.adobe.com/region";
pub const CLOUD_TYPE_LABEL: &str = "registry.ethos.adobe.com/cloud-type";
pub const CLOUD_PROVIDER_REGION_LABEL: &str = "registry.ethos.adobe.com/cloud-provider-region";
pub const ENVIRONMENT_LABEL: &str = "registry.ethos.adobe.com/environment";

/// Subnets whose name contains this marker are reported as availability zones.
const PRIVATE_SUBNET_MARKER: &str = "private";

pub trait ResourceHandler: Send + Sync {
    fn api_version(&self) -> &'static str;
    fn kind(&self) -> &'static str;

    /// Builds the partial spec for every object of the kind selected by one
    /// watched resource. No objects yield an empty spec.
    fn extract(&self, objects: &[DynamicObject]) -> Result<ClusterSpec, AgentError>;

    fn gvk(&self) -> GroupVersionKind {
        gvk(self.api_version(), self.kind())
    }

    fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk(&self.gvk())
    }
}

pub fn gvk(api_version: &str, kind: &str) -> GroupVersionKind {
    match api_version.split_once('/') {
        Some((group, version)) => GroupVersionKind::gvk(group, version, kind),
        None => GroupVersionKind::gvk("", api_version, kind),
    }
}

/// Handlers keyed by `(apiVersion, kind)` in registration order.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: IndexMap<(String, String), Arc<dyn ResourceHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in handler.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DescriptorHandler));
        registry.register(Arc::new(VpcHandler));
        registry.register(Arc::new(SubnetHandler));
        registry.register(Arc::new(MachinePoolHandler));
        registry.register(Arc::new(NodeConfigHandler));
        registry.register(Arc::new(ControlPlaneHandler));
        registry
    }

    /// Registers `handler`, replacing any handler of the same kind.
    pub fn register(&mut self, handler: Arc<dyn ResourceHandler>) {
        let key = (handler.api_version().to_string(), handler.kind().to_string());
        self.handlers.insert(key, handler);
    }

    pub fn get(&self, api_version: &str, kind: &str) -> Option<&Arc<dyn ResourceHandler>> {
        self.handlers
            .get(&(api_version.to_string(), kind.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ResourceHandler>> {
        self.handlers.values()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

fn str_at<'a>(object: &'a DynamicObject, pointer: &str) -> Option<&'a str> {
    object
        .data
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn strings_at(object: &DynamicObject, pointer: &str) -> Vec<String> {
    object
        .data
        .pointer(pointer)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn int_at(object: &DynamicObject, pointer: &str) -> i64 {
    object
        .data
        .pointer(pointer)
        .and_then(Value::as_i64)
        .unwrap_or_default()
}

fn string_map_at(object: &DynamicObject, pointer: &str) -> BTreeMap<String, String> {
    object
        .data
        .pointer(pointer)
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Location and environment of the cluster from the labels of its descriptor.
pub struct DescriptorHandler;

impl ResourceHandler for DescriptorHandler {
    fn api_version(&self) -> &'static str {
        "registry.ethos.adobe.com/v1"
    }

    fn kind(&self) -> &'static str {
        "Cluster"
    }

    fn extract(&self, objects: &[DynamicObject]) -> Result<ClusterSpec, AgentError> {
        let mut spec = ClusterSpec::default();
        for object in objects {
            let labels = object.labels();
            let label = |key: &str| labels.get(key).cloned().unwrap_or_default();

            spec.short_name = label(SHORT_NAME_LABEL);
            spec.region = label(REGION_LABEL);
            spec.cloud_type = label(CLOUD_TYPE_LABEL);
            spec.cloud_provider_region = label(CLOUD_PROVIDER_REGION_LABEL);
            spec.environment = label(ENVIRONMENT_LABEL);
        }
        Ok(spec)
    }
}

pub struct VpcHandler;

impl ResourceHandler for VpcHandler {
    fn api_version(&self) -> &'static str {
        "ec2.services.k8s.aws/v1alpha1"
    }

    fn kind(&self) -> &'static str {
        "VPC"
    }

    fn extract(&self, objects: &[DynamicObject]) -> Result<ClusterSpec, AgentError> {
        let mut spec = ClusterSpec::default();
        for object in objects {
            // Not yet created in the cloud account.
            let Some(id) = str_at(object, "/status/vpcID") else {
                tracing::debug!(vpc = %object.name_any(), "VPC has no id yet");
                continue;
            };
            spec.virtual_networks.push(VirtualNetwork {
                id: id.to_string(),
                cidrs: strings_at(object, "/spec/cidrBlocks"),
            });
        }
        Ok(spec)
    }
}

pub struct SubnetHandler;

impl ResourceHandler for SubnetHandler {
    fn api_version(&self) -> &'static str {
        "ec2.services.k8s.aws/v1alpha1"
    }

    fn kind(&self) -> &'static str {
        "Subnet"
    }

    fn extract(&self, objects: &[DynamicObject]) -> Result<ClusterSpec, AgentError> {
        let mut spec = ClusterSpec::default();
        for object in objects {
            let name = object.name_any();
            if !name.contains(PRIVATE_SUBNET_MARKER) {
                continue;
            }
            let Some(id) = str_at(object, "/status/subnetID") else {
                tracing::debug!(subnet = %name, "Subnet has no id yet");
                continue;
            };
            let zone = str_at(object, "/spec/availabilityZone")
                .map(str::to_string)
                .unwrap_or(name);
            spec.availability_zones.push(AvailabilityZone {
                name: zone,
                id: id.to_string(),
            });
        }
        Ok(spec)
    }
}

/// One tier per managed machine pool, named after the pool.
pub struct MachinePoolHandler;

impl ResourceHandler for MachinePoolHandler {
    fn api_version(&self) -> &'static str {
        "infrastructure.cluster.x-k8s.io/v1beta2"
    }

    fn kind(&self) -> &'static str {
        "AWSManagedMachinePool"
    }

    fn extract(&self, objects: &[DynamicObject]) -> Result<ClusterSpec, AgentError> {
        let mut spec = ClusterSpec::default();
        for object in objects {
            let tier = Tier {
                name: object.name_any(),
                instance_type: str_at(object, "/spec/instanceType")
                    .unwrap_or_default()
                    .to_string(),
                min_capacity: int_at(object, "/spec/scaling/minSize"),
                max_capacity: int_at(object, "/spec/scaling/maxSize"),
                labels: string_map_at(object, "/spec/labels"),
                taints: taints(object),
                ..Default::default()
            };

            match spec.tiers.iter_mut().find(|t| t.name == tier.name) {
                Some(existing) => *existing = tier,
                None => spec.tiers.push(tier),
            }
        }
        Ok(spec)
    }
}

/// Renders `spec.taints` as `key=value:effect`.
fn taints(object: &DynamicObject) -> Vec<String> {
    let Some(items) = object.data.pointer("/spec/taints").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|taint| {
            let key = taint.get("key").and_then(Value::as_str)?;
            let value = taint.get("value").and_then(Value::as_str).unwrap_or_default();
            let effect = taint.get("effect").and_then(Value::as_str).unwrap_or_default();
            Some(format!("{key}={value}:{effect}"))
        })
        .collect()
}

/// Container runtime of the tier sharing the bootstrap config's name.
pub struct NodeConfigHandler;

impl ResourceHandler for NodeConfigHandler {
    fn api_version(&self) -> &'static str {
        "bootstrap.cluster.x-k8s.io/v1beta2"
    }

    fn kind(&self) -> &'static str {
        "EKSConfig"
    }

    fn extract(&self, objects: &[DynamicObject]) -> Result<ClusterSpec, AgentError> {
        let mut spec = ClusterSpec::default();
        for object in objects {
            let Some(raw) = str_at(object, "/spec/containerRuntime") else {
                continue;
            };
            let runtime: ContainerRuntime = serde_json::from_value(Value::String(raw.to_string()))
                .map_err(|_| {
                    AgentError::extract(
                        "EKSConfig",
                        object.name_any(),
                        format!("unsupported container runtime {raw}"),
                    )
                })?;

            spec.tiers.push(Tier {
                name: object.name_any(),
                container_runtime: Some(runtime),
                ..Default::default()
            });
        }
        Ok(spec)
    }
}

pub struct ControlPlaneHandler;

impl ResourceHandler for ControlPlaneHandler {
    fn api_version(&self) -> &'static str {
        "controlplane.cluster.x-k8s.io/v1beta2"
    }

    fn kind(&self) -> &'static str {
        "AWSManagedControlPlane"
    }

    fn extract(&self, objects: &[DynamicObject]) -> Result<ClusterSpec, AgentError> {
        let mut spec = ClusterSpec::default();
        for object in objects {
            let Some(arn) = str_at(object, "/status/oidcProvider/arn") else {
                continue;
            };
            let (_, issuer) = arn.split_once('/').ok_or_else(|| {
                AgentError::extract(
                    "AWSManagedControlPlane",
                    object.name_any(),
                    format!("malformed OIDC provider ARN {arn}"),
                )
            })?;
            spec.extra.oidc_issuer = issuer.to_string();
        }
        Ok(spec)
    }
}
