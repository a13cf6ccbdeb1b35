use crate::errors::ModelError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// serviceId -> namespace -> key -> value
pub type ServiceMetadata = BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>;

/// Tag keys that may be written through the API.
pub const ALLOWED_TAGS: &[&str] = &["onboarding", "scaling"];

fn is_zero(v: &i64) -> bool {
    *v == 0
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Canonical description of one cluster.
///
/// Every field is omitted from the serialized form when it holds its zero
/// value, so that a partially filled spec serializes to a merge patch
/// relative to `ClusterSpec::default()`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub short_name: String,
    #[serde(default, skip_serializing_if = "ApiServer::is_empty")]
    pub api_server: ApiServer,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cloud_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cloud_provider_region: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub environment: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub business_unit: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chargeback_business_unit: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub managing_org: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub offering: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub account_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tiers: Vec<Tier>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub virtual_networks: Vec<VirtualNetwork>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub registered_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phase: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub maintenance_group: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub argo_instance: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_updated: String,
    #[serde(default, skip_serializing_if = "Extra::is_empty")]
    pub extra: Extra,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peer_virtual_networks: Vec<PeerVirtualNetwork>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Capacity::is_empty")]
    pub capacity: Capacity,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub service_metadata: ServiceMetadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub availability_zones: Vec<AvailabilityZone>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiServer {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub certificate_authority_data: String,
}

impl ApiServer {
    pub fn is_empty(&self) -> bool {
        self.endpoint.is_empty() && self.certificate_authority_data.is_empty()
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Tier {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instance_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_runtime: Option<ContainerRuntime>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub min_capacity: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_capacity: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub enable_kata_support: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kernel_parameters: BTreeMap<String, String>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub enum ContainerRuntime {
    #[serde(rename = "docker")]
    Docker,
    #[serde(rename = "cri-o")]
    CriO,
}

impl FromStr for ContainerRuntime {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "docker" => Ok(ContainerRuntime::Docker),
            "cri-o" | "containerd" => Ok(ContainerRuntime::CriO),
            other => Err(ModelError::InvalidEnum {
                field: "containerRuntime",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetwork {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cidrs: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PeerVirtualNetwork {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cidrs: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner_id: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityZone {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Extra {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain_name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lb_endpoints: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub egress_ports: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub oidc_issuer: String,
}

impl Extra {
    pub fn is_empty(&self) -> bool {
        self == &Extra::default()
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Capacity {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_update: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub cluster_capacity: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub cluster_provisioning: i64,
}

impl Capacity {
    pub fn is_empty(&self) -> bool {
        self == &Capacity::default()
    }
}

/// Lifecycle status of a cluster.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub enum Status {
    Inactive,
    Active,
    Deprecated,
    Deleted,
}

impl Status {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Status::Inactive => "Inactive",
            Status::Active => "Active",
            Status::Deprecated => "Deprecated",
            Status::Deleted => "Deleted",
        }
    }
}

impl FromStr for Status {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Inactive" => Ok(Status::Inactive),
            "Active" => Ok(Status::Active),
            "Deprecated" => Ok(Status::Deprecated),
            "Deleted" => Ok(Status::Deleted),
            other => Err(ModelError::InvalidEnum {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rollout phase of a cluster.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub enum Phase {
    Building,
    Testing,
    Running,
    Upgrading,
}

impl Phase {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Phase::Building => "Building",
            Phase::Testing => "Testing",
            Phase::Running => "Running",
            Phase::Upgrading => "Upgrading",
        }
    }
}

impl FromStr for Phase {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Building" => Ok(Phase::Building),
            "Testing" => Ok(Phase::Testing),
            "Running" => Ok(Phase::Running),
            "Upgrading" => Ok(Phase::Upgrading),
            other => Err(ModelError::InvalidEnum {
                field: "phase",
                value: other.to_string(),
            }),
        }
    }
}

impl ClusterSpec {
    pub fn is_deleted(&self) -> bool {
        self.status == Status::Deleted.as_str()
    }

    /// Serializes the spec into a JSON object, dropping zero valued fields.
    pub fn to_value(&self) -> Result<serde_json::Value, ModelError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, ModelError> {
        Ok(serde_json::from_value(value)?)
    }
}
