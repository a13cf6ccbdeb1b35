//! Custom resources owned by the edge controllers.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use model::ClusterSpec;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const GROUP: &str = "registry.ethos.adobe.com";

/// The authoritative descriptor of the cluster this agent runs in.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "registry.ethos.adobe.com",
    version = "v1",
    kind = "Cluster",
    plural = "clusters",
    shortname = "cr",
    namespaced,
    printcolumn = r#"{"name":"Region","type":"string","jsonPath":".spec.region"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".spec.status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct ClusterDescriptor {
    #[serde(flatten)]
    pub spec: ClusterSpec,
}

/// Projects a set of in-cluster resources into a partial `ClusterSpec`.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "registry.ethos.adobe.com",
    version = "v1",
    kind = "ClusterSync",
    plural = "clustersyncs",
    status = "ClusterSyncStatus",
    namespaced,
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.clusterName"}"#,
    printcolumn = r#"{"name":"LastSync","type":"date","jsonPath":".status.lastSyncTime"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSyncSpec {
    /// Registry name of the cluster the projection belongs to.
    pub cluster_name: String,
    /// YAML document the extracted fields are merged onto.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_data: Option<String>,
    #[serde(default)]
    pub watched_resources: Vec<WatchedResource>,
}

/// One kind of object to extract from, selected by name or by labels.
/// With neither set every object of the kind in the namespace is used.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WatchedResource {
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSyncStatus {
    /// YAML projection last emitted to the registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
