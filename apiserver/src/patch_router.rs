//! Forwards dynamic field updates to the cluster that owns the descriptor.
//!
//! The central store is never written here: the edge cluster controller
//! picks the change up and replicates it back through the queue.

use crate::config::PatchSettings;
use crate::errors::ApiError;
use crate::metrics_defs::PATCH_FORWARDED;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use model::types::{ALLOWED_TAGS, Phase, Status};
use model::{ClusterSpec, EXCLUDED_TAGS_ANNOTATION};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use shared::counter;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const DESCRIPTOR_PATH: &str = "/apis/registry.ethos.adobe.com/v1/namespaces/cluster-registry/clusters";
const MERGE_PATCH_CONTENT_TYPE: &str = "application/merge-patch+json";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Tokens are refreshed this long before they expire.
const TOKEN_EXPIRY_SLACK: Duration = Duration::from_secs(60);

/// Fields of a cluster that may be changed through the API.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ClusterPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
}

impl ClusterPatch {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.status.is_none() && self.phase.is_none() && self.tags.is_none() {
            return Err(ApiError::Validation("patch must set status, phase or tags".into()));
        }
        if let Some(status) = &self.status {
            status
                .parse::<Status>()
                .map_err(|e| ApiError::Validation(e.to_string()))?;
        }
        if let Some(phase) = &self.phase {
            phase
                .parse::<Phase>()
                .map_err(|e| ApiError::Validation(e.to_string()))?;
        }
        for key in self.tags.iter().flat_map(|t| t.keys()) {
            if !ALLOWED_TAGS.contains(&key.as_str()) {
                return Err(ApiError::Validation(format!(
                    "tag {key} is not one of {}",
                    ALLOWED_TAGS.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Applies the patch to a local copy of `spec`.
    pub fn apply(&self, spec: &mut ClusterSpec) {
        if let Some(status) = &self.status {
            spec.status = status.clone();
        }
        if let Some(phase) = &self.phase {
            spec.phase = phase.clone();
        }
        if let Some(tags) = &self.tags {
            spec.tags.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }
}

#[async_trait]
pub trait EdgePatcher: Send + Sync {
    async fn patch(&self, target: &ClusterSpec, patch: &ClusterPatch) -> Result<(), ApiError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Client credentials token for the edge cluster audience.
struct TokenProvider {
    settings: PatchSettings,
    http_client: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.settings.authority_host.trim_end_matches('/'),
            self.settings.tenant_id
        )
    }

    async fn token(&self) -> Result<String, ApiError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.expires_at > Instant::now()) {
            return Ok(token.value.clone());
        }

        let scope = format!("{}/.default", self.settings.resource_id);
        let response: TokenResponse = self
            .http_client
            .post(self.token_url())
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
                ("scope", scope.as_str()),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ApiError::Upstream(format!("token request failed: {e}")))?
            .json()
            .await
            .map_err(|e| ApiError::Upstream(format!("invalid token response: {e}")))?;

        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(TOKEN_EXPIRY_SLACK);
        *cached = Some(CachedToken {
            value: response.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(response.access_token)
    }
}

pub struct KubePatchRouter {
    tokens: TokenProvider,
}

impl KubePatchRouter {
    pub fn new(settings: PatchSettings) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        Ok(KubePatchRouter {
            tokens: TokenProvider {
                settings,
                http_client,
                cached: Mutex::new(None),
            },
        })
    }

    fn client_for(&self, target: &ClusterSpec) -> Result<reqwest::Client, ApiError> {
        let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
        let ca = target.api_server.certificate_authority_data.trim();
        if !ca.is_empty() {
            let pem = STANDARD
                .decode(ca)
                .map_err(|e| ApiError::Upstream(format!("invalid CA bundle for {}: {e}", target.name)))?;
            let certificate = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| ApiError::Upstream(format!("invalid CA bundle for {}: {e}", target.name)))?;
            builder = builder.add_root_certificate(certificate);
        }
        builder.build().map_err(|e| ApiError::Upstream(e.to_string()))
    }

    fn descriptor_url(target: &ClusterSpec) -> Result<String, ApiError> {
        let endpoint = target.api_server.endpoint.trim_end_matches('/');
        if endpoint.is_empty() {
            return Err(ApiError::Upstream(format!(
                "cluster {} has no API server endpoint",
                target.name
            )));
        }
        Ok(format!("{endpoint}{DESCRIPTOR_PATH}/{}", target.name))
    }

    async fn excluded_tags(client: &reqwest::Client, url: &str, token: &str) -> Result<Vec<String>, ApiError> {
        let descriptor: Value = client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ApiError::Upstream(format!("failed to read cluster descriptor: {e}")))?
            .json()
            .await
            .map_err(|e| ApiError::Upstream(format!("invalid cluster descriptor: {e}")))?;

        Ok(descriptor
            .pointer("/metadata/annotations")
            .and_then(|a| a.get(EXCLUDED_TAGS_ANNOTATION))
            .and_then(Value::as_str)
            .map(parse_excluded_tags)
            .unwrap_or_default())
    }
}

fn parse_excluded_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl EdgePatcher for KubePatchRouter {
    async fn patch(&self, target: &ClusterSpec, patch: &ClusterPatch) -> Result<(), ApiError> {
        let url = Self::descriptor_url(target)?;
        let client = self.client_for(target)?;
        let token = self.tokens.token().await?;

        if let Some(tags) = &patch.tags {
            let excluded = Self::excluded_tags(&client, &url, &token).await?;
            if let Some(tag) = tags.keys().find(|k| excluded.contains(k)) {
                return Err(ApiError::Validation(format!(
                    "tag {tag} is excluded on cluster {}",
                    target.name
                )));
            }
        }

        let result = client
            .patch(&url)
            .bearer_auth(&token)
            .header(reqwest::header::CONTENT_TYPE, MERGE_PATCH_CONTENT_TYPE)
            .body(json!({ "spec": patch }).to_string())
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match result {
            Ok(_) => {
                counter!(PATCH_FORWARDED, "outcome" => "ok").increment(1);
                tracing::info!(cluster = %target.name, ?patch, "Patch forwarded to edge cluster");
                Ok(())
            }
            Err(e) => {
                counter!(PATCH_FORWARDED, "outcome" => "error").increment(1);
                Err(ApiError::Upstream(format!(
                    "failed to patch cluster {}: {e}",
                    target.name
                )))
            }
        }
    }
}
