use super::{EventHandler, Outcome, admit};
use crate::errors::IngestError;
use async_trait::async_trait;
use model::{ClusterSpec, EVENT_PARTIAL_CLUSTER_UPDATE};
use queue::Envelope;
use serde_json::Value;
use std::sync::Arc;
use store::ClusterStore;

/// Applies the JSON merge patch carried by a `partial-cluster-update` event
/// to an already registered cluster.
pub struct PartialUpdateHandler {
    store: Arc<dyn ClusterStore>,
}

impl PartialUpdateHandler {
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        PartialUpdateHandler { store }
    }
}

#[async_trait]
impl EventHandler for PartialUpdateHandler {
    fn event_type(&self) -> &'static str {
        EVENT_PARTIAL_CLUSTER_UPDATE
    }

    async fn handle(&self, envelope: &Envelope) -> Result<Outcome, IngestError> {
        let patch: Value = serde_json::from_str(&envelope.body)?;
        if !patch.is_object() {
            return Err(IngestError::MalformedBody(serde::de::Error::custom(
                "merge patch must be an object",
            )));
        }
        let sent_at = envelope.sent_at()?;

        let name = envelope.cluster_name.as_str();
        let Some(stored) = self.store.get_cluster(name).await? else {
            return Err(IngestError::UnknownCluster(name.to_string()));
        };

        let mut document = stored.to_value()?;
        json_patch::merge(&mut document, &patch);
        let mut patched = ClusterSpec::from_value(document)?;
        patched.name = stored.name.clone();

        if !admit(Some(&stored), &mut patched, sent_at)? {
            return Ok(Outcome::Skipped);
        }

        self.store.put_cluster(&patched).await?;
        tracing::info!(cluster = %name, last_updated = %patched.last_updated, "Cluster patched");
        Ok(Outcome::Applied)
    }
}
