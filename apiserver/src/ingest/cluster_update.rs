use super::{EventHandler, Outcome, admit};
use crate::errors::IngestError;
use async_trait::async_trait;
use model::{ClusterSpec, EVENT_CLUSTER_UPDATE};
use queue::Envelope;
use std::sync::Arc;
use store::ClusterStore;

/// Upserts the full spec carried by a `cluster-update` event.
pub struct ClusterUpdateHandler {
    store: Arc<dyn ClusterStore>,
}

impl ClusterUpdateHandler {
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        ClusterUpdateHandler { store }
    }
}

#[async_trait]
impl EventHandler for ClusterUpdateHandler {
    fn event_type(&self) -> &'static str {
        EVENT_CLUSTER_UPDATE
    }

    async fn handle(&self, envelope: &Envelope) -> Result<Outcome, IngestError> {
        let mut incoming: ClusterSpec = serde_json::from_str(&envelope.body)?;
        if incoming.name.is_empty() {
            return Err(IngestError::MalformedBody(serde::de::Error::missing_field("name")));
        }
        let sent_at = envelope.sent_at()?;

        let stored = self.store.get_cluster(&incoming.name).await?;
        if !admit(stored.as_ref(), &mut incoming, sent_at)? {
            return Ok(Outcome::Skipped);
        }

        self.store.put_cluster(&incoming).await?;
        tracing::info!(
            cluster = %incoming.name,
            status = %incoming.status,
            last_updated = %incoming.last_updated,
            "Cluster updated"
        );
        Ok(Outcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UnknownEventPolicy;
    use crate::ingest::tests::{harness, spec_body};
    use queue::MessageHandler;

    #[tokio::test]
    async fn test_insert_stamps_times() {
        let h = harness(UnknownEventPolicy::Skip, false);
        let envelope = h
            .deliver(EVENT_CLUSTER_UPDATE, "c1", spec_body("c1", "useast1"), 1_700_000_000_000)
            .await;
        h.dispatcher.handle(envelope).await.unwrap();

        let stored = h.store.get_cluster("c1").await.unwrap().unwrap();
        assert_eq!(stored.registered_at, "2023-11-14T22:13:20Z");
        assert_eq!(stored.last_updated, "2023-11-14T22:13:20Z");
        assert_eq!(stored.region, "useast1");
    }

    #[tokio::test]
    async fn test_out_of_order_delivery_keeps_newest() {
        let h = harness(UnknownEventPolicy::Skip, false);
        let newer = h
            .deliver(EVENT_CLUSTER_UPDATE, "c1", spec_body("c1", "uswest2"), 1_700_000_002_000)
            .await;
        h.dispatcher.handle(newer).await.unwrap();

        let older = h
            .deliver(EVENT_CLUSTER_UPDATE, "c1", spec_body("c1", "useast1"), 1_700_000_001_000)
            .await;
        h.dispatcher.handle(older).await.unwrap();

        let stored = h.store.get_cluster("c1").await.unwrap().unwrap();
        assert_eq!(stored.region, "uswest2");
        assert_eq!(stored.last_updated, "2023-11-14T22:13:22Z");
        // stale messages are consumed too
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_update_preserves_registered_at() {
        let h = harness(UnknownEventPolicy::Skip, false);
        let first = h
            .deliver(EVENT_CLUSTER_UPDATE, "c1", spec_body("c1", "useast1"), 1_700_000_000_000)
            .await;
        h.dispatcher.handle(first).await.unwrap();

        let body = serde_json::to_string(&ClusterSpec {
            name: "c1".into(),
            registered_at: "2030-01-01T00:00:00Z".into(),
            ..Default::default()
        })
        .unwrap();
        let second = h.deliver(EVENT_CLUSTER_UPDATE, "c1", body, 1_700_000_005_000).await;
        h.dispatcher.handle(second).await.unwrap();

        let stored = h.store.get_cluster("c1").await.unwrap().unwrap();
        assert_eq!(stored.registered_at, "2023-11-14T22:13:20Z");
        assert_eq!(stored.last_updated, "2023-11-14T22:13:25Z");
    }

    #[tokio::test]
    async fn test_inbound_registered_at_is_ignored_for_unregistered_row() {
        let h = harness(UnknownEventPolicy::Skip, false);
        h.store
            .put_cluster(&ClusterSpec {
                name: "c1".into(),
                last_updated: "2023-11-14T22:13:20Z".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let body = serde_json::to_string(&ClusterSpec {
            name: "c1".into(),
            registered_at: "2030-01-01T00:00:00Z".into(),
            ..Default::default()
        })
        .unwrap();
        let envelope = h.deliver(EVENT_CLUSTER_UPDATE, "c1", body, 1_700_000_005_000).await;
        h.dispatcher.handle(envelope).await.unwrap();

        let stored = h.store.get_cluster("c1").await.unwrap().unwrap();
        assert_eq!(stored.registered_at, "2023-11-14T22:13:25Z");
        assert_eq!(stored.last_updated, "2023-11-14T22:13:25Z");
    }

    #[tokio::test]
    async fn test_inbound_registered_at_is_ignored_on_insert() {
        let h = harness(UnknownEventPolicy::Skip, false);
        let body = serde_json::to_string(&ClusterSpec {
            name: "c1".into(),
            registered_at: "2030-01-01T00:00:00Z".into(),
            ..Default::default()
        })
        .unwrap();
        let envelope = h.deliver(EVENT_CLUSTER_UPDATE, "c1", body, 1_700_000_000_000).await;
        h.dispatcher.handle(envelope).await.unwrap();

        let stored = h.store.get_cluster("c1").await.unwrap().unwrap();
        assert_eq!(stored.registered_at, "2023-11-14T22:13:20Z");
    }

    #[tokio::test]
    async fn test_missing_name_is_malformed() {
        let h = harness(UnknownEventPolicy::Skip, false);
        let envelope = h.deliver(EVENT_CLUSTER_UPDATE, "", "{}".into(), 1).await;
        assert!(matches!(
            h.dispatcher.handle(envelope).await,
            Err(IngestError::MalformedBody(_))
        ));
        assert!(h.store.is_empty());
    }
}
