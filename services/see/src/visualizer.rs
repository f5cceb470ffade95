//! The message router and state engine: classify, mutate, broadcast.
//!
//! Batches flow in from the active source and from browsers; every envelope
//! mutates the stores per its action, then the batch as received is fanned
//! out to all peers. Rejected envelopes are logged and never halt a batch.

use crate::hub::{Hub, PeerId};
use crate::state::{AssetStore, StateStore};
use see_protocol::{
    actions, encode_batch, object_id, Batch, Envelope, DEFAULT_CONTENT_TYPE,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Why the router rejected an envelope. Rejections are local: they are
/// logged but never returned to the transport.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("missing property object")]
    MissingObject,
    #[error("object has no id")]
    ObjectWithoutId,
    #[error("missing property id")]
    MissingId,
    #[error("missing property value")]
    MissingValue,
    #[error("missing property data")]
    MissingData,
    #[error("unknown action")]
    UnknownAction,
}

/// The engine owned by the orchestrator: stores, peer hub, and the channel
/// carrying browser-originated batches back to the active source.
pub struct Visualizer {
    pub states: StateStore,
    pub assets: AssetStore,
    pub hub: Hub,
    client_tx: mpsc::UnboundedSender<Batch>,
}

impl Visualizer {
    /// Returns the engine plus the receiving end of the browser-batch
    /// channel; the orchestrator pumps that into the source's accept path.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Batch>) {
        let (client_tx, client_rx) = mpsc::unbounded_channel();
        let vis = Arc::new(Visualizer {
            states: StateStore::default(),
            assets: AssetStore::default(),
            hub: Hub::default(),
            client_tx,
        });
        (vis, client_rx)
    }

    /// Handles a batch produced by the message source.
    pub async fn recv_from_source(&self, batch: Batch) {
        self.apply(&batch).await;
        self.broadcast(&batch).await;
    }

    /// Handles a batch originated by a browser (websocket frame or HTTP
    /// POST): routed and rebroadcast like any other batch, then forwarded
    /// to the source.
    pub async fn recv_from_client(&self, batch: Batch) {
        self.apply(&batch).await;
        self.broadcast(&batch).await;
        let _ = self.client_tx.send(batch);
    }

    /// Registers a websocket peer with its replay queued: one batch of all
    /// stored data values, then one batch of all stored objects.
    pub async fn attach_peer(
        &self,
    ) -> Result<(PeerId, mpsc::UnboundedReceiver<String>), serde_json::Error> {
        let data_values = self.states.data_values().await;
        let objects = self.states.objects().await;

        let data_batch: Batch = data_values
            .into_iter()
            .map(|(id, value)| Envelope::for_data_value(&id, value))
            .collect();
        let object_batch: Batch = objects.into_values().map(Envelope::for_object).collect();

        let frames = vec![encode_batch(&data_batch)?, encode_batch(&object_batch)?];
        Ok(self.hub.attach(frames).await)
    }

    async fn apply(&self, batch: &[Envelope]) {
        for envelope in batch {
            let action = envelope.action().unwrap_or_default().to_uppercase();
            match self.handle(envelope).await {
                Ok(()) => info!(action = %action, msg = %envelope.encode(), "handled"),
                Err(e) => {
                    error!(action = %action, error = %e, msg = %envelope.encode(), "rejected");
                }
            }
        }
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), RouteError> {
        match envelope.action().unwrap_or_default() {
            actions::RESET => {
                self.assets.clear().await;
                self.states.reset().await;
                Ok(())
            }
            actions::OBJECT => {
                let obj = envelope.object().ok_or(RouteError::MissingObject)?;
                if object_id(obj).is_none() {
                    return Err(RouteError::ObjectWithoutId);
                }
                self.states.update(vec![obj.clone()]).await;
                Ok(())
            }
            actions::DATA => {
                let id = envelope
                    .id()
                    .filter(|id| !id.is_empty())
                    .ok_or(RouteError::MissingId)?;
                let value = envelope.value().ok_or(RouteError::MissingValue)?;
                self.states.update_data_value(id, value.clone()).await;
                Ok(())
            }
            actions::ASSET => {
                let id = envelope
                    .id()
                    .filter(|id| !id.is_empty())
                    .ok_or(RouteError::MissingId)?;
                let data = envelope.data().ok_or(RouteError::MissingData)?;
                let content_type = envelope
                    .content_type()
                    .filter(|ct| !ct.is_empty())
                    .unwrap_or(DEFAULT_CONTENT_TYPE);
                self.assets
                    .put(id, content_type.to_owned(), data.as_bytes().to_vec())
                    .await;
                Ok(())
            }
            actions::REMOVE => {
                let id = envelope.id().unwrap_or_default();
                self.assets.remove(id).await;
                self.states.remove(&[id]).await;
                Ok(())
            }
            _ => Err(RouteError::UnknownAction),
        }
    }

    async fn broadcast(&self, batch: &[Envelope]) {
        match encode_batch(batch) {
            Ok(frame) => self.hub.broadcast(&frame).await,
            Err(e) => error!(error = %e, "failed to encode broadcast batch"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn batch(v: Value) -> Batch {
        serde_json::from_value(v).expect("test batch")
    }

    #[tokio::test]
    async fn routed_batch_mutates_store_and_reaches_peer_verbatim() {
        let (vis, _client_rx) = Visualizer::new();
        let (_peer, mut rx) = vis.attach_peer().await.expect("attach");
        // Drain the (empty) replay frames.
        assert_eq!(rx.recv().await.as_deref(), Some("[]"));
        assert_eq!(rx.recv().await.as_deref(), Some("[]"));

        let incoming = batch(json!([
            {"action": "object", "object": {"id": "a", "x": 1}},
            {"action": "wobble", "weird": true},
        ]));
        let expected = encode_batch(&incoming).expect("encode");
        vis.recv_from_source(incoming).await;

        let objects = vis.states.objects().await;
        assert_eq!(objects.len(), 1);
        assert_eq!(objects["a"].get("x"), Some(&json!(1)));

        // The peer sees exactly what was submitted, unknown action included.
        assert_eq!(rx.recv().await.as_deref(), Some(expected.as_str()));
    }

    #[tokio::test]
    async fn reset_clears_objects_data_values_and_assets() {
        let (vis, _client_rx) = Visualizer::new();
        vis.recv_from_source(batch(json!([
            {"action": "object", "object": {"id": "a"}},
            {"action": "data", "id": "t", "value": 42},
            {"action": "asset", "id": "img", "data": "ABC", "content-type": "image/png"},
        ])))
        .await;
        assert!(vis.assets.get("img").await.is_some());

        vis.recv_from_source(batch(json!([{"action": "reset"}]))).await;
        assert!(vis.states.objects().await.is_empty());
        assert!(vis.states.data_values().await.is_empty());
        assert!(vis.assets.get("img").await.is_none());
    }

    #[tokio::test]
    async fn remove_cleans_object_and_asset() {
        let (vis, _client_rx) = Visualizer::new();
        vis.recv_from_source(batch(json!([
            {"action": "object", "object": {"id": "k"}},
            {"action": "asset", "id": "k", "data": "x"},
        ])))
        .await;

        vis.recv_from_source(batch(json!([{"action": "remove", "id": "k"}])))
            .await;
        assert!(!vis.states.objects().await.contains_key("k"));
        assert!(vis.assets.get("k").await.is_none());
    }

    #[tokio::test]
    async fn asset_without_content_type_gets_the_default() {
        let (vis, _client_rx) = Visualizer::new();
        vis.recv_from_source(batch(json!([{"action": "asset", "id": "blob", "data": "zz"}])))
            .await;
        let asset = vis.assets.get("blob").await.expect("stored");
        assert_eq!(asset.content_type, DEFAULT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn invalid_envelopes_do_not_halt_the_batch() {
        let (vis, _client_rx) = Visualizer::new();
        vis.recv_from_source(batch(json!([
            {"action": "object"},                       // missing object
            {"action": "data", "id": "t"},              // missing value
            {"action": "asset", "id": "a"},             // missing data
            {"action": "object", "object": {"id": "survivor"}},
        ])))
        .await;
        assert!(vis.states.objects().await.contains_key("survivor"));
        assert!(vis.states.data_values().await.is_empty());
    }

    #[tokio::test]
    async fn late_joining_peer_replays_data_then_objects() {
        let (vis, _client_rx) = Visualizer::new();
        vis.recv_from_source(batch(json!([
            {"action": "data", "id": "t", "value": 42},
            {"action": "object", "object": {"id": "a", "x": 1}},
        ])))
        .await;

        let (_peer, mut rx) = vis.attach_peer().await.expect("attach");
        let first = rx.recv().await.expect("data frame");
        let second = rx.recv().await.expect("object frame");

        let first: Value = serde_json::from_str(&first).expect("json");
        assert_eq!(
            first,
            json!([{"action": "data", "id": "t", "value": 42}])
        );
        let second: Value = serde_json::from_str(&second).expect("json");
        assert_eq!(
            second,
            json!([{"action": "object", "object": {"id": "a", "x": 1}}])
        );
    }

    #[tokio::test]
    async fn removed_peer_never_sees_later_batches() {
        let (vis, _client_rx) = Visualizer::new();
        let (peer, mut rx) = vis.attach_peer().await.expect("attach");
        rx.recv().await;
        rx.recv().await;

        let b = batch(json!([{"action": "data", "id": "t", "value": 1}]));
        let b_frame = encode_batch(&b).expect("encode");
        vis.recv_from_source(b).await;
        vis.hub.detach(peer).await;
        vis.recv_from_source(batch(json!([{"action": "data", "id": "t", "value": 2}])))
            .await;

        assert_eq!(rx.recv().await.as_deref(), Some(b_frame.as_str()));
        assert!(rx.try_recv().is_err(), "nothing after detach");
    }

    #[tokio::test]
    async fn client_batches_are_forwarded_to_the_source_channel() {
        let (vis, mut client_rx) = Visualizer::new();
        let b = batch(json!([{"action": "move", "dir": {"x": 1}}]));
        vis.recv_from_client(b.clone()).await;
        assert_eq!(client_rx.recv().await, Some(b));
    }
}
