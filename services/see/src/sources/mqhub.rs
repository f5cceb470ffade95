//! Schema-translator source: a semantic adapter over the bus.
//!
//! Subscribes to the whole topic tree under the prefix. Each message on
//! `<prefix>/<component…>/<endpoint>` updates the schema context; unmuted
//! updates emit the refresh diff. Browser envelopes matching an action
//! schema are rendered and published back to `<prefix>/<component>/<endpoint>`.

use super::mqtt::{connect, BusUrl};
use super::SourceError;
use crate::visualizer::Visualizer;
use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use see_protocol::Envelope;
use see_schema::Schema;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub struct TranslatorSource {
    client: AsyncClient,
    event_loop: Mutex<EventLoop>,
    schema: Arc<Schema>,
    prefix: String,
}

impl TranslatorSource {
    pub fn new(url: &BusUrl, schema: Arc<Schema>, client_id: &str) -> Self {
        let (client, event_loop) = connect(url, client_id);
        info!(host = %url.host, port = url.port, prefix = %url.prefix, "translator source configured");
        TranslatorSource {
            client,
            event_loop: Mutex::new(event_loop),
            schema,
            prefix: url.prefix.clone(),
        }
    }

    /// The schema, shared with the HTTP layer for `/mqhub/states/…`.
    pub fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    pub async fn run(&self, vis: &Visualizer) -> Result<(), SourceError> {
        // Initial emission: one full refresh of the objects template.
        vis.recv_from_source(self.schema.refresh()).await;

        let filter = if self.prefix.is_empty() {
            "#".to_owned()
        } else {
            format!("{}/#", self.prefix)
        };
        self.client.subscribe(filter, QoS::AtMostOnce).await?;

        let mut event_loop = self.event_loop.lock().await;
        loop {
            match event_loop.poll().await? {
                Event::Incoming(Packet::Publish(publish)) => {
                    let Some((component, endpoint)) = split_topic(&self.prefix, &publish.topic)
                    else {
                        continue;
                    };
                    let msgs = self.schema.update_object(component, endpoint, &publish.payload);
                    if !msgs.is_empty() {
                        vis.recv_from_source(msgs).await;
                    }
                }
                _ => {}
            }
        }
    }

    /// Matches each envelope against the action schemas; the first match
    /// wins, everything else is dropped silently.
    pub async fn accept(&self, batch: &[Envelope]) {
        for envelope in batch {
            if envelope.action().unwrap_or_default().is_empty() {
                continue;
            }
            let Some(action) = self.schema.find_action(envelope) else {
                continue;
            };
            let payload = match self.schema.render_action(action, envelope) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(
                        component = %action.component,
                        endpoint = %action.endpoint,
                        error = %e,
                        "action data template render failed"
                    );
                    continue;
                }
            };
            let leaf = format!("{}/{}", action.component, action.endpoint);
            let topic = if self.prefix.is_empty() {
                leaf
            } else {
                format!("{}/{}", self.prefix, leaf)
            };
            if let Err(e) = self
                .client
                .publish(topic.clone(), QoS::AtMostOnce, false, payload)
                .await
            {
                warn!(topic = %topic, error = %e, "failed to publish action to bus");
            }
        }
    }
}

/// Splits `<prefix>/<component…>/<endpoint>` into component and endpoint.
/// The component may span several segments; both parts must be non-empty.
fn split_topic<'a>(prefix: &str, topic: &'a str) -> Option<(&'a str, &'a str)> {
    let rest = if prefix.is_empty() {
        topic
    } else {
        topic.strip_prefix(prefix)?.strip_prefix('/')?
    };
    let (component, endpoint) = rest.rsplit_once('/')?;
    if component.is_empty() || endpoint.is_empty() {
        return None;
    }
    Some((component, endpoint))
}
