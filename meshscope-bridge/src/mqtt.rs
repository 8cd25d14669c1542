use crate::config::MeshConfig;
use crate::error::TransportError;
use crate::transport::{Hub, InboundMessage, Publisher, Transport, TransportEvent};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info};

#[async_trait]
impl Publisher for AsyncClient {
    async fn publish(&self, topic: String, payload: Vec<u8>) -> Result<(), TransportError> {
        AsyncClient::publish(self, topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| TransportError(e.to_string()))
    }
}

/// Live broker connection; the event loop stops when this is dropped
pub struct MqttConnection {
    transport: Transport,
    event_loop: JoinHandle<()>,
}

impl MqttConnection {
    pub fn transport(&self) -> Transport {
        self.transport.clone()
    }
}

impl Drop for MqttConnection {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

/// Connects to the broker and feeds every message under the base topic into a hub.
pub fn connect(config: &MeshConfig) -> MqttConnection {
    let mqtt = &config.mqtt;
    let mut opts = MqttOptions::new(&mqtt.client_id, &mqtt.host, mqtt.port);
    opts.set_keep_alive(Duration::from_secs(mqtt.keep_alive_secs));
    opts.set_clean_session(true);
    // network maps of large meshes easily exceed the default 10 KiB
    opts.set_max_packet_size(4 * 1024 * 1024, 64 * 1024);
    if let (Some(user), Some(pass)) = (&mqtt.username, &mqtt.password) {
        opts.set_credentials(user, pass);
    }

    let (client, mut eventloop) = AsyncClient::new(opts, 10);
    let hub = Hub::new();
    let filter = config.topic("#");

    let loop_hub = hub.clone();
    let loop_client = client.clone();
    let event_loop = task::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!(filter = %filter, "connected to broker");
                    loop_hub.mark_connected();
                    // clean session: subscriptions are lost on every reconnect
                    if let Err(e) = loop_client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
                        error!("subscribe failed: {e}");
                        loop_hub.dispatch(TransportEvent::Failure(e.to_string()));
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    debug!(topic = %p.topic, bytes = p.payload.len(), "inbound");
                    loop_hub.dispatch(TransportEvent::Message(InboundMessage {
                        topic: p.topic.clone(),
                        payload: p.payload.to_vec(),
                        retained: p.retain,
                    }));
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT error: {e}");
                    loop_hub.dispatch(TransportEvent::Failure(e.to_string()));
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    MqttConnection {
        transport: Transport::new(hub, Arc::new(client)),
        event_loop,
    }
}
