/*!
Mock bridge pour tester sans broker

Implémente `Publisher` : enregistre chaque requête publiée et, si un
répondeur est scripté pour ce topic, réinjecte la réponse dans le hub
(avec l'id `transaction` de la requête). Permet aussi d'injecter des
messages arbitraires, retenus ou non, et des pannes de transport.
*/

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meshscope_bridge::{Hub, InboundMessage, Publisher, Transport, TransportError, TransportEvent};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    /// Relative to the base topic
    pub topic: String,
    pub payload: Value,
}

type Responder = Box<dyn Fn(&Value) -> Value + Send + Sync>;

/// In-memory stand-in for a zigbee2mqtt-style bridge
#[derive(Clone)]
pub struct MockBridge {
    base_topic: String,
    hub: Hub,
    published: Arc<Mutex<Vec<PublishedMessage>>>,
    responders: Arc<Mutex<HashMap<String, Responder>>>,
    publish_failure: Arc<Mutex<Option<String>>>,
}

impl MockBridge {
    pub fn new<S: Into<String>>(base_topic: S) -> Self {
        Self {
            base_topic: base_topic.into(),
            hub: Hub::new(),
            published: Arc::new(Mutex::new(Vec::new())),
            responders: Arc::new(Mutex::new(HashMap::new())),
            publish_failure: Arc::new(Mutex::new(None)),
        }
    }

    pub fn transport(&self) -> Transport {
        Transport::new(self.hub.clone(), Arc::new(self.clone()))
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    fn full_topic(&self, topic: &str) -> String {
        format!("{}/{}", self.base_topic, topic)
    }

    /// Answers `bridge/request/<operation>` with whatever `responder` builds
    /// from the request payload. The request's transaction is echoed unless
    /// the response already carries one.
    pub fn on_request<F>(&self, operation: &str, responder: F)
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.responders
            .lock()
            .insert(format!("bridge/request/{operation}"), Box::new(responder));
    }

    pub fn respond_ok(&self, operation: &str, data: Value) {
        self.on_request(operation, move |_| json!({"status": "ok", "data": data.clone()}));
    }

    pub fn respond_error(&self, operation: &str, message: &str) {
        let message = message.to_string();
        self.on_request(operation, move |_| json!({"status": "error", "data": {}, "error": message.clone()}));
    }

    pub fn inject(&self, topic: &str, payload: &Value) {
        self.inject_raw(topic, payload.to_string().into_bytes(), false);
    }

    pub fn inject_retained(&self, topic: &str, payload: &Value) {
        self.inject_raw(topic, payload.to_string().into_bytes(), true);
    }

    pub fn inject_raw(&self, topic: &str, payload: Vec<u8>, retained: bool) {
        let mut msg = InboundMessage::new(self.full_topic(topic), payload);
        msg.retained = retained;
        self.hub.dispatch(TransportEvent::Message(msg));
    }

    /// Injects `payload` once `delay` has elapsed (tokio time, so pausable)
    pub fn inject_later(&self, delay: Duration, topic: &str, payload: Value) {
        let bridge = self.clone();
        let topic = topic.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            bridge.inject(&topic, &payload);
        });
    }

    /// Broadcasts a connection failure; it sticks until `reconnect`
    pub fn fail(&self, reason: &str) {
        self.hub.dispatch(TransportEvent::Failure(reason.to_string()));
    }

    pub fn fail_later(&self, delay: Duration, reason: &str) {
        let bridge = self.clone();
        let reason = reason.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            bridge.fail(&reason);
        });
    }

    pub fn reconnect(&self) {
        self.hub.mark_connected();
    }

    /// Every later publish fails with `reason`
    pub fn fail_publishes(&self, reason: &str) {
        *self.publish_failure.lock() = Some(reason.to_string());
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<Value> {
        self.published
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }
}

#[async_trait]
impl Publisher for MockBridge {
    async fn publish(&self, topic: String, payload: Vec<u8>) -> Result<(), TransportError> {
        if let Some(reason) = self.publish_failure.lock().clone() {
            return Err(TransportError(reason));
        }
        let relative = topic
            .strip_prefix(&format!("{}/", self.base_topic))
            .unwrap_or(&topic)
            .to_string();
        let payload: Value = serde_json::from_slice(&payload).unwrap_or(Value::Null);
        tracing::debug!(topic = %relative, "[mock] request published");
        self.published.lock().push(PublishedMessage {
            topic: relative.clone(),
            payload: payload.clone(),
        });

        let response = self.responders.lock().get(&relative).map(|respond| respond(&payload));
        if let Some(mut body) = response {
            if let (Some(tx), Value::Object(map)) = (payload.get("transaction"), &mut body) {
                map.entry("transaction").or_insert_with(|| tx.clone());
            }
            let response_topic = relative.replacen("bridge/request/", "bridge/response/", 1);
            self.inject(&response_topic, &body);
        }
        Ok(())
    }
}

/// Builds payloads shaped like the bridge's own messages
#[derive(Debug, Clone, Default)]
pub struct MeshMessageBuilder {
    nodes: Vec<Value>,
    links: Vec<Value>,
    devices: Vec<Value>,
}

impl MeshMessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a device to both the network map and the inventory
    pub fn device(mut self, ieee: &str, name: &str, kind: &str, description: Option<&str>) -> Self {
        let address = self.nodes.len() as u16;
        self.nodes.push(json!({
            "ieeeAddr": ieee,
            "friendlyName": name,
            "type": kind,
            "networkAddress": address
        }));
        self.devices.push(json!({
            "ieee_address": ieee,
            "friendly_name": name,
            "type": kind,
            "network_address": address,
            "interview_completed": true,
            "disabled": false,
            "power_source": if kind == "EndDevice" { "Battery" } else { "Mains (single phase)" },
            "description": description
        }));
        self
    }

    pub fn link(mut self, source: &str, target: &str, lqi: u8, relationship: u8, depth: u8) -> Self {
        self.links.push(json!({
            "source": {"ieeeAddr": source},
            "target": {"ieeeAddr": target},
            "linkquality": lqi,
            "relationship": relationship,
            "depth": depth
        }));
        self
    }

    /// `data` of a raw networkmap response
    pub fn network_map(&self) -> Value {
        json!({
            "type": "raw",
            "routes": true,
            "value": {"nodes": self.nodes, "links": self.links}
        })
    }

    /// Retained `bridge/devices` payload
    pub fn devices(&self) -> Value {
        Value::Array(self.devices.clone())
    }

    pub fn groups(names: &[&str]) -> Value {
        Value::Array(
            names
                .iter()
                .enumerate()
                .map(|(i, name)| json!({"id": i + 1, "friendly_name": name, "members": []}))
                .collect(),
        )
    }

    pub fn state(lqi: u8, battery: Option<f64>, last_seen: DateTime<Utc>) -> Value {
        let mut state = json!({"linkquality": lqi, "last_seen": last_seen.to_rfc3339()});
        if let Some(battery) = battery {
            state["battery"] = json!(battery);
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_responder_echoes_transaction() {
        let bridge = MockBridge::new("zigbee2mqtt");
        bridge.respond_ok("health_check", json!({"healthy": true}));
        let transport = bridge.transport();
        let mut channel = transport.open_channel();

        channel
            .publish(
                "zigbee2mqtt/bridge/request/health_check",
                br#"{"transaction":"abc"}"#.to_vec(),
            )
            .await
            .unwrap();

        assert_eq!(bridge.published_on("bridge/request/health_check"), vec![json!({"transaction": "abc"})]);
        match channel.recv().await {
            Some(TransportEvent::Message(msg)) => {
                assert_eq!(msg.topic, "zigbee2mqtt/bridge/response/health_check");
                let body = msg.json().unwrap();
                assert_eq!(body["transaction"], "abc");
                assert_eq!(body["data"]["healthy"], true);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_failure() {
        let bridge = MockBridge::new("z");
        bridge.fail_publishes("socket closed");
        let err = bridge.publish("z/x".into(), b"{}".to_vec()).await.unwrap_err();
        assert_eq!(err, TransportError("socket closed".into()));
        assert!(bridge.published().is_empty());
    }

    #[test]
    fn test_message_builders() {
        let mesh = MeshMessageBuilder::new()
            .device("0x00", "Coordinator", "Coordinator", None)
            .device("0x01", "Hall plug", "Router", Some("floor: ground\nsector: north"))
            .link("0x01", "0x00", 200, 0, 1);
        assert_eq!(mesh.network_map()["value"]["nodes"][1]["friendlyName"], "Hall plug");
        assert_eq!(mesh.network_map()["value"]["links"][0]["linkquality"], 200);
        assert_eq!(mesh.devices()[1]["power_source"], "Mains (single phase)");
        assert_eq!(MeshMessageBuilder::groups(&["a"])[0]["friendly_name"], "a");

        let state = MeshMessageBuilder::state(40, Some(12.0), Utc::now());
        assert_eq!(state["battery"], 12.0);
    }
}
