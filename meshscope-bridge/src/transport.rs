/**
 * TRANSPORT - Abstraction canal requête/réponse au-dessus du broker
 *
 * RÔLE : Le `Hub` reçoit tous les messages entrants (boucle MQTT ou mock)
 * et les distribue à chaque `Channel` ouvert. Chaque requête ouvre son
 * propre canal court ; le drop du canal le désabonne du hub.
 *
 * FONCTIONNEMENT :
 * - Messages retenus (retain) rejoués à l'ouverture d'un canal
 * - Erreurs de connexion diffusées comme `TransportEvent::Failure`, et
 *   rejouées aux nouveaux canaux tant que la connexion n'est pas rétablie
 * - Publication déléguée au `Publisher` (client MQTT ou mock)
 */

use crate::error::TransportError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retained: bool,
}

impl InboundMessage {
    pub fn new<S: Into<String>, V: Into<Vec<u8>>>(topic: S, payload: V) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retained: false,
        }
    }

    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(InboundMessage),
    Failure(String),
}

/// Outbound side of the transport
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: String, payload: Vec<u8>) -> Result<(), TransportError>;
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    subscribers: HashMap<u64, mpsc::UnboundedSender<TransportEvent>>,
    retained: BTreeMap<String, InboundMessage>,
    /// Last connection failure, cleared on reconnect
    failure: Option<String>,
}

/// Fan-out of inbound events to every open channel
#[derive(Clone, Default)]
pub struct Hub {
    inner: Arc<Mutex<HubState>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch(&self, event: TransportEvent) {
        let mut state = self.inner.lock();
        match &event {
            TransportEvent::Message(msg) if msg.retained => {
                if msg.payload.is_empty() {
                    state.retained.remove(&msg.topic);
                } else {
                    state.retained.insert(msg.topic.clone(), msg.clone());
                }
            }
            TransportEvent::Failure(reason) => state.failure = Some(reason.clone()),
            TransportEvent::Message(_) => {}
        }
        state
            .subscribers
            .retain(|_, sender| sender.send(event.clone()).is_ok());
    }

    /// Clears the failure state after a successful (re)connect
    pub fn mark_connected(&self) {
        self.inner.lock().failure = None;
    }

    /// Channels currently subscribed
    pub fn open_channels(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    fn subscribe(&self) -> (u64, mpsc::UnboundedReceiver<TransportEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.inner.lock();
        if let Some(reason) = &state.failure {
            let _ = sender.send(TransportEvent::Failure(reason.clone()));
        }
        for msg in state.retained.values() {
            let _ = sender.send(TransportEvent::Message(msg.clone()));
        }
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.insert(id, sender);
        (id, receiver)
    }

    fn unsubscribe(&self, id: u64) {
        self.inner.lock().subscribers.remove(&id);
    }
}

/// Inbound hub + outbound publisher
#[derive(Clone)]
pub struct Transport {
    hub: Hub,
    publisher: Arc<dyn Publisher>,
}

impl Transport {
    pub fn new(hub: Hub, publisher: Arc<dyn Publisher>) -> Self {
        Self { hub, publisher }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Subscribes a fresh channel; it sees every event dispatched from now on
    pub fn open_channel(&self) -> Channel {
        let (id, inbound) = self.hub.subscribe();
        Channel {
            id,
            hub: self.hub.clone(),
            inbound,
            publisher: self.publisher.clone(),
        }
    }
}

/// Short-lived subscription owned by a single request or collection
pub struct Channel {
    id: u64,
    hub: Hub,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    publisher: Arc<dyn Publisher>,
}

impl Channel {
    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.publisher.publish(topic.to_string(), payload).await
    }

    /// Next inbound event in arrival order; `None` once the hub is gone
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.inbound.recv().await
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}
