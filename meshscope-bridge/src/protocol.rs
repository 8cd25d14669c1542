/**
 * PROTOCOL - Requêtes/réponses et collectes temporisées vers le bridge
 *
 * RÔLE : Deux formes d'échange au-dessus du `Transport` :
 * - requête simple : publie, attend UNE réponse correspondante ou timeout
 * - collecte : publie optionnellement un déclencheur puis accumule tous
 *   les messages retenus par le prédicat pendant une fenêtre fixe
 *
 * FONCTIONNEMENT :
 * - Chaque échange ouvre son propre `Channel`, libéré au drop quelle que
 *   soit l'issue (succès, timeout, erreur transport)
 * - L'échéance est un `CancellationToken` annulé par une tâche timer
 * - Les réponses portent l'id `transaction` de la requête ; une réponse
 *   d'une autre transaction est ignorée
 */

use crate::config::MeshConfig;
use crate::error::{ProtocolError, Result};
use crate::transport::{Channel, InboundMessage, Transport, TransportEvent};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Which inbound topic answers a request (relative to the base topic)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseMatch {
    Topic(String),
    /// Any `bridge/response/...` message
    AnyBridgeResponse,
}

impl ResponseMatch {
    fn matches(&self, topic: &str) -> bool {
        match self {
            Self::Topic(expected) => topic == expected,
            Self::AnyBridgeResponse => topic.starts_with("bridge/response/"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    operation: String,
    topic: String,
    payload: Value,
    response: ResponseMatch,
}

impl Request {
    /// `bridge/request/<operation>`, answered on `bridge/response/<operation>`
    pub fn bridge(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            topic: format!("bridge/request/{operation}"),
            payload: json!({}),
            response: ResponseMatch::Topic(format!("bridge/response/{operation}")),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn any_response(mut self) -> Self {
        self.response = ResponseMatch::AnyBridgeResponse;
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Hard deadline for one exchange; the timer task dies with it
struct Deadline {
    token: CancellationToken,
    timer: JoinHandle<()>,
    started: Instant,
}

impl Deadline {
    fn start(after: Duration) -> Self {
        let token = CancellationToken::new();
        let expiry = token.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            expiry.cancel();
        });
        Self {
            token,
            timer,
            started: Instant::now(),
        }
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

enum Step {
    Event(Option<TransportEvent>),
    Expired,
}

async fn next_step(channel: &mut Channel, deadline: &Deadline) -> Step {
    tokio::select! {
        // a message already queued wins over an expiry that fired alongside it
        biased;
        event = channel.recv() => Step::Event(event),
        _ = deadline.token.cancelled() => Step::Expired,
    }
}

fn transport_failure(operation: &str, deadline: &Deadline, reason: impl ToString) -> ProtocolError {
    ProtocolError::Transport {
        operation: operation.to_string(),
        elapsed: deadline.elapsed(),
        reason: reason.to_string(),
    }
}

fn timeout(operation: &str, deadline: &Deadline) -> ProtocolError {
    ProtocolError::Timeout {
        operation: operation.to_string(),
        elapsed: deadline.elapsed(),
    }
}

#[derive(Clone)]
pub struct ProtocolClient {
    transport: Transport,
    config: MeshConfig,
}

impl ProtocolClient {
    pub fn new(transport: Transport, config: MeshConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    /// Publishes `request`, tagging object payloads with a fresh transaction id
    async fn send(&self, channel: &Channel, request: &Request, deadline: &Deadline) -> Result<Option<String>> {
        let mut payload = request.payload.clone();
        let transaction = match &mut payload {
            Value::Object(map) => {
                let id = Uuid::new_v4().to_string();
                map.insert("transaction".into(), Value::String(id.clone()));
                Some(id)
            }
            _ => None,
        };
        let bytes = serde_json::to_vec(&payload).map_err(|e| ProtocolError::decode(&request.operation, e))?;
        channel
            .publish(&self.config.topic(&request.topic), bytes)
            .await
            .map_err(|e| transport_failure(&request.operation, deadline, e))?;
        debug!(operation = %request.operation, transaction = ?transaction, "request sent");
        Ok(transaction)
    }

    /// Single-response request; resolves with the response's `data` field
    pub async fn request(&self, request: &Request, timeout_after: Duration) -> Result<Value> {
        let operation = request.operation.as_str();
        let mut channel = self.transport.open_channel();
        let deadline = Deadline::start(timeout_after);
        let transaction = self.send(&channel, request, &deadline).await?;

        loop {
            let msg = match next_step(&mut channel, &deadline).await {
                Step::Expired => return Err(timeout(operation, &deadline)),
                Step::Event(None) => return Err(transport_failure(operation, &deadline, "transport closed")),
                Step::Event(Some(TransportEvent::Failure(reason))) => {
                    return Err(transport_failure(operation, &deadline, reason))
                }
                Step::Event(Some(TransportEvent::Message(msg))) => msg,
            };
            let Some(topic) = self.config.relative_topic(&msg.topic) else {
                continue;
            };
            if !request.response.matches(topic) {
                continue;
            }
            let body = msg.json().map_err(|e| ProtocolError::decode(operation, e))?;
            if let (Some(ours), Some(theirs)) = (&transaction, body.get("transaction")) {
                if theirs.as_str() != Some(ours.as_str()) {
                    debug!(operation, "ignoring response for another transaction");
                    continue;
                }
            }
            debug!(operation, elapsed = ?deadline.elapsed(), "response received");
            return unwrap_response(operation, body);
        }
    }

    /// Waits for the next message on `topic`, including a retained one
    pub async fn await_message(&self, operation: &str, topic: &str, timeout_after: Duration) -> Result<Value> {
        let mut channel = self.transport.open_channel();
        let deadline = Deadline::start(timeout_after);
        loop {
            match next_step(&mut channel, &deadline).await {
                Step::Expired => return Err(timeout(operation, &deadline)),
                Step::Event(None) => return Err(transport_failure(operation, &deadline, "transport closed")),
                Step::Event(Some(TransportEvent::Failure(reason))) => {
                    return Err(transport_failure(operation, &deadline, reason))
                }
                Step::Event(Some(TransportEvent::Message(msg))) => {
                    if self.config.relative_topic(&msg.topic) == Some(topic) {
                        return msg.json().map_err(|e| ProtocolError::decode(operation, e));
                    }
                }
            }
        }
    }

    /// Timed collection. The window always runs to completion; nothing
    /// collected is a valid outcome, not a timeout.
    pub async fn collect<F>(
        &self,
        operation: &str,
        trigger: Option<&Request>,
        window: Duration,
        mut keep: F,
    ) -> Result<Vec<InboundMessage>>
    where
        F: FnMut(&InboundMessage) -> bool,
    {
        let mut channel = self.transport.open_channel();
        let deadline = Deadline::start(window);
        if let Some(trigger) = trigger {
            self.send(&channel, trigger, &deadline).await?;
        }

        let mut collected = Vec::new();
        loop {
            match next_step(&mut channel, &deadline).await {
                Step::Expired => break,
                Step::Event(None) => return Err(transport_failure(operation, &deadline, "transport closed")),
                Step::Event(Some(TransportEvent::Failure(reason))) => {
                    warn!(operation, dropped = collected.len(), "collection aborted");
                    return Err(transport_failure(operation, &deadline, reason));
                }
                Step::Event(Some(TransportEvent::Message(msg))) => {
                    if keep(&msg) {
                        collected.push(msg);
                    }
                }
            }
        }
        debug!(operation, collected = collected.len(), "collection window closed");
        Ok(collected)
    }
}

fn unwrap_response(operation: &str, mut body: Value) -> Result<Value> {
    match body.get("status").and_then(Value::as_str) {
        Some("error") => {
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            Err(ProtocolError::Rejected {
                operation: operation.to_string(),
                message,
            })
        }
        _ => Ok(body.get_mut("data").map(Value::take).unwrap_or(Value::Null)),
    }
}
