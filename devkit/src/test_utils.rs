/*!
Test Harness pour le bridge meshscope

Facilite l'écriture de tests bout-en-bout avec:
- Mock bridge branché sur un `Transport` réel
- Réseau scripté (networkmap, inventaire, groupes) en une ligne
- Assertions sur les requêtes publiées
*/

use crate::mqtt_stub::{MeshMessageBuilder, MockBridge};
use anyhow::Result;
use meshscope_bridge::{MeshConfig, ProtocolClient, TelemetrySource};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

pub struct TestHarness {
    pub bridge: MockBridge,
    pub config: MeshConfig,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(MeshConfig::default())
    }

    pub fn with_config(config: MeshConfig) -> Self {
        // plusieurs tests dans le même process : seul le premier init gagne
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
            .with_test_writer()
            .try_init()
            .ok();

        Self {
            bridge: MockBridge::new(config.base_topic.clone()),
            config,
        }
    }

    pub fn client(&self) -> ProtocolClient {
        ProtocolClient::new(self.bridge.transport(), self.config.clone())
    }

    pub fn source(&self) -> TelemetrySource {
        TelemetrySource::new(self.client())
    }

    /// Scripts a healthy bridge serving `mesh` and `groups`
    pub fn serve_mesh(&self, mesh: &MeshMessageBuilder, groups: &[&str]) {
        self.bridge.respond_ok("health_check", json!({"healthy": true}));
        self.bridge.respond_ok("networkmap", mesh.network_map());
        self.bridge.inject_retained("bridge/devices", &mesh.devices());
        if !groups.is_empty() {
            self.bridge
                .inject_retained("bridge/groups", &MeshMessageBuilder::groups(groups));
        }
    }

    pub fn open_channels(&self) -> usize {
        self.bridge.hub().open_channels()
    }

    /// Asserts a request for `operation` was published carrying every field of `expected`
    pub fn assert_request_sent(&self, operation: &str, expected: &Value) -> Result<()> {
        let topic = format!("bridge/request/{operation}");
        let Some(fields) = expected.as_object() else {
            anyhow::bail!("expected fields must be a JSON object");
        };
        for payload in self.bridge.published_on(&topic) {
            if fields.iter().all(|(k, v)| payload.get(k) == Some(v)) {
                return Ok(());
            }
        }
        anyhow::bail!("no request on {topic} matching {expected}");
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use meshscope_bridge::{ProtocolError, Request};
    use meshscope_core::{Command, IssueKind, MeshAnalyzer, NodeId};
    use std::time::Duration;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[tokio::test]
    async fn test_request_resolves_with_data() {
        let h = TestHarness::new();
        h.bridge.respond_ok("health_check", json!({"healthy": true}));

        let data = h.client().request(&Request::bridge("health_check"), secs(10)).await.unwrap();
        assert_eq!(data, json!({"healthy": true}));

        let sent = h.bridge.published_on("bridge/request/health_check");
        assert_eq!(sent.len(), 1);
        assert!(sent[0]["transaction"].is_string());
        assert_eq!(h.open_channels(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_for_other_transaction_is_ignored() {
        let h = TestHarness::new();
        h.bridge.on_request("health_check", |_| {
            json!({"status": "ok", "data": {"healthy": false}, "transaction": "someone-else"})
        });

        let client = h.client();
        let pending = tokio::spawn(async move { client.request(&Request::bridge("health_check"), secs(10)).await });
        while h.bridge.published().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let ours = h.bridge.published()[0].payload["transaction"].clone();
        h.bridge.inject(
            "bridge/response/health_check",
            &json!({"status": "ok", "data": {"healthy": true}, "transaction": ours}),
        );

        let data = pending.await.unwrap().unwrap();
        assert_eq!(data["healthy"], true);
        assert_eq!(h.open_channels(), 0);
    }

    #[tokio::test]
    async fn test_error_status_is_rejected() {
        let h = TestHarness::new();
        h.bridge.respond_error("networkmap", "scan already running");

        let err = h.client().request(&Request::bridge("networkmap"), secs(10)).await.unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Rejected {
                operation: "networkmap".into(),
                message: "scan already running".into()
            }
        );
        assert_eq!(h.open_channels(), 0);
    }

    #[tokio::test]
    async fn test_any_bridge_response_matches() {
        let h = TestHarness::new();
        h.bridge.on_request("restart", |_| json!({"status": "ok", "data": {}}));
        // answered on bridge/response/restart, accepted through the wildcard
        let request = Request::bridge("restart").any_response();
        assert!(h.client().request(&request, secs(5)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_operation_and_elapsed() {
        let h = TestHarness::new();
        let err = h
            .client()
            .request(&Request::bridge("networkmap"), h.config.timeouts.topology())
            .await
            .unwrap_err();
        match err {
            ProtocolError::Timeout { operation, elapsed } => {
                assert_eq!(operation, "networkmap");
                assert!(elapsed >= secs(300));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(h.open_channels(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_is_distinct_from_timeout() {
        let h = TestHarness::new();
        h.bridge.fail_later(secs(2), "connection reset");

        let err = h.client().request(&Request::bridge("health_check"), secs(10)).await.unwrap_err();
        match err {
            ProtocolError::Transport { operation, elapsed, reason } => {
                assert_eq!(operation, "health_check");
                assert_eq!(reason, "connection reset");
                assert!(elapsed >= secs(2) && elapsed < secs(10));
            }
            other => panic!("expected transport failure, got {other:?}"),
        }
        assert_eq!(h.open_channels(), 0);

        // sticky until the connection comes back
        let again = h.client().request(&Request::bridge("health_check"), secs(10)).await;
        assert!(matches!(again, Err(ProtocolError::Transport { .. })));

        h.bridge.reconnect();
        h.bridge.respond_ok("health_check", json!({"healthy": true}));
        assert!(h.source().health_check().await.unwrap());
    }

    #[tokio::test]
    async fn test_publish_failure_is_transport_error() {
        let h = TestHarness::new();
        h.bridge.fail_publishes("not connected");
        let err = h.client().request(&Request::bridge("health_check"), secs(10)).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Transport { ref reason, .. } if reason == "not connected"));
        assert_eq!(h.open_channels(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_collection_resolves_ok() {
        let h = TestHarness::new();
        let trigger = Request::bridge("device_ping");
        let got = h
            .client()
            .collect("device_states", Some(&trigger), secs(10), |_| true)
            .await
            .unwrap();
        assert!(got.is_empty());
        h.assert_request_sent("device_ping", &json!({})).unwrap();
        assert_eq!(h.open_channels(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collection_keeps_arrival_order_within_window() {
        let h = TestHarness::new();
        h.bridge.inject_later(secs(1), "Kitchen", json!({"n": 1}));
        h.bridge.inject_later(secs(2), "Other", json!({"n": 2}));
        h.bridge.inject_later(secs(3), "Kitchen", json!({"n": 3}));
        h.bridge.inject_later(secs(30), "Kitchen", json!({"n": 4}));

        let got = h
            .client()
            .collect("device_states", None, secs(10), |m| m.topic.ends_with("/Kitchen"))
            .await
            .unwrap();
        let order: Vec<i64> = got
            .iter()
            .map(|m| m.json().unwrap()["n"].as_i64().unwrap())
            .collect();
        assert_eq!(order, vec![1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collection_aborts_on_transport_failure() {
        let h = TestHarness::new();
        h.bridge.inject_later(secs(1), "Kitchen", json!({}));
        h.bridge.fail_later(secs(2), "broker gone");
        let err = h
            .client()
            .collect("device_states", None, secs(10), |_| true)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Transport { .. }));
        assert_eq!(h.open_channels(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_group_list_reads_as_empty() {
        let h = TestHarness::new();
        assert!(h.source().groups().await.unwrap().is_empty());
        let err = h.source().devices().await.unwrap_err();
        assert!(err.is_timeout());
    }

    fn sample_mesh() -> MeshMessageBuilder {
        MeshMessageBuilder::new()
            .device("0x00", "Coordinator", "Coordinator", Some("floor: ground\nsector: center"))
            .device("0x01", "Hall plug", "Router", Some("floor: ground\nsector: center"))
            .device("0x02", "Porch plug", "Router", Some("floor: ground\nsector: west"))
            .device("0x03", "Door sensor", "EndDevice", Some("floor: ground\nsector: center-west"))
            .link("0x01", "0x00", 150, 0, 1)
            .link("0x02", "0x00", 140, 0, 1)
            .link("0x03", "0x01", 80, 0, 2)
            // sibling observations never become routing edges
            .link("0x02", "0x01", 200, 2, 1)
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_to_report_end_to_end() {
        let h = TestHarness::new();
        h.serve_mesh(&sample_mesh(), &["downstairs"]);
        let seen = Utc::now();
        h.bridge
            .inject_later(secs(1), "Door sensor", MeshMessageBuilder::state(80, Some(14.0), seen));
        h.bridge
            .inject_later(secs(2), "Door sensor", MeshMessageBuilder::state(90, None, seen));
        h.bridge
            .inject_later(secs(3), "Unknown thing", MeshMessageBuilder::state(10, Some(1.0), seen));

        let source = h.source();
        assert!(source.health_check().await.unwrap());
        let snapshot = source.snapshot().await.unwrap();
        h.assert_request_sent("networkmap", &json!({"type": "raw", "routes": true}))
            .unwrap();
        assert_eq!(h.open_channels(), 0);

        assert_eq!(snapshot.nodes.len(), 4);
        assert_eq!(snapshot.links.len(), 4);
        assert_eq!(snapshot.groups, vec!["downstairs".to_string()]);
        let door = NodeId::from("0x03");
        let telemetry = &snapshot.telemetry[&door];
        assert_eq!(telemetry.lqi, Some(90));
        assert_eq!(telemetry.battery, Some(14.0));
        assert_eq!(snapshot.telemetry.len(), 1);

        let analyzer = MeshAnalyzer::new(h.config.location_resolver(), h.config.distance_model());
        let report = analyzer.analyze(&snapshot).unwrap();

        let kinds: Vec<IssueKind> = report.diagnostics.issues_for(&door).map(|i| i.kind).collect();
        assert_eq!(kinds, vec![IssueKind::BatteryCritical]);
        assert_eq!(report.topology.routing_edges, 3);
        assert!(report.topology.orphaned.is_empty());
        assert_eq!(report.routing.assignments.len(), 1);
        assert_eq!(report.routing.assignments.get(&door), Some(&NodeId::from("0x02")));

        let commands = Command::from_assignments(&snapshot, &report.routing.assignments).unwrap();
        assert_eq!(
            commands,
            vec![Command::Reparent {
                device: door.clone(),
                new_parent: NodeId::from("0x02")
            }]
        );
    }
}
