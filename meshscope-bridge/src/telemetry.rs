/**
 * TELEMETRY - Décodage des messages du bridge en snapshot d'analyse
 *
 * RÔLE : Traduit les payloads du bridge (networkmap brute, inventaire
 * retenu `bridge/devices`, groupes, état par device) vers les types du
 * core, puis assemble un `MeshSnapshot` complet.
 *
 * FONCTIONNEMENT :
 * - Parseurs purs, testables sans transport
 * - Entrées inconnues ignorées avec un warning, jamais fatales
 * - États d'un même device fusionnés dans l'ordre d'arrivée
 */

use crate::error::{ProtocolError, Result};
use crate::protocol::{ProtocolClient, Request};
use chrono::{DateTime, TimeZone, Utc};
use meshscope_core::model::UNKNOWN_DEPTH;
use meshscope_core::{DeviceTelemetry, Link, MeshSnapshot, Node, NodeId, PowerSource, Relationship, Role, TelemetryMap};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, info, warn};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MapNode {
    ieee_addr: String,
    #[serde(default)]
    friendly_name: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    network_address: u16,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MapEndpoint {
    ieee_addr: String,
}

#[derive(Deserialize)]
struct MapLink {
    source: MapEndpoint,
    target: MapEndpoint,
    // older bridges report `lqi`, newer ones `linkquality`
    #[serde(default)]
    linkquality: Option<u64>,
    #[serde(default)]
    lqi: Option<u64>,
    #[serde(default)]
    relationship: Option<u64>,
    #[serde(default)]
    depth: Option<u64>,
}

#[derive(Deserialize)]
struct NetworkMap {
    #[serde(default)]
    nodes: Vec<MapNode>,
    #[serde(default)]
    links: Vec<MapLink>,
}

#[derive(Deserialize)]
struct InventoryDevice {
    ieee_address: String,
    friendly_name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    network_address: u16,
    #[serde(default = "default_true")]
    interview_completed: bool,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    power_source: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
struct InventoryGroup {
    friendly_name: String,
}

fn default_true() -> bool {
    true
}

fn clamp_u8(value: u64) -> u8 {
    u8::try_from(value).unwrap_or(u8::MAX)
}

/// Decodes a raw network map response; accepts the `data` object or its `value`
pub fn parse_network_map(data: &Value) -> Result<(Vec<Node>, Vec<Link>)> {
    let raw = data.get("value").unwrap_or(data);
    let map = NetworkMap::deserialize(raw).map_err(|e| ProtocolError::decode("networkmap", e))?;

    let mut nodes = Vec::with_capacity(map.nodes.len());
    for entry in map.nodes {
        let Some(role) = Role::parse(&entry.kind) else {
            warn!(device = %entry.ieee_addr, kind = %entry.kind, "skipping node of unknown type");
            continue;
        };
        let name = entry.friendly_name.unwrap_or_else(|| entry.ieee_addr.clone());
        nodes.push(Node::new(entry.ieee_addr, name, role, entry.network_address));
    }

    let links = map
        .links
        .into_iter()
        .map(|l| {
            Link::new(
                l.source.ieee_addr,
                l.target.ieee_addr,
                clamp_u8(l.linkquality.or(l.lqi).unwrap_or(0)),
                l.relationship
                    .map(|code| Relationship::from_code(clamp_u8(code)))
                    .unwrap_or(Relationship::Unknown),
                l.depth.map(clamp_u8).unwrap_or(UNKNOWN_DEPTH),
            )
        })
        .collect();
    Ok((nodes, links))
}

/// Decodes the retained `bridge/devices` inventory
pub fn parse_devices(payload: &Value) -> Result<Vec<Node>> {
    let devices =
        Vec::<InventoryDevice>::deserialize(payload).map_err(|e| ProtocolError::decode("devices", e))?;
    Ok(devices
        .into_iter()
        .filter_map(|d| {
            let Some(role) = Role::parse(&d.kind) else {
                warn!(device = %d.ieee_address, kind = %d.kind, "skipping device of unknown type");
                return None;
            };
            let mut node = Node::new(d.ieee_address, d.friendly_name, role, d.network_address);
            node.interview_completed = d.interview_completed;
            node.disabled = d.disabled;
            node.power_source = d.power_source.as_deref().map(PowerSource::parse).unwrap_or_default();
            node.description = d.description.filter(|s| !s.trim().is_empty());
            Some(node)
        })
        .collect())
}

pub fn parse_groups(payload: &Value) -> Result<Vec<String>> {
    let groups =
        Vec::<InventoryGroup>::deserialize(payload).map_err(|e| ProtocolError::decode("groups", e))?;
    Ok(groups.into_iter().map(|g| g.friendly_name).collect())
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s).ok().map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

/// Picks the fields the diagnostics care about out of a device state message
pub fn parse_state(payload: &Value) -> DeviceTelemetry {
    DeviceTelemetry {
        lqi: payload.get("linkquality").and_then(Value::as_u64).map(clamp_u8),
        battery: payload.get("battery").and_then(Value::as_f64),
        last_seen: payload.get("last_seen").and_then(parse_timestamp),
    }
}

/// Enriches network-map nodes with inventory details. Inventory devices the
/// map did not reach are appended so they still show up in diagnostics.
pub fn merge_inventory(map_nodes: Vec<Node>, inventory: Vec<Node>) -> Vec<Node> {
    let mut by_id: HashMap<NodeId, Node> = inventory.into_iter().map(|n| (n.id.clone(), n)).collect();
    let mut merged = Vec::with_capacity(map_nodes.len() + by_id.len());

    for mut node in map_nodes {
        if let Some(known) = by_id.remove(&node.id) {
            node.name = known.name;
            node.interview_completed = known.interview_completed;
            node.disabled = known.disabled;
            node.power_source = known.power_source;
            node.description = known.description;
        }
        merged.push(node);
    }

    let mut unreached: Vec<Node> = by_id.into_values().collect();
    unreached.sort_by(|a, b| a.id.cmp(&b.id));
    if !unreached.is_empty() {
        debug!(count = unreached.len(), "inventory devices missing from the network map");
    }
    merged.extend(unreached);
    merged
}

/// High-level view of the bridge: one method per kind of telemetry
#[derive(Clone)]
pub struct TelemetrySource {
    client: ProtocolClient,
}

impl TelemetrySource {
    pub fn new(client: ProtocolClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ProtocolClient {
        &self.client
    }

    pub async fn health_check(&self) -> Result<bool> {
        let timeouts = &self.client.config().timeouts;
        let data = self
            .client
            .request(&Request::bridge("health_check"), timeouts.request())
            .await?;
        Ok(data.get("healthy").and_then(Value::as_bool).unwrap_or(false))
    }

    /// Full topology scan; slow on large meshes
    pub async fn network_map(&self) -> Result<(Vec<Node>, Vec<Link>)> {
        let request = Request::bridge("networkmap").with_payload(json!({"type": "raw", "routes": true}));
        let data = self
            .client
            .request(&request, self.client.config().timeouts.topology())
            .await?;
        parse_network_map(&data)
    }

    pub async fn devices(&self) -> Result<Vec<Node>> {
        let payload = self
            .client
            .await_message("devices", "bridge/devices", self.client.config().timeouts.request())
            .await?;
        parse_devices(&payload)
    }

    /// Bridges without groups never publish the topic; that reads as none
    pub async fn groups(&self) -> Result<Vec<String>> {
        match self
            .client
            .await_message("groups", "bridge/groups", self.client.config().timeouts.request())
            .await
        {
            Ok(payload) => parse_groups(&payload),
            Err(e) if e.is_timeout() => {
                debug!("no group list published");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Collects state messages for `nodes` over the configured window
    pub async fn device_states(&self, nodes: &[Node]) -> Result<TelemetryMap> {
        let config = self.client.config();
        let by_name: HashMap<&str, &NodeId> = nodes.iter().map(|n| (n.name.as_str(), &n.id)).collect();
        let messages = self
            .client
            .collect("device_states", None, config.timeouts.collect_window(), |msg| {
                config
                    .relative_topic(&msg.topic)
                    .is_some_and(|topic| by_name.contains_key(topic))
            })
            .await?;

        let mut telemetry = TelemetryMap::new();
        for msg in messages {
            let Some(id) = config.relative_topic(&msg.topic).and_then(|t| by_name.get(t)) else {
                continue;
            };
            match msg.json() {
                Ok(payload) => telemetry.entry((*id).clone()).or_default().merge(parse_state(&payload)),
                Err(e) => debug!(topic = %msg.topic, "ignoring undecodable state: {e}"),
            }
        }
        Ok(telemetry)
    }

    /// Everything the analysis needs, captured now
    pub async fn snapshot(&self) -> Result<MeshSnapshot> {
        let ((map_nodes, links), inventory, groups) =
            tokio::try_join!(self.network_map(), self.devices(), self.groups())?;
        let nodes = merge_inventory(map_nodes, inventory);
        let telemetry = self.device_states(&nodes).await?;
        info!(
            nodes = nodes.len(),
            links = links.len(),
            reporting = telemetry.len(),
            "snapshot captured"
        );
        Ok(MeshSnapshot {
            nodes,
            links,
            telemetry,
            groups,
            captured_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_map_decoding() {
        let data = json!({
            "type": "raw",
            "routes": true,
            "value": {
                "nodes": [
                    {"ieeeAddr": "0x00", "friendlyName": "Coordinator", "type": "Coordinator", "networkAddress": 0},
                    {"ieeeAddr": "0x01", "friendlyName": "Hall plug", "type": "Router", "networkAddress": 4660},
                    {"ieeeAddr": "0x02", "type": "GreenPower", "networkAddress": 7}
                ],
                "links": [
                    {"source": {"ieeeAddr": "0x01"}, "target": {"ieeeAddr": "0x00"},
                     "linkquality": 120, "relationship": 0, "depth": 1},
                    {"source": {"ieeeAddr": "0x00"}, "target": {"ieeeAddr": "0x01"}, "lqi": 300}
                ]
            }
        });
        let (nodes, links) = parse_network_map(&data).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].name, "Hall plug");
        assert_eq!(nodes[1].network_address, 4660);

        assert_eq!(links[0].lqi, 120);
        assert_eq!(links[0].relationship, Relationship::ParentReport);
        assert_eq!(links[0].depth, 1);
        // clamped, relationship and depth missing
        assert_eq!(links[1].lqi, 255);
        assert_eq!(links[1].relationship, Relationship::Unknown);
        assert_eq!(links[1].depth, UNKNOWN_DEPTH);
    }

    #[test]
    fn test_network_map_rejects_wrong_shape() {
        let err = parse_network_map(&json!({"value": {"nodes": "nope"}})).unwrap_err();
        assert_eq!(err.operation(), "networkmap");
    }

    #[test]
    fn test_devices_and_merge() {
        let inventory = parse_devices(&json!([
            {"ieee_address": "0x00", "friendly_name": "Coordinator", "type": "Coordinator"},
            {"ieee_address": "0x01", "friendly_name": "Hall plug", "type": "Router",
             "power_source": "Mains (single phase)", "description": "floor: ground\nsector: north"},
            {"ieee_address": "0x03", "friendly_name": "Attic sensor", "type": "EndDevice",
             "power_source": "Battery", "interview_completed": false, "description": "  "}
        ]))
        .unwrap();
        assert_eq!(inventory[1].power_source, PowerSource::Mains);
        assert!(!inventory[2].interview_completed);
        assert_eq!(inventory[2].description, None);

        let map = vec![
            Node::new("0x00", "0x00", Role::Coordinator, 0),
            Node::new("0x01", "old name", Role::Router, 1),
        ];
        let merged = merge_inventory(map, inventory);
        let ids: Vec<&str> = merged.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["0x00", "0x01", "0x03"]);
        assert_eq!(merged[1].name, "Hall plug");
        assert!(merged[1].description.is_some());
    }

    #[test]
    fn test_state_timestamps() {
        let rfc = parse_state(&json!({"linkquality": 87, "battery": 64.5, "last_seen": "2024-03-01T10:00:00+01:00"}));
        assert_eq!(rfc.lqi, Some(87));
        assert_eq!(rfc.battery, Some(64.5));
        assert_eq!(rfc.last_seen, Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()));

        let epoch = parse_state(&json!({"last_seen": 1_709_283_600_000i64}));
        assert_eq!(epoch.last_seen, Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()));

        assert_eq!(parse_state(&json!({"state": "ON"})), DeviceTelemetry::default());
    }

    #[test]
    fn test_groups() {
        let groups = parse_groups(&json!([{"id": 1, "friendly_name": "downstairs", "members": []}])).unwrap();
        assert_eq!(groups, vec!["downstairs".to_string()]);
    }
}
