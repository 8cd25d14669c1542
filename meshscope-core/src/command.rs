//! Command values handed to the command sink
//!
//! The analysis never executes these; it only builds them, checking every
//! referenced device or group against the snapshot.

use crate::error::{AnalysisError, Result};
use crate::model::{MeshSnapshot, NodeId};
use crate::optimizer::AssignedRouting;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Target {
    Device(String),
    Group(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BridgeAction {
    Restart,
    PermitJoin { seconds: u16 },
    LogLevel { level: LogLevel },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Reparent { device: NodeId, new_parent: NodeId },
    SetState { target: Target, payload: Value },
    Bridge(BridgeAction),
}

impl Command {
    pub fn reparent(snapshot: &MeshSnapshot, device: &NodeId, new_parent: &NodeId) -> Result<Self> {
        for id in [device, new_parent] {
            if snapshot.node(id).is_none() {
                return Err(not_found("device", id.as_str()));
            }
        }
        Ok(Self::Reparent {
            device: device.clone(),
            new_parent: new_parent.clone(),
        })
    }

    /// One re-parent command per proposed assignment, in identifier order
    pub fn from_assignments(snapshot: &MeshSnapshot, assignments: &AssignedRouting) -> Result<Vec<Self>> {
        assignments
            .iter()
            .map(|(device, parent)| Self::reparent(snapshot, device, parent))
            .collect()
    }

    /// `device` may be a hardware identifier or a display name
    pub fn set_device_state(snapshot: &MeshSnapshot, device: &str, payload: Value) -> Result<Self> {
        let node = snapshot
            .find_device(device)
            .ok_or_else(|| not_found("device", device))?;
        Ok(Self::SetState {
            target: Target::Device(node.name.clone()),
            payload,
        })
    }

    pub fn set_group_state(snapshot: &MeshSnapshot, group: &str, payload: Value) -> Result<Self> {
        if !snapshot.groups.iter().any(|g| g == group) {
            return Err(not_found("group", group));
        }
        Ok(Self::SetState {
            target: Target::Group(group.to_string()),
            payload,
        })
    }

    pub fn bridge(action: BridgeAction) -> Self {
        Self::Bridge(action)
    }
}

fn not_found(kind: &'static str, id: &str) -> AnalysisError {
    AnalysisError::NotFound {
        kind,
        id: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Node, Role, TelemetryMap};
    use chrono::Utc;
    use serde_json::json;

    fn snapshot() -> MeshSnapshot {
        MeshSnapshot {
            nodes: vec![
                Node::new("0x00", "Coordinator", Role::Coordinator, 0),
                Node::new("0x01", "Kitchen light", Role::Router, 1),
            ],
            links: vec![],
            telemetry: TelemetryMap::new(),
            groups: vec!["downstairs".to_string()],
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn test_reparent_validates_both_ends() {
        let snap = snapshot();
        assert!(Command::reparent(&snap, &"0x01".into(), &"0x00".into()).is_ok());
        let err = Command::reparent(&snap, &"0x01".into(), &"0x99".into()).unwrap_err();
        assert_eq!(err, AnalysisError::NotFound { kind: "device", id: "0x99".into() });
    }

    #[test]
    fn test_set_state_by_name_or_id() {
        let snap = snapshot();
        let by_id = Command::set_device_state(&snap, "0x01", json!({"state": "ON"})).unwrap();
        let by_name = Command::set_device_state(&snap, "Kitchen light", json!({"state": "ON"})).unwrap();
        assert_eq!(by_id, by_name);
        assert!(Command::set_device_state(&snap, "Garage", json!({})).is_err());
    }

    #[test]
    fn test_group_and_bridge_commands() {
        let snap = snapshot();
        assert!(Command::set_group_state(&snap, "downstairs", json!({"state": "OFF"})).is_ok());
        assert!(matches!(
            Command::set_group_state(&snap, "attic", json!({})),
            Err(AnalysisError::NotFound { kind: "group", .. })
        ));
        let json = serde_json::to_value(Command::bridge(BridgeAction::PermitJoin { seconds: 120 })).unwrap();
        assert_eq!(json["type"], "bridge");
        assert_eq!(json["action"], "permit_join");
        assert_eq!(json["seconds"], 120);
    }
}
