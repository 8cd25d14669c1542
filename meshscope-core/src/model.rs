//! Snapshot data model shared by every analysis stage
//!
//! Nodes and links are raw observations taken from the telemetry source.
//! They are never mutated by the analysis, only filtered and indexed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Immutable hardware identifier (IEEE address, e.g. `0x00158d0001a2b3c4`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Mesh role of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Coordinator,
    Router,
    EndDevice,
}

impl Role {
    /// Parses the role names used by the bridge ("Coordinator", "Router",
    /// "EndDevice", "End device"...). Unknown names yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "coordinator" => Some(Self::Coordinator),
            "router" => Some(Self::Router),
            "enddevice" => Some(Self::EndDevice),
            _ => None,
        }
    }

    /// Roles that can forward traffic for children
    pub fn can_route(&self) -> bool {
        matches!(self, Self::Coordinator | Self::Router)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerSource {
    Mains,
    Battery,
    #[default]
    Unknown,
}

impl PowerSource {
    pub fn parse(raw: &str) -> Self {
        let lower = raw.to_ascii_lowercase();
        if lower.contains("battery") {
            Self::Battery
        } else if lower.contains("mains") || lower.contains("dc source") {
            Self::Mains
        } else {
            Self::Unknown
        }
    }
}

/// A mesh member as reported by the telemetry source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Operator-assigned display name
    pub name: String,
    pub role: Role,
    pub network_address: u16,
    #[serde(default = "default_true")]
    pub interview_completed: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub power_source: PowerSource,
    /// Free-form metadata, parsed for `floor:` / `sector:` lines
    #[serde(default)]
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Node {
    pub fn new<S: Into<String>>(id: S, name: S, role: Role, network_address: u16) -> Self {
        Self {
            id: NodeId(id.into()),
            name: name.into(),
            role,
            network_address,
            interview_completed: true,
            disabled: false,
            power_source: PowerSource::Unknown,
            description: None,
        }
    }

    pub fn with_power_source(mut self, power_source: PowerSource) -> Self {
        self.power_source = power_source;
        self
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_coordinator(&self) -> bool {
        self.role == Role::Coordinator
    }
}

/// Relationship code carried by a raw link observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    ParentReport,
    ChildReport,
    Sibling,
    Unknown,
    StaleChild,
}

impl Relationship {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::ParentReport,
            1 => Self::ChildReport,
            2 => Self::Sibling,
            4 => Self::StaleChild,
            _ => Self::Unknown,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::ParentReport => 0,
            Self::ChildReport => 1,
            Self::Sibling => 2,
            Self::Unknown => 3,
            Self::StaleChild => 4,
        }
    }
}

/// Depth value meaning "unknown / unreliable"
pub const UNKNOWN_DEPTH: u8 = 255;

/// Directed link observation between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub source: NodeId,
    pub target: NodeId,
    /// Link quality indicator, 0-255
    pub lqi: u8,
    pub relationship: Relationship,
    pub depth: u8,
}

impl Link {
    pub fn new<S: Into<String>>(source: S, target: S, lqi: u8, relationship: Relationship, depth: u8) -> Self {
        Self {
            source: NodeId(source.into()),
            target: NodeId(target.into()),
            lqi,
            relationship,
            depth,
        }
    }
}

/// Instantaneous device state collected from the state stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceTelemetry {
    pub lqi: Option<u8>,
    /// Battery percentage, 0-100
    pub battery: Option<f64>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl DeviceTelemetry {
    /// Folds a later observation into this one; present fields win.
    pub fn merge(&mut self, later: DeviceTelemetry) {
        if later.lqi.is_some() {
            self.lqi = later.lqi;
        }
        if later.battery.is_some() {
            self.battery = later.battery;
        }
        if later.last_seen.is_some() {
            self.last_seen = later.last_seen;
        }
    }
}

pub type TelemetryMap = HashMap<NodeId, DeviceTelemetry>;

/// Coarse physical location: floor label + compass sector label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub floor: String,
    pub sector: String,
}

impl Location {
    pub fn new<S: Into<String>>(floor: S, sector: S) -> Self {
        Self {
            floor: floor.into(),
            sector: sector.into(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.floor, self.sector)
    }
}

/// Point-in-time capture of everything the analysis needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshSnapshot {
    pub nodes: Vec<Node>,
    pub links: Vec<Link>,
    #[serde(default)]
    pub telemetry: TelemetryMap,
    /// Group names known to the bridge
    #[serde(default)]
    pub groups: Vec<String>,
    pub captured_at: DateTime<Utc>,
}

impl MeshSnapshot {
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Looks a device up by hardware identifier or display name
    pub fn find_device(&self, key: &str) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|n| n.id.as_str() == key)
            .or_else(|| self.nodes.iter().find(|n| n.name == key))
    }

    pub fn coordinator(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.is_coordinator())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_accepts_bridge_spellings() {
        assert_eq!(Role::parse("Coordinator"), Some(Role::Coordinator));
        assert_eq!(Role::parse("EndDevice"), Some(Role::EndDevice));
        assert_eq!(Role::parse("End device"), Some(Role::EndDevice));
        assert_eq!(Role::parse("router"), Some(Role::Router));
        assert_eq!(Role::parse("GreenPower"), None);
    }

    #[test]
    fn test_relationship_codes() {
        for code in 0..=4u8 {
            assert_eq!(Relationship::from_code(code).code(), code);
        }
        assert_eq!(Relationship::from_code(9), Relationship::Unknown);
    }

    #[test]
    fn test_power_source_parse() {
        assert_eq!(PowerSource::parse("Battery"), PowerSource::Battery);
        assert_eq!(PowerSource::parse("Mains (single phase)"), PowerSource::Mains);
        assert_eq!(PowerSource::parse("DC Source"), PowerSource::Mains);
        assert_eq!(PowerSource::parse(""), PowerSource::Unknown);
    }

    #[test]
    fn test_telemetry_merge_keeps_missing_fields() {
        let mut first = DeviceTelemetry { lqi: Some(40), battery: Some(80.0), last_seen: None };
        first.merge(DeviceTelemetry { lqi: Some(90), battery: None, last_seen: None });
        assert_eq!(first.lqi, Some(90));
        assert_eq!(first.battery, Some(80.0));
    }
}
