//! Location resolution from per-device metadata
//!
//! Device descriptions are free-form text read as newline-separated
//! `key: value` lines. A device gets a location only when both `floor` and
//! `sector` are present; there is no default, except for the coordinator
//! which can fall back to an operator-configured location.

use crate::error::AnalysisError;
use crate::model::{Location, Node, NodeId};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Parses `key: value` lines, lower-casing keys. Lines without a colon or
/// with an empty key are skipped.
pub fn parse_metadata(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() {
                return None;
            }
            Some((key, value.trim().to_string()))
        })
        .collect()
}

/// Extracts a location from a metadata blob.
pub fn parse_location(device: &NodeId, text: &str) -> Result<Location, AnalysisError> {
    let fields = parse_metadata(text);
    let field = |name: &str| {
        fields
            .get(name)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| AnalysisError::MalformedInput {
                device: device.to_string(),
                reason: format!("missing '{name}' in location metadata"),
            })
    };
    Ok(Location {
        floor: field("floor")?,
        sector: field("sector")?,
    })
}

#[derive(Debug, Clone, Default)]
pub struct LocationResolver {
    coordinator_default: Option<Location>,
}

impl LocationResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_coordinator_default(mut self, location: Option<Location>) -> Self {
        self.coordinator_default = location;
        self
    }

    pub fn resolve(&self, node: &Node) -> Option<Location> {
        let parsed = node
            .description
            .as_deref()
            .map(|text| parse_location(&node.id, text));

        match parsed {
            Some(Ok(location)) => Some(location),
            Some(Err(e)) => {
                debug!(device = %node.id, "no location: {e}");
                self.fallback(node)
            }
            None => self.fallback(node),
        }
    }

    /// Resolves every node that has a usable location
    pub fn resolve_all(&self, nodes: &[Node]) -> BTreeMap<NodeId, Location> {
        nodes
            .iter()
            .filter_map(|n| self.resolve(n).map(|loc| (n.id.clone(), loc)))
            .collect()
    }

    fn fallback(&self, node: &Node) -> Option<Location> {
        if node.is_coordinator() {
            self.coordinator_default.clone()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;

    #[test]
    fn test_parse_metadata_tolerates_garbage() {
        let fields = parse_metadata("floor: Ground\nnot a pair\n: orphan value\nSector :  center-west \n");
        assert_eq!(fields.get("floor").map(String::as_str), Some("Ground"));
        assert_eq!(fields.get("sector").map(String::as_str), Some("center-west"));
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn test_missing_axis_is_malformed() {
        let id = NodeId::from("0x01");
        let err = parse_location(&id, "floor: ground").unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedInput { .. }));
        assert!(parse_location(&id, "floor: ground\nsector:").is_err());
    }

    #[test]
    fn test_resolver_excludes_nodes_without_location() {
        let resolver = LocationResolver::new();
        let with = Node::new("a", "a", Role::Router, 1).with_description("floor: upper\nsector: north");
        let partial = Node::new("b", "b", Role::Router, 2).with_description("floor: upper");
        let without = Node::new("c", "c", Role::EndDevice, 3);
        let resolved = resolver.resolve_all(&[with, partial, without]);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[&NodeId::from("a")], Location::new("upper", "north"));
    }

    #[test]
    fn test_coordinator_default_only_applies_to_coordinator() {
        let resolver = LocationResolver::new().with_coordinator_default(Some(Location::new("ground", "center")));
        let coordinator = Node::new("c", "Coordinator", Role::Coordinator, 0);
        let router = Node::new("r", "r", Role::Router, 1);
        assert_eq!(resolver.resolve(&coordinator), Some(Location::new("ground", "center")));
        assert_eq!(resolver.resolve(&router), None);

        let described = coordinator.with_description("floor: basement\nsector: east");
        assert_eq!(resolver.resolve(&described), Some(Location::new("basement", "east")));
    }
}
