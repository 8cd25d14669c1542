//! One-shot analysis pipeline over a snapshot
//!
//! graph build + diagnostics are independent; locations feed the optimizer.
//! Nothing is kept between runs.

use crate::diagnostics::{diagnose, DiagnosticReport};
use crate::distance::DistanceModel;
use crate::error::Result;
use crate::graph::{RoutingGraph, TraceOutcome};
use crate::location::LocationResolver;
use crate::model::{MeshSnapshot, NodeId, Role};
use crate::optimizer::{OptimizationResult, RoutingOptimizer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// One row of the derived parent-child tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeRow {
    pub device: NodeId,
    pub name: String,
    pub role: Role,
    pub parent: Option<NodeId>,
    pub lqi: Option<u8>,
    pub children: usize,
    pub trace: TraceOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologySummary {
    pub nodes: usize,
    pub routing_edges: usize,
    pub located: usize,
    /// Parent chain stops before the coordinator
    pub orphaned: Vec<NodeId>,
    /// Parent chain loops back on itself
    pub looped: Vec<NodeId>,
    pub tree: Vec<TreeRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshReport {
    pub generated_at: DateTime<Utc>,
    pub topology: TopologySummary,
    pub diagnostics: DiagnosticReport,
    pub routing: OptimizationResult,
}

#[derive(Debug, Clone)]
pub struct MeshAnalyzer {
    resolver: LocationResolver,
    optimizer: RoutingOptimizer,
}

impl MeshAnalyzer {
    pub fn new(resolver: LocationResolver, model: DistanceModel) -> Self {
        Self {
            resolver,
            optimizer: RoutingOptimizer::new(model),
        }
    }

    pub fn analyze(&self, snapshot: &MeshSnapshot) -> Result<MeshReport> {
        let graph = RoutingGraph::build(&snapshot.nodes, &snapshot.links);
        let diagnostics = diagnose(&snapshot.nodes, &snapshot.telemetry, snapshot.captured_at);
        let locations = self.resolver.resolve_all(&snapshot.nodes);
        let routing = self.optimizer.optimize(&graph, &locations)?;

        let topology = summarize(&graph, locations.len());
        info!(
            nodes = topology.nodes,
            edges = topology.routing_edges,
            issues = diagnostics.issues.len(),
            anomalies = routing.anomalies.len(),
            "mesh analysis complete"
        );

        Ok(MeshReport {
            generated_at: snapshot.captured_at,
            topology,
            diagnostics,
            routing,
        })
    }
}

fn summarize(graph: &RoutingGraph, located: usize) -> TopologySummary {
    let mut orphaned = Vec::new();
    let mut looped = Vec::new();
    let mut tree = Vec::with_capacity(graph.nodes().len());

    for node in graph.nodes() {
        let trace = graph.trace(&node.id);
        match trace {
            TraceOutcome::Orphaned => orphaned.push(node.id.clone()),
            TraceOutcome::Loops => looped.push(node.id.clone()),
            TraceOutcome::Reaches(_) => {}
        }
        let parent = graph.parent_of(&node.id);
        tree.push(TreeRow {
            device: node.id.clone(),
            name: node.name.clone(),
            role: node.role,
            parent: parent.map(|e| e.node.clone()),
            lqi: parent.map(|e| e.lqi),
            children: graph.children_of(&node.id).len(),
            trace,
        });
    }

    TopologySummary {
        nodes: graph.nodes().len(),
        routing_edges: graph.edge_count(),
        located,
        orphaned,
        looped,
        tree,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisError;
    use crate::model::{DeviceTelemetry, Link, Location, Node, PowerSource, Relationship, TelemetryMap};
    use chrono::TimeZone;

    fn snapshot() -> MeshSnapshot {
        let nodes = vec![
            Node::new("0x00", "Coordinator", Role::Coordinator, 0),
            Node::new("0x01", "Hall plug", Role::Router, 0x1111)
                .with_description("floor: ground\nsector: center"),
            Node::new("0x02", "Porch plug", Role::Router, 0x2222)
                .with_description("floor: ground\nsector: west"),
            Node::new("0x03", "Door sensor", Role::EndDevice, 0x3333)
                .with_power_source(PowerSource::Battery)
                .with_description("floor: ground\nsector: center-west"),
            Node::new("0x04", "Lost sensor", Role::EndDevice, 0x4444),
        ];
        let links = vec![
            Link::new("0x01", "0x00", 150, Relationship::ParentReport, 1),
            Link::new("0x02", "0x00", 140, Relationship::ParentReport, 1),
            Link::new("0x03", "0x01", 80, Relationship::ParentReport, 2),
            Link::new("0x02", "0x01", 90, Relationship::Sibling, 1),
        ];
        let mut telemetry = TelemetryMap::new();
        telemetry.insert("0x03".into(), DeviceTelemetry { lqi: Some(80), battery: Some(14.0), last_seen: None });
        MeshSnapshot {
            nodes,
            links,
            telemetry,
            groups: vec![],
            captured_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_full_pipeline() {
        let analyzer = MeshAnalyzer::new(
            LocationResolver::new().with_coordinator_default(Some(Location::new("basement", "center"))),
            DistanceModel::default(),
        );
        let report = analyzer.analyze(&snapshot()).unwrap();

        assert_eq!(report.topology.nodes, 5);
        assert_eq!(report.topology.routing_edges, 3);
        assert_eq!(report.topology.located, 4);
        assert_eq!(report.topology.orphaned, vec![NodeId::from("0x04")]);
        assert!(report.topology.looped.is_empty());

        let sensor = report.topology.tree.iter().find(|r| r.device.as_str() == "0x03").unwrap();
        assert_eq!(sensor.trace, TraceOutcome::Reaches(2));
        assert_eq!(sensor.lqi, Some(80));

        assert_eq!(report.diagnostics.severities.critical, 1);
        assert_eq!(
            report.routing.assignments.get(&NodeId::from("0x03")),
            Some(&NodeId::from("0x02"))
        );
        assert_eq!(report.routing.unplaced, vec![NodeId::from("0x04")]);
    }

    #[test]
    fn test_report_serializes() {
        let analyzer = MeshAnalyzer::new(LocationResolver::new(), DistanceModel::default());
        let report = analyzer.analyze(&snapshot()).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["diagnostics"]["issues"][0]["kind"], "battery_critical");
        assert_eq!(json["topology"]["tree"][3]["trace"]["status"], "reaches");
    }

    #[test]
    fn test_empty_snapshot_fails() {
        let analyzer = MeshAnalyzer::new(LocationResolver::new(), DistanceModel::default());
        let empty = MeshSnapshot {
            nodes: vec![],
            links: vec![],
            telemetry: TelemetryMap::new(),
            groups: vec![],
            captured_at: Utc::now(),
        };
        assert_eq!(analyzer.analyze(&empty).unwrap_err(), AnalysisError::EmptyGraph);
    }
}
