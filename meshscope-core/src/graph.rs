//! Routing graph builder
//!
//! Turns the raw node/link observations into parent-of / children-of maps.
//! Only links that describe an actual forwarding path become routing edges:
//! parent reports, and child reports with a known depth. The raw graph may be
//! inconsistent (loops, several parents); that is surfaced by [`RoutingGraph::trace`]
//! rather than fixed here.

use crate::model::{Link, Node, NodeId, Relationship, Role, UNKNOWN_DEPTH};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

/// One end of a routing edge together with the observed link quality
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub node: NodeId,
    pub lqi: u8,
}

/// Outcome of following parent pointers from a node up to the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "hops")]
pub enum TraceOutcome {
    /// Reaches the coordinator after this many hops
    Reaches(usize),
    /// Chain stops at a node with no known parent
    Orphaned,
    /// Chain revisits a node before reaching the coordinator
    Loops,
}

#[derive(Debug, Clone, Default)]
pub struct RoutingGraph {
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
    parent_of: BTreeMap<NodeId, Edge>,
    children_of: BTreeMap<NodeId, Vec<Edge>>,
}

/// True when a link represents an actual forwarding path.
pub fn is_routing_edge(link: &Link) -> bool {
    match link.relationship {
        Relationship::ParentReport => true,
        Relationship::ChildReport => link.depth < UNKNOWN_DEPTH,
        _ => false,
    }
}

impl RoutingGraph {
    /// Builds the graph from a node set and its raw links.
    ///
    /// Links referencing unknown nodes are dropped. For a given source the
    /// last qualifying link wins.
    pub fn build(nodes: &[Node], links: &[Link]) -> Self {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            index.entry(node.id.clone()).or_insert(i);
        }

        let mut parent_of = BTreeMap::new();
        let mut children_of: BTreeMap<NodeId, Vec<Edge>> = BTreeMap::new();
        let mut dangling = 0usize;

        for link in links {
            if !index.contains_key(&link.source) || !index.contains_key(&link.target) {
                dangling += 1;
                continue;
            }
            if !is_routing_edge(link) {
                continue;
            }
            parent_of.insert(
                link.source.clone(),
                Edge { node: link.target.clone(), lqi: link.lqi },
            );
            children_of
                .entry(link.target.clone())
                .or_default()
                .push(Edge { node: link.source.clone(), lqi: link.lqi });
        }

        if dangling > 0 {
            warn!(dangling, "dropped links referencing unknown nodes");
        }
        debug!(nodes = nodes.len(), edges = parent_of.len(), "routing graph built");

        Self {
            nodes: nodes.to_vec(),
            index,
            parent_of,
            children_of,
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Position of a node in the original node order
    pub fn position(&self, id: &NodeId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn coordinator(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.role == Role::Coordinator)
    }

    pub fn parent_of(&self, id: &NodeId) -> Option<&Edge> {
        self.parent_of.get(id)
    }

    pub fn children_of(&self, id: &NodeId) -> &[Edge] {
        self.children_of.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Iterates `(child, parent edge)` pairs in identifier order
    pub fn edges(&self) -> impl Iterator<Item = (&NodeId, &Edge)> {
        self.parent_of.iter()
    }

    pub fn edge_count(&self) -> usize {
        self.parent_of.len()
    }

    /// Follows parent pointers from `id` towards the coordinator.
    pub fn trace(&self, id: &NodeId) -> TraceOutcome {
        let mut visited = HashSet::new();
        let mut current = id;
        let mut hops = 0usize;
        loop {
            if self.node(current).map(|n| n.role) == Some(Role::Coordinator) {
                return TraceOutcome::Reaches(hops);
            }
            if !visited.insert(current) {
                return TraceOutcome::Loops;
            }
            match self.parent_of.get(current) {
                Some(edge) => {
                    current = &edge.node;
                    hops += 1;
                }
                None => return TraceOutcome::Orphaned,
            }
        }
    }
}
