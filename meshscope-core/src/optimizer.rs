//! Routing optimizer
//!
//! Proposes a new parent for devices whose current parent is much farther
//! away (by [`DistanceModel`]) than another router. Works in five passes:
//!
//! 1. candidate generation: every routing-capable node closer than 0.7x the
//!    current distance, ascending by distance
//! 2. conflict detection: devices that list each other, grouped into
//!    connected components (BFS)
//! 3. conflict resolution: pairs pick the best of three strategies, larger
//!    components are assigned greedily by best improvement
//! 4. propagation: remaining devices take their best safe candidate until a
//!    full pass assigns nothing
//! 5. result: assigned devices become anomalies, the rest are optimal
//!
//! Tentative parents live in an index-addressed table so the cycle check is a
//! bounded walk over integers. All orderings are explicit (distance, then node
//! order) so repeated runs give identical output.

use crate::distance::DistanceModel;
use crate::error::{AnalysisError, Result};
use crate::graph::RoutingGraph;
use crate::model::{Location, NodeId, Role};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, info};

/// A candidate must be closer than this fraction of the current distance
pub const IMPROVEMENT_RATIO: f64 = 0.7;

/// Current distance used when the current parent has no known location
pub const UNKNOWN_PARENT_DISTANCE: f64 = 999.0;

/// Alternatives listed per anomaly
pub const MAX_ALTERNATIVES: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub parent: NodeId,
    pub distance: f64,
    pub improvement: f64,
}

/// Optimizer working state for one device, rebuilt on every run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingCandidate {
    pub device: NodeId,
    pub location: Location,
    pub current_parent: NodeId,
    pub current_distance: f64,
    pub current_lqi: u8,
    /// Strictly better parents, ascending by distance
    pub alternatives: Vec<Alternative>,
}

/// A device for which a better parent was assigned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingAnomaly {
    pub device: NodeId,
    pub location: Location,
    pub current_parent: NodeId,
    pub current_distance: f64,
    pub current_lqi: u8,
    pub proposed: Alternative,
    /// Up to three best alternatives that do not close a routing loop
    pub alternatives: Vec<Alternative>,
}

/// Proposed device -> new parent map. Advisory only.
pub type AssignedRouting = BTreeMap<NodeId, NodeId>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub anomalies: Vec<RoutingAnomaly>,
    pub optimal: Vec<NodeId>,
    /// Devices left out: no location or no known parent
    pub unplaced: Vec<NodeId>,
    pub assignments: AssignedRouting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairStrategy {
    FirstThroughSecond,
    SecondThroughFirst,
    Neither,
}

#[derive(Debug, Clone)]
struct Choice {
    parent: usize,
    distance: f64,
}

#[derive(Debug, Clone)]
struct Candidate {
    node: usize,
    current_parent: usize,
    current_distance: f64,
    current_lqi: u8,
    location: Location,
    options: Vec<Choice>,
}

impl Candidate {
    fn improvement(&self, option: &Choice) -> f64 {
        self.current_distance - option.distance
    }

    fn improvement_via(&self, parent: usize) -> f64 {
        self.options
            .iter()
            .find(|o| o.parent == parent)
            .map(|o| self.improvement(o))
            .unwrap_or(0.0)
    }

    fn best_excluding(&self, excluded: usize) -> Option<&Choice> {
        self.options.iter().find(|o| o.parent != excluded)
    }

    fn best_improvement(&self) -> f64 {
        self.options.first().map(|o| self.improvement(o)).unwrap_or(0.0)
    }
}

/// Tentative parent per node index
struct Plan {
    assigned: Vec<Option<usize>>,
}

impl Plan {
    fn new(len: usize) -> Self {
        Self { assigned: vec![None; len] }
    }

    fn is_assigned(&self, node: usize) -> bool {
        self.assigned[node].is_some()
    }

    /// True when `parent` already routes through `device` along the tentative chain.
    fn creates_cycle(&self, device: usize, parent: usize) -> bool {
        let mut current = parent;
        for _ in 0..=self.assigned.len() {
            if current == device {
                return true;
            }
            match self.assigned[current] {
                Some(next) => current = next,
                None => return false,
            }
        }
        true
    }

    fn is_reserved(&self, device: usize, parent: usize) -> bool {
        self.assigned[parent] == Some(device)
    }

    fn is_safe(&self, device: usize, parent: usize) -> bool {
        !self.is_reserved(device, parent) && !self.creates_cycle(device, parent)
    }

    fn try_assign(&mut self, device: usize, parent: usize) -> bool {
        if self.is_assigned(device) || !self.is_safe(device, parent) {
            return false;
        }
        self.assigned[device] = Some(parent);
        true
    }
}

#[derive(Debug, Clone)]
pub struct RoutingOptimizer {
    model: DistanceModel,
    resolve_conflicts: bool,
}

impl RoutingOptimizer {
    pub fn new(model: DistanceModel) -> Self {
        Self {
            model,
            resolve_conflicts: true,
        }
    }

    /// Skips conflict resolution and relies on propagation alone
    pub fn without_conflict_resolution(mut self) -> Self {
        self.resolve_conflicts = false;
        self
    }

    pub fn model(&self) -> &DistanceModel {
        &self.model
    }

    /// Candidate generation only (step 1), in node order.
    pub fn candidates(&self, graph: &RoutingGraph, locations: &BTreeMap<NodeId, Location>) -> Vec<RoutingCandidate> {
        let (candidates, _) = self.collect_candidates(graph, locations);
        candidates
            .iter()
            .map(|c| self.describe(graph, c, c.options.iter()))
            .collect()
    }

    pub fn optimize(&self, graph: &RoutingGraph, locations: &BTreeMap<NodeId, Location>) -> Result<OptimizationResult> {
        if graph.is_empty() {
            return Err(AnalysisError::EmptyGraph);
        }

        let (candidates, unplaced) = self.collect_candidates(graph, locations);
        let mut plan = Plan::new(graph.nodes().len());

        if self.resolve_conflicts {
            let slot = slot_table(graph.nodes().len(), &candidates);
            for component in conflict_components(&candidates, &slot) {
                match component.as_slice() {
                    [first, second] => resolve_pair(&candidates[*first], &candidates[*second], &mut plan),
                    members => resolve_greedy(&candidates, members, &mut plan),
                }
            }
        }

        propagate(&candidates, &mut plan);

        let mut result = OptimizationResult {
            unplaced: unplaced.iter().map(|&i| graph.nodes()[i].id.clone()).collect(),
            ..Default::default()
        };

        for candidate in &candidates {
            let device = &graph.nodes()[candidate.node].id;
            let Some(parent) = plan.assigned[candidate.node] else {
                result.optimal.push(device.clone());
                continue;
            };
            let Some(proposed) = candidate.options.iter().find(|o| o.parent == parent) else {
                result.optimal.push(device.clone());
                continue;
            };

            let valid = candidate
                .options
                .iter()
                .filter(|o| !plan.creates_cycle(candidate.node, o.parent))
                .take(MAX_ALTERNATIVES);
            let described = self.describe(graph, candidate, valid);

            debug!(device = %device, from = %described.current_parent, to = %graph.nodes()[parent].id, "re-route proposed");
            result.assignments.insert(device.clone(), graph.nodes()[parent].id.clone());
            result.anomalies.push(RoutingAnomaly {
                device: described.device,
                location: described.location,
                current_parent: described.current_parent,
                current_distance: described.current_distance,
                current_lqi: described.current_lqi,
                proposed: self.alternative(graph, candidate, proposed),
                alternatives: described.alternatives,
            });
        }

        info!(
            anomalies = result.anomalies.len(),
            optimal = result.optimal.len(),
            unplaced = result.unplaced.len(),
            "routing optimization done"
        );
        Ok(result)
    }

    fn collect_candidates(&self, graph: &RoutingGraph, locations: &BTreeMap<NodeId, Location>) -> (Vec<Candidate>, Vec<usize>) {
        let nodes = graph.nodes();
        let routers: Vec<(usize, &Location)> = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.role.can_route())
            .filter_map(|(i, n)| locations.get(&n.id).map(|loc| (i, loc)))
            .collect();

        let mut candidates = Vec::new();
        let mut unplaced = Vec::new();

        for (i, node) in nodes.iter().enumerate() {
            if node.role == Role::Coordinator {
                continue;
            }
            let (Some(location), Some(edge)) = (locations.get(&node.id), graph.parent_of(&node.id)) else {
                unplaced.push(i);
                continue;
            };
            let Some(parent) = graph.position(&edge.node) else {
                unplaced.push(i);
                continue;
            };

            let current_distance = locations
                .get(&edge.node)
                .map(|p| self.model.distance(location, p))
                .unwrap_or(UNKNOWN_PARENT_DISTANCE);
            let threshold = IMPROVEMENT_RATIO * current_distance;

            let mut options: Vec<Choice> = routers
                .iter()
                .filter(|(j, _)| *j != i && *j != parent)
                .map(|(j, loc)| Choice {
                    parent: *j,
                    distance: self.model.distance(location, loc),
                })
                .filter(|o| o.distance < threshold)
                .collect();
            // stable: equal distances keep node order
            options.sort_by(|a, b| a.distance.total_cmp(&b.distance));

            candidates.push(Candidate {
                node: i,
                current_parent: parent,
                current_distance,
                current_lqi: edge.lqi,
                location: location.clone(),
                options,
            });
        }

        (candidates, unplaced)
    }

    fn alternative(&self, graph: &RoutingGraph, candidate: &Candidate, option: &Choice) -> Alternative {
        Alternative {
            parent: graph.nodes()[option.parent].id.clone(),
            distance: option.distance,
            improvement: candidate.improvement(option),
        }
    }

    fn describe<'a>(
        &self,
        graph: &RoutingGraph,
        candidate: &Candidate,
        options: impl Iterator<Item = &'a Choice>,
    ) -> RoutingCandidate {
        RoutingCandidate {
            device: graph.nodes()[candidate.node].id.clone(),
            location: candidate.location.clone(),
            current_parent: graph.nodes()[candidate.current_parent].id.clone(),
            current_distance: candidate.current_distance,
            current_lqi: candidate.current_lqi,
            alternatives: options.map(|o| self.alternative(graph, candidate, o)).collect(),
        }
    }
}

/// node index -> candidate index
fn slot_table(len: usize, candidates: &[Candidate]) -> Vec<Option<usize>> {
    let mut slot = vec![None; len];
    for (ci, c) in candidates.iter().enumerate() {
        slot[c.node] = Some(ci);
    }
    slot
}

/// Connected components of the mutual-preference graph, as candidate indices.
/// Singletons are not returned.
fn conflict_components(candidates: &[Candidate], slot: &[Option<usize>]) -> Vec<Vec<usize>> {
    let mut adjacency: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); candidates.len()];
    for (a, candidate) in candidates.iter().enumerate() {
        for option in &candidate.options {
            let Some(b) = slot[option.parent] else { continue };
            if candidates[b].options.iter().any(|o| o.parent == candidate.node) {
                adjacency[a].insert(b);
                adjacency[b].insert(a);
            }
        }
    }

    let mut seen = vec![false; candidates.len()];
    let mut components = Vec::new();
    for start in 0..candidates.len() {
        if seen[start] || adjacency[start].is_empty() {
            continue;
        }
        let mut component = Vec::new();
        let mut queue = VecDeque::from([start]);
        seen[start] = true;
        while let Some(current) = queue.pop_front() {
            component.push(current);
            for &next in &adjacency[current] {
                if !seen[next] {
                    seen[next] = true;
                    queue.push_back(next);
                }
            }
        }
        component.sort_unstable();
        components.push(component);
    }
    components
}

fn choose_pair_strategy(option1: f64, option2: f64, option3: f64) -> PairStrategy {
    if option1 <= 0.0 && option2 <= 0.0 && option3 <= 0.0 {
        return PairStrategy::Neither;
    }
    if option1 >= option2 && option1 > option3 {
        PairStrategy::FirstThroughSecond
    } else if option2 > option1 && option2 > option3 {
        PairStrategy::SecondThroughFirst
    } else {
        PairStrategy::Neither
    }
}

fn resolve_pair(first: &Candidate, second: &Candidate, plan: &mut Plan) {
    let first_via_second = first.improvement_via(second.node);
    let second_via_first = second.improvement_via(first.node);
    let first_fallback = first.best_excluding(second.node);
    let second_fallback = second.best_excluding(first.node);
    let first_alt = first_fallback.map(|o| first.improvement(o)).unwrap_or(0.0);
    let second_alt = second_fallback.map(|o| second.improvement(o)).unwrap_or(0.0);

    let strategy = choose_pair_strategy(
        first_via_second + second_alt,
        second_via_first + first_alt,
        first_alt + second_alt,
    );
    debug!(first = first.node, second = second.node, ?strategy, "pair conflict resolved");

    let mut assign = |device: usize, parent: Option<usize>| {
        if let Some(parent) = parent {
            plan.try_assign(device, parent);
        }
    };
    let first_fallback = first_fallback.map(|o| o.parent);
    let second_fallback = second_fallback.map(|o| o.parent);
    match strategy {
        PairStrategy::FirstThroughSecond => {
            assign(first.node, Some(second.node));
            assign(second.node, second_fallback);
        }
        PairStrategy::SecondThroughFirst => {
            assign(second.node, Some(first.node));
            assign(first.node, first_fallback);
        }
        PairStrategy::Neither => {
            assign(first.node, first_fallback);
            assign(second.node, second_fallback);
        }
    }
}

fn resolve_greedy(candidates: &[Candidate], members: &[usize], plan: &mut Plan) {
    let mut order = members.to_vec();
    // stable: equal improvements keep node order
    order.sort_by(|a, b| {
        candidates[*b]
            .best_improvement()
            .total_cmp(&candidates[*a].best_improvement())
    });

    for ci in order {
        let candidate = &candidates[ci];
        if let Some(option) = candidate.options.iter().find(|o| plan.is_safe(candidate.node, o.parent)) {
            plan.try_assign(candidate.node, option.parent);
        } else {
            debug!(device = candidate.node, "no safe candidate left in conflict group");
        }
    }
}

/// Assigns remaining devices until a full pass changes nothing.
fn propagate(candidates: &[Candidate], plan: &mut Plan) {
    loop {
        let mut changed = false;
        for candidate in candidates {
            if plan.is_assigned(candidate.node) {
                continue;
            }
            if let Some(option) = candidate.options.iter().find(|o| plan.is_safe(candidate.node, o.parent)) {
                changed |= plan.try_assign(candidate.node, option.parent);
            }
        }
        if !changed {
            break;
        }
    }
}
