//! Meshscope core - topology analysis for Zigbee meshes
//!
//! Pure, synchronous transformations over a point-in-time snapshot:
//! - routing graph derived from raw link observations
//! - threshold-based health diagnostics
//! - location resolution + distance heuristic
//! - conflict-aware re-parenting proposals
//!
//! Nothing here performs I/O or keeps state between runs; see
//! `meshscope-bridge` for collecting snapshots.

pub mod analysis;
pub mod command;
pub mod diagnostics;
pub mod distance;
pub mod error;
pub mod graph;
pub mod location;
pub mod model;
pub mod optimizer;

pub use analysis::{MeshAnalyzer, MeshReport};
pub use command::{BridgeAction, Command, LogLevel, Target};
pub use diagnostics::{diagnose, DiagnosticReport, Issue, IssueKind, Severity};
pub use distance::DistanceModel;
pub use error::AnalysisError;
pub use graph::RoutingGraph;
pub use location::LocationResolver;
pub use model::{DeviceTelemetry, Link, Location, MeshSnapshot, Node, NodeId, PowerSource, Relationship, Role, TelemetryMap};
pub use optimizer::{AssignedRouting, OptimizationResult, RoutingOptimizer};
