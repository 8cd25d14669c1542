//! Health diagnostics for mesh devices
//!
//! Scans every enabled, non-coordinator device against fixed thresholds:
//! - interview/provisioning incomplete
//! - link quality (critical below 30, warning below 50)
//! - battery level (critical below 15%, warning below 25%)
//! - last contact older than 7 days (battery-powered devices only)
//!
//! Each check is independent so a device can raise several issues. Missing
//! telemetry simply skips the numeric checks.

use crate::model::{DeviceTelemetry, Node, NodeId, PowerSource, Role, TelemetryMap};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const LQI_CRITICAL: u8 = 30;
pub const LQI_WARNING: u8 = 50;
pub const BATTERY_CRITICAL: f64 = 15.0;
pub const BATTERY_WARNING: f64 = 25.0;
pub const STALE_AFTER_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    /// Sort rank, lower is more urgent
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::Warning => 1,
            Self::Info => 2,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Info => "info",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    InterviewIncomplete,
    LqiCritical,
    LqiLow,
    BatteryCritical,
    BatteryLow,
    NotSeenRecently,
}

/// A single finding; immutable once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub device: NodeId,
    pub device_name: String,
    pub kind: IssueKind,
    pub severity: Severity,
    pub message: String,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCounts {
    pub routers: usize,
    pub end_devices: usize,
    pub disabled: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub warning: usize,
    pub info: usize,
}

/// Per-device row of the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub device: NodeId,
    pub name: String,
    pub role: Role,
    pub lqi: Option<u8>,
    pub battery: Option<f64>,
    pub last_seen: Option<DateTime<Utc>>,
    pub issue_count: usize,
    pub worst: Option<Severity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub generated_at: DateTime<Utc>,
    pub roles: RoleCounts,
    pub severities: SeverityCounts,
    /// Critical first, then warning, then info; scan order within a tier
    pub issues: Vec<Issue>,
    pub devices: Vec<DeviceSummary>,
}

impl DiagnosticReport {
    pub fn issues_for<'a>(&'a self, device: &'a NodeId) -> impl Iterator<Item = &'a Issue> + 'a {
        self.issues.iter().filter(move |i| &i.device == device)
    }

    pub fn is_healthy(&self) -> bool {
        self.severities.critical == 0 && self.severities.warning == 0
    }
}

/// Runs every check over the node set. `now` anchors the staleness check.
pub fn diagnose(nodes: &[Node], telemetry: &TelemetryMap, now: DateTime<Utc>) -> DiagnosticReport {
    let mut roles = RoleCounts::default();
    let mut issues = Vec::new();
    let mut devices = Vec::new();

    for node in nodes {
        if node.is_coordinator() {
            continue;
        }
        if node.disabled {
            roles.disabled += 1;
            continue;
        }
        match node.role {
            Role::Router => roles.routers += 1,
            Role::EndDevice => roles.end_devices += 1,
            Role::Coordinator => {}
        }

        let state = telemetry.get(&node.id);
        let found = check_device(node, state, now);

        devices.push(DeviceSummary {
            device: node.id.clone(),
            name: node.name.clone(),
            role: node.role,
            lqi: state.and_then(|s| s.lqi),
            battery: state.and_then(|s| s.battery),
            last_seen: state.and_then(|s| s.last_seen),
            issue_count: found.len(),
            worst: found.iter().map(|i| i.severity).min_by_key(Severity::rank),
        });
        issues.extend(found);
    }

    // stable: scan order is kept inside a severity tier
    issues.sort_by_key(|i| i.severity.rank());

    let mut severities = SeverityCounts::default();
    for issue in &issues {
        match issue.severity {
            Severity::Critical => severities.critical += 1,
            Severity::Warning => severities.warning += 1,
            Severity::Info => severities.info += 1,
        }
    }

    DiagnosticReport {
        generated_at: now,
        roles,
        severities,
        issues,
        devices,
    }
}

fn check_device(node: &Node, state: Option<&DeviceTelemetry>, now: DateTime<Utc>) -> Vec<Issue> {
    let mut found = Vec::new();
    let issue = |kind, severity, message: String, value| Issue {
        device: node.id.clone(),
        device_name: node.name.clone(),
        kind,
        severity,
        message,
        value,
    };

    if !node.interview_completed {
        found.push(issue(
            IssueKind::InterviewIncomplete,
            Severity::Critical,
            format!("{} has not completed its interview", node.name),
            None,
        ));
    }

    let Some(state) = state else {
        return found;
    };

    if let Some(lqi) = state.lqi {
        if lqi < LQI_CRITICAL {
            found.push(issue(
                IssueKind::LqiCritical,
                Severity::Critical,
                format!("{} has critical link quality ({lqi})", node.name),
                Some(f64::from(lqi)),
            ));
        } else if lqi < LQI_WARNING {
            found.push(issue(
                IssueKind::LqiLow,
                Severity::Warning,
                format!("{} has low link quality ({lqi})", node.name),
                Some(f64::from(lqi)),
            ));
        }
    }

    if let Some(battery) = state.battery {
        if battery < BATTERY_CRITICAL {
            found.push(issue(
                IssueKind::BatteryCritical,
                Severity::Critical,
                format!("{} battery critically low ({battery:.0}%)", node.name),
                Some(battery),
            ));
        } else if battery < BATTERY_WARNING {
            found.push(issue(
                IssueKind::BatteryLow,
                Severity::Warning,
                format!("{} battery low ({battery:.0}%)", node.name),
                Some(battery),
            ));
        }
    }

    if node.power_source == PowerSource::Battery {
        if let Some(last_seen) = state.last_seen {
            let age = now.signed_duration_since(last_seen);
            if age > Duration::days(STALE_AFTER_DAYS) {
                let days = age.num_seconds() as f64 / 86_400.0;
                found.push(issue(
                    IssueKind::NotSeenRecently,
                    Severity::Warning,
                    format!("{} not seen for {days:.1} days", node.name),
                    Some(days),
                ));
            }
        }
    }

    found
}
