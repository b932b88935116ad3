//! Plan execution state attached to an Instance, and selection of the plan that matters now.
//!
//! States only move forward (`NEVER_RUN` -> `IN_PROGRESS` -> `COMPLETE`) within one run; the
//! reconciler that executes plans owns every transition. Nothing here mutates status.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    #[default]
    #[serde(rename = "NEVER_RUN")]
    NeverRun,
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
    #[serde(rename = "COMPLETE")]
    Complete,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::NeverRun => "NEVER_RUN",
            ExecutionStatus::InProgress => "IN_PROGRESS",
            ExecutionStatus::Complete => "COMPLETE",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlanStatus {
    pub name: String,
    #[serde(default)]
    pub status: ExecutionStatus,
    #[serde(default)]
    pub phases: Vec<PhaseStatus>,
    /// Unset until the plan has completed at least once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_finished_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct PhaseStatus {
    pub name: String,
    #[serde(default)]
    pub status: ExecutionStatus,
    #[serde(default)]
    pub steps: Vec<StepStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct StepStatus {
    pub name: String,
    #[serde(default)]
    pub status: ExecutionStatus,
}

impl PlanStatus {
    pub fn is_running(&self) -> bool { self.status == ExecutionStatus::InProgress }
    pub fn is_finished(&self) -> bool { self.status == ExecutionStatus::Complete }

    /// Indented plan/phase/step tree, one node per line.
    pub fn render_tree(&self) -> String {
        let mut out = format!("Plan {} [{}]", self.name, self.status);
        if let Some(ts) = self.last_finished_run {
            out.push_str(&format!(" (last finished {})", ts.to_rfc3339()));
        }
        out.push('\n');
        for ph in &self.phases {
            out.push_str(&format!("  Phase {} [{}]\n", ph.name, ph.status));
            for st in &ph.steps {
                out.push_str(&format!("    Step {} [{}]\n", st.name, st.status));
            }
        }
        out
    }
}

/// Pick the plan currently relevant for an Instance.
///
/// An in-progress plan always wins. With several in progress (the reconciler should never
/// allow that) the first by plan name is returned and a warning is logged. Otherwise the
/// completed plan with the latest `last_finished_run` wins; equal timestamps resolve to the
/// first by plan name. `None` when nothing has run yet.
pub fn select_relevant_plan(plans: &BTreeMap<String, PlanStatus>) -> Option<&PlanStatus> {
    let mut running = plans.values().filter(|p| p.is_running());
    if let Some(active) = running.next() {
        let also: Vec<&str> = running.map(|p| p.name.as_str()).collect();
        if !also.is_empty() {
            warn!(plan = %active.name, others = ?also, "multiple plans in progress");
        }
        return Some(active);
    }

    let mut latest: Option<&PlanStatus> = None;
    for p in plans.values().filter(|p| p.is_finished()) {
        match latest {
            Some(cur) if p.last_finished_run <= cur.last_finished_run => {}
            _ => latest = Some(p),
        }
    }
    latest
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn plan(name: &str, status: ExecutionStatus, finished: Option<DateTime<Utc>>) -> PlanStatus {
        PlanStatus {
            name: name.into(),
            status,
            last_finished_run: finished,
            phases: vec![PhaseStatus {
                name: "phase".into(),
                status,
                steps: vec![StepStatus { name: "step".into(), status }],
            }],
        }
    }

    fn map(plans: Vec<PlanStatus>) -> BTreeMap<String, PlanStatus> {
        plans.into_iter().map(|p| (p.name.clone(), p)).collect()
    }

    fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2019, 10, 17, 1, 1, 1).unwrap() }

    #[test]
    fn nothing_selected_when_no_plan_ever_ran() {
        let plans = map(vec![plan("deploy", ExecutionStatus::NeverRun, None)]);
        assert!(select_relevant_plan(&plans).is_none());
        assert!(select_relevant_plan(&BTreeMap::new()).is_none());
    }

    #[test]
    fn in_progress_outranks_recently_completed() {
        let plans = map(vec![
            plan("test", ExecutionStatus::InProgress, None),
            plan("test2", ExecutionStatus::Complete, Some(t0() + Duration::hours(5))),
        ]);
        assert_eq!(select_relevant_plan(&plans).map(|p| p.name.as_str()), Some("test"));
    }

    #[test]
    fn latest_completed_plan_wins() {
        let plans = map(vec![
            plan("test", ExecutionStatus::Complete, Some(t0())),
            plan("test2", ExecutionStatus::Complete, Some(t0() + Duration::hours(1))),
        ]);
        assert_eq!(select_relevant_plan(&plans).map(|p| p.name.as_str()), Some("test2"));
    }

    #[test]
    fn ties_resolve_by_plan_name() {
        let plans = map(vec![
            plan("zeta", ExecutionStatus::Complete, Some(t0())),
            plan("alpha", ExecutionStatus::Complete, Some(t0())),
        ]);
        assert_eq!(select_relevant_plan(&plans).map(|p| p.name.as_str()), Some("alpha"));

        let plans = map(vec![
            plan("zeta", ExecutionStatus::InProgress, None),
            plan("alpha", ExecutionStatus::InProgress, None),
        ]);
        assert_eq!(select_relevant_plan(&plans).map(|p| p.name.as_str()), Some("alpha"));
    }

    #[test]
    fn completed_without_timestamp_loses_to_timestamped() {
        let plans = map(vec![
            plan("a", ExecutionStatus::Complete, None),
            plan("b", ExecutionStatus::Complete, Some(t0())),
        ]);
        assert_eq!(select_relevant_plan(&plans).map(|p| p.name.as_str()), Some("b"));
    }

    #[test]
    fn status_wire_values() {
        let p = plan("deploy", ExecutionStatus::InProgress, None);
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["status"], "IN_PROGRESS");
        assert!(v.get("lastFinishedRun").is_none());
        let back: PlanStatus = serde_json::from_value(serde_json::json!({
            "name": "deploy", "status": "COMPLETE", "lastFinishedRun": "2019-10-17T01:01:01Z"
        })).unwrap();
        assert_eq!(back.last_finished_run, Some(t0()));
        assert!(back.is_finished());
        assert!(back.render_tree().starts_with("Plan deploy [COMPLETE]"));
    }
}
