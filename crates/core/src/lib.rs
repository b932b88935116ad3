//! KUDO core types: the `kudo.dev/v1alpha1` resources an operator package compiles into,
//! plus the plan execution state recorded on a running Instance.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod plan;

pub use plan::{select_relevant_plan, ExecutionStatus, PhaseStatus, PlanStatus, StepStatus};

pub const API_GROUP: &str = "kudo.dev";
pub const API_VERSION: &str = "kudo.dev/v1alpha1";

/// Label stamped on every compiled object so tooling can recognise it.
pub const PROVENANCE_LABEL: (&str, &str) = ("controller-tools.k8s.io", "1.0");

/// Label on an Instance carrying the name of its Operator (for label-selector lookups).
pub const OPERATOR_LABEL: &str = "kudo.dev/operator";

/// Reference from one KUDO object to another by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ObjectReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Maintainer {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
}

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(group = "kudo.dev", version = "v1alpha1", kind = "Operator", namespaced)]
#[kube(status = "OperatorStatus", derive = "PartialEq", derive = "Default")]
#[serde(rename_all = "camelCase")]
pub struct OperatorSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kudo_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kubernetes_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintainers: Vec<Maintainer>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct OperatorStatus {}

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(group = "kudo.dev", version = "v1alpha1", kind = "OperatorVersion", namespaced)]
#[kube(status = "OperatorVersionStatus", derive = "PartialEq", derive = "Default")]
#[serde(rename_all = "camelCase")]
pub struct OperatorVersionSpec {
    pub operator: ObjectReference,
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_version: String,
    /// Raw template text keyed by the path relative to the package `templates/` dir.
    #[serde(default)]
    pub templates: BTreeMap<String, String>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub plans: BTreeMap<String, Plan>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upgradable_from: Vec<ObjectReference>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct OperatorVersionStatus {}

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(group = "kudo.dev", version = "v1alpha1", kind = "Instance", namespaced)]
#[kube(status = "InstanceStatus", derive = "PartialEq", derive = "Default")]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    pub operator_version: ObjectReference,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    /// Plan name -> execution state. Written only by the reconciler that runs plans.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub plan_status: BTreeMap<String, PlanStatus>,
}

impl Instance {
    /// The plan that is currently relevant for reporting: the running one, else the most
    /// recently finished one.
    pub fn last_executed_plan_status(&self) -> Option<&PlanStatus> {
        self.status.as_ref().and_then(|s| select_relevant_plan(&s.plan_status))
    }
}

/// A declared parameter of an OperatorVersion.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Treated as `true` when the source omits it.
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Plan to run when this parameter changes.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub trigger: String,
}

fn default_required() -> bool { true }

/// Kind of a task. Unknown kinds round-trip verbatim through `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskKind {
    Apply,
    Delete,
    Dummy,
    Other(String),
}

impl TaskKind {
    pub fn as_str(&self) -> &str {
        match self {
            TaskKind::Apply => "Apply",
            TaskKind::Delete => "Delete",
            TaskKind::Dummy => "Dummy",
            TaskKind::Other(s) => s,
        }
    }
}

impl From<String> for TaskKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Apply" => TaskKind::Apply,
            "Delete" => TaskKind::Delete,
            "Dummy" => TaskKind::Dummy,
            _ => TaskKind::Other(s),
        }
    }
}

impl From<&str> for TaskKind {
    fn from(s: &str) -> Self { TaskKind::from(s.to_string()) }
}

impl From<TaskKind> for String {
    fn from(k: TaskKind) -> Self {
        match k {
            TaskKind::Other(s) => s,
            k => k.as_str().to_string(),
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Task {
    pub name: String,
    #[schemars(with = "String")]
    pub kind: TaskKind,
    #[serde(default)]
    pub spec: TaskSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    /// Template names referenced by Apply/Delete tasks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    /// Dummy task knobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub want_err: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Serial,
    Parallel,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Plan {
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub phases: Vec<Phase>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Phase {
    pub name: String,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Step {
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub delete: bool,
}

pub mod prelude {
    pub use super::{
        Instance, InstanceSpec, InstanceStatus, Operator, OperatorSpec, OperatorVersion, OperatorVersionSpec,
        ObjectReference, Parameter, Plan, Task, TaskKind, TaskSpec, ExecutionStatus, PlanStatus, PhaseStatus, StepStatus,
    };
}
