//! Task validation against the package's template set.
//!
//! Which task kinds are checked is a table, not a fallthrough: kinds missing from the table
//! are accepted and logged as unvalidated.

use std::collections::{BTreeMap, HashMap};

use kudo_core::{Task, TaskKind};
use tracing::warn;

use crate::{PackageError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Every name in `spec.resources` must be a template of the package.
    CheckResources,
    /// Known kind with nothing to check.
    Skip,
}

#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    rules: HashMap<TaskKind, Rule>,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self::empty()
            .with_rule(TaskKind::Apply, Rule::CheckResources)
            .with_rule(TaskKind::Delete, Rule::CheckResources)
            .with_rule(TaskKind::Dummy, Rule::Skip)
    }
}

impl ValidationPolicy {
    /// No rules at all: every kind is unvalidated.
    pub fn empty() -> Self { Self { rules: HashMap::new() } }

    pub fn with_rule(mut self, kind: impl Into<TaskKind>, rule: Rule) -> Self {
        self.rules.insert(kind.into(), rule);
        self
    }

    pub fn rule_for(&self, kind: &TaskKind) -> Option<Rule> { self.rules.get(kind).copied() }

    /// Violations for a single task, one string per missing template.
    pub fn validate_task(&self, task: &Task, templates: &BTreeMap<String, String>) -> Vec<String> {
        match self.rule_for(&task.kind) {
            Some(Rule::CheckResources) => task
                .spec
                .resources
                .iter()
                .filter(|res| !templates.contains_key(res.as_str()))
                .map(|res| format!("task {} missing template: {}", task.name, res))
                .collect(),
            Some(Rule::Skip) => Vec::new(),
            None => {
                warn!(task = %task.name, kind = %task.kind, "no validation for task kind implemented");
                Vec::new()
            }
        }
    }

    /// Check every task; all violations are collected into one error.
    pub fn validate_tasks(&self, tasks: &[Task], templates: &BTreeMap<String, String>) -> Result<()> {
        let errs: Vec<String> = tasks.iter().flat_map(|t| self.validate_task(t, templates)).collect();
        if errs.is_empty() { Ok(()) } else { Err(PackageError::InvalidTasks(errs)) }
    }
}

/// [`ValidationPolicy::validate_task`] with the default policy.
pub fn validate_task(task: &Task, templates: &BTreeMap<String, String>) -> Vec<String> {
    ValidationPolicy::default().validate_task(task, templates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kudo_core::TaskSpec;

    fn task(name: &str, kind: &str, resources: &[&str]) -> Task {
        Task {
            name: name.into(),
            kind: TaskKind::from(kind),
            spec: TaskSpec { resources: resources.iter().map(|s| s.to_string()).collect(), ..Default::default() },
        }
    }

    fn templates(names: &[&str]) -> BTreeMap<String, String> {
        names.iter().map(|n| (n.to_string(), String::new())).collect()
    }

    #[test]
    fn apply_and_delete_check_every_reference() {
        let tpl = templates(&["a.yaml"]);
        assert!(validate_task(&task("ok", "Apply", &["a.yaml"]), &tpl).is_empty());
        assert_eq!(
            validate_task(&task("deploy", "Apply", &["a.yaml", "b.yaml", "c.yaml"]), &tpl),
            vec!["task deploy missing template: b.yaml", "task deploy missing template: c.yaml"]
        );
        assert_eq!(
            validate_task(&task("cleanup", "Delete", &["gone.yaml"]), &tpl),
            vec!["task cleanup missing template: gone.yaml"]
        );
    }

    #[test]
    fn dummy_and_unknown_kinds_are_accepted() {
        let tpl = templates(&[]);
        assert!(validate_task(&task("noop", "Dummy", &["x.yaml"]), &tpl).is_empty());
        assert!(validate_task(&task("pipe", "Pipe", &["x.yaml"]), &tpl).is_empty());
    }

    #[derive(Clone, Default)]
    struct LogBuffer(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> { Ok(()) }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;
        fn make_writer(&'a self) -> Self::Writer { self.clone() }
    }

    #[test]
    fn unknown_kind_is_logged_as_unvalidated() {
        let buf = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt().with_writer(buf.clone()).with_ansi(false).finish();
        let tpl = templates(&[]);
        tracing::subscriber::with_default(subscriber, || {
            validate_task(&task("pipe", "Pipe", &["x.yaml"]), &tpl);
            validate_task(&task("noop", "Dummy", &[]), &tpl);
            validate_task(&task("deploy", "Apply", &[]), &tpl);
        });
        let logs = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<_> = logs.lines().filter(|l| l.contains("no validation for task kind")).collect();
        assert_eq!(lines.len(), 1, "{logs}");
        assert!(lines[0].contains("WARN") && lines[0].contains("kind=Pipe") && lines[0].contains("task=pipe"), "{logs}");
    }

    #[test]
    fn violations_across_tasks_are_aggregated() {
        let tpl = templates(&["a.yaml"]);
        let tasks = vec![task("one", "Apply", &["x.yaml"]), task("two", "Delete", &["y.yaml"])];
        let err = ValidationPolicy::default().validate_tasks(&tasks, &tpl).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("task one missing template: x.yaml"), "{msg}");
        assert!(msg.contains("task two missing template: y.yaml"), "{msg}");
        assert_eq!(msg.lines().count(), 2);
    }

    #[test]
    fn policy_table_is_overridable() {
        let tpl = templates(&[]);
        let strict = ValidationPolicy::default().with_rule("Pipe", Rule::CheckResources);
        assert_eq!(strict.validate_task(&task("pipe", "Pipe", &["x.yaml"]), &tpl).len(), 1);

        let lax = ValidationPolicy::default().with_rule(TaskKind::Apply, Rule::Skip);
        assert!(lax.validate_task(&task("deploy", "Apply", &["x.yaml"]), &tpl).is_empty());

        assert_eq!(ValidationPolicy::empty().rule_for(&TaskKind::Apply), None);
    }
}
