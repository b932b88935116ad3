//! Decide what a path inside a package is.

use once_cell::sync::Lazy;
use regex::Regex;

pub const OPERATOR_FILE: &str = "operator.yaml";
pub const PARAMS_FILE: &str = "params.yaml";
pub const TEMPLATES_DIR: &str = "templates/";

static TEMPLATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"templates/.*\.yaml").expect("static regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    Operator,
    /// Carries the template name: the path after the last `templates/`.
    Template(String),
    Params,
    Unknown,
}

/// Classify a package path. Rules apply in order: operator file, template, params file.
pub fn classify(path: &str) -> FileKind {
    if path.ends_with(OPERATOR_FILE) {
        return FileKind::Operator;
    }
    if TEMPLATE_RE.is_match(path) {
        let name = path.rsplit(TEMPLATES_DIR).next().unwrap_or(path);
        return FileKind::Template(name.to_string());
    }
    if path.ends_with(PARAMS_FILE) {
        return FileKind::Params;
    }
    FileKind::Unknown
}
