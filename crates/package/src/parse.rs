//! Accumulate package files into a [`PackageBundle`].

use std::collections::BTreeMap;

use kudo_core::Parameter;
use serde_yaml::Value as Yaml;
use tracing::debug;

use crate::classify::{classify, FileKind};
use crate::{OperatorMetadata, PackageBundle, PackageError, Result};

/// Parse one file into `bundle`. Any path the classifier does not recognise is an error.
pub fn parse_file(path: &str, bytes: &[u8], bundle: &mut PackageBundle) -> Result<()> {
    match classify(path) {
        FileKind::Operator => {
            let op: OperatorMetadata = serde_yaml::from_slice(bytes)
                .map_err(|source| PackageError::OperatorDecode { file: path.to_string(), source })?;
            debug!(file = %path, operator = %op.name, tasks = op.tasks.len(), "operator file parsed");
            bundle.operator = Some(op);
        }
        FileKind::Template(name) => {
            let text = String::from_utf8(bytes.to_vec())
                .map_err(|source| PackageError::TemplateEncoding { file: path.to_string(), source })?;
            bundle.templates.insert(name, text);
        }
        FileKind::Params => {
            bundle.params = Some(parse_params(path, bytes)?);
        }
        FileKind::Unknown => return Err(PackageError::UnexpectedFile(path.to_string())),
    }
    Ok(())
}

/// Parse a whole package. Stops at the first bad file; no partial bundle is returned.
pub fn parse_files<I, P, B>(files: I) -> Result<PackageBundle>
where
    I: IntoIterator<Item = (P, B)>,
    P: AsRef<str>,
    B: AsRef<[u8]>,
{
    let mut bundle = PackageBundle::new();
    for (path, bytes) in files {
        parse_file(path.as_ref(), bytes.as_ref(), &mut bundle)?;
    }
    Ok(bundle)
}

/// `params.yaml` is `name -> { description, default, trigger, displayName, required }`.
/// Output is sorted by parameter name. A null document is an empty list; a null field is
/// present with an empty value.
pub fn parse_params(file: &str, bytes: &[u8]) -> Result<Vec<Parameter>> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let raw: Option<BTreeMap<String, Option<BTreeMap<String, Yaml>>>> = serde_yaml::from_slice(bytes)
        .map_err(|source| PackageError::ParamsDecode { file: file.to_string(), source })?;
    let raw = raw.unwrap_or_default();

    let mut out = Vec::with_capacity(raw.len());
    for (name, fields) in raw {
        let mut fields = match fields {
            Some(m) => scalar_fields(file, &name, m)?,
            None => BTreeMap::new(),
        };
        let required = match fields.remove("required") {
            Some(v) => parse_bool(&v).ok_or_else(|| PackageError::Required { param: name.clone(), value: v })?,
            None => true,
        };
        out.push(Parameter {
            description: fields.remove("description").unwrap_or_default(),
            default: fields.remove("default"),
            trigger: fields.remove("trigger").unwrap_or_default(),
            display_name: fields.remove("displayName").unwrap_or_default(),
            required,
            name,
        });
    }
    Ok(out)
}

fn scalar_fields(file: &str, param: &str, m: BTreeMap<String, Yaml>) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for (k, v) in m {
        let s = match v {
            Yaml::Null => String::new(),
            Yaml::String(s) => s,
            Yaml::Bool(b) => b.to_string(),
            Yaml::Number(n) => n.to_string(),
            _ => {
                return Err(PackageError::ParamsShape {
                    file: file.to_string(),
                    reason: format!("parameter {} field {} must be a scalar", param, k),
                })
            }
        };
        out.insert(k, s);
    }
    Ok(out)
}

/// Accepts the same spellings as Go's `strconv.ParseBool`.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kudo_core::TaskKind;

    const OPERATOR: &str = r#"
name: kafka
version: 0.1.0
appVersion: 2.4.0
kubernetesVersion: 1.15.0
maintainers:
  - name: Jane
    email: jane@example.com
tasks:
  - name: deploy
    kind: Apply
    spec:
      resources: [statefulset.yaml]
plans:
  deploy:
    strategy: serial
    phases:
      - name: main
        strategy: parallel
        steps:
          - name: everything
            tasks: [deploy]
"#;

    #[test]
    fn operator_file_decodes_tasks_and_plans() {
        let mut b = PackageBundle::new();
        parse_file("kafka/operator.yaml", OPERATOR.as_bytes(), &mut b).unwrap();
        let op = b.operator.unwrap();
        assert_eq!(op.name, "kafka");
        assert_eq!(op.app_version, "2.4.0");
        assert_eq!(op.tasks[0].kind, TaskKind::Apply);
        assert_eq!(op.plans["deploy"].phases[0].steps[0].tasks, vec!["deploy".to_string()]);
        assert_eq!(op.maintainers[0].email, "jane@example.com");
    }

    #[test]
    fn operator_file_must_be_structured() {
        let mut b = PackageBundle::new();
        let err = parse_file("operator.yaml", b"- just\n- a list\n", &mut b).unwrap_err();
        assert!(matches!(err, PackageError::OperatorDecode { .. }), "{err}");
        assert!(b.operator.is_none());
    }

    #[test]
    fn params_default_required_and_optional_fields() {
        let yaml = "replicas:\n  default: \"3\"\n  description: broker count\n  displayName: Replicas\n\
                    debug:\n  required: \"false\"\n  trigger: update\n\
                    bare:\n";
        let params = parse_params("params.yaml", yaml.as_bytes()).unwrap();
        let names: Vec<_> = params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["bare", "debug", "replicas"]);
        assert!(params[0].required);
        assert!(!params[1].required);
        assert_eq!(params[1].trigger, "update");
        assert_eq!(params[1].default, None);
        assert_eq!(params[2].default.as_deref(), Some("3"));
        assert_eq!(params[2].display_name, "Replicas");
        assert!(params[2].required);
    }

    #[test]
    fn params_accept_native_yaml_scalars() {
        let params = parse_params("params.yaml", b"p:\n  required: false\n  default: 5\n").unwrap();
        assert!(!params[0].required);
        assert_eq!(params[0].default.as_deref(), Some("5"));
    }

    #[test]
    fn bad_required_value_is_an_error() {
        let err = parse_params("params.yaml", b"p:\n  required: maybe\n").unwrap_err();
        match err {
            PackageError::Required { param, value } => {
                assert_eq!(param, "p");
                assert_eq!(value, "maybe");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn params_must_be_two_level_mapping() {
        assert!(matches!(parse_params("params.yaml", b"p: flat\n"), Err(PackageError::ParamsDecode { .. })));
        assert!(matches!(
            parse_params("params.yaml", b"p:\n  default: [1, 2]\n"),
            Err(PackageError::ParamsShape { .. })
        ));
    }

    #[test]
    fn empty_params_file_is_present_but_empty() {
        let mut b = PackageBundle::new();
        parse_file("params.yaml", b"\n", &mut b).unwrap();
        assert_eq!(b.params, Some(vec![]));
    }

    #[test]
    fn later_template_with_same_name_wins() {
        let b = parse_files(vec![
            ("a/templates/x.yaml", "one".as_bytes()),
            ("b/templates/x.yaml", "two".as_bytes()),
        ])
        .unwrap();
        assert_eq!(b.templates.len(), 1);
        assert_eq!(b.templates["x.yaml"], "two");
    }

    #[test]
    fn unknown_file_aborts_the_package() {
        let err = parse_files(vec![
            ("pkg/operator.yaml", OPERATOR.as_bytes()),
            ("pkg/README.md", "hi".as_bytes()),
            ("pkg/params.yaml", "".as_bytes()),
        ])
        .unwrap_err();
        assert_eq!(err.to_string(), "unexpected file when reading package from filesystem: pkg/README.md");
    }

    #[test]
    fn template_must_be_utf8() {
        let mut b = PackageBundle::new();
        let err = parse_file("p/templates/bin.yaml", &[0x66, 0xff, 0x67], &mut b).unwrap_err();
        match err {
            PackageError::TemplateEncoding { file, .. } => assert_eq!(file, "p/templates/bin.yaml"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(b.templates.is_empty());
    }

    #[test]
    fn null_params_document_is_empty() {
        assert!(parse_params("params.yaml", b"~\n").unwrap().is_empty());
        assert!(parse_params("params.yaml", b"# nothing yet\n").unwrap().is_empty());
        let mut b = PackageBundle::new();
        parse_file("pkg/params.yaml", b"null\n", &mut b).unwrap();
        assert_eq!(b.params, Some(vec![]));
    }

    #[test]
    fn null_field_is_present_and_empty() {
        let params = parse_params("params.yaml", b"password:\n  default:\n  description: ~\n").unwrap();
        assert_eq!(params[0].default.as_deref(), Some(""));
        assert_eq!(params[0].description, "");
        assert!(params[0].required);

        let err = parse_params("params.yaml", b"p:\n  required:\n").unwrap_err();
        assert!(matches!(err, PackageError::Required { ref value, .. } if value.is_empty()), "{err}");
    }

    #[test]
    fn parse_bool_spellings() {
        for s in ["1", "t", "T", "TRUE", "true", "True"] { assert_eq!(parse_bool(s), Some(true), "{s}"); }
        for s in ["0", "f", "F", "FALSE", "false", "False"] { assert_eq!(parse_bool(s), Some(false), "{s}"); }
        assert_eq!(parse_bool("yes"), None);
        assert_eq!(parse_bool(""), None);
    }
}
