//! KUDO packages: turn the raw files of an operator package into installable
//! `Operator`, `OperatorVersion` and `Instance` resources.
//!
//! Flow: [`reader`] yields `(path, bytes)` pairs, [`classify`] decides what each path is,
//! [`parse`] accumulates a [`PackageBundle`], [`validate`] checks task/template references
//! and [`compile`] emits an [`InstallableResourceSet`]. [`load`] runs the whole chain over
//! many package sources, skipping the broken ones.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use kudo_core::{Maintainer, Parameter, Plan, Task};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod classify;
pub mod compile;
pub mod load;
pub mod parse;
pub mod reader;
pub mod validate;

pub use classify::{classify, FileKind};
pub use compile::{compile, Compiler, FixedSuffix, InstallableResourceSet, NameGenerator, RandomSuffix};
pub use load::{BatchLoader, DigestSource, FsSource, LoadedPackage, PackageSource, Sha256Digest};
pub use parse::{parse_file, parse_files};
pub use reader::{read_path, DirectoryReader, PackageFile, PackageReader, TarballReader};
pub use validate::{Rule, ValidationPolicy};

/// Contents of `operator.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperatorMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub version: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub kudo_version: String,
    #[serde(default)]
    pub kubernetes_version: String,
    #[serde(default)]
    pub maintainers: Vec<Maintainer>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub plans: BTreeMap<String, Plan>,
}

/// Raw package as found in a tarball or directory, filled one file at a time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageBundle {
    pub operator: Option<OperatorMetadata>,
    /// Template name (path below `templates/`) -> raw text. Later duplicates overwrite.
    pub templates: BTreeMap<String, String>,
    /// `None` until a parameters file was parsed; an empty file gives `Some(vec![])`.
    pub params: Option<Vec<Parameter>>,
}

impl PackageBundle {
    pub fn new() -> Self { Self::default() }

    /// Metadata and parameters are both present.
    pub fn is_complete(&self) -> bool { self.operator.is_some() && self.params.is_some() }
}

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("failed to unmarshal operator file {file}: {source}")]
    OperatorDecode { file: String, #[source] source: serde_yaml::Error },
    #[error("failed to unmarshal parameters file {file}: {source}")]
    ParamsDecode { file: String, #[source] source: serde_yaml::Error },
    #[error("failed to unmarshal parameters file {file}: {reason}")]
    ParamsShape { file: String, reason: String },
    #[error("failed parsing required field from parameter {param}. cannot convert {value} to bool")]
    Required { param: String, value: String },
    #[error("template {file} is not valid UTF-8: {source}")]
    TemplateEncoding { file: String, #[source] source: std::string::FromUtf8Error },
    #[error("unexpected file when reading package from filesystem: {0}")]
    UnexpectedFile(String),
    #[error("operator.yaml file is missing")]
    MissingOperator,
    #[error("params.yaml file is missing")]
    MissingParams,
    /// One line per missing template reference.
    #[error("{}", .0.join("\n"))]
    InvalidTasks(Vec<String>),
    #[error("reading package archive: {0}")]
    Archive(#[source] std::io::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PackageError>;
