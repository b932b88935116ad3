//! Compile a parsed bundle into the three installable resources.

use std::collections::BTreeMap;

use kudo_core::{
    Instance, InstanceSpec, ObjectReference, Operator, OperatorSpec, OperatorVersion, OperatorVersionSpec,
    OPERATOR_LABEL, PROVENANCE_LABEL,
};
use metrics::counter;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::validate::ValidationPolicy;
use crate::{PackageBundle, PackageError, Result};

/// Same alphabet as apimachinery's `rand.String`: no vowels, no ambiguous digits.
const SUFFIX_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";
const SUFFIX_LEN: usize = 6;

/// Produces the suffix of generated Instance names.
pub trait NameGenerator: Send + Sync {
    fn suffix(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSuffix;

impl NameGenerator for RandomSuffix {
    fn suffix(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..SUFFIX_LEN).map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char).collect()
    }
}

/// Always returns the same suffix.
#[derive(Debug, Clone, Default)]
pub struct FixedSuffix(pub String);

impl NameGenerator for FixedSuffix {
    fn suffix(&self) -> String { self.0.clone() }
}

/// Operator, OperatorVersion and Instance produced from one package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallableResourceSet {
    pub operator: Operator,
    pub operator_version: OperatorVersion,
    pub instance: Instance,
}

pub struct Compiler {
    policy: ValidationPolicy,
    names: Box<dyn NameGenerator>,
}

impl Default for Compiler {
    fn default() -> Self { Self { policy: ValidationPolicy::default(), names: Box::new(RandomSuffix) } }
}

impl Compiler {
    pub fn new() -> Self { Self::default() }

    pub fn with_policy(mut self, policy: ValidationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_names(mut self, names: impl NameGenerator + 'static) -> Self {
        self.names = Box::new(names);
        self
    }

    pub fn compile(&self, bundle: &PackageBundle) -> Result<InstallableResourceSet> {
        let op = bundle.operator.as_ref().ok_or(PackageError::MissingOperator)?;
        let params = bundle.params.as_ref().ok_or(PackageError::MissingParams)?;
        self.policy.validate_tasks(&op.tasks, &bundle.templates)?;

        let ov_name = format!("{}-{}", op.name, op.version);

        let mut operator = Operator::new(&op.name, OperatorSpec {
            description: op.description.clone(),
            kudo_version: op.kudo_version.clone(),
            kubernetes_version: op.kubernetes_version.clone(),
            maintainers: op.maintainers.clone(),
            url: op.url.clone(),
        });
        operator.metadata.labels = Some(provenance_labels());

        let mut operator_version = OperatorVersion::new(&ov_name, OperatorVersionSpec {
            operator: ObjectReference { kind: Some("Operator".into()), name: op.name.clone() },
            version: op.version.clone(),
            app_version: op.app_version.clone(),
            templates: bundle.templates.clone(),
            tasks: op.tasks.clone(),
            parameters: params.clone(),
            plans: op.plans.clone(),
            upgradable_from: Vec::new(),
        });
        operator_version.metadata.labels = Some(provenance_labels());

        let instance_name = format!("{}-{}", op.name, self.names.suffix());
        let mut instance = Instance::new(&instance_name, InstanceSpec {
            operator_version: ObjectReference { kind: None, name: ov_name.clone() },
            parameters: BTreeMap::new(),
        });
        let mut labels = provenance_labels();
        labels.insert(OPERATOR_LABEL.to_string(), op.name.clone());
        instance.metadata.labels = Some(labels);

        counter!("package_compiled_total", 1u64);
        debug!(operator = %op.name, operator_version = %ov_name, instance = %instance_name, "package compiled");
        Ok(InstallableResourceSet { operator, operator_version, instance })
    }
}

/// Compile with the default validation policy and random Instance naming.
pub fn compile(bundle: &PackageBundle) -> Result<InstallableResourceSet> { Compiler::default().compile(bundle) }

fn provenance_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(PROVENANCE_LABEL.0.to_string(), PROVENANCE_LABEL.1.to_string())])
}
