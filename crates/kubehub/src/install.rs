//! Push a compiled package to the cluster.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use kudo_core::{Instance, OperatorVersion};
use kudo_package::InstallableResourceSet;
use metrics::counter;
use tracing::info;

use crate::KudoClient;

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Replaces the generated `<operator>-<suffix>` name.
    pub instance_name: Option<String>,
    pub parameters: BTreeMap<String, String>,
    /// Install Operator and OperatorVersion only.
    pub skip_instance: bool,
}

/// Required parameters of `ov` that have no default and are absent from `given`.
pub fn missing_required_parameters(ov: &OperatorVersion, given: &BTreeMap<String, String>) -> Vec<String> {
    ov.spec
        .parameters
        .iter()
        .filter(|p| p.required && p.default.is_none() && !given.contains_key(&p.name))
        .map(|p| p.name.clone())
        .collect()
}

/// Create Operator and OperatorVersion unless they already exist, then the Instance.
/// Returns the created Instance, or `None` with `skip_instance`.
pub async fn install_package(
    client: &dyn KudoClient,
    set: &InstallableResourceSet,
    namespace: &str,
    opts: &InstallOptions,
) -> Result<Option<Instance>> {
    client.validate_server_for_operator(&set.operator).await?;

    let op_name = set.operator.metadata.name.clone().unwrap_or_default();
    if client.operator_exists(&op_name, namespace).await? {
        info!(operator = %op_name, "operator unchanged");
    } else {
        client.create_operator(&set.operator, namespace).await?;
        info!(operator = %op_name, ns = %namespace, "operator created");
    }

    let ov_name = set.operator_version.metadata.name.clone().unwrap_or_default();
    let ov = match client.get_operator_version(&ov_name, namespace).await? {
        Some(existing) => {
            info!(operator_version = %ov_name, "operator version unchanged");
            existing
        }
        None => {
            let created = client.create_operator_version(&set.operator_version, namespace).await?;
            info!(operator_version = %ov_name, ns = %namespace, "operator version created");
            created
        }
    };

    if opts.skip_instance {
        return Ok(None);
    }

    let missing = missing_required_parameters(&ov, &opts.parameters);
    if !missing.is_empty() {
        bail!("missing required parameters: {}", missing.join(", "));
    }

    let mut instance = set.instance.clone();
    if let Some(name) = &opts.instance_name {
        instance.metadata.name = Some(name.clone());
    }
    instance.spec.parameters.extend(opts.parameters.clone());
    let inst_name = instance.metadata.name.clone().unwrap_or_default();
    if client.get_instance(&inst_name, namespace).await?.is_some() {
        bail!("instance {} already exists in namespace {}", inst_name, namespace);
    }
    let created = client.create_instance(&instance, namespace).await?;
    counter!("install_ok_total", 1u64);
    Ok(Some(created))
}
