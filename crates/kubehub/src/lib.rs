//! KUDO kubehub: the cluster side of package installation.
//!
//! [`KudoClient`] is everything the rest of the workspace needs from the API server;
//! [`KubeClient`] implements it with kube-rs.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use kudo_core::{Instance, Operator, OperatorVersion, OPERATOR_LABEL};
use serde_json::{json, Map, Value as Json};
use tracing::{debug, info};

pub mod install;
pub mod version;

pub use install::{install_package, missing_required_parameters, InstallOptions};
pub use version::{compare_major_minor, parse_version, validate_server_version};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Build a kube client from an explicit kubeconfig, or infer one (env, `~/.kube/config`, in-cluster).
pub async fn get_kube_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kc = Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig {}", path.display()))?;
            Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default()).await.context("loading kubeconfig")?
        }
        None => Config::infer().await.context("inferring kube config")?,
    };
    config.connect_timeout = Some(REQUEST_TIMEOUT);
    config.read_timeout = Some(REQUEST_TIMEOUT);
    Client::try_from(config).context("building kube client")
}

/// Cluster operations on KUDO resources. Not-found reads return `Ok(None)`.
#[async_trait::async_trait]
pub trait KudoClient: Send + Sync {
    async fn operator_exists(&self, name: &str, namespace: &str) -> Result<bool>;
    async fn create_operator(&self, obj: &Operator, namespace: &str) -> Result<Operator>;
    async fn create_operator_version(&self, obj: &OperatorVersion, namespace: &str) -> Result<OperatorVersion>;
    async fn create_instance(&self, obj: &Instance, namespace: &str) -> Result<Instance>;
    async fn get_instance(&self, name: &str, namespace: &str) -> Result<Option<Instance>>;
    async fn get_operator_version(&self, name: &str, namespace: &str) -> Result<Option<OperatorVersion>>;
    async fn list_instance_objects(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<Instance>>;
    async fn list_operator_versions(&self, namespace: &str) -> Result<Vec<OperatorVersion>>;
    async fn list_operators(&self, namespace: &str) -> Result<Vec<Operator>>;
    /// JSON merge patch of the Instance spec; `None` leaves a field untouched.
    async fn patch_instance(
        &self,
        name: &str,
        namespace: &str,
        operator_version: Option<&str>,
        parameters: Option<&BTreeMap<String, String>>,
    ) -> Result<()>;
    async fn delete_instance(&self, name: &str, namespace: &str) -> Result<()>;
    /// Server git version, e.g. `v1.16.3-gke.1`.
    async fn server_version(&self) -> Result<String>;

    async fn list_instances(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<String>> {
        let items = self.list_instance_objects(namespace, label_selector).await?;
        Ok(items.into_iter().filter_map(|i| i.metadata.name).collect())
    }

    /// Whether `instance` exists for `operator` at `version`.
    async fn instance_exists(&self, operator: &str, namespace: &str, version: &str, instance: &str) -> Result<bool> {
        let selector = format!("{}={}", OPERATOR_LABEL, operator);
        let ov_name = format!("{}-{}", operator, version);
        let items = self.list_instance_objects(namespace, Some(&selector)).await?;
        Ok(items
            .iter()
            .any(|i| i.spec.operator_version.name == ov_name && i.metadata.name.as_deref() == Some(instance)))
    }

    /// Versions of `operator` that have an OperatorVersion in `namespace`.
    async fn operator_versions_installed(&self, operator: &str, namespace: &str) -> Result<Vec<String>> {
        let ovs = self.list_operator_versions(namespace).await?;
        Ok(ovs
            .into_iter()
            .filter(|ov| ov.metadata.name.as_deref().is_some_and(|n| n.starts_with(operator)))
            .map(|ov| ov.spec.version)
            .collect())
    }

    /// Fails with the plural of the first KUDO resource the cluster cannot list.
    async fn ensure_kudo_resources(&self, namespace: &str) -> Result<()> {
        self.list_operators(namespace).await.context("operators")?;
        self.list_operator_versions(namespace).await.context("operatorversions")?;
        self.list_instance_objects(namespace, None).await.context("instances")?;
        Ok(())
    }

    /// Fails when the cluster is older (major/minor) than the operator supports.
    async fn validate_server_for_operator(&self, operator: &Operator) -> Result<()> {
        let server = self.server_version().await?;
        validate_server_version(&operator.spec.kubernetes_version, &server)
    }
}

/// Merge patch body for an Instance spec update.
pub fn instance_patch(operator_version: Option<&str>, parameters: Option<&BTreeMap<String, String>>) -> Json {
    let mut spec = Map::new();
    if let Some(ov) = operator_version {
        spec.insert("operatorVersion".into(), json!({ "name": ov }));
    }
    if let Some(params) = parameters {
        spec.insert("parameters".into(), json!(params));
    }
    json!({ "spec": spec })
}

#[derive(Clone)]
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    pub fn new(client: Client) -> Self { Self { client } }

    /// Connect and check that the KUDO resources are served in `namespace`.
    pub async fn connect(kubeconfig: Option<&Path>, namespace: &str) -> Result<Self> {
        let client = Self::new(get_kube_client(kubeconfig).await?);
        client.ensure_kudo_resources(namespace).await?;
        Ok(client)
    }

    fn operators(&self, ns: &str) -> Api<Operator> { Api::namespaced(self.client.clone(), ns) }
    fn operator_versions(&self, ns: &str) -> Api<OperatorVersion> { Api::namespaced(self.client.clone(), ns) }
    fn instances(&self, ns: &str) -> Api<Instance> { Api::namespaced(self.client.clone(), ns) }
}

#[async_trait::async_trait]
impl KudoClient for KubeClient {
    async fn operator_exists(&self, name: &str, namespace: &str) -> Result<bool> {
        let found = self.operators(namespace).get_opt(name).await.context("getting Operator")?.is_some();
        debug!(operator = %name, ns = %namespace, found, "operator lookup");
        Ok(found)
    }

    async fn create_operator(&self, obj: &Operator, namespace: &str) -> Result<Operator> {
        self.operators(namespace).create(&PostParams::default(), obj).await.context("installing Operator")
    }

    async fn create_operator_version(&self, obj: &OperatorVersion, namespace: &str) -> Result<OperatorVersion> {
        self.operator_versions(namespace).create(&PostParams::default(), obj).await.context("installing OperatorVersion")
    }

    async fn create_instance(&self, obj: &Instance, namespace: &str) -> Result<Instance> {
        let created = self.instances(namespace).create(&PostParams::default(), obj).await.context("installing Instance")?;
        info!(instance = ?created.metadata.name, ns = %namespace, "instance created");
        Ok(created)
    }

    async fn get_instance(&self, name: &str, namespace: &str) -> Result<Option<Instance>> {
        self.instances(namespace).get_opt(name).await.context("getting Instance")
    }

    async fn get_operator_version(&self, name: &str, namespace: &str) -> Result<Option<OperatorVersion>> {
        self.operator_versions(namespace).get_opt(name).await.context("getting OperatorVersion")
    }

    async fn list_instance_objects(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<Instance>> {
        let mut lp = ListParams::default();
        if let Some(sel) = label_selector {
            lp = lp.labels(sel);
        }
        let list = self.instances(namespace).list(&lp).await.context("listing Instances")?;
        Ok(list.items)
    }

    async fn list_operator_versions(&self, namespace: &str) -> Result<Vec<OperatorVersion>> {
        let list = self.operator_versions(namespace).list(&ListParams::default()).await.context("listing OperatorVersions")?;
        Ok(list.items)
    }

    async fn list_operators(&self, namespace: &str) -> Result<Vec<Operator>> {
        let list = self.operators(namespace).list(&ListParams::default()).await.context("listing Operators")?;
        Ok(list.items)
    }

    async fn ensure_kudo_resources(&self, namespace: &str) -> Result<()> {
        let lp = ListParams::default().limit(1);
        self.operators(namespace).list(&lp).await.context("operators")?;
        self.operator_versions(namespace).list(&lp).await.context("operatorversions")?;
        self.instances(namespace).list(&lp).await.context("instances")?;
        debug!(ns = %namespace, "KUDO resources served");
        Ok(())
    }

    async fn patch_instance(
        &self,
        name: &str,
        namespace: &str,
        operator_version: Option<&str>,
        parameters: Option<&BTreeMap<String, String>>,
    ) -> Result<()> {
        let patch = instance_patch(operator_version, parameters);
        self.instances(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("patching Instance {}", name))?;
        Ok(())
    }

    async fn delete_instance(&self, name: &str, namespace: &str) -> Result<()> {
        self.instances(namespace)
            .delete(name, &DeleteParams::foreground())
            .await
            .with_context(|| format!("deleting Instance {}", name))?;
        Ok(())
    }

    async fn server_version(&self) -> Result<String> {
        let info = self.client.apiserver_version().await.context("fetching server version")?;
        Ok(info.git_version)
    }
}
