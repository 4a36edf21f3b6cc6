//! evroc API clients built from identity secrets

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, ResourceExt};
use tracing::{debug, info};

use super::{CloudApi, CloudConnector, NamespacedResource};
use crate::crd::EvrocCluster;
use crate::error::{Error, Result, ResultExt};

/// Secret keys that may hold the evroc kubeconfig, in lookup order
const KUBECONFIG_KEYS: &[&str] = &["config", "kubeconfig"];

/// [`CloudApi`] backed by a kube client scoped to one evroc project
#[derive(Clone)]
pub struct KubeCloudApi {
    client: Client,
    project: String,
}

impl KubeCloudApi {
    pub fn new(client: Client, project: impl Into<String>) -> Self {
        Self {
            client,
            project: project.into(),
        }
    }

    fn api<K: NamespacedResource>(&self) -> Api<K> {
        Api::namespaced(self.client.clone(), &self.project)
    }
}

#[async_trait]
impl CloudApi for KubeCloudApi {
    async fn get<K: NamespacedResource>(&self, name: &str) -> Result<Option<K>> {
        Ok(self.api::<K>().get_opt(name).await?)
    }

    async fn list<K: NamespacedResource>(&self) -> Result<Vec<K>> {
        Ok(self.api::<K>().list(&ListParams::default()).await?.items)
    }

    async fn create<K: NamespacedResource>(&self, obj: &K) -> Result<K> {
        Ok(self.api::<K>().create(&PostParams::default(), obj).await?)
    }

    async fn delete<K: NamespacedResource>(&self, name: &str) -> Result<()> {
        self.api::<K>()
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }
}

/// Connects to evroc using the identity secret referenced by an EvrocCluster
///
/// Clients are cached per secret and project and rebuilt when the secret's
/// resourceVersion changes.
pub struct KubeConnector {
    client: Client,
    cache: Mutex<HashMap<String, (String, Client)>>,
}

impl KubeConnector {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, key: &str, resource_version: &str) -> Option<Client> {
        let cache = self.cache.lock().ok()?;
        cache
            .get(key)
            .filter(|(rv, _)| rv == resource_version)
            .map(|(_, client)| client.clone())
    }

    fn store(&self, key: String, resource_version: String, client: Client) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, (resource_version, client));
        }
    }
}

#[async_trait]
impl CloudConnector for KubeConnector {
    type Api = KubeCloudApi;

    async fn connect(&self, evroc_cluster: &EvrocCluster) -> Result<KubeCloudApi> {
        let namespace = evroc_cluster
            .namespace()
            .unwrap_or_else(|| "default".to_string());
        let secret_name = &evroc_cluster.spec.identity_secret_name;
        let project = &evroc_cluster.spec.project;

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        let secret = secrets
            .get(secret_name)
            .await
            .with_context(|| format!("failed to get secret {}/{}", namespace, secret_name))?;

        let key = format!("{}/{}/{}", namespace, secret_name, project);
        let resource_version = secret.resource_version().unwrap_or_default();
        if let Some(client) = self.cached(&key, &resource_version) {
            debug!("Reusing evroc client for {}", key);
            return Ok(KubeCloudApi::new(client, project.clone()));
        }

        let kubeconfig = project_kubeconfig(identity_kubeconfig(&secret)?, project)?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::ConfigError(format!("failed to create rest config: {}", e)))?;
        let client = Client::try_from(config).context("failed to create evroc client")?;

        info!("Created evroc client for project {}", project);
        self.store(key, resource_version, client.clone());
        Ok(KubeCloudApi::new(client, project.clone()))
    }
}

/// Kubeconfig bytes from an identity secret, trying `config` then `kubeconfig`
pub fn identity_kubeconfig(secret: &Secret) -> Result<&[u8]> {
    secret
        .data
        .as_ref()
        .and_then(|data| KUBECONFIG_KEYS.iter().find_map(|key| data.get(*key)))
        .map(|bytes| bytes.0.as_slice())
        .ok_or_else(|| Error::MissingSecretKey {
            secret: secret.name_any(),
            key: KUBECONFIG_KEYS.join(" or "),
        })
}

/// Parse a kubeconfig and point every cluster at the project's API path
pub fn project_kubeconfig(data: &[u8], project: &str) -> Result<Kubeconfig> {
    let text = std::str::from_utf8(data)
        .map_err(|e| Error::ConfigError(format!("invalid kubeconfig UTF-8: {}", e)))?;
    let mut kubeconfig: Kubeconfig = serde_yaml::from_str(text)
        .map_err(|e| Error::ConfigError(format!("invalid kubeconfig YAML: {}", e)))?;

    if !project.is_empty() {
        for named in &mut kubeconfig.clusters {
            if let Some(server) = named.cluster.as_mut().and_then(|c| c.server.as_mut()) {
                *server = format!("{}/clusters/root:{}", server, project);
            }
        }
    }
    Ok(kubeconfig)
}
