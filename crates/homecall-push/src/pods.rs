use std::{collections::BTreeMap, path::Path, time::Duration};

use async_trait::async_trait;
use homecall_common::error::{HomecallError, Result};
use serde::Deserialize;
use url::Url;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const UNKNOWN_OWNER: &str = "Unknown";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Pods in a namespace grouped by the kind of their first owner reference.
#[async_trait]
pub trait PodCounter: Send + Sync {
    async fn pod_counts(&self, namespace: &str) -> Result<BTreeMap<String, u64>>;
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    #[serde(default)]
    metadata: PodMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct PodMetadata {
    #[serde(rename = "ownerReferences", default)]
    owner_references: Vec<OwnerReference>,
}

#[derive(Debug, Deserialize)]
struct OwnerReference {
    kind: String,
}

/// Lists pods through the Kubernetes REST API.
pub struct KubePodCounter {
    api_server: Url,
    token: Option<String>,
    client: reqwest::Client,
}

impl KubePodCounter {
    pub fn new(api_server: Url, token: Option<String>, client: reqwest::Client) -> Self {
        Self {
            api_server,
            token,
            client,
        }
    }

    /// Uses the pod's service account token and cluster CA.
    pub fn in_cluster(api_server: &str) -> Result<Self> {
        Self::from_service_account(api_server, Path::new(SERVICE_ACCOUNT_DIR))
    }

    fn from_service_account(api_server: &str, dir: &Path) -> Result<Self> {
        let api_server = Url::parse(api_server).map_err(|err| {
            HomecallError::Collaborator(format!("invalid kubernetes api server {api_server:?}: {err}"))
        })?;
        let token = std::fs::read_to_string(dir.join("token")).map_err(|err| {
            HomecallError::Collaborator(format!("service account token unavailable: {err}"))
        })?;
        let ca = std::fs::read(dir.join("ca.crt")).map_err(|err| {
            HomecallError::Collaborator(format!("service account CA unavailable: {err}"))
        })?;
        let certificate = reqwest::Certificate::from_pem(&ca).map_err(|err| {
            HomecallError::Collaborator(format!("invalid service account CA: {err}"))
        })?;
        let client = reqwest::Client::builder()
            .add_root_certificate(certificate)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| {
                HomecallError::Collaborator(format!("failed to build kubernetes client: {err}"))
            })?;

        Ok(Self::new(api_server, Some(token.trim().to_string()), client))
    }

    fn pods_url(&self, namespace: &str) -> Result<Url> {
        let mut url = self.api_server.clone();
        url.path_segments_mut()
            .map_err(|_| {
                HomecallError::Collaborator(format!(
                    "kubernetes api server {} cannot carry a path",
                    self.api_server
                ))
            })?
            .pop_if_empty()
            .extend(["api", "v1", "namespaces", namespace, "pods"]);
        Ok(url)
    }
}

#[async_trait]
impl PodCounter for KubePodCounter {
    async fn pod_counts(&self, namespace: &str) -> Result<BTreeMap<String, u64>> {
        let mut request = self.client.get(self.pods_url(namespace)?);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| HomecallError::Collaborator(format!("error listing pods: {err}")))?;
        if !response.status().is_success() {
            return Err(HomecallError::Collaborator(format!(
                "error listing pods in {namespace}: status {}",
                response.status()
            )));
        }

        let pods: PodList = response
            .json()
            .await
            .map_err(|err| HomecallError::Collaborator(format!("invalid pod list: {err}")))?;
        Ok(count_by_owner(&pods))
    }
}

fn count_by_owner(pods: &PodList) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for pod in &pods.items {
        let owner = pod
            .metadata
            .owner_references
            .first()
            .map(|owner| owner.kind.as_str())
            .unwrap_or(UNKNOWN_OWNER);
        *counts.entry(owner.to_string()).or_insert(0) += 1;
    }
    counts
}
