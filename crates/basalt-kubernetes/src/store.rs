use basalt_types::{BasaltError, MongoCluster, MongoClusterStatus, Result};
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::Service;
use kube::{
    Client, Resource,
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
};
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;
use std::future::Future;
use tracing::debug;

/// A namespaced kind the operator creates and owns.
pub trait Managed:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Copies fields the API server assigns on create and that a full
    /// replace must not clear.
    fn retain_allocated(&mut self, _existing: &Self) {}
}

impl Managed for StatefulSet {}
impl Managed for Deployment {}
impl Managed for CronJob {}

impl Managed for Service {
    fn retain_allocated(&mut self, existing: &Self) {
        let (Some(spec), Some(current)) = (self.spec.as_mut(), existing.spec.as_ref()) else {
            return;
        };
        if spec.cluster_ip.is_none() {
            spec.cluster_ip = current.cluster_ip.clone();
            spec.cluster_ips = current.cluster_ips.clone();
        }
    }
}

/// The slice of the Kubernetes object API the reconciler needs.
pub trait ResourceStore: Send + Sync {
    fn get<K: Managed>(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<K>>> + Send;

    fn create<K: Managed>(
        &self,
        namespace: &str,
        resource: &K,
    ) -> impl Future<Output = Result<K>> + Send;

    /// Full replace; `resource` must carry the resource version it was read at.
    fn replace<K: Managed>(
        &self,
        namespace: &str,
        name: &str,
        resource: &K,
    ) -> impl Future<Output = Result<K>> + Send;

    fn list<K: Managed>(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> impl Future<Output = Result<Vec<K>>> + Send;

    /// Deleting an object that is already gone succeeds.
    fn delete<K: Managed>(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &MongoClusterStatus,
    ) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: Managed>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

impl ResourceStore for KubeStore {
    async fn get<K: Managed>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn create<K: Managed>(&self, namespace: &str, resource: &K) -> Result<K> {
        Ok(self
            .api::<K>(namespace)
            .create(&PostParams::default(), resource)
            .await?)
    }

    async fn replace<K: Managed>(&self, namespace: &str, name: &str, resource: &K) -> Result<K> {
        self.api::<K>(namespace)
            .replace(name, &PostParams::default(), resource)
            .await
            .map_err(|e| match e {
                kube::Error::Api(ref response) if response.code == 409 => BasaltError::Conflict {
                    kind: K::kind(&()).to_string(),
                    name: name.to_string(),
                },
                other => BasaltError::Kube(other),
            })
    }

    async fn list<K: Managed>(&self, namespace: &str, label_selector: &str) -> Result<Vec<K>> {
        let params = ListParams::default().labels(label_selector);
        Ok(self.api::<K>(namespace).list(&params).await?.items)
    }

    async fn delete<K: Managed>(&self, namespace: &str, name: &str) -> Result<()> {
        match self
            .api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => {
                debug!(kind = %K::kind(&()), name, "Already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &MongoClusterStatus,
    ) -> Result<()> {
        let clusters: Api<MongoCluster> = Api::namespaced(self.client.clone(), namespace);
        let status_patch = serde_json::json!({
            "status": status
        });

        clusters
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&status_patch))
            .await?;
        Ok(())
    }
}
