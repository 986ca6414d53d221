//! In-memory [`ResourceStore`] for tests. Objects are kept as JSON so any
//! [`Managed`] kind round-trips the way it would through the API server.

use crate::store::{Managed, ResourceStore};
use basalt_types::{BasaltError, MongoClusterStatus, Result};
use kube::ResourceExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type ObjectKey = (String, String, String);

#[derive(Default)]
struct Inner {
    objects: BTreeMap<ObjectKey, Value>,
    statuses: BTreeMap<(String, String), MongoClusterStatus>,
    next_version: u64,
    mutations: usize,
    status_writes: usize,
    conflict_on_next_replace: bool,
}

impl Inner {
    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

fn key<K: Managed>(namespace: &str, name: &str) -> ObjectKey {
    (K::kind(&()).to_string(), namespace.to_string(), name.to_string())
}

fn decode<K: Managed>(value: &Value) -> Result<K> {
    Ok(serde_json::from_value(value.clone())?)
}

fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k.trim()).map(String::as_str) == Some(v.trim()),
            None => labels.contains_key(term.trim()),
        })
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates, replaces and deletes performed through the store trait.
    pub fn mutations(&self) -> usize {
        self.lock().mutations
    }

    pub fn status_writes(&self) -> usize {
        self.lock().status_writes
    }

    pub fn status(&self, namespace: &str, name: &str) -> Option<MongoClusterStatus> {
        self.lock()
            .statuses
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Sorted names of every stored object of kind `K` in `namespace`.
    pub fn names<K: Managed>(&self, namespace: &str) -> Vec<String> {
        let kind = K::kind(&()).to_string();
        self.lock()
            .objects
            .keys()
            .filter(|(k, ns, _)| *k == kind && ns == namespace)
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    pub fn object<K: Managed>(&self, namespace: &str, name: &str) -> Option<K> {
        self.lock()
            .objects
            .get(&key::<K>(namespace, name))
            .and_then(|value| decode(value).ok())
    }

    /// Seeds or overwrites an object out of band, the way another actor
    /// (the API server, a user) would. Not counted as a mutation.
    pub fn insert<K: Managed>(&self, mut resource: K) {
        let mut inner = self.lock();
        resource.meta_mut().resource_version = Some(inner.bump_version());
        let namespace = resource.namespace().unwrap_or_default();
        let name = resource.name_any();
        if let Ok(value) = serde_json::to_value(&resource) {
            inner.objects.insert(key::<K>(&namespace, &name), value);
        }
    }

    /// Makes the next replace fail as if another writer got there first.
    pub fn conflict_on_next_replace(&self) {
        self.lock().conflict_on_next_replace = true;
    }
}

impl ResourceStore for MemoryStore {
    async fn get<K: Managed>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        self.lock()
            .objects
            .get(&key::<K>(namespace, name))
            .map(decode)
            .transpose()
    }

    async fn create<K: Managed>(&self, namespace: &str, resource: &K) -> Result<K> {
        let name = resource.name_any();
        let mut inner = self.lock();
        let object_key = key::<K>(namespace, &name);
        if inner.objects.contains_key(&object_key) {
            return Err(BasaltError::Other(format!(
                "{} {namespace}/{name} already exists",
                K::kind(&())
            )));
        }

        let mut created = resource.clone();
        created.meta_mut().resource_version = Some(inner.bump_version());
        created.meta_mut().namespace = Some(namespace.to_string());
        inner.objects.insert(object_key, serde_json::to_value(&created)?);
        inner.mutations += 1;
        Ok(created)
    }

    async fn replace<K: Managed>(&self, namespace: &str, name: &str, resource: &K) -> Result<K> {
        let mut inner = self.lock();
        let object_key = key::<K>(namespace, name);
        let conflict = BasaltError::Conflict {
            kind: K::kind(&()).to_string(),
            name: name.to_string(),
        };
        if std::mem::take(&mut inner.conflict_on_next_replace) {
            return Err(conflict);
        }

        let current: K = match inner.objects.get(&object_key) {
            Some(value) => decode(value)?,
            None => {
                return Err(BasaltError::Other(format!(
                    "{} {namespace}/{name} not found",
                    K::kind(&())
                )));
            }
        };
        if resource.meta().resource_version != current.meta().resource_version {
            return Err(conflict);
        }

        let mut replaced = resource.clone();
        replaced.meta_mut().resource_version = Some(inner.bump_version());
        let mut value = serde_json::to_value(&replaced)?;
        // Status is a subresource; a replace of the main resource keeps it.
        let status = inner
            .objects
            .get(&object_key)
            .and_then(|current| current.get("status"))
            .cloned();
        if let (Some(status), Some(object)) = (status, value.as_object_mut()) {
            object.insert("status".to_string(), status);
        }
        inner.objects.insert(object_key, value);
        inner.mutations += 1;
        decode(&inner.objects[&key::<K>(namespace, name)])
    }

    async fn list<K: Managed>(&self, namespace: &str, label_selector: &str) -> Result<Vec<K>> {
        let kind = K::kind(&()).to_string();
        let inner = self.lock();
        let mut items = Vec::new();
        for ((k, ns, _), value) in &inner.objects {
            if *k != kind || ns != namespace {
                continue;
            }
            let resource: K = decode(value)?;
            if matches_selector(resource.labels(), label_selector) {
                items.push(resource);
            }
        }
        Ok(items)
    }

    async fn delete<K: Managed>(&self, namespace: &str, name: &str) -> Result<()> {
        let mut inner = self.lock();
        if inner.objects.remove(&key::<K>(namespace, name)).is_some() {
            inner.mutations += 1;
        }
        Ok(())
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &MongoClusterStatus,
    ) -> Result<()> {
        let mut inner = self.lock();
        inner
            .statuses
            .insert((namespace.to_string(), name.to_string()), status.clone());
        inner.status_writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_requires_every_term() {
        let labels = BTreeMap::from([
            ("app".to_string(), "mongodb".to_string()),
            ("cluster".to_string(), "demo".to_string()),
        ]);
        assert!(matches_selector(&labels, "app=mongodb,cluster=demo"));
        assert!(matches_selector(&labels, ""));
        assert!(!matches_selector(&labels, "app=mongodb,cluster=other"));
        assert!(!matches_selector(&labels, "shard"));
    }

    #[tokio::test]
    async fn replace_keeps_status_and_checks_version() {
        use k8s_openapi::api::batch::v1::{CronJob, CronJobStatus};
        use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

        let store = MemoryStore::new();
        let job = CronJob {
            metadata: ObjectMeta {
                name: Some("demo-backup".into()),
                namespace: Some("db".into()),
                ..Default::default()
            },
            status: Some(CronJobStatus::default()),
            ..Default::default()
        };
        store.insert(job);

        let mut stale: CronJob = store.object("db", "demo-backup").unwrap();
        stale.status = None;
        let replaced = store.replace("db", "demo-backup", &stale).await.unwrap();
        assert!(replaced.status.is_some());
        assert_eq!(store.mutations(), 1);

        let err = store.replace("db", "demo-backup", &stale).await.unwrap_err();
        assert!(matches!(err, BasaltError::Conflict { .. }));
    }
}
