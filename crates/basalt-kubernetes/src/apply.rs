use crate::store::{Managed, ResourceStore};
use basalt_types::{BasaltError, Result};
use kube::ResourceExt;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// Digest of the desired object, stored on the live object so unchanged
/// inputs never turn into a write.
pub const SPEC_HASH_ANNOTATION: &str = "basalt.dev/spec-hash";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
    Unchanged,
}

pub fn spec_hash<K: Serialize>(resource: &K) -> Result<String> {
    let bytes = serde_json::to_vec(resource)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Create `desired` if it does not exist, replace it if its spec hash
/// changed, otherwise leave it alone.
pub async fn create_or_update<S, K>(store: &S, mut desired: K) -> Result<Applied>
where
    S: ResourceStore,
    K: Managed,
{
    let name = desired
        .meta()
        .name
        .clone()
        .ok_or(BasaltError::MissingObjectKey(".metadata.name"))?;
    let namespace = desired
        .meta()
        .namespace
        .clone()
        .ok_or(BasaltError::MissingObjectKey(".metadata.namespace"))?;
    let kind = K::kind(&()).to_string();

    let hash = spec_hash(&desired)?;
    desired
        .annotations_mut()
        .insert(SPEC_HASH_ANNOTATION.to_string(), hash.clone());

    match store.get::<K>(&namespace, &name).await? {
        None => {
            store.create(&namespace, &desired).await?;
            info!(kind = %kind, name = %name, namespace = %namespace, "Created resource");
            Ok(Applied::Created)
        }
        Some(existing) if existing.annotations().get(SPEC_HASH_ANNOTATION) == Some(&hash) => {
            debug!(kind = %kind, name = %name, "Resource up to date");
            Ok(Applied::Unchanged)
        }
        Some(existing) => {
            desired.meta_mut().resource_version = existing.meta().resource_version.clone();
            desired.retain_allocated(&existing);
            store.replace(&namespace, &name, &desired).await?;
            info!(kind = %kind, name = %name, namespace = %namespace, "Updated resource");
            Ok(Applied::Updated)
        }
    }
}
