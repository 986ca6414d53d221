use crate::common::owned_selector;
use crate::store::{Managed, ResourceStore};
use basalt_types::{MongoCluster, Result, Topology};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::Service;
use kube::{Resource, ResourceExt};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Names of every resource the current spec implies, per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredResources {
    pub stateful_sets: BTreeSet<String>,
    pub deployments: BTreeSet<String>,
    pub services: BTreeSet<String>,
    pub cron_jobs: BTreeSet<String>,
}

impl DesiredResources {
    pub fn for_cluster(cluster: &MongoCluster) -> Self {
        let topology = Topology::of(cluster);
        let mut desired = Self::default();

        desired.stateful_sets.insert(topology.config_server_name());
        desired.services.insert(topology.config_server_name());
        for index in topology.shard_indices() {
            desired.stateful_sets.insert(topology.shard_name(index));
            desired.services.insert(topology.shard_name(index));
        }
        desired.deployments.insert(topology.router_name());
        desired.services.insert(topology.router_name());
        if cluster.spec.backup.enabled {
            desired.cron_jobs.insert(topology.backup_job_name());
        }

        desired
    }
}

/// Deletes resources this cluster owns that are no longer desired, e.g.
/// shards above a lowered `replicaSetCount` or a disabled backup job.
/// Returns how many objects were deleted.
///
/// Deleting a shard's workload does not unregister it from the router. Drain
/// the shard with `removeShard` before lowering the count.
pub async fn prune_orphans<S: ResourceStore>(
    store: &S,
    cluster: &MongoCluster,
    desired: &DesiredResources,
) -> Result<usize> {
    let topology = Topology::of(cluster);
    let selector = owned_selector(&topology);
    let owner_uid = cluster.meta().uid.as_deref();

    let workloads =
        prune_kind::<S, StatefulSet>(store, &topology, &selector, owner_uid, &desired.stateful_sets)
            .await?;
    for name in &workloads {
        warn!(
            shard = %name,
            cluster = %topology.cluster(),
            "Shard workload removed while still registered with the router; run removeShard"
        );
    }

    let deployments =
        prune_kind::<S, Deployment>(store, &topology, &selector, owner_uid, &desired.deployments)
            .await?;
    let services =
        prune_kind::<S, Service>(store, &topology, &selector, owner_uid, &desired.services).await?;
    let cron_jobs =
        prune_kind::<S, CronJob>(store, &topology, &selector, owner_uid, &desired.cron_jobs)
            .await?;
    Ok(workloads.len() + deployments.len() + services.len() + cron_jobs.len())
}

async fn prune_kind<S, K>(
    store: &S,
    topology: &Topology,
    selector: &str,
    owner_uid: Option<&str>,
    keep: &BTreeSet<String>,
) -> Result<Vec<String>>
where
    S: ResourceStore,
    K: Managed,
{
    let existing = store.list::<K>(topology.namespace(), selector).await?;
    let mut deleted = Vec::new();

    for resource in existing {
        let name = resource.name_any();
        if keep.contains(&name) || !controlled_by(&resource, owner_uid) {
            continue;
        }
        store.delete::<K>(topology.namespace(), &name).await?;
        info!(
            kind = %K::kind(&()),
            name = %name,
            cluster = %topology.cluster(),
            "Deleted orphaned resource"
        );
        deleted.push(name);
    }

    Ok(deleted)
}

fn controlled_by<K: Managed>(resource: &K, owner_uid: Option<&str>) -> bool {
    let Some(uid) = owner_uid else {
        return false;
    };
    resource
        .owner_references()
        .iter()
        .any(|owner| owner.uid == uid && owner.controller == Some(true))
}
