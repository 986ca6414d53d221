use crate::context::Context;
use crate::status::{self, Observed, Stage};
use basalt_kubernetes::{
    DesiredResources, ResourceStore, build_backup_job, build_config_server_network,
    build_config_server_workload, build_router_network, build_router_workload,
    build_shard_network, build_shard_workload, last_successful_backup, prune_orphans,
};
use basalt_mongo::{
    DatabaseConnector, ReplicationTimings, ShardingPlan, bootstrap_replica_set,
    bootstrap_sharding,
};
use basalt_types::{BasaltError, MongoCluster, Result, Topology};
use chrono::Utc;
use futures::future::try_join_all;
use kube::runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What a pass did beyond converging resources.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    pub observed: Observed,
    pub pruned: usize,
}

pub async fn reconcile<S, D>(cluster: Arc<MongoCluster>, ctx: Arc<Context<S, D>>) -> Result<Action>
where
    S: ResourceStore,
    D: DatabaseConnector,
{
    let topology = Topology::of(&cluster);
    info!(
        cluster = %topology.cluster(),
        namespace = %topology.namespace(),
        "Reconciling MongoCluster"
    );

    let deadline = ctx.config.reconcile_timeout;
    let mut stage = Stage::Resources;
    let outcome = match tokio::time::timeout(deadline, run_pass(&cluster, &ctx, &mut stage)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(BasaltError::DeadlineExceeded(deadline)),
    };

    match outcome {
        Ok(report) => {
            let status = status::running(&cluster, &report.observed, Utc::now());
            status::publish(&ctx.store, &cluster, &status).await?;
            info!(
                cluster = %topology.cluster(),
                pruned = report.pruned,
                "Reconciled MongoCluster"
            );
            Ok(Action::requeue(ctx.config.resync_interval))
        }
        Err(err) => {
            warn!(
                cluster = %topology.cluster(),
                stage = ?stage,
                reason = err.reason(),
                error = %err,
                "Reconciliation pass aborted"
            );
            let status = status::degraded(&cluster, stage, &err, Utc::now());
            if let Err(publish_err) = status::publish(&ctx.store, &cluster, &status).await {
                error!(
                    cluster = %topology.cluster(),
                    error = %publish_err,
                    "Failed to write degraded status"
                );
            }
            Err(err)
        }
    }
}

/// One ordered pass over every stage. `stage` tracks the stage in progress
/// so a caller can attribute a failure or a timeout.
pub async fn run_pass<S, D>(
    cluster: &MongoCluster,
    ctx: &Context<S, D>,
    stage: &mut Stage,
) -> Result<PassReport>
where
    S: ResourceStore,
    D: DatabaseConnector,
{
    let topology = Topology::of(cluster);
    let store = &ctx.store;
    let config = &ctx.config;

    *stage = Stage::Resources;
    build_config_server_workload(store, cluster, config).await?;
    try_join_all(topology.shard_indices().map(|index| async move {
        build_shard_network(store, cluster, index).await?;
        build_shard_workload(store, cluster, config, index).await?;
        Ok::<_, BasaltError>(())
    }))
    .await?;
    build_router_workload(store, cluster, config).await?;
    build_config_server_network(store, cluster).await?;
    build_router_network(store, cluster).await?;

    *stage = Stage::Replication;
    let timings = ReplicationTimings::from(config);
    bootstrap_replica_set(&ctx.database, &topology.config_server_replica_set(), &timings).await?;
    let shard_sets = topology.shard_replica_sets();
    try_join_all(
        shard_sets
            .iter()
            .map(|set| bootstrap_replica_set(&ctx.database, set, &timings)),
    )
    .await?;

    *stage = Stage::Sharding;
    let plan = ShardingPlan::for_cluster(cluster)?;
    let sharding_configured = if plan.shards.iter().any(|shard| !shard.members.is_empty()) {
        let outcome = bootstrap_sharding(&ctx.database, &plan, config.router_timeout).await?;
        debug!(cluster = %topology.cluster(), outcome = ?outcome, "Sharding converged");
        true
    } else {
        debug!(cluster = %topology.cluster(), "No shard members, skipping sharding");
        false
    };

    *stage = Stage::Backup;
    let backup_enabled = build_backup_job(store, cluster, config).await?.is_some();
    let last_backup_time = if backup_enabled {
        last_successful_backup(store, cluster).await?
    } else {
        None
    };

    *stage = Stage::Cleanup;
    let pruned = prune_orphans(store, cluster, &DesiredResources::for_cluster(cluster)).await?;

    Ok(PassReport {
        observed: Observed {
            sharding_configured,
            backup_enabled,
            last_backup_time,
        },
        pruned,
    })
}

pub fn error_policy<S, D>(
    cluster: Arc<MongoCluster>,
    error: &BasaltError,
    _ctx: Arc<Context<S, D>>,
) -> Action {
    let delay = requeue_delay(error);
    error!(
        cluster = %Topology::of(&cluster).cluster(),
        error = %error,
        requeue_secs = delay.as_secs(),
        "Reconciliation error"
    );
    Action::requeue(delay)
}

fn requeue_delay(error: &BasaltError) -> Duration {
    match error {
        BasaltError::Conflict { .. } => Duration::from_secs(5),
        e if e.is_transient() => Duration::from_secs(30),
        _ => Duration::from_secs(120),
    }
}
