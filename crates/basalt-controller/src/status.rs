use basalt_kubernetes::ResourceStore;
use basalt_types::{
    BasaltError, ClusterCondition, ClusterPhase, ConditionStatus, MongoCluster,
    MongoClusterStatus, Result, Topology,
};
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use tracing::{debug, info};

pub const RESOURCES_READY: &str = "ResourcesReady";
pub const REPLICATION_READY: &str = "ReplicationReady";
pub const SHARDING_READY: &str = "ShardingReady";
pub const BACKUP_READY: &str = "BackupReady";

/// Phases of a pass, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Resources,
    Replication,
    Sharding,
    Backup,
    Cleanup,
}

impl Stage {
    /// Condition that reports this stage. Pruning deletes managed resources,
    /// so its failures show up on `ResourcesReady`.
    pub fn condition_type(self) -> &'static str {
        match self {
            Stage::Resources | Stage::Cleanup => RESOURCES_READY,
            Stage::Replication => REPLICATION_READY,
            Stage::Sharding => SHARDING_READY,
            Stage::Backup => BACKUP_READY,
        }
    }
}

const CONDITION_STAGES: [Stage; 4] = [
    Stage::Resources,
    Stage::Replication,
    Stage::Sharding,
    Stage::Backup,
];

/// What a successful pass observed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observed {
    pub sharding_configured: bool,
    pub backup_enabled: bool,
    pub last_backup_time: Option<DateTime<Utc>>,
}

fn condition(
    type_: &str,
    status: ConditionStatus,
    reason: &str,
    message: impl Into<String>,
    now: DateTime<Utc>,
) -> ClusterCondition {
    ClusterCondition {
        type_: type_.to_string(),
        status,
        last_transition_time: now,
        reason: reason.to_string(),
        message: message.into(),
    }
}

/// Keeps the previous transition time for conditions whose status did not
/// change.
fn carry_forward(
    previous: Option<&MongoClusterStatus>,
    mut conditions: Vec<ClusterCondition>,
) -> Vec<ClusterCondition> {
    let Some(previous) = previous else {
        return conditions;
    };
    for current in &mut conditions {
        if let Some(old) = previous.condition(&current.type_) {
            if old.status == current.status {
                current.last_transition_time = old.last_transition_time;
            }
        }
    }
    conditions
}

pub fn running(
    cluster: &MongoCluster,
    observed: &Observed,
    now: DateTime<Utc>,
) -> MongoClusterStatus {
    let total = Topology::of(cluster).desired_members();
    let (sharding_reason, sharding_message) = if observed.sharding_configured {
        ("ShardsRegistered", "All shards are registered with the router")
    } else {
        ("NoShards", "No shard has members to register")
    };
    let (backup_reason, backup_message) = if observed.backup_enabled {
        ("Scheduled", "Backup job is scheduled")
    } else {
        ("Disabled", "Backups are disabled")
    };

    let conditions = vec![
        condition(
            RESOURCES_READY,
            ConditionStatus::True,
            "Converged",
            "Workloads and services are up to date",
            now,
        ),
        condition(
            REPLICATION_READY,
            ConditionStatus::True,
            "PrimaryElected",
            "Every replica set is initialized",
            now,
        ),
        condition(SHARDING_READY, ConditionStatus::True, sharding_reason, sharding_message, now),
        condition(BACKUP_READY, ConditionStatus::True, backup_reason, backup_message, now),
    ];

    MongoClusterStatus {
        phase: ClusterPhase::Running,
        message: None,
        ready_replicas: i32::try_from(total).unwrap_or(i32::MAX),
        replica_summary: format!("{total}/{total}"),
        current_version: Some(cluster.spec.version.clone()),
        last_backup_time: observed.last_backup_time,
        sharding_configured: observed.sharding_configured,
        conditions: carry_forward(cluster.status.as_ref(), conditions),
    }
}

/// Status for a pass that stopped at `failed`. Stages before it completed,
/// later ones never ran. Observations the pass did not reach are kept from
/// the previous status.
pub fn degraded(
    cluster: &MongoCluster,
    failed: Stage,
    error: &BasaltError,
    now: DateTime<Utc>,
) -> MongoClusterStatus {
    let failed_type = failed.condition_type();
    let conditions = CONDITION_STAGES
        .iter()
        .map(|stage| {
            let type_ = stage.condition_type();
            if type_ == failed_type {
                condition(type_, ConditionStatus::False, error.reason(), error.to_string(), now)
            } else if *stage < failed {
                condition(
                    type_,
                    ConditionStatus::True,
                    "Completed",
                    "Stage completed before the failure",
                    now,
                )
            } else {
                condition(type_, ConditionStatus::Unknown, "NotReached", "Stage did not run", now)
            }
        })
        .collect();

    let total = Topology::of(cluster).desired_members();
    let previous = cluster.status.clone().unwrap_or_else(|| MongoClusterStatus {
        replica_summary: format!("0/{total}"),
        ..Default::default()
    });

    MongoClusterStatus {
        phase: ClusterPhase::Degraded,
        message: Some(error.to_string()),
        conditions: carry_forward(cluster.status.as_ref(), conditions),
        ..previous
    }
}

/// Writes `status` unless it equals what the object already carries.
/// Returns whether a write happened.
pub async fn publish<S: ResourceStore>(
    store: &S,
    cluster: &MongoCluster,
    status: &MongoClusterStatus,
) -> Result<bool> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());

    if cluster.status.as_ref() == Some(status) {
        debug!(cluster = %name, "Status unchanged");
        return Ok(false);
    }

    store.patch_status(&namespace, &name, status).await?;
    info!(
        cluster = %name,
        phase = ?status.phase,
        replicas = %status.replica_summary,
        "Updated status"
    );
    Ok(true)
}
