use crate::client::{AdminSession, ConnectOptions, DatabaseConnector};
use crate::codes::{is_already_initialized, is_not_yet_initialized};
use backon::{ConstantBuilder, Retryable};
use basalt_types::{BasaltError, OperatorConfig, ReplicaSetDescriptor, Result};
use mongodb::bson::{Bson, Document, doc};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationTimings {
    /// Per-member bound on connect plus `ping`.
    pub probe_timeout: Duration,
    pub poll_interval: Duration,
    /// Total bound on waiting for a primary after initiation.
    pub election_timeout: Duration,
}

impl From<&OperatorConfig> for ReplicationTimings {
    fn from(config: &OperatorConfig) -> Self {
        Self {
            probe_timeout: config.probe_timeout,
            poll_interval: config.election_poll_interval,
            election_timeout: config.election_timeout,
        }
    }
}

impl Default for ReplicationTimings {
    fn default() -> Self {
        Self::from(&OperatorConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Initiation {
    /// The set already had a configuration; nothing was sent.
    AlreadyInitialized,
    /// `replSetInitiate` was accepted and `primary` won the election.
    Initiated { primary: String },
    /// A set with zero members has nothing to bootstrap.
    NoMembers,
}

/// Drives one replica set from "members running" to "primary elected".
/// Safe to call on every pass: an initialized set is detected and left alone.
pub async fn bootstrap_replica_set<D: DatabaseConnector>(
    database: &D,
    replica_set: &ReplicaSetDescriptor,
    timings: &ReplicationTimings,
) -> Result<Initiation> {
    if replica_set.members.is_empty() {
        debug!(replica_set = %replica_set.name, "Replica set has no members");
        return Ok(Initiation::NoMembers);
    }

    let (host, session) = select_member(database, replica_set, timings.probe_timeout).await?;
    let outcome = initiate_if_needed(&session, replica_set, &host, timings).await;
    session.disconnect().await;
    outcome
}

async fn select_member<D: DatabaseConnector>(
    database: &D,
    replica_set: &ReplicaSetDescriptor,
    probe_timeout: Duration,
) -> Result<(String, D::Session)> {
    for host in &replica_set.members {
        let uri = format!("mongodb://{host}");
        let probe = async {
            let session = database
                .connect(&uri, ConnectOptions::direct(probe_timeout))
                .await?;
            match session.ping().await {
                Ok(()) => Ok(session),
                Err(e) => {
                    session.disconnect().await;
                    Err(e)
                }
            }
        };

        match tokio::time::timeout(probe_timeout, probe).await {
            Ok(Ok(session)) => {
                debug!(replica_set = %replica_set.name, host = %host, "Selected member");
                return Ok((host.clone(), session));
            }
            Ok(Err(e)) => {
                debug!(
                    replica_set = %replica_set.name,
                    host = %host,
                    error = %e,
                    "Member not reachable"
                )
            }
            Err(_) => {
                debug!(replica_set = %replica_set.name, host = %host, "Member probe timed out")
            }
        }
    }

    Err(BasaltError::NoReachableMember {
        replica_set: replica_set.name.clone(),
        members: replica_set.members.len(),
    })
}

async fn initiate_if_needed<S: AdminSession>(
    session: &S,
    replica_set: &ReplicaSetDescriptor,
    host: &str,
    timings: &ReplicationTimings,
) -> Result<Initiation> {
    match session.run_admin_command(doc! { "replSetGetStatus": 1 }).await {
        Ok(_) => {
            debug!(replica_set = %replica_set.name, "Replica set already initialized");
            return Ok(Initiation::AlreadyInitialized);
        }
        Err(e) if is_not_yet_initialized(&e) => {}
        Err(e) => {
            warn!(
                replica_set = %replica_set.name,
                host = %host,
                error = %e,
                "replSetGetStatus failed, initiating anyway"
            )
        }
    }

    info!(
        replica_set = %replica_set.name,
        host = %host,
        members = replica_set.members.len(),
        "Initiating replica set"
    );
    match session
        .run_admin_command(doc! { "replSetInitiate": initiate_config(replica_set) })
        .await
    {
        Ok(_) => {}
        Err(e) if is_already_initialized(&e) => {
            debug!(replica_set = %replica_set.name, "Replica set was initiated concurrently");
            return Ok(Initiation::AlreadyInitialized);
        }
        Err(e) => return Err(e),
    }

    let primary = wait_for_primary(session, &replica_set.name, timings).await?;
    info!(replica_set = %replica_set.name, primary = %primary, "Replica set elected a primary");
    Ok(Initiation::Initiated { primary })
}

pub(crate) fn initiate_config(replica_set: &ReplicaSetDescriptor) -> Document {
    let members: Vec<Document> = replica_set
        .members
        .iter()
        .enumerate()
        .map(|(id, host)| doc! { "_id": id as i32, "host": host.clone() })
        .collect();

    let mut config = doc! { "_id": replica_set.name.clone() };
    if replica_set.config_server {
        config.insert("configsvr", true);
    }
    config.insert("members", members);
    config
}

async fn wait_for_primary<S: AdminSession>(
    session: &S,
    replica_set: &str,
    timings: &ReplicationTimings,
) -> Result<String> {
    let interval = timings.poll_interval.max(Duration::from_millis(1));
    let attempts = (timings.election_timeout.as_millis() / interval.as_millis()) as usize + 1;
    let backoff = ConstantBuilder::default()
        .with_delay(interval)
        .with_max_times(attempts);

    let poll = || async {
        let status = session
            .run_admin_command(doc! { "replSetGetStatus": 1 })
            .await?;
        primary_of(&status).ok_or_else(|| BasaltError::Other("no primary yet".to_string()))
    };

    let elected = tokio::time::timeout(
        timings.election_timeout,
        poll.retry(backoff)
            .sleep(tokio::time::sleep)
            .notify(|e, delay| {
                debug!(
                    replica_set = %replica_set,
                    error = %e,
                    delay = ?delay,
                    "Waiting for primary"
                )
            }),
    )
    .await;

    match elected {
        Ok(Ok(primary)) => Ok(primary),
        _ => Err(BasaltError::ElectionTimeout {
            replica_set: replica_set.to_string(),
            timeout: timings.election_timeout,
        }),
    }
}

/// Host of the member reporting `stateStr: PRIMARY`, if any.
pub(crate) fn primary_of(status: &Document) -> Option<String> {
    let members = status.get_array("members").ok()?;
    members.iter().find_map(|member| match member {
        Bson::Document(member) if member.get_str("stateStr").ok() == Some("PRIMARY") => {
            member.get_str("name").ok().map(str::to_string)
        }
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMongo;
    use basalt_types::{CommandFailure, MongoClusterSpec, Topology, BackupSpec};

    fn topology() -> Topology {
        let spec = MongoClusterSpec {
            replica_set_count: 2,
            replica_set_size: 3,
            sharding: None,
            config_server_count: 3,
            mongos_count: 1,
            version: "7.0".into(),
            storage_size: "1Gi".into(),
            storage_class: None,
            backup: BackupSpec::default(),
        };
        Topology::new("demo", "db", &spec)
    }

    #[test]
    fn initiate_config_lists_members_in_order() {
        let config = initiate_config(&topology().config_server_replica_set());
        assert_eq!(config.get_str("_id").unwrap(), "demo-configsvr");
        assert!(config.get_bool("configsvr").unwrap());

        let members = config.get_array("members").unwrap();
        assert_eq!(members.len(), 3);
        let second = members[1].as_document().unwrap();
        assert_eq!(second.get_i32("_id").unwrap(), 1);
        assert_eq!(
            second.get_str("host").unwrap(),
            "demo-configsvr-1.demo-configsvr.db.svc.cluster.local:27019"
        );

        let shard = initiate_config(&topology().shard_replica_set(0));
        assert!(shard.get("configsvr").is_none());
    }

    #[test]
    fn primary_is_read_from_member_states() {
        let status = doc! {
            "set": "demo-shard0",
            "members": [
                { "name": "a:27018", "stateStr": "SECONDARY" },
                { "name": "b:27018", "stateStr": "PRIMARY" },
            ]
        };
        assert_eq!(primary_of(&status).as_deref(), Some("b:27018"));
        assert_eq!(primary_of(&doc! { "members": [] }), None);
    }

    #[tokio::test(start_paused = true)]
    async fn initiates_once_then_reports_already_initialized() {
        let mongo = FakeMongo::new();
        mongo.elect_after(2);
        let shard = topology().shard_replica_set(0);
        let timings = ReplicationTimings::default();

        let first = bootstrap_replica_set(&mongo, &shard, &timings).await.unwrap();
        assert!(matches!(first, Initiation::Initiated { .. }));

        let second = bootstrap_replica_set(&mongo, &shard, &timings).await.unwrap();
        assert_eq!(second, Initiation::AlreadyInitialized);
        assert_eq!(mongo.command_count("replSetInitiate"), 1);
        assert_eq!(mongo.replica_set_members("demo-shard0"), Some(shard.members.clone()));
    }

    #[tokio::test(start_paused = true)]
    async fn skips_unreachable_members() {
        let mongo = FakeMongo::new();
        let shard = topology().shard_replica_set(1);
        mongo.set_unreachable(&shard.members[0]);

        bootstrap_replica_set(&mongo, &shard, &ReplicationTimings::default())
            .await
            .unwrap();

        let hosts: Vec<String> = mongo
            .commands()
            .into_iter()
            .filter(|(_, command)| command == "replSetInitiate")
            .map(|(host, _)| host)
            .collect();
        assert_eq!(hosts, vec![shard.members[1].clone()]);
    }

    #[tokio::test(start_paused = true)]
    async fn no_reachable_member_is_an_error() {
        let mongo = FakeMongo::new();
        let shard = topology().shard_replica_set(0);
        for host in &shard.members {
            mongo.set_unreachable(host);
        }

        let err = bootstrap_replica_set(&mongo, &shard, &ReplicationTimings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BasaltError::NoReachableMember { members: 3, .. }));
        assert_eq!(mongo.command_count("replSetInitiate"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn election_wait_is_bounded() {
        let mongo = FakeMongo::new();
        mongo.never_elect();
        let shard = topology().shard_replica_set(0);
        let timings = ReplicationTimings {
            probe_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_secs(2),
            election_timeout: Duration::from_secs(30),
        };

        let started = tokio::time::Instant::now();
        let err = bootstrap_replica_set(&mongo, &shard, &timings)
            .await
            .unwrap_err();

        assert!(matches!(err, BasaltError::ElectionTimeout { .. }));
        assert!(started.elapsed() <= Duration::from_secs(31));
        assert!(mongo.command_count("replSetGetStatus") <= 17);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_initiation_counts_as_success() {
        let mongo = FakeMongo::new();
        mongo.fail_next(
            "replSetInitiate",
            CommandFailure::new("replSetInitiate", "already initialized")
                .with_code(23, "AlreadyInitialized"),
        );

        let outcome = bootstrap_replica_set(
            &mongo,
            &topology().config_server_replica_set(),
            &ReplicationTimings::default(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, Initiation::AlreadyInitialized);
    }

    #[tokio::test(start_paused = true)]
    async fn other_initiate_failures_are_fatal() {
        let mongo = FakeMongo::new();
        mongo.fail_next(
            "replSetInitiate",
            CommandFailure::new("replSetInitiate", "bad config")
                .with_code(93, "InvalidReplicaSetConfig"),
        );

        let err = bootstrap_replica_set(
            &mongo,
            &topology().shard_replica_set(0),
            &ReplicationTimings::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.command_failure().and_then(|f| f.code), Some(93));
    }

    #[tokio::test]
    async fn empty_sets_are_skipped() {
        let mongo = FakeMongo::new();
        let mut shard = topology().shard_replica_set(0);
        shard.members.clear();

        let outcome = bootstrap_replica_set(&mongo, &shard, &ReplicationTimings::default())
            .await
            .unwrap();
        assert_eq!(outcome, Initiation::NoMembers);
        assert!(mongo.commands().is_empty());
    }
}
