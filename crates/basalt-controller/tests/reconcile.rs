use basalt_controller::{Context, Stage, error_policy, reconcile, run_pass};
use basalt_kubernetes::testing::MemoryStore;
use basalt_mongo::testing::FakeMongo;
use basalt_types::{
    BackupSpec, BasaltError, ClusterPhase, ConditionStatus, MongoCluster, MongoClusterSpec,
    OperatorConfig, SecretRef, ShardingSpec, Topology,
};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::Service;
use std::sync::Arc;
use std::time::Duration;

fn cluster() -> MongoCluster {
    let mut cluster = MongoCluster::new(
        "orders",
        MongoClusterSpec {
            replica_set_count: 2,
            replica_set_size: 3,
            sharding: Some(ShardingSpec {
                enabled: true,
                database: "shop".into(),
                collection: Some("orders".into()),
                key: Some("customerId:hashed".into()),
            }),
            config_server_count: 3,
            mongos_count: 1,
            version: "7.0".into(),
            storage_size: "5Gi".into(),
            storage_class: None,
            backup: BackupSpec::default(),
        },
    );
    cluster.metadata.namespace = Some("prod".into());
    cluster.metadata.uid = Some("orders-uid".into());
    cluster
}

fn with_backup(mut cluster: MongoCluster) -> MongoCluster {
    cluster.spec.backup = BackupSpec {
        enabled: true,
        schedule: "30 1 * * *".into(),
        storage_endpoint: "https://s3.example.com".into(),
        bucket: "orders-backups".into(),
        secret_ref: SecretRef {
            name: "backup-keys".into(),
            namespace: None,
        },
    };
    cluster
}

struct Harness {
    store: MemoryStore,
    mongo: FakeMongo,
    ctx: Arc<Context<MemoryStore, FakeMongo>>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(OperatorConfig::default())
    }

    fn with_config(config: OperatorConfig) -> Self {
        let store = MemoryStore::new();
        let mongo = FakeMongo::new();
        let ctx = Arc::new(Context::new(store.clone(), mongo.clone(), config));
        Self { store, mongo, ctx }
    }

    /// Runs a pass and feeds the written status back, as the watch would.
    async fn pass(&self, cluster: &mut MongoCluster) -> Result<(), BasaltError> {
        let result = reconcile(Arc::new(cluster.clone()), self.ctx.clone()).await;
        cluster.status = self.store.status("prod", "orders");
        result.map(|_| ())
    }
}

#[tokio::test(start_paused = true)]
async fn converges_two_by_three_topology() {
    let harness = Harness::new();
    let mut cluster = cluster();
    harness.pass(&mut cluster).await.unwrap();

    let store = &harness.store;
    assert_eq!(
        store.names::<StatefulSet>("prod"),
        vec!["orders-configsvr", "orders-shard0", "orders-shard1"]
    );
    assert_eq!(store.names::<Deployment>("prod"), vec!["orders-mongos"]);
    assert_eq!(
        store.names::<Service>("prod"),
        vec!["orders-configsvr", "orders-mongos", "orders-shard0", "orders-shard1"]
    );
    assert!(store.names::<CronJob>("prod").is_empty());

    for name in ["orders-configsvr", "orders-shard0", "orders-shard1"] {
        let sts: StatefulSet = store.object("prod", name).unwrap();
        assert_eq!(sts.spec.unwrap().replicas, Some(3), "{name}");
    }
    let router: Deployment = store.object("prod", "orders-mongos").unwrap();
    assert_eq!(router.spec.unwrap().replicas, Some(1));

    let mongo = &harness.mongo;
    assert_eq!(
        mongo.initiated_sets(),
        vec!["orders-configsvr", "orders-shard0", "orders-shard1"]
    );
    assert!(mongo.is_config_server("orders-configsvr"));
    assert_eq!(mongo.shards(), vec!["orders-shard0", "orders-shard1"]);
    assert_eq!(mongo.sharded_databases(), vec!["shop"]);
    assert!(mongo.sharded_collection("shop.orders").is_some());

    let status = cluster.status.unwrap();
    assert_eq!(status.phase, ClusterPhase::Running);
    assert_eq!(status.replica_summary, "6/6");
    assert_eq!(status.current_version.as_deref(), Some("7.0"));
    assert!(status.sharding_configured);
    assert!(status.message.is_none());
}

#[tokio::test(start_paused = true)]
async fn second_pass_changes_nothing() {
    let harness = Harness::new();
    let mut cluster = cluster();
    harness.pass(&mut cluster).await.unwrap();

    let mutations = harness.store.mutations();
    let status_writes = harness.store.status_writes();
    let first_status = cluster.status.clone();

    harness.pass(&mut cluster).await.unwrap();

    assert_eq!(harness.store.mutations(), mutations);
    assert_eq!(harness.store.status_writes(), status_writes);
    assert_eq!(cluster.status, first_status);
    assert_eq!(harness.mongo.command_count("replSetInitiate"), 3);
    assert_eq!(harness.mongo.shards().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn names_do_not_depend_on_pass_history() {
    let first = Harness::new();
    let second = Harness::new();
    let mut a = cluster();
    let mut b = cluster();

    first.pass(&mut a).await.unwrap();
    first.pass(&mut a).await.unwrap();
    second.pass(&mut b).await.unwrap();

    assert_eq!(first.store.names::<StatefulSet>("prod"), second.store.names::<StatefulSet>("prod"));
    assert_eq!(first.store.names::<Service>("prod"), second.store.names::<Service>("prod"));
    let topology = Topology::of(&a);
    assert_eq!(
        first.mongo.replica_set_members("orders-shard1"),
        Some(topology.shard_replica_set(1).members)
    );
}

#[tokio::test(start_paused = true)]
async fn backup_job_follows_the_enabled_flag() {
    let harness = Harness::new();
    let mut cluster = with_backup(cluster());
    harness.pass(&mut cluster).await.unwrap();

    assert_eq!(harness.store.names::<CronJob>("prod"), vec!["orders-backup"]);
    let job: CronJob = harness.store.object("prod", "orders-backup").unwrap();
    let spec = job.spec.unwrap();
    assert_eq!(spec.schedule, "30 1 * * *");
    let pod = spec.job_template.spec.unwrap().template.spec.unwrap();
    let secrets: Vec<String> = pod.containers[0]
        .env
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|env| env.value_from?.secret_key_ref.map(|s| s.name))
        .collect();
    assert_eq!(secrets, vec!["backup-keys", "backup-keys"]);
    assert_eq!(
        cluster.status.as_ref().unwrap().condition("BackupReady").unwrap().reason,
        "Scheduled"
    );

    cluster.spec.backup.enabled = false;
    harness.pass(&mut cluster).await.unwrap();
    assert!(harness.store.names::<CronJob>("prod").is_empty());
}

#[tokio::test(start_paused = true)]
async fn shrinking_prunes_surplus_shard_resources() {
    let harness = Harness::new();
    let mut cluster = cluster();
    harness.pass(&mut cluster).await.unwrap();

    cluster.spec.replica_set_count = 1;
    harness.pass(&mut cluster).await.unwrap();

    assert_eq!(
        harness.store.names::<StatefulSet>("prod"),
        vec!["orders-configsvr", "orders-shard0"]
    );
    assert_eq!(
        harness.store.names::<Service>("prod"),
        vec!["orders-configsvr", "orders-mongos", "orders-shard0"]
    );
    assert_eq!(cluster.status.unwrap().replica_summary, "3/3");
}

#[tokio::test(start_paused = true)]
async fn version_change_rolls_workloads() {
    let harness = Harness::new();
    let mut cluster = cluster();
    harness.pass(&mut cluster).await.unwrap();

    cluster.spec.version = "8.0".into();
    harness.pass(&mut cluster).await.unwrap();

    for name in ["orders-configsvr", "orders-shard0", "orders-shard1"] {
        let sts: StatefulSet = harness.store.object("prod", name).unwrap();
        let pod = sts.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.containers[0].image.as_deref(), Some("mongo:8.0"), "{name}");
    }
    let router: Deployment = harness.store.object("prod", "orders-mongos").unwrap();
    let pod = router.spec.unwrap().template.spec.unwrap();
    assert_eq!(pod.containers[0].image.as_deref(), Some("mongo:8.0"));
    assert_eq!(cluster.status.unwrap().current_version.as_deref(), Some("8.0"));
}

#[tokio::test(start_paused = true)]
async fn unreachable_config_servers_degrade_the_cluster() {
    let harness = Harness::new();
    let mut cluster = cluster();
    for host in Topology::of(&cluster).config_server_replica_set().members {
        harness.mongo.set_unreachable(&host);
    }

    let err = harness.pass(&mut cluster).await.unwrap_err();
    assert!(matches!(err, BasaltError::NoReachableMember { .. }));
    assert_eq!(harness.store.names::<StatefulSet>("prod").len(), 3);
    assert!(harness.mongo.initiated_sets().is_empty());

    let status = cluster.status.clone().unwrap();
    assert_eq!(status.phase, ClusterPhase::Degraded);
    assert!(status.message.as_deref().unwrap().contains("orders-configsvr"));
    let replication = status.condition("ReplicationReady").unwrap();
    assert_eq!(replication.status, ConditionStatus::False);
    assert_eq!(replication.reason, "NoReachableMember");
    assert_eq!(status.condition("ResourcesReady").unwrap().status, ConditionStatus::True);
    assert_eq!(status.condition("ShardingReady").unwrap().status, ConditionStatus::Unknown);

    let action = error_policy(Arc::new(cluster.clone()), &err, harness.ctx.clone());
    assert_eq!(action, kube::runtime::controller::Action::requeue(Duration::from_secs(30)));

    for host in Topology::of(&cluster).config_server_replica_set().members {
        harness.mongo.set_reachable(&host);
    }
    harness.pass(&mut cluster).await.unwrap();
    assert_eq!(cluster.status.unwrap().phase, ClusterPhase::Running);
}

#[tokio::test(start_paused = true)]
async fn pass_is_bounded_by_the_deadline() {
    let config = OperatorConfig {
        election_timeout: Duration::from_secs(600),
        reconcile_timeout: Duration::from_secs(20),
        ..OperatorConfig::default()
    };
    let harness = Harness::with_config(config);
    harness.mongo.never_elect();
    let cluster = cluster();

    let mut stage = Stage::Resources;
    let outcome = tokio::time::timeout(
        Duration::from_secs(20),
        run_pass(&cluster, &harness.ctx, &mut stage),
    )
    .await;
    assert!(outcome.is_err());
    assert_eq!(stage, Stage::Replication);

    let mut cluster = cluster;
    let err = harness.pass(&mut cluster).await.unwrap_err();
    assert!(matches!(err, BasaltError::DeadlineExceeded(_)));
    assert_eq!(
        cluster.status.unwrap().condition("ReplicationReady").unwrap().reason,
        "DeadlineExceeded"
    );
}

#[tokio::test(start_paused = true)]
async fn zero_shards_skip_sharding() {
    let harness = Harness::new();
    let mut cluster = cluster();
    cluster.spec.replica_set_count = 0;
    harness.pass(&mut cluster).await.unwrap();

    assert_eq!(harness.mongo.command_count("addShard"), 0);
    assert_eq!(harness.mongo.command_count("enableSharding"), 0);
    let status = cluster.status.unwrap();
    assert!(!status.sharding_configured);
    assert_eq!(status.replica_summary, "0/0");
    assert_eq!(status.condition("ShardingReady").unwrap().reason, "NoShards");
}

#[tokio::test(start_paused = true)]
async fn replaying_after_partial_progress_is_safe() {
    let harness = Harness::new();
    let mut cluster = cluster();
    harness.mongo.fail_next(
        "shardCollection",
        basalt_types::CommandFailure::new("shardCollection", "interrupted")
            .with_code(11601, "Interrupted"),
    );

    let err = harness.pass(&mut cluster).await.unwrap_err();
    assert_eq!(err.reason(), "CommandFailed");
    assert_eq!(harness.mongo.shards().len(), 2);

    harness.pass(&mut cluster).await.unwrap();
    assert_eq!(harness.mongo.command_count("replSetInitiate"), 3);
    assert_eq!(harness.mongo.shards().len(), 2);
    assert!(harness.mongo.sharded_collection("shop.orders").is_some());
    assert_eq!(cluster.status.unwrap().phase, ClusterPhase::Running);
}
