pub mod client;
pub mod codes;
pub mod replication;
pub mod sharding;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::{AdminSession, ConnectOptions, DatabaseConnector, MongoDriver};
pub use replication::{Initiation, ReplicationTimings, bootstrap_replica_set};
pub use sharding::{
    CollectionSharding, KeyOrder, ShardKeyField, ShardingOutcome, ShardingPlan,
    bootstrap_sharding, parse_shard_key,
};
