pub mod config;
pub mod error;
pub mod topology;
pub mod types;

pub use config::OperatorConfig;
pub use error::{BasaltError, CommandFailure, Result};
pub use topology::{ReplicaSetDescriptor, ShardDescriptor, Topology};
pub use types::{
    BackupSpec, ClusterCondition, ClusterPhase, ConditionStatus, MongoCluster, MongoClusterSpec,
    MongoClusterStatus, SecretRef, ShardingSpec,
};
