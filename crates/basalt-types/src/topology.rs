//! Deterministic names and addresses for everything a `MongoCluster` owns.
//!
//! Nothing here is persisted; every pass recomputes the same values from the
//! cluster name, namespace and counts.

use crate::types::{MongoCluster, MongoClusterSpec};
use kube::ResourceExt;
use std::ops::Range;

pub const ROUTER_PORT: u16 = 27017;
pub const SHARD_PORT: u16 = 27018;
pub const CONFIG_SERVER_PORT: u16 = 27019;

const CLUSTER_DOMAIN: &str = "svc.cluster.local";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    cluster: String,
    namespace: String,
    shard_count: u32,
    shard_size: u32,
    config_servers: u32,
}

impl Topology {
    pub fn new(cluster: &str, namespace: &str, spec: &MongoClusterSpec) -> Self {
        Self {
            cluster: cluster.to_string(),
            namespace: namespace.to_string(),
            shard_count: spec.replica_set_count,
            shard_size: spec.replica_set_size,
            config_servers: spec.config_server_count,
        }
    }

    pub fn of(cluster: &MongoCluster) -> Self {
        let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
        Self::new(&cluster.name_any(), &namespace, &cluster.spec)
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn config_server_name(&self) -> String {
        format!("{}-configsvr", self.cluster)
    }

    pub fn shard_name(&self, index: u32) -> String {
        format!("{}-shard{}", self.cluster, index)
    }

    pub fn router_name(&self) -> String {
        format!("{}-mongos", self.cluster)
    }

    pub fn backup_job_name(&self) -> String {
        format!("{}-backup", self.cluster)
    }

    pub fn shard_indices(&self) -> Range<u32> {
        0..self.shard_count
    }

    /// Total shard members; the router and config servers are not counted.
    pub fn desired_members(&self) -> u32 {
        self.shard_count.saturating_mul(self.shard_size)
    }

    pub fn config_server_replica_set(&self) -> ReplicaSetDescriptor {
        let name = self.config_server_name();
        ReplicaSetDescriptor {
            members: self.member_addresses(&name, CONFIG_SERVER_PORT, self.config_servers),
            name,
            config_server: true,
        }
    }

    pub fn shard_replica_set(&self, index: u32) -> ReplicaSetDescriptor {
        let name = self.shard_name(index);
        ReplicaSetDescriptor {
            members: self.member_addresses(&name, SHARD_PORT, self.shard_size),
            name,
            config_server: false,
        }
    }

    pub fn shard_replica_sets(&self) -> Vec<ReplicaSetDescriptor> {
        self.shard_indices()
            .map(|index| self.shard_replica_set(index))
            .collect()
    }

    pub fn router_host(&self) -> String {
        format!(
            "{}.{}.{}:{}",
            self.router_name(),
            self.namespace,
            CLUSTER_DOMAIN,
            ROUTER_PORT
        )
    }

    pub fn router_uri(&self) -> String {
        format!("mongodb://{}", self.router_host())
    }

    // Workloads and their governing services share a name, so a member is
    // `<workload>-<ordinal>.<workload>.<namespace>.svc.cluster.local:<port>`.
    fn member_addresses(&self, workload: &str, port: u16, count: u32) -> Vec<String> {
        (0..count)
            .map(|ordinal| {
                format!(
                    "{workload}-{ordinal}.{workload}.{}.{CLUSTER_DOMAIN}:{port}",
                    self.namespace
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSetDescriptor {
    pub name: String,
    pub members: Vec<String>,
    pub config_server: bool,
}

impl ReplicaSetDescriptor {
    /// `name/host1,host2,...`, the form `addShard` and `--configdb` expect.
    pub fn connection_string(&self) -> String {
        format!("{}/{}", self.name, self.members.join(","))
    }

    pub fn to_shard(&self) -> ShardDescriptor {
        ShardDescriptor {
            replica_set: self.name.clone(),
            members: self.members.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardDescriptor {
    pub replica_set: String,
    pub members: Vec<String>,
}

impl ShardDescriptor {
    pub fn connection_string(&self) -> String {
        format!("{}/{}", self.replica_set, self.members.join(","))
    }
}
