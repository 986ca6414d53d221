use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[kube(group = "basalt.dev", version = "v1alpha1", kind = "MongoCluster")]
#[kube(status = "MongoClusterStatus")]
#[kube(shortname = "mdbc")]
#[kube(namespaced)]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Replicas","type":"string","jsonPath":".status.replicaSummary"}"#)]
#[kube(printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#)]
#[kube(printcolumn = r#"{"name":"Last Backup","type":"date","jsonPath":".status.lastBackupTime"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct MongoClusterSpec {
    /// Number of shards.
    pub replica_set_count: u32,
    /// Members per shard replica set.
    pub replica_set_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sharding: Option<ShardingSpec>,
    pub config_server_count: u32,
    pub mongos_count: u32,
    pub version: String,
    pub storage_size: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    #[serde(default)]
    pub backup: BackupSpec,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShardingSpec {
    pub enabled: bool,
    #[serde(default)]
    pub database: String,
    /// `collection` or `database.collection`.
    #[serde(default, alias = "collections", skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// Comma separated `field[:1|-1|hashed]` entries, e.g. `_id:hashed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    pub enabled: bool,
    /// Cron expression.
    #[serde(default)]
    pub schedule: String,
    #[serde(default)]
    pub storage_endpoint: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub secret_ref: SecretRef,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq, JsonSchema)]
pub enum ClusterPhase {
    #[default]
    Pending,
    Running,
    Degraded,
    Failed,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MongoClusterStatus {
    #[serde(default)]
    pub phase: ClusterPhase,
    pub message: Option<String>,
    #[serde(default)]
    pub ready_replicas: i32,
    #[serde(default)]
    pub replica_summary: String,
    pub current_version: Option<String>,
    #[schemars(with = "Option<String>")]
    pub last_backup_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sharding_configured: bool,
    #[serde(default)]
    pub conditions: Vec<ClusterCondition>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[schemars(with = "String")]
    pub last_transition_time: DateTime<Utc>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

impl MongoClusterStatus {
    pub fn condition(&self, type_: &str) -> Option<&ClusterCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}
