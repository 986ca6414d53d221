use crate::client::{AdminSession, ConnectOptions, DatabaseConnector};
use crate::codes::{is_duplicate_shard, is_sharding_already_enabled};
use basalt_types::{BasaltError, MongoCluster, Result, ShardDescriptor, Topology};
use mongodb::bson::{Document, doc};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrder {
    Ascending,
    Descending,
    Hashed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardKeyField {
    pub field: String,
    pub order: KeyOrder,
}

/// Parses `field[:1|-1|hashed]` entries separated by commas; the order
/// defaults to ascending.
pub fn parse_shard_key(raw: &str) -> Result<Vec<ShardKeyField>> {
    let invalid = || BasaltError::InvalidShardKey(raw.to_string());
    let mut seen = BTreeSet::new();
    let mut fields = Vec::new();

    for entry in raw.split(',') {
        let entry = entry.trim();
        let (field, order) = match entry.split_once(':') {
            Some((field, order)) => (field.trim(), order.trim()),
            None => (entry, "1"),
        };
        let order = match order {
            "1" => KeyOrder::Ascending,
            "-1" => KeyOrder::Descending,
            "hashed" => KeyOrder::Hashed,
            _ => return Err(invalid()),
        };
        if field.is_empty() || !seen.insert(field.to_string()) {
            return Err(invalid());
        }
        fields.push(ShardKeyField {
            field: field.to_string(),
            order,
        });
    }

    if fields.iter().filter(|f| f.order == KeyOrder::Hashed).count() > 1 {
        return Err(invalid());
    }
    Ok(fields)
}

fn key_document(fields: &[ShardKeyField]) -> Document {
    let mut key = Document::new();
    for field in fields {
        match field.order {
            KeyOrder::Ascending => key.insert(field.field.clone(), 1),
            KeyOrder::Descending => key.insert(field.field.clone(), -1),
            KeyOrder::Hashed => key.insert(field.field.clone(), "hashed"),
        };
    }
    key
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSharding {
    /// `database.collection`.
    pub namespace: String,
    pub key: Vec<ShardKeyField>,
}

/// Everything the sharding stage sends to the router for one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardingPlan {
    pub router_uri: String,
    pub shards: Vec<ShardDescriptor>,
    pub database: Option<String>,
    pub collection: Option<CollectionSharding>,
}

impl ShardingPlan {
    pub fn for_cluster(cluster: &MongoCluster) -> Result<Self> {
        let topology = Topology::of(cluster);
        let shards = topology
            .shard_replica_sets()
            .iter()
            .map(|set| set.to_shard())
            .collect();

        let mut plan = Self {
            router_uri: topology.router_uri(),
            shards,
            database: None,
            collection: None,
        };

        let Some(sharding) = cluster.spec.sharding.as_ref().filter(|s| s.enabled) else {
            return Ok(plan);
        };
        if sharding.database.is_empty() {
            return Ok(plan);
        }
        plan.database = Some(sharding.database.clone());

        let collection = sharding.collection.as_deref().filter(|c| !c.is_empty());
        let key = sharding.key.as_deref().filter(|k| !k.is_empty());
        if let (Some(collection), Some(key)) = (collection, key) {
            let namespace = if collection.contains('.') {
                collection.to_string()
            } else {
                format!("{}.{collection}", sharding.database)
            };
            plan.collection = Some(CollectionSharding {
                namespace,
                key: parse_shard_key(key)?,
            });
        }

        Ok(plan)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardingOutcome {
    /// Shards the router accepted on this pass; replays are not counted.
    pub shards_added: usize,
    pub database_enabled: bool,
    pub collection_sharded: bool,
}

/// Registers every shard with the router and applies the database and
/// collection sharding policy. Replays of `addShard` and `enableSharding`
/// are accepted; a failing `shardCollection` is returned as is.
pub async fn bootstrap_sharding<D: DatabaseConnector>(
    database: &D,
    plan: &ShardingPlan,
    router_timeout: Duration,
) -> Result<ShardingOutcome> {
    let session = database
        .connect(&plan.router_uri, ConnectOptions::discover(router_timeout))
        .await?;
    let outcome = apply_plan(&session, plan).await;
    session.disconnect().await;
    outcome
}

async fn apply_plan<S: AdminSession>(session: &S, plan: &ShardingPlan) -> Result<ShardingOutcome> {
    let mut outcome = ShardingOutcome::default();

    for shard in plan.shards.iter().filter(|s| !s.members.is_empty()) {
        match session
            .run_admin_command(doc! { "addShard": shard.connection_string() })
            .await
        {
            Ok(_) => {
                info!(shard = %shard.replica_set, "Added shard");
                outcome.shards_added += 1;
            }
            Err(e) if is_duplicate_shard(&e) => {
                debug!(shard = %shard.replica_set, "Shard already registered")
            }
            Err(e) => return Err(e),
        }
    }

    if let Some(db) = &plan.database {
        match session
            .run_admin_command(doc! { "enableSharding": db.clone() })
            .await
        {
            Ok(_) => info!(database = %db, "Enabled sharding"),
            Err(e) if is_sharding_already_enabled(&e) => {
                debug!(database = %db, "Sharding already enabled")
            }
            Err(e) => return Err(e),
        }
        outcome.database_enabled = true;
    }

    if let Some(collection) = &plan.collection {
        session
            .run_admin_command(doc! {
                "shardCollection": collection.namespace.clone(),
                "key": key_document(&collection.key),
            })
            .await?;
        info!(collection = %collection.namespace, "Sharded collection");
        outcome.collection_sharded = true;
    }

    Ok(outcome)
}
