use crate::apply::{Applied, create_or_update};
use crate::common::{
    COMPONENT_CONFIG_SERVER, COMPONENT_SHARD, labels, object_meta, replica_count,
    selector_labels, tcp_readiness_probe,
};
use crate::store::ResourceStore;
use basalt_types::topology::{CONFIG_SERVER_PORT, SHARD_PORT};
use basalt_types::{MongoCluster, OperatorConfig, Result, Topology};
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec,
    PodTemplateSpec, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use std::collections::BTreeMap;

const DATA_VOLUME: &str = "data";
const DATA_PATH: &str = "/data/db";

struct MongodRole {
    name: String,
    component: &'static str,
    shard: Option<u32>,
    replicas: i32,
    port: u16,
    role_flag: &'static str,
}

pub fn config_server_stateful_set(
    cluster: &MongoCluster,
    config: &OperatorConfig,
) -> Result<StatefulSet> {
    let topology = Topology::of(cluster);
    mongod_stateful_set(
        cluster,
        config,
        &topology,
        MongodRole {
            name: topology.config_server_name(),
            component: COMPONENT_CONFIG_SERVER,
            shard: None,
            replicas: replica_count(cluster.spec.config_server_count, "configServerCount")?,
            port: CONFIG_SERVER_PORT,
            role_flag: "--configsvr",
        },
    )
}

pub fn shard_stateful_set(
    cluster: &MongoCluster,
    config: &OperatorConfig,
    shard_index: u32,
) -> Result<StatefulSet> {
    let topology = Topology::of(cluster);
    mongod_stateful_set(
        cluster,
        config,
        &topology,
        MongodRole {
            name: topology.shard_name(shard_index),
            component: COMPONENT_SHARD,
            shard: Some(shard_index),
            replicas: replica_count(cluster.spec.replica_set_size, "replicaSetSize")?,
            port: SHARD_PORT,
            role_flag: "--shardsvr",
        },
    )
}

pub async fn build_config_server_workload<S: ResourceStore>(
    store: &S,
    cluster: &MongoCluster,
    config: &OperatorConfig,
) -> Result<Applied> {
    create_or_update(store, config_server_stateful_set(cluster, config)?).await
}

pub async fn build_shard_workload<S: ResourceStore>(
    store: &S,
    cluster: &MongoCluster,
    config: &OperatorConfig,
    shard_index: u32,
) -> Result<Applied> {
    create_or_update(store, shard_stateful_set(cluster, config, shard_index)?).await
}

// The replica set, the StatefulSet and its governing headless service all
// share `role.name`.
fn mongod_stateful_set(
    cluster: &MongoCluster,
    config: &OperatorConfig,
    topology: &Topology,
    role: MongodRole,
) -> Result<StatefulSet> {
    let selector = selector_labels(topology, role.component, role.shard);
    let labels = labels(topology, role.component, role.shard);

    let container = Container {
        name: "mongod".to_string(),
        image: Some(format!("{}:{}", config.mongo_image, cluster.spec.version)),
        args: Some(vec![
            "mongod".to_string(),
            role.role_flag.to_string(),
            "--replSet".to_string(),
            role.name.clone(),
            "--bind_ip_all".to_string(),
            "--port".to_string(),
            role.port.to_string(),
        ]),
        ports: Some(vec![ContainerPort {
            container_port: i32::from(role.port),
            name: Some("mongodb".to_string()),
            ..Default::default()
        }]),
        readiness_probe: Some(tcp_readiness_probe(role.port)),
        volume_mounts: Some(vec![VolumeMount {
            name: DATA_VOLUME.to_string(),
            mount_path: DATA_PATH.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Ok(StatefulSet {
        metadata: object_meta(cluster, role.name.clone(), labels.clone())?,
        spec: Some(StatefulSetSpec {
            replicas: Some(role.replicas),
            service_name: role.name.clone().into(),
            pod_management_policy: Some("Parallel".to_string()),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![data_claim(cluster)]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn data_claim(cluster: &MongoCluster) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(DATA_VOLUME.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: cluster.spec.storage_class.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(cluster.spec.storage_size.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
