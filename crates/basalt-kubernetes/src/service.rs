use crate::apply::{Applied, create_or_update};
use crate::common::{
    COMPONENT_CONFIG_SERVER, COMPONENT_ROUTER, COMPONENT_SHARD, labels, object_meta,
    selector_labels,
};
use crate::store::ResourceStore;
use basalt_types::topology::{CONFIG_SERVER_PORT, ROUTER_PORT, SHARD_PORT};
use basalt_types::{MongoCluster, Result, Topology};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

/// Headless governing service for shard `shard_index`; gives each member a
/// stable DNS name.
pub fn shard_service(cluster: &MongoCluster, shard_index: u32) -> Result<Service> {
    let topology = Topology::of(cluster);
    headless_service(
        cluster,
        &topology,
        topology.shard_name(shard_index),
        COMPONENT_SHARD,
        Some(shard_index),
        SHARD_PORT,
    )
}

pub fn config_server_service(cluster: &MongoCluster) -> Result<Service> {
    let topology = Topology::of(cluster);
    headless_service(
        cluster,
        &topology,
        topology.config_server_name(),
        COMPONENT_CONFIG_SERVER,
        None,
        CONFIG_SERVER_PORT,
    )
}

pub fn router_service(cluster: &MongoCluster) -> Result<Service> {
    let topology = Topology::of(cluster);
    Ok(Service {
        metadata: object_meta(
            cluster,
            topology.router_name(),
            labels(&topology, COMPONENT_ROUTER, None),
        )?,
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector_labels(&topology, COMPONENT_ROUTER, None)),
            ports: Some(vec![mongodb_port(ROUTER_PORT)]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub async fn build_shard_network<S: ResourceStore>(
    store: &S,
    cluster: &MongoCluster,
    shard_index: u32,
) -> Result<Applied> {
    create_or_update(store, shard_service(cluster, shard_index)?).await
}

pub async fn build_config_server_network<S: ResourceStore>(
    store: &S,
    cluster: &MongoCluster,
) -> Result<Applied> {
    create_or_update(store, config_server_service(cluster)?).await
}

pub async fn build_router_network<S: ResourceStore>(
    store: &S,
    cluster: &MongoCluster,
) -> Result<Applied> {
    create_or_update(store, router_service(cluster)?).await
}

fn headless_service(
    cluster: &MongoCluster,
    topology: &Topology,
    name: String,
    component: &str,
    shard: Option<u32>,
    port: u16,
) -> Result<Service> {
    Ok(Service {
        metadata: object_meta(cluster, name, labels(topology, component, shard))?,
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(selector_labels(topology, component, shard)),
            ports: Some(vec![mongodb_port(port)]),
            // Members must resolve each other before any of them is ready.
            publish_not_ready_addresses: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn mongodb_port(port: u16) -> ServicePort {
    ServicePort {
        name: Some("mongodb".to_string()),
        port: i32::from(port),
        target_port: Some(IntOrString::Int(i32::from(port))),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}
