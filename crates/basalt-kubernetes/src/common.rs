use basalt_types::{BasaltError, MongoCluster, Result, Topology};
use k8s_openapi::api::core::v1::{Probe, TCPSocketAction};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::Resource;
use std::collections::BTreeMap;

pub const MANAGED_BY: &str = "basalt-operator";

pub const COMPONENT_CONFIG_SERVER: &str = "configsvr";
pub const COMPONENT_SHARD: &str = "shard";
pub const COMPONENT_ROUTER: &str = "mongos";
pub const COMPONENT_BACKUP: &str = "backup";

/// Pod selector labels. These end up in immutable selectors, so they must
/// never change for an existing workload.
pub fn selector_labels(
    topology: &Topology,
    component: &str,
    shard: Option<u32>,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), "mongodb".to_string());
    labels.insert("component".to_string(), component.to_string());
    labels.insert("cluster".to_string(), topology.cluster().to_string());
    if let Some(index) = shard {
        labels.insert("shard".to_string(), index.to_string());
    }
    labels
}

pub fn labels(
    topology: &Topology,
    component: &str,
    shard: Option<u32>,
) -> BTreeMap<String, String> {
    let mut labels = selector_labels(topology, component, shard);
    labels.insert("managed-by".to_string(), MANAGED_BY.to_string());
    labels
}

/// Label selector matching everything this operator created for a cluster.
pub fn owned_selector(topology: &Topology) -> String {
    format!("managed-by={},cluster={}", MANAGED_BY, topology.cluster())
}

pub fn object_meta(
    cluster: &MongoCluster,
    name: String,
    labels: BTreeMap<String, String>,
) -> Result<ObjectMeta> {
    let owner = cluster
        .controller_owner_ref(&())
        .ok_or(BasaltError::MissingObjectKey(".metadata.uid"))?;

    Ok(ObjectMeta {
        name: Some(name),
        namespace: Some(Topology::of(cluster).namespace().to_string()),
        labels: Some(labels),
        owner_references: Some(vec![owner]),
        ..Default::default()
    })
}

pub fn replica_count(count: u32, field: &str) -> Result<i32> {
    i32::try_from(count).map_err(|_| BasaltError::Other(format!("{field} {count} is out of range")))
}

pub fn tcp_readiness_probe(port: u16) -> Probe {
    Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::Int(i32::from(port)),
            ..Default::default()
        }),
        initial_delay_seconds: Some(5),
        period_seconds: Some(10),
        ..Default::default()
    }
}
