use crate::apply::{Applied, create_or_update};
use crate::common::{
    COMPONENT_ROUTER, labels, object_meta, replica_count, selector_labels, tcp_readiness_probe,
};
use crate::store::ResourceStore;
use basalt_types::topology::ROUTER_PORT;
use basalt_types::{MongoCluster, OperatorConfig, Result, Topology};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

pub fn router_deployment(cluster: &MongoCluster, config: &OperatorConfig) -> Result<Deployment> {
    let topology = Topology::of(cluster);
    let labels = labels(&topology, COMPONENT_ROUTER, None);
    let config_db = topology.config_server_replica_set().connection_string();

    let container = Container {
        name: "mongos".to_string(),
        image: Some(format!("{}:{}", config.mongo_image, cluster.spec.version)),
        args: Some(vec![
            "mongos".to_string(),
            format!("--configdb={config_db}"),
            "--bind_ip_all".to_string(),
            "--port".to_string(),
            ROUTER_PORT.to_string(),
        ]),
        ports: Some(vec![ContainerPort {
            container_port: i32::from(ROUTER_PORT),
            name: Some("mongodb".to_string()),
            ..Default::default()
        }]),
        readiness_probe: Some(tcp_readiness_probe(ROUTER_PORT)),
        ..Default::default()
    };

    Ok(Deployment {
        metadata: object_meta(cluster, topology.router_name(), labels.clone())?,
        spec: Some(DeploymentSpec {
            replicas: Some(replica_count(cluster.spec.mongos_count, "mongosCount")?),
            selector: LabelSelector {
                match_labels: Some(selector_labels(&topology, COMPONENT_ROUTER, None)),
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
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub async fn build_router_workload<S: ResourceStore>(
    store: &S,
    cluster: &MongoCluster,
    config: &OperatorConfig,
) -> Result<Applied> {
    create_or_update(store, router_deployment(cluster, config)?).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::fixtures;

    #[test]
    fn router_points_at_config_server_replica_set() {
        let cluster = fixtures::cluster("demo");
        let deployment = router_deployment(&cluster, &OperatorConfig::default()).unwrap();

        assert_eq!(deployment.metadata.name.as_deref(), Some("demo-mongos"));
        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(2));

        let args = spec.template.spec.unwrap().containers[0].args.clone().unwrap();
        assert_eq!(
            args[1],
            "--configdb=demo-configsvr/\
             demo-configsvr-0.demo-configsvr.db.svc.cluster.local:27019,\
             demo-configsvr-1.demo-configsvr.db.svc.cluster.local:27019,\
             demo-configsvr-2.demo-configsvr.db.svc.cluster.local:27019"
        );
    }

    #[test]
    fn custom_image_repository_is_used() {
        let cluster = fixtures::cluster("demo");
        let config = OperatorConfig {
            mongo_image: "registry.local/mongo".into(),
            ..OperatorConfig::default()
        };
        let deployment = router_deployment(&cluster, &config).unwrap();
        let image = deployment.spec.unwrap().template.spec.unwrap().containers[0]
            .image
            .clone();
        assert_eq!(image.as_deref(), Some("registry.local/mongo:7.0"));
    }
}
