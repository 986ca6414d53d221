pub mod apply;
pub mod common;
pub mod cron_job;
pub mod deployment;
pub mod prune;
pub mod service;
pub mod stateful_set;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use apply::{Applied, SPEC_HASH_ANNOTATION, create_or_update};
pub use cron_job::{backup_cron_job, build_backup_job, last_successful_backup};
pub use deployment::{build_router_workload, router_deployment};
pub use prune::{DesiredResources, prune_orphans};
pub use service::{
    build_config_server_network, build_router_network, build_shard_network,
    config_server_service, router_service, shard_service,
};
pub use stateful_set::{
    build_config_server_workload, build_shard_workload, config_server_stateful_set,
    shard_stateful_set,
};
pub use store::{KubeStore, Managed, ResourceStore};
