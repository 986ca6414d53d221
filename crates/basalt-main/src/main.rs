use anyhow::Result;
use basalt_controller::{Context, error_policy, reconcile};
use basalt_kubernetes::KubeStore;
use basalt_mongo::MongoDriver;
use basalt_types::{MongoCluster, OperatorConfig};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::Service;
use kube::{
    Client, CustomResourceExt,
    api::Api,
    runtime::{controller::Controller, watcher::Config},
};
use std::sync::Arc;
use tracing::{Level, debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "basalt", about = "Kubernetes operator for sharded MongoDB clusters")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the operator (default).
    Run,
    /// Print the MongoCluster CustomResourceDefinition as YAML.
    Crd,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Run) {
        Command::Crd => {
            print!("{}", serde_yaml::to_string(&MongoCluster::crd())?);
            Ok(())
        }
        Command::Run => run().await,
    }
}

async fn run() -> Result<()> {
    let subscriber = EnvFilter::from_default_env()
        .add_directive(Level::INFO.into())
        .add_directive("basalt=debug".parse()?);

    tracing_subscriber::fmt().with_env_filter(subscriber).init();

    info!("Starting Basalt MongoDB Operator");

    let config = OperatorConfig::from_env()?;
    let client = Client::try_default().await?;

    let (clusters, owned) = match &config.watch_namespace {
        Some(namespace) => {
            info!(namespace = %namespace, "Watching a single namespace");
            (
                Api::<MongoCluster>::namespaced(client.clone(), namespace),
                OwnedApis::namespaced(&client, namespace),
            )
        }
        None => (Api::<MongoCluster>::all(client.clone()), OwnedApis::all(&client)),
    };

    let context = Arc::new(Context::new(
        KubeStore::new(client.clone()),
        MongoDriver,
        config,
    ));

    let controller = Controller::new(clusters, Config::default())
        .owns(owned.stateful_sets, Config::default())
        .owns(owned.deployments, Config::default())
        .owns(owned.services, Config::default())
        .owns(owned.cron_jobs, Config::default())
        .run(
            reconcile::<KubeStore, MongoDriver>,
            error_policy::<KubeStore, MongoDriver>,
            context,
        )
        .for_each(|res| async move {
            match res {
                Ok(o) => debug!("Reconciled {}", o.0.name),
                Err(e) => warn!("Reconcile failed: {}", e),
            }
        });

    tokio::select! {
        _ = controller => warn!("Controller stream ended"),
        _ = tokio::signal::ctrl_c() => info!("Received shutdown signal"),
    }

    info!("Shutting down operator");
    Ok(())
}

struct OwnedApis {
    stateful_sets: Api<StatefulSet>,
    deployments: Api<Deployment>,
    services: Api<Service>,
    cron_jobs: Api<CronJob>,
}

impl OwnedApis {
    fn all(client: &Client) -> Self {
        Self {
            stateful_sets: Api::all(client.clone()),
            deployments: Api::all(client.clone()),
            services: Api::all(client.clone()),
            cron_jobs: Api::all(client.clone()),
        }
    }

    fn namespaced(client: &Client, namespace: &str) -> Self {
        Self {
            stateful_sets: Api::namespaced(client.clone(), namespace),
            deployments: Api::namespaced(client.clone(), namespace),
            services: Api::namespaced(client.clone(), namespace),
            cron_jobs: Api::namespaced(client.clone(), namespace),
        }
    }
}
