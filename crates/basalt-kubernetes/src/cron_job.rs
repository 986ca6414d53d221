use crate::apply::{Applied, create_or_update};
use crate::common::{COMPONENT_BACKUP, labels, object_meta};
use crate::store::ResourceStore;
use basalt_types::{BasaltError, MongoCluster, OperatorConfig, Result, Topology};
use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec, SecretKeySelector,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::debug;

const ACCESS_KEY: &str = "accessKey";
const SECRET_KEY: &str = "secretKey";

/// The backup CronJob, or `None` when backups are disabled.
pub fn backup_cron_job(cluster: &MongoCluster, config: &OperatorConfig) -> Result<Option<CronJob>> {
    let backup = &cluster.spec.backup;
    if !backup.enabled {
        return Ok(None);
    }

    let topology = Topology::of(cluster);
    let labels = labels(&topology, COMPONENT_BACKUP, None);

    let env = vec![
        secret_env("AWS_ACCESS_KEY_ID", &backup.secret_ref.name, ACCESS_KEY),
        secret_env("AWS_SECRET_ACCESS_KEY", &backup.secret_ref.name, SECRET_KEY),
        EnvVar {
            name: "AWS_ENDPOINT_URL".to_string(),
            value: Some(backup.storage_endpoint.clone()),
            value_from: None,
        },
    ];

    let container = Container {
        name: "mongodump".to_string(),
        image: Some(config.backup_image.clone()),
        command: Some(vec!["sh".to_string(), "-c".to_string()]),
        args: Some(vec![backup_script(&topology.router_uri(), &backup.bucket)]),
        env: Some(env),
        ..Default::default()
    };

    Ok(Some(CronJob {
        metadata: object_meta(cluster, topology.backup_job_name(), labels.clone())?,
        spec: Some(CronJobSpec {
            schedule: backup.schedule.clone(),
            concurrency_policy: Some("Forbid".to_string()),
            successful_jobs_history_limit: Some(3),
            failed_jobs_history_limit: Some(3),
            job_template: JobTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(JobSpec {
                    backoff_limit: Some(2),
                    template: PodTemplateSpec {
                        metadata: Some(ObjectMeta {
                            labels: Some(labels),
                            ..Default::default()
                        }),
                        spec: Some(PodSpec {
                            restart_policy: Some("Never".to_string()),
                            containers: vec![container],
                            ..Default::default()
                        }),
                    },
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }))
}

/// Ensures the backup job exists when enabled. Disabling backups is handled
/// by orphan pruning, not here.
pub async fn build_backup_job<S: ResourceStore>(
    store: &S,
    cluster: &MongoCluster,
    config: &OperatorConfig,
) -> Result<Option<Applied>> {
    match backup_cron_job(cluster, config)? {
        Some(job) => Ok(Some(create_or_update(store, job).await?)),
        None => {
            debug!(cluster = %Topology::of(cluster).cluster(), "Backup disabled");
            Ok(None)
        }
    }
}

/// Completion time of the most recent successful backup run, as observed
/// by the CronJob controller.
pub async fn last_successful_backup<S: ResourceStore>(
    store: &S,
    cluster: &MongoCluster,
) -> Result<Option<DateTime<Utc>>> {
    let topology = Topology::of(cluster);
    let Some(job) = store
        .get::<CronJob>(topology.namespace(), &topology.backup_job_name())
        .await?
    else {
        return Ok(None);
    };

    let Some(time) = job.status.and_then(|s| s.last_successful_time) else {
        return Ok(None);
    };

    // Round-trip through the wire format so this does not depend on the
    // time library k8s-openapi wraps.
    let raw = serde_json::to_value(&time)?;
    let text = raw
        .as_str()
        .ok_or_else(|| BasaltError::Other(format!("unexpected timestamp {raw}")))?;
    let parsed = DateTime::parse_from_rfc3339(text)
        .map_err(|e| BasaltError::Other(format!("invalid lastSuccessfulTime {text:?}: {e}")))?;
    Ok(Some(parsed.with_timezone(&Utc)))
}

fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                optional: None,
            }),
            ..Default::default()
        }),
    }
}

fn backup_script(router_uri: &str, bucket: &str) -> String {
    format!(
        r#"set -eu
BACKUP_NAME="backup-$(date +%F-%H%M%S).gz"
mongodump --uri="{router_uri}" --archive | gzip > "$BACKUP_NAME"
aws --endpoint-url="$AWS_ENDPOINT_URL" s3 cp "$BACKUP_NAME" "s3://{bucket}/$BACKUP_NAME"
"#
    )
}
