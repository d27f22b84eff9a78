//! Filesystem repair jobs
//!
//! One batch Job per drive, pinned to the drive's node and running the
//! node-server image with its security context and the host paths the
//! repair needs.

use super::Admin;
use crate::consts::{
    APP_NAME, APP_ROOT_DIR, IDENTITY, LEGACY_APP_ROOT_DIR, NAMESPACE, UDEV_DATA_DIR,
};
use crate::crd::{DirectPVDrive, LabelKey};
use crate::domain::ports::NodeServerTemplate;
use crate::error::{Error, Result};
use crate::progress::Progress;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, HostPathVolumeSource, PodSpec, PodTemplateSpec, Volume, VolumeMount,
};
use kube::api::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, info, warn};

const JOB_BACKOFF_LIMIT: i32 = 1;
const JOB_TTL_SECONDS_AFTER_FINISHED: i32 = 5 * 60;
const TERMINATION_MESSAGE_PATH: &str = "/var/log/repair-termination-log";

/// Host paths mounted into repair pods: (volume name, path, propagation, read-only)
const HOST_PATHS: [(&str, &str, &str, bool); 5] = [
    ("app-root", APP_ROOT_DIR, "Bidirectional", false),
    ("legacy-app-root", LEGACY_APP_ROOT_DIR, "Bidirectional", false),
    ("sysfs", "/sys", "Bidirectional", false),
    ("devfs", "/dev", "HostToContainer", true),
    ("run-udev-data-dir", UDEV_DATA_DIR, "Bidirectional", true),
];

#[derive(Debug, Clone, Default)]
pub struct RepairArgs {
    pub drive_ids: Vec<String>,
    /// Passed through to the repair tool
    pub force: bool,
    pub disable_prefetch: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairResult {
    pub job_name: String,
    pub drive_name: String,
    pub drive_id: String,
}

pub fn repair_job_name(drive_id: &str) -> String {
    format!("repair-{}", drive_id)
}

/// Build the Job that repairs `drive` on its node
pub fn repair_job(drive: &DirectPVDrive, args: &RepairArgs, template: &NodeServerTemplate) -> Job {
    let name = repair_job_name(&drive.drive_id());
    let node_id = drive.node_id().to_string();

    let mut command = vec![
        format!("/{}", APP_NAME),
        "repair".to_string(),
        drive.drive_id(),
        format!("--kube-node-name={}", node_id),
    ];
    if args.force {
        command.push("--force".into());
    }
    if args.disable_prefetch {
        command.push("--disable-prefetch".into());
    }
    if args.dry_run {
        command.push("--dry-run".into());
    }

    let volumes = HOST_PATHS
        .iter()
        .map(|(volume, path, _, _)| Volume {
            name: volume.to_string(),
            host_path: Some(HostPathVolumeSource {
                path: path.to_string(),
                type_: Some("DirectoryOrCreate".into()),
            }),
            ..Default::default()
        })
        .collect();
    let volume_mounts = HOST_PATHS
        .iter()
        .map(|(volume, path, propagation, read_only)| VolumeMount {
            name: volume.to_string(),
            mount_path: path.to_string(),
            mount_propagation: Some(propagation.to_string()),
            read_only: Some(*read_only),
            ..Default::default()
        })
        .collect();

    let mut node_selector = BTreeMap::new();
    node_selector.insert(LabelKey::Node.key(), node_id);

    Job {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(NAMESPACE.to_string()),
            annotations: Some(template.annotations.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(JOB_BACKOFF_LIMIT),
            ttl_seconds_after_finished: Some(JOB_TTL_SECONDS_AFTER_FINISHED),
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    node_selector: Some(node_selector),
                    service_account_name: Some(IDENTITY.to_string()),
                    tolerations: Some(template.tolerations.clone()),
                    image_pull_secrets: Some(template.image_pull_secrets.clone()),
                    volumes: Some(volumes),
                    containers: vec![Container {
                        name,
                        image: Some(template.image.clone()),
                        command: Some(command),
                        security_context: template.security_context.clone(),
                        volume_mounts: Some(volume_mounts),
                        termination_message_policy: Some("FallbackToLogsOnError".into()),
                        termination_message_path: Some(TERMINATION_MESSAGE_PATH.into()),
                        ..Default::default()
                    }],
                    restart_policy: Some("Never".into()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

impl Admin {
    /// Create repair jobs for the given drives. Drives that already have a
    /// job are skipped; missing drives are ignored.
    pub async fn repair(&self, args: &RepairArgs, progress: Progress) -> Result<Vec<RepairResult>> {
        let result = self.create_repair_jobs(args, &progress).await;
        super::finish(progress, result)
    }

    async fn create_repair_jobs(&self, args: &RepairArgs, progress: &Progress) -> Result<Vec<RepairResult>> {
        if args.drive_ids.is_empty() {
            return Err(Error::Validation("no drive selected".into()));
        }
        let template = self.cluster.jobs.node_server_template().await.map_err(|e| {
            error!("Unable to get container parameters from daemonset: {}", e);
            e
        })?;

        let drives = self
            .clients
            .drive_lister()
            .drive_id_selector(args.drive_ids.clone())
            .ignore_not_found(true)
            .get()
            .await?;
        if drives.is_empty() {
            return Err(Error::NoMatchingResourcesFound);
        }
        progress.start(drives.len());

        let mut results = Vec::new();
        for (step, drive) in drives.iter().enumerate() {
            let job_name = repair_job_name(&drive.drive_id());
            progress.progress(format!("create job {}", job_name), step + 1, drive.drive_name());

            match self.cluster.jobs.job_exists(&job_name).await {
                Ok(false) => {}
                Ok(true) => {
                    warn!("Job {} already exists", job_name);
                    progress.log(format!("job {} already exists", job_name));
                    progress.end(drive.drive_name(), None);
                    continue;
                }
                Err(e) => {
                    error!("Unable to get repair job {}: {}", job_name, e);
                    progress.end(drive.drive_name(), Some(&e));
                    continue;
                }
            }

            let job = repair_job(drive, args, &template);
            match self.cluster.jobs.create_job(&job).await {
                Ok(()) => {
                    info!("Repair job {} for drive {} is created", job_name, drive.drive_name());
                    progress.end(drive.drive_name(), None);
                    results.push(RepairResult {
                        job_name,
                        drive_name: drive.drive_name().to_string(),
                        drive_id: drive.drive_id(),
                    });
                }
                Err(e) => {
                    error!("Unable to create repair job {}: {}", job_name, e);
                    progress.end(drive.drive_name(), Some(&e));
                }
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::admin;
    use super::*;
    use crate::lifecycle::drive::tests::create_drive;
    use crate::store::Clients;

    #[tokio::test]
    async fn test_repair_creates_job_once() {
        let clients = Clients::memory();
        create_drive(&clients, "d1", "node-1", "sda", 1 << 30).await;
        let (admin, cluster) = admin(&clients);

        let args = RepairArgs {
            drive_ids: vec!["d1".into(), "missing".into()],
            force: true,
            ..Default::default()
        };
        let results = admin.repair(&args, Progress::none()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].job_name, "repair-d1");

        // Second run finds the job and skips it
        let results = admin.repair(&args, Progress::none()).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(cluster.jobs.lock().len(), 1);
    }

    #[test]
    fn test_repair_job_shape() {
        let drive = DirectPVDrive::initialized(crate::crd::NewDrive {
            fsuuid: "d1".into(),
            node_id: "node-1".into(),
            drive_name: "sda".into(),
            ..Default::default()
        });
        let template = NodeServerTemplate {
            image: "quay.io/minio/directpv:latest".into(),
            ..Default::default()
        };
        let job = repair_job(
            &drive,
            &RepairArgs {
                disable_prefetch: true,
                dry_run: true,
                ..Default::default()
            },
            &template,
        );

        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(1));
        assert_eq!(spec.ttl_seconds_after_finished, Some(300));
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.service_account_name.as_deref(), Some(IDENTITY));
        assert_eq!(
            pod.node_selector.unwrap().get(&LabelKey::Node.key()).map(String::as_str),
            Some("node-1")
        );
        assert_eq!(pod.volumes.unwrap().len(), 5);
        let container = &pod.containers[0];
        assert_eq!(container.image.as_deref(), Some("quay.io/minio/directpv:latest"));
        assert_eq!(
            container.command.clone().unwrap(),
            vec![
                "/directpv",
                "repair",
                "d1",
                "--kube-node-name=node-1",
                "--disable-prefetch",
                "--dry-run"
            ]
        );
    }
}
