//! Drive and volume reconcilers
//!
//! Node-local loops that finish what admin transitions start:
//! - Moving drives get their volumes relabelled and return to Ready;
//! - Removed drives are unmounted and deleted;
//! - Ready drives whose device vanished become Lost, and Lost drives whose
//!   device reappears are remounted;
//! - released volumes being deleted give their capacity back to the drive.

use super::drive::ensure_no_volumes;
use crate::crd::{set_condition, Condition, DirectPVDrive, DirectPVVolume, DriveStatus};
use crate::device::Device;
use crate::domain::ports::WatchEvent;
use crate::error::{ignore_not_found, Error, Result};
use crate::node::NodeAgent;
use crate::store::{retry_on_conflict, RetryConfig};
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const WATCH_RESTART_DELAY: Duration = Duration::from_secs(5);

/// Condition type recorded when a lost drive fails to remount
pub const MOUNT_ERROR_CONDITION: &str = "MountError";

// =============================================================================
// Drive Reconciler
// =============================================================================

/// Reconciles the drives of one node
pub struct DriveReconciler {
    agent: Arc<NodeAgent>,
    retry: RetryConfig,
}

impl DriveReconciler {
    pub fn new(agent: Arc<NodeAgent>) -> Self {
        Self {
            agent,
            retry: RetryConfig::default(),
        }
    }

    /// Act on one observed drive
    pub async fn reconcile(&self, drive: &DirectPVDrive) -> Result<()> {
        if drive.node_id() != self.agent.node_id() {
            return Ok(());
        }
        match drive.drive_status() {
            DriveStatus::Moving => self.complete_move(drive).await,
            DriveStatus::Removed => self.remove(drive).await,
            DriveStatus::Ready | DriveStatus::Lost => self.check_device(drive).await,
            _ => Ok(()),
        }
    }

    /// Relabel every volume now held by a Moving drive, then return it to Ready
    async fn complete_move(&self, drive: &DirectPVDrive) -> Result<()> {
        let clients = self.agent.clients();
        let drive_id = drive.drive_id();

        for volume_name in drive.volumes() {
            let mut volume = clients.volumes.get(&volume_name).await?;
            if volume.fsuuid() == drive.fsuuid() {
                continue;
            }
            if volume.is_published() {
                return Err(Error::State(format!(
                    "cannot move published volume {} to drive {}",
                    volume_name, drive_id
                )));
            }
            if volume.node_id() != drive.node_id() {
                return Err(Error::State(format!(
                    "volume {} must be on same node of destination drive; volume node {}; destination node {}",
                    volume_name,
                    volume.node_id(),
                    drive.node_id()
                )));
            }

            let source_id = volume.drive_id().to_string();
            self.release_source(&source_id, &volume_name, volume.total_capacity())
                .await?;

            volume.relabel_drive(&drive_id, drive.drive_name(), drive.fsuuid());
            clients.volumes.update(&volume).await?;
            info!(
                "Volume {} moved from drive {} to drive {}",
                volume_name, source_id, drive_id
            );
        }

        retry_on_conflict(&self.retry, || {
            let drives = clients.drives.clone();
            let drive_id = drive_id.clone();
            async move {
                let mut latest = drives.get(&drive_id).await?;
                if latest.drive_status() != DriveStatus::Moving {
                    return Ok(latest);
                }
                latest.set_drive_status(DriveStatus::Ready);
                drives.update(&latest).await
            }
        })
        .await?;
        Ok(())
    }

    /// A move interrupted after the destination committed leaves the source
    /// still holding the volume; drop the reference and give back its capacity.
    async fn release_source(
        &self,
        source_id: &str,
        volume_name: &str,
        capacity: u64,
    ) -> Result<()> {
        let drives = &self.agent.clients().drives;
        let Some(mut source) = ignore_not_found(drives.get(source_id).await)? else {
            return Ok(());
        };
        if !source.remove_volume_finalizer(volume_name) {
            return Ok(());
        }
        warn!(
            "Source drive {} still references volume {}; releasing it",
            source_id, volume_name
        );
        source.release_capacity(capacity);
        drives.update(&source).await?;
        Ok(())
    }

    /// Unmount and delete a Removed drive
    async fn remove(&self, drive: &DirectPVDrive) -> Result<()> {
        ensure_no_volumes(drive)?;
        self.agent.formatter().unmount(drive.fsuuid()).await?;

        let drives = &self.agent.clients().drives;
        let mut drive = drive.clone();
        drive.remove_finalizers();
        drives.update(&drive).await?;
        ignore_not_found(drives.delete(&drive.name_any()).await)?;
        info!("Drive {} removed", drive.drive_id());
        Ok(())
    }

    async fn find_device(&self, fsuuid: &str) -> Result<Option<Device>> {
        let devices = self.agent.device_source().probe().await?;
        Ok(devices.into_iter().find(|d| d.fsuuid() == fsuuid))
    }

    /// Lost detection and recovery
    async fn check_device(&self, drive: &DirectPVDrive) -> Result<()> {
        let device = self.find_device(drive.fsuuid()).await?;
        let drives = &self.agent.clients().drives;
        let mut updated = drive.clone();

        match (drive.drive_status(), device) {
            (DriveStatus::Ready, None) => {
                warn!(
                    "Unable to find device by FSUUID {}; marking drive {} lost",
                    drive.fsuuid(),
                    drive.drive_id()
                );
                updated.set_drive_status(DriveStatus::Lost);
            }
            (DriveStatus::Ready, Some(device)) => {
                if device.mount_points.is_empty() {
                    debug!("Drive {} is not mounted; mounting", drive.drive_id());
                    self.agent
                        .formatter()
                        .mount(&device.path(), drive.fsuuid())
                        .await?;
                }
                if !updated.set_drive_name(&device.name) {
                    return Ok(());
                }
            }
            (DriveStatus::Lost, Some(device)) => {
                match self
                    .agent
                    .formatter()
                    .mount(&device.path(), drive.fsuuid())
                    .await
                {
                    Ok(()) => {
                        info!("Drive {} is back on device {}", drive.drive_id(), device.name);
                        updated.set_drive_status(DriveStatus::Ready);
                    }
                    Err(e) => {
                        error!("Unable to mount drive {}: {}", drive.drive_id(), e);
                        updated.set_drive_status(DriveStatus::Error);
                        set_condition(
                            &mut updated.status_mut().conditions,
                            Condition {
                                r#type: MOUNT_ERROR_CONDITION.into(),
                                status: "True".into(),
                                reason: "DriveMountError".into(),
                                message: format!("unable to mount; {}", e),
                            },
                        );
                    }
                }
                updated.set_drive_name(&device.name);
            }
            _ => return Ok(()),
        }

        drives.update(&updated).await?;
        Ok(())
    }

    /// Reconcile drives of this node until cancelled
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!("Drive reconciler started for {}", self.agent.node_id());
        while !cancel.is_cancelled() {
            if let Err(e) = self.watch(cancel.clone()).await {
                warn!("Drive watch failed: {}; restarting", e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(WATCH_RESTART_DELAY) => {}
                }
            }
        }
        Ok(())
    }

    async fn watch(&self, cancel: CancellationToken) -> Result<()> {
        let (mut events, _handle) = self
            .agent
            .clients()
            .drive_lister()
            .node_selector(vec![self.agent.node_id().to_string()])
            .watch(cancel.clone())
            .await?;

        while let Some(event) = events.recv().await {
            if let WatchEvent::Applied(drive) = event? {
                if let Err(e) = self.reconcile(&drive).await {
                    error!("Unable to reconcile drive {}: {}", drive.drive_id(), e);
                }
            }
        }
        if cancel.is_cancelled() {
            Ok(())
        } else {
            Err(Error::Watch("drive watch closed".into()))
        }
    }
}

// =============================================================================
// Volume Reconciler
// =============================================================================

/// Returns capacity of deleted volumes to their drives
pub struct VolumeReconciler {
    agent: Arc<NodeAgent>,
    retry: RetryConfig,
}

impl VolumeReconciler {
    pub fn new(agent: Arc<NodeAgent>) -> Self {
        Self {
            agent,
            retry: RetryConfig::default(),
        }
    }

    /// Finalize a released volume that is being deleted
    pub async fn reconcile(&self, volume: &DirectPVVolume) -> Result<()> {
        if volume.metadata.deletion_timestamp.is_none() || !volume.is_released() {
            return Ok(());
        }
        let clients = self.agent.clients();
        let volume_name = volume.name_any();
        let capacity = volume.total_capacity();

        retry_on_conflict(&self.retry, || {
            let drives = clients.drives.clone();
            let drive_id = volume.drive_id().to_string();
            let volume_name = volume_name.clone();
            async move {
                let Some(mut drive) = ignore_not_found(drives.get(&drive_id).await)? else {
                    return Ok(());
                };
                if drive.remove_volume_finalizer(&volume_name) {
                    drive.release_capacity(capacity);
                    drives.update(&drive).await?;
                }
                Ok(())
            }
        })
        .await?;

        let mut volume = volume.clone();
        if volume.remove_purge_protection() {
            ignore_not_found(clients.volumes.update(&volume).await)?;
        }
        info!("Volume {} purged", volume_name);
        Ok(())
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!("Volume reconciler started for {}", self.agent.node_id());
        while !cancel.is_cancelled() {
            if let Err(e) = self.watch(cancel.clone()).await {
                warn!("Volume watch failed: {}; restarting", e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(WATCH_RESTART_DELAY) => {}
                }
            }
        }
        Ok(())
    }

    async fn watch(&self, cancel: CancellationToken) -> Result<()> {
        let (mut events, _handle) = self
            .agent
            .clients()
            .volume_lister()
            .node_selector(vec![self.agent.node_id().to_string()])
            .watch(cancel.clone())
            .await?;

        while let Some(event) = events.recv().await {
            if let WatchEvent::Applied(volume) = event? {
                if let Err(e) = self.reconcile(&volume).await {
                    error!("Unable to reconcile volume {}: {}", volume.name_any(), e);
                }
            }
        }
        if cancel.is_cancelled() {
            Ok(())
        } else {
            Err(Error::Watch("volume watch closed".into()))
        }
    }
}
