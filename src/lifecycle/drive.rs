//! Drive lifecycle engine
//!
//! State transitions on drives and volumes. Every transition re-reads the
//! object, applies a guarded mutation and writes it back, retrying on
//! resource-version conflicts. A mutation that finds the object already
//! in the target state reports [`Transition::Unchanged`] and writes nothing.

use crate::crd::labels::{remove_label, set_label, set_reserved_label, user_label_key};
use crate::crd::{DirectPVDrive, DirectPVVolume, DriveStatus, LabelKey, VolumeStatus};
use crate::domain::ports::{ResourceStore, StoreObject};
use crate::error::{Error, Result};
use crate::store::{retry_on_conflict, Clients, RetryConfig};
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Transition<K> {
    /// The object was changed (and written unless dry-run)
    Changed(K),
    /// The object was already in the requested state
    Unchanged(K),
}

impl<K> Transition<K> {
    pub fn is_changed(&self) -> bool {
        matches!(self, Transition::Changed(_))
    }

    pub fn object(&self) -> &K {
        match self {
            Transition::Changed(obj) | Transition::Unchanged(obj) => obj,
        }
    }

    pub fn into_object(self) -> K {
        match self {
            Transition::Changed(obj) | Transition::Unchanged(obj) => obj,
        }
    }
}

/// A label change on a drive or volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelChange {
    /// Fully qualified, non-reserved key
    pub key: String,
    pub value: String,
    pub remove: bool,
}

impl LabelChange {
    /// Set `key=value`; the key is qualified and checked against reserved keys
    pub fn set(key: &str, value: &str) -> Result<Self> {
        Ok(Self {
            key: user_label_key(key)?,
            value: value.to_string(),
            remove: false,
        })
    }

    /// Remove `key`
    pub fn remove(key: &str) -> Result<Self> {
        Ok(Self {
            key: user_label_key(key)?,
            value: String::new(),
            remove: true,
        })
    }

    fn apply(&self, meta: &mut kube::api::ObjectMeta) -> bool {
        if self.remove {
            remove_label(meta, &self.key)
        } else {
            set_label(meta, &self.key, &self.value)
        }
    }
}

impl std::fmt::Display for LabelChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.remove {
            write!(f, "{}", self.key)
        } else {
            write!(f, "{}={}", self.key, self.value)
        }
    }
}

// =============================================================================
// Lifecycle Engine
// =============================================================================

/// Guarded transitions over the resource store
pub struct DriveLifecycle {
    clients: Clients,
    retry: RetryConfig,
    dry_run: bool,
}

impl DriveLifecycle {
    pub fn new(clients: Clients) -> Self {
        Self {
            clients,
            retry: RetryConfig::default(),
            dry_run: false,
        }
    }

    /// Evaluate guards and mutations without writing
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    /// Re-read, mutate and write back one object.
    ///
    /// `mutate` returns `Ok(false)` when the object needs no change.
    async fn transition<K, F>(
        &self,
        store: &Arc<dyn ResourceStore<K>>,
        name: &str,
        mutate: F,
    ) -> Result<Transition<K>>
    where
        K: StoreObject,
        F: Fn(&mut K) -> Result<bool> + Send + Sync,
    {
        let mutate = &mutate;
        retry_on_conflict(&self.retry, move || async move {
            let mut object = store.get(name).await?;
            if !mutate(&mut object)? {
                return Ok(Transition::Unchanged(object));
            }
            if self.dry_run {
                return Ok(Transition::Changed(object));
            }
            Ok(Transition::Changed(store.update(&object).await?))
        })
        .await
    }

    // =========================================================================
    // Drive Transitions
    // =========================================================================

    /// Mark a drive unschedulable. Refused while any of its volumes is Pending.
    pub async fn cordon(&self, drive_id: &str) -> Result<Transition<DirectPVDrive>> {
        let drive = self.clients.drives.get(drive_id).await?;
        if drive.is_unschedulable() {
            return Ok(Transition::Unchanged(drive));
        }

        let volume_names = drive.volumes();
        if !volume_names.is_empty() {
            let volumes = self
                .clients
                .volume_lister()
                .volume_name_selector(volume_names)
                .ignore_not_found(true)
                .get()
                .await?;
            if volumes
                .iter()
                .any(|v| v.volume_status() == VolumeStatus::Pending)
            {
                return Err(Error::State(format!(
                    "unable to cordon drive {}; pending volumes found",
                    drive_id
                )));
            }
        }

        let result = self
            .transition(&self.clients.drives, drive_id, |drive| {
                if drive.spec.unschedulable {
                    return Ok(false);
                }
                drive.spec.unschedulable = true;
                Ok(true)
            })
            .await?;
        info!("Drive {} cordoned", drive_id);
        Ok(result)
    }

    pub async fn uncordon(&self, drive_id: &str) -> Result<Transition<DirectPVDrive>> {
        self.transition(&self.clients.drives, drive_id, |drive| {
            if !drive.spec.unschedulable {
                return Ok(false);
            }
            drive.spec.unschedulable = false;
            Ok(true)
        })
        .await
    }

    /// Suspend a drive; its volumes are served read-only until resumed
    pub async fn suspend(&self, drive_id: &str) -> Result<Transition<DirectPVDrive>> {
        self.transition(&self.clients.drives, drive_id, |drive| {
            if drive.spec.suspended {
                return Ok(false);
            }
            drive.spec.suspended = true;
            set_reserved_label(&mut drive.metadata, LabelKey::Suspend, "true");
            Ok(true)
        })
        .await
    }

    pub async fn resume(&self, drive_id: &str) -> Result<Transition<DirectPVDrive>> {
        self.transition(&self.clients.drives, drive_id, |drive| {
            if !drive.spec.suspended {
                return Ok(false);
            }
            drive.spec.suspended = false;
            remove_label(&mut drive.metadata, &LabelKey::Suspend.key());
            Ok(true)
        })
        .await
    }

    /// Ready → Released; the filesystem and resource are kept
    pub async fn release(&self, drive_id: &str) -> Result<Transition<DirectPVDrive>> {
        self.transition(&self.clients.drives, drive_id, |drive| {
            match drive.drive_status() {
                DriveStatus::Released => return Ok(false),
                DriveStatus::Ready => {}
                other => {
                    return Err(Error::State(format!(
                        "unable to release drive {} in {} state",
                        drive.drive_id(),
                        other
                    )))
                }
            }
            if drive.volume_count() > 0 {
                return Err(Error::State(format!(
                    "unable to release drive {}; volumes found: {}",
                    drive.drive_id(),
                    drive.volumes().join(", ")
                )));
            }
            drive.set_drive_status(DriveStatus::Released);
            Ok(true)
        })
        .await
    }

    /// Released → Ready; the node reconciler verifies the mount afterwards
    pub async fn unrelease(&self, drive_id: &str) -> Result<Transition<DirectPVDrive>> {
        self.transition(&self.clients.drives, drive_id, |drive| {
            match drive.drive_status() {
                DriveStatus::Ready => Ok(false),
                DriveStatus::Released => {
                    drive.set_drive_status(DriveStatus::Ready);
                    Ok(true)
                }
                other => Err(Error::State(format!(
                    "unable to unrelease drive {} in {} state",
                    drive.drive_id(),
                    other
                ))),
            }
        })
        .await
    }

    /// Any state → Removed, provided no volume references the drive
    pub async fn remove(&self, drive_id: &str) -> Result<Transition<DirectPVDrive>> {
        self.transition(&self.clients.drives, drive_id, |drive| {
            if drive.drive_status() == DriveStatus::Removed {
                return Ok(false);
            }
            ensure_no_volumes(drive)?;
            drive.set_drive_status(DriveStatus::Removed);
            Ok(true)
        })
        .await
    }

    /// Apply a user label change to a drive
    pub async fn label_drive(
        &self,
        drive_id: &str,
        change: &LabelChange,
    ) -> Result<Transition<DirectPVDrive>> {
        self.transition(&self.clients.drives, drive_id, |drive| {
            Ok(change.apply(&mut drive.metadata))
        })
        .await
    }

    // =========================================================================
    // Move
    // =========================================================================

    /// Transfer the volume references of a cordoned source drive to a
    /// cordoned destination drive on the same node.
    ///
    /// The destination takes over the finalizers and capacity and enters
    /// Moving; the node reconciler relabels the volumes and returns it to
    /// Ready.
    pub async fn move_volumes(
        &self,
        source_id: &str,
        destination_id: &str,
    ) -> Result<Vec<DirectPVVolume>> {
        if source_id == destination_id {
            return Err(Error::Validation(
                "source and destination are same".into(),
            ));
        }

        let mut source = self.clients.drives.get(source_id).await?;
        if !source.is_unschedulable() {
            return Err(Error::State("source drive is not cordoned".into()));
        }

        let volume_names = source.volumes();
        if volume_names.is_empty() {
            return Err(Error::State(format!(
                "no volumes found in source drive {}",
                source_id
            )));
        }

        let volumes = self
            .clients
            .volume_lister()
            .volume_name_selector(volume_names)
            .get()
            .await?;
        if let Some(published) = volumes.iter().find(|v| v.is_published()) {
            return Err(Error::State(format!(
                "cannot move published volume {}",
                published.name_any()
            )));
        }
        if volumes.is_empty() {
            return Err(Error::State(format!(
                "no volumes found in source drive {}",
                source_id
            )));
        }
        let required: u64 = volumes.iter().map(|v| v.total_capacity()).sum();

        let mut destination = self.clients.drives.get(destination_id).await?;
        if destination.node_id() != source.node_id() {
            return Err(Error::State(format!(
                "source and destination drives must be in same node; source node {}; destination node {}",
                source.node_id(),
                destination.node_id()
            )));
        }
        if !destination.is_unschedulable() {
            return Err(Error::State("destination drive is not cordoned".into()));
        }
        if destination.drive_status() != DriveStatus::Ready {
            return Err(Error::State(
                "destination drive is not in ready state".into(),
            ));
        }
        if source.access_tier() != destination.access_tier() {
            return Err(Error::State(format!(
                "source drive access-tier {} and destination drive access-tier {} differ",
                source.access_tier(),
                destination.access_tier()
            )));
        }
        if destination.free_capacity() < required {
            return Err(Error::State(format!(
                "insufficient free capacity on destination drive; required={} free={}",
                required,
                destination.free_capacity()
            )));
        }

        for volume in &volumes {
            if destination.add_volume_finalizer(&volume.name_any()) {
                destination.allocate_capacity(volume.total_capacity())?;
            }
        }
        destination.set_drive_status(DriveStatus::Moving);
        if !self.dry_run {
            self.clients.drives.update(&destination).await.map_err(|e| {
                Error::OperationFailed(format!(
                    "unable to move volumes to destination drive; {}",
                    e
                ))
            })?;
        }
        for volume in &volumes {
            info!(
                "Moving volume {} from drive {} to {}",
                volume.name_any(),
                source_id,
                destination_id
            );
        }

        source.reset_finalizers();
        for volume in &volumes {
            source.release_capacity(volume.total_capacity());
        }
        if !self.dry_run {
            self.clients.drives.update(&source).await.map_err(|e| {
                Error::OperationFailed(format!(
                    "unable to remove volume references in source drive; {}",
                    e
                ))
            })?;
        }

        Ok(volumes)
    }

    // =========================================================================
    // Volume Transitions
    // =========================================================================

    pub async fn label_volume(
        &self,
        volume_name: &str,
        change: &LabelChange,
    ) -> Result<Transition<DirectPVVolume>> {
        self.transition(&self.clients.volumes, volume_name, |volume| {
            Ok(change.apply(&mut volume.metadata))
        })
        .await
    }

    pub async fn suspend_volume(&self, volume_name: &str) -> Result<Transition<DirectPVVolume>> {
        self.transition(&self.clients.volumes, volume_name, |volume| {
            if volume.spec.suspended {
                return Ok(false);
            }
            volume.spec.suspended = true;
            set_reserved_label(&mut volume.metadata, LabelKey::Suspend, "true");
            Ok(true)
        })
        .await
    }

    pub async fn resume_volume(&self, volume_name: &str) -> Result<Transition<DirectPVVolume>> {
        self.transition(&self.clients.volumes, volume_name, |volume| {
            if !volume.spec.suspended {
                return Ok(false);
            }
            volume.spec.suspended = false;
            remove_label(&mut volume.metadata, &LabelKey::Suspend.key());
            Ok(true)
        })
        .await
    }

    /// Strip PV protection and delete a volume whose PV is gone or released
    pub async fn purge_volume(&self, volume_name: &str) -> Result<()> {
        let volumes = &self.clients.volumes;
        let transition = self
            .transition(volumes, volume_name, |volume| Ok(volume.remove_pv_protection()))
            .await?;
        debug!(
            "Removed PV protection from {} ({})",
            volume_name,
            transition.is_changed()
        );
        if !self.dry_run {
            volumes.delete(volume_name).await?;
        }
        Ok(())
    }
}

/// A drive may only be deleted or removed once no volume references it
pub fn ensure_no_volumes(drive: &DirectPVDrive) -> Result<()> {
    match drive.volume_count() {
        0 => Ok(()),
        count => Err(Error::FinalizersPresent {
            kind: "DirectPVDrive".into(),
            name: format!("{} ({} volumes)", drive.drive_id(), count),
        }),
    }
}
