//! DirectPVVolume CRD
//!
//! A provisioned slice of a drive. Volumes bind to exactly one drive through
//! the `drive` label and are never rebound; a move relabels the volume after
//! the destination drive has taken over its finalizer.

use super::labels::{self, LabelKey};
use super::types::{Condition, VolumeStatus};
use crate::consts::{APP_NAME, LATEST_API_VERSION};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Finalizer held while the backing PersistentVolume exists
pub const VOLUME_PV_PROTECTION_FINALIZER: &str = "directpv.min.io/pv-protection";

/// Finalizer held until the volume's data directory is purged
pub const VOLUME_PURGE_PROTECTION_FINALIZER: &str = "directpv.min.io/purge-protection";

// =============================================================================
// DirectPVVolume CRD
// =============================================================================

/// Desired state of a volume
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "directpv.min.io",
    version = "v1beta1",
    kind = "DirectPVVolume",
    plural = "directpvvolumes",
    status = "DirectPVVolumeStatus",
    printcolumn = r#"{"name": "Capacity", "type": "integer", "jsonPath": ".spec.totalCapacity"}"#,
    printcolumn = r#"{"name": "Node", "type": "string", "jsonPath": ".metadata.labels.directpv\\.min\\.io/node"}"#,
    printcolumn = r#"{"name": "Drive", "type": "string", "jsonPath": ".metadata.labels.directpv\\.min\\.io/drive-name"}"#,
    printcolumn = r#"{"name": "Status", "type": "string", "jsonPath": ".status.status"}"#,
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct DirectPVVolumeSpec {
    /// Requested capacity in bytes
    pub total_capacity: u64,

    /// Claim the volume was provisioned for
    #[serde(default)]
    pub claim_id: String,

    #[serde(default)]
    pub suspended: bool,
}

/// Observed state of a volume
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DirectPVVolumeStatus {
    #[serde(default)]
    pub status: VolumeStatus,

    #[serde(default)]
    pub total_capacity: u64,

    #[serde(default)]
    pub available_capacity: u64,

    #[serde(default)]
    pub used_capacity: u64,

    /// Filesystem UUID of the drive holding the data
    #[serde(default)]
    pub fsuuid: String,

    /// Data directory on the drive
    #[serde(default)]
    pub data_path: String,

    #[serde(default)]
    pub staging_target_path: String,

    /// Non-empty while the volume is mounted into a pod
    #[serde(default)]
    pub target_path: String,

    #[serde(default)]
    pub drive_lost: bool,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Inputs for a new volume record
#[derive(Debug, Clone)]
pub struct NewVolume {
    pub name: String,
    pub node_id: String,
    pub drive_id: String,
    pub drive_name: String,
    pub total_capacity: u64,
    pub claim_id: String,
}

// =============================================================================
// Implementations
// =============================================================================

impl DirectPVVolume {
    /// Build a pending volume bound to a drive
    pub fn bound(new: NewVolume) -> Self {
        let mut volume = DirectPVVolume::new(
            &new.name,
            DirectPVVolumeSpec {
                total_capacity: new.total_capacity,
                claim_id: new.claim_id.clone(),
                suspended: false,
            },
        );
        volume.metadata.finalizers = Some(vec![
            VOLUME_PV_PROTECTION_FINALIZER.to_string(),
            VOLUME_PURGE_PROTECTION_FINALIZER.to_string(),
        ]);
        labels::set_reserved_label(&mut volume.metadata, LabelKey::Node, &new.node_id);
        labels::set_reserved_label(&mut volume.metadata, LabelKey::DriveId, &new.drive_id);
        labels::set_reserved_label(&mut volume.metadata, LabelKey::DriveName, &new.drive_name);
        labels::set_reserved_label(&mut volume.metadata, LabelKey::Version, LATEST_API_VERSION);
        labels::set_reserved_label(&mut volume.metadata, LabelKey::CreatedBy, APP_NAME);
        if !new.claim_id.is_empty() {
            labels::set_reserved_label(&mut volume.metadata, LabelKey::ClaimId, &new.claim_id);
        }
        volume.status = Some(DirectPVVolumeStatus {
            total_capacity: new.total_capacity,
            available_capacity: new.total_capacity,
            fsuuid: new.drive_id,
            ..Default::default()
        });
        volume
    }

    pub fn node_id(&self) -> &str {
        labels::get_label(&self.metadata, LabelKey::Node)
    }

    /// Drive this volume is bound to
    pub fn drive_id(&self) -> &str {
        labels::get_label(&self.metadata, LabelKey::DriveId)
    }

    pub fn set_drive_id(&mut self, drive_id: &str) -> bool {
        labels::set_reserved_label(&mut self.metadata, LabelKey::DriveId, drive_id)
    }

    pub fn drive_name(&self) -> &str {
        labels::get_label(&self.metadata, LabelKey::DriveName)
    }

    pub fn set_drive_name(&mut self, drive_name: &str) -> bool {
        labels::set_reserved_label(&mut self.metadata, LabelKey::DriveName, drive_name)
    }

    pub fn pod_name(&self) -> &str {
        labels::get_label(&self.metadata, LabelKey::PodName)
    }

    pub fn pod_namespace(&self) -> &str {
        labels::get_label(&self.metadata, LabelKey::PodNamespace)
    }

    /// Mutable status, created on first access
    pub fn status_mut(&mut self) -> &mut DirectPVVolumeStatus {
        self.status.get_or_insert_with(DirectPVVolumeStatus::default)
    }

    pub fn volume_status(&self) -> VolumeStatus {
        self.status.as_ref().map(|s| s.status).unwrap_or_default()
    }

    /// Capacity accounted against the drive
    pub fn total_capacity(&self) -> u64 {
        self.status
            .as_ref()
            .map(|s| s.total_capacity)
            .filter(|c| *c > 0)
            .unwrap_or(self.spec.total_capacity)
    }

    pub fn fsuuid(&self) -> &str {
        self.status.as_ref().map(|s| s.fsuuid.as_str()).unwrap_or_default()
    }

    /// Mounted into a running pod
    pub fn is_published(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| !s.target_path.is_empty())
            .unwrap_or(false)
    }

    pub fn is_staged(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| !s.staging_target_path.is_empty())
            .unwrap_or(false)
    }

    pub fn is_drive_lost(&self) -> bool {
        self.status.as_ref().map(|s| s.drive_lost).unwrap_or(false)
    }

    pub fn is_suspended(&self) -> bool {
        self.spec.suspended
    }

    /// The PV is gone: only purge protection remains
    pub fn is_released(&self) -> bool {
        let finalizers = self.finalizers();
        finalizers.len() == 1 && finalizers[0] == VOLUME_PURGE_PROTECTION_FINALIZER
    }

    /// Strip the PV-protection finalizer; returns false when absent
    pub fn remove_pv_protection(&mut self) -> bool {
        remove_finalizer(self.finalizers_mut(), VOLUME_PV_PROTECTION_FINALIZER)
    }

    /// Strip the purge-protection finalizer; returns false when absent
    pub fn remove_purge_protection(&mut self) -> bool {
        remove_finalizer(self.finalizers_mut(), VOLUME_PURGE_PROTECTION_FINALIZER)
    }

    /// Rebind the volume to a new drive after a move
    pub fn relabel_drive(&mut self, drive_id: &str, drive_name: &str, fsuuid: &str) {
        self.set_drive_id(drive_id);
        self.set_drive_name(drive_name);
        let staged = self.is_staged();
        let status = self.status_mut();
        status.fsuuid = fsuuid.to_string();
        status.data_path.clear();
        if !staged {
            status.status = VolumeStatus::Pending;
        }
    }
}

fn remove_finalizer(finalizers: &mut Vec<String>, finalizer: &str) -> bool {
    let before = finalizers.len();
    finalizers.retain(|f| f != finalizer);
    before != finalizers.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_volume() -> DirectPVVolume {
        DirectPVVolume::bound(NewVolume {
            name: "pvc-1".into(),
            node_id: "node-1".into(),
            drive_id: "drive-a".into(),
            drive_name: "sda".into(),
            total_capacity: 10,
            claim_id: "claim-1".into(),
        })
    }

    #[test]
    fn test_bound_volume() {
        let volume = sample_volume();
        assert_eq!(volume.drive_id(), "drive-a");
        assert_eq!(volume.node_id(), "node-1");
        assert_eq!(volume.total_capacity(), 10);
        assert_eq!(volume.volume_status(), VolumeStatus::Pending);
        assert!(!volume.is_published());
        assert!(!volume.is_released());
    }

    #[test]
    fn test_released_after_pv_protection_removed() {
        let mut volume = sample_volume();
        assert!(volume.remove_pv_protection());
        assert!(!volume.remove_pv_protection());
        assert!(volume.is_released());

        assert!(volume.remove_purge_protection());
        assert!(volume.finalizers().is_empty());
        assert!(!volume.is_released());
    }

    #[test]
    fn test_relabel_drive() {
        let mut volume = sample_volume();
        volume.status_mut().status = VolumeStatus::Ready;
        volume.status_mut().data_path = "/var/lib/directpv/mnt/drive-a/pvc-1".into();

        volume.relabel_drive("drive-b", "sdb", "drive-b");
        assert_eq!(volume.drive_id(), "drive-b");
        assert_eq!(volume.drive_name(), "sdb");
        assert_eq!(volume.fsuuid(), "drive-b");
        assert_eq!(volume.volume_status(), VolumeStatus::Pending);
        assert!(volume.status.as_ref().unwrap().data_path.is_empty());
    }

    #[test]
    fn test_published_flag() {
        let mut volume = sample_volume();
        volume.status_mut().target_path = "/var/lib/kubelet/pods/x/volumes/pvc-1".into();
        assert!(volume.is_published());
    }
}
