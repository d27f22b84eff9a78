//! DirectPVDrive CRD
//!
//! A managed block device that has been formatted and adopted. The drive's
//! name is its filesystem UUID. Volume references are tracked as finalizers
//! so the API server refuses to delete a drive that still hosts volumes.

use super::labels::{self, LabelKey};
use super::types::{AccessTier, Condition, DriveStatus};
use crate::consts::{APP_NAME, GROUP_NAME, LATEST_API_VERSION};
use crate::error::{Error, Result};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Finalizer present on every drive until it is removed
pub const DRIVE_DATA_PROTECTION_FINALIZER: &str = "directpv.min.io/data-protection";

/// Prefix of the per-volume finalizers on a drive
pub const DRIVE_VOLUME_FINALIZER_PREFIX: &str = "directpv.min.io.volume/";

// =============================================================================
// DirectPVDrive CRD
// =============================================================================

/// Desired state of a drive
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "directpv.min.io",
    version = "v1beta1",
    kind = "DirectPVDrive",
    plural = "directpvdrives",
    status = "DirectPVDriveStatus",
    printcolumn = r#"{"name": "Node", "type": "string", "jsonPath": ".metadata.labels.directpv\\.min\\.io/node"}"#,
    printcolumn = r#"{"name": "Name", "type": "string", "jsonPath": ".metadata.labels.directpv\\.min\\.io/drive-name"}"#,
    printcolumn = r#"{"name": "Status", "type": "string", "jsonPath": ".status.status"}"#,
    printcolumn = r#"{"name": "Free", "type": "integer", "jsonPath": ".status.freeCapacity"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct DirectPVDriveSpec {
    /// Cordoned drives receive no new volumes
    #[serde(default)]
    pub unschedulable: bool,

    /// Suspended drives expose their volumes read-only
    #[serde(default)]
    pub suspended: bool,
}

/// Observed state of a drive
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DirectPVDriveStatus {
    #[serde(default)]
    pub total_capacity: u64,

    #[serde(default)]
    pub allocated_capacity: u64,

    #[serde(default)]
    pub free_capacity: u64,

    /// Filesystem UUID stamped at format time
    #[serde(default)]
    pub fsuuid: String,

    #[serde(default)]
    pub status: DriveStatus,

    /// identity/rack/zone/region/node of the hosting node
    #[serde(default)]
    pub topology: BTreeMap<String, String>,

    /// Vendor/model hint
    #[serde(default)]
    pub make: String,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Inputs for a freshly initialized drive
#[derive(Debug, Clone, Default)]
pub struct NewDrive {
    pub fsuuid: String,
    pub node_id: String,
    pub drive_name: String,
    pub make: String,
    pub total_capacity: u64,
    pub access_tier: AccessTier,
    pub topology: BTreeMap<String, String>,
}

// =============================================================================
// Implementations
// =============================================================================

impl DirectPVDrive {
    /// Build the resource created by a node agent after a successful format
    pub fn initialized(new: NewDrive) -> Self {
        let mut drive = DirectPVDrive::new(&new.fsuuid, DirectPVDriveSpec::default());
        drive.metadata.finalizers = Some(vec![DRIVE_DATA_PROTECTION_FINALIZER.to_string()]);
        labels::set_reserved_label(&mut drive.metadata, LabelKey::Node, &new.node_id);
        labels::set_reserved_label(&mut drive.metadata, LabelKey::DriveName, &new.drive_name);
        labels::set_reserved_label(&mut drive.metadata, LabelKey::AccessTier, new.access_tier.as_str());
        labels::set_reserved_label(&mut drive.metadata, LabelKey::Version, LATEST_API_VERSION);
        labels::set_reserved_label(&mut drive.metadata, LabelKey::CreatedBy, APP_NAME);

        // Capacity is accounted from bound volumes only; a new drive has none
        drive.status = Some(DirectPVDriveStatus {
            total_capacity: new.total_capacity,
            allocated_capacity: 0,
            free_capacity: new.total_capacity,
            fsuuid: new.fsuuid,
            status: DriveStatus::Ready,
            topology: new.topology,
            make: new.make,
            conditions: Vec::new(),
        });
        drive
    }

    /// Drive identifier (the filesystem UUID)
    pub fn drive_id(&self) -> String {
        self.name_any()
    }

    /// Node hosting this drive
    pub fn node_id(&self) -> &str {
        labels::get_label(&self.metadata, LabelKey::Node)
    }

    /// Kernel device name at last observation
    pub fn drive_name(&self) -> &str {
        labels::get_label(&self.metadata, LabelKey::DriveName)
    }

    /// Set the kernel device name label
    pub fn set_drive_name(&mut self, name: &str) -> bool {
        labels::set_reserved_label(&mut self.metadata, LabelKey::DriveName, name)
    }

    /// Access tier, defaulting when the label is missing or unknown
    pub fn access_tier(&self) -> AccessTier {
        labels::get_label(&self.metadata, LabelKey::AccessTier)
            .parse()
            .unwrap_or_default()
    }

    /// Set the access tier label
    pub fn set_access_tier(&mut self, tier: AccessTier) -> bool {
        labels::set_reserved_label(&mut self.metadata, LabelKey::AccessTier, tier.as_str())
    }

    /// Mutable status, created on first access
    pub fn status_mut(&mut self) -> &mut DirectPVDriveStatus {
        self.status.get_or_insert_with(DirectPVDriveStatus::default)
    }

    /// Current lifecycle state
    pub fn drive_status(&self) -> DriveStatus {
        self.status.as_ref().map(|s| s.status).unwrap_or_default()
    }

    pub fn set_drive_status(&mut self, status: DriveStatus) {
        self.status_mut().status = status;
    }

    pub fn fsuuid(&self) -> &str {
        self.status.as_ref().map(|s| s.fsuuid.as_str()).unwrap_or_default()
    }

    pub fn make(&self) -> &str {
        self.status.as_ref().map(|s| s.make.as_str()).unwrap_or_default()
    }

    pub fn total_capacity(&self) -> u64 {
        self.status.as_ref().map(|s| s.total_capacity).unwrap_or(0)
    }

    pub fn free_capacity(&self) -> u64 {
        self.status.as_ref().map(|s| s.free_capacity).unwrap_or(0)
    }

    pub fn allocated_capacity(&self) -> u64 {
        self.status.as_ref().map(|s| s.allocated_capacity).unwrap_or(0)
    }

    pub fn is_unschedulable(&self) -> bool {
        self.spec.unschedulable
    }

    pub fn is_suspended(&self) -> bool {
        self.spec.suspended
    }

    // =========================================================================
    // Volume Finalizers
    // =========================================================================

    /// Names of volumes referenced by this drive
    pub fn volumes(&self) -> Vec<String> {
        self.finalizers()
            .iter()
            .filter_map(|f| f.strip_prefix(DRIVE_VOLUME_FINALIZER_PREFIX))
            .map(str::to_string)
            .collect()
    }

    /// Number of volumes referenced by this drive
    pub fn volume_count(&self) -> usize {
        self.finalizers()
            .iter()
            .filter(|f| f.starts_with(DRIVE_VOLUME_FINALIZER_PREFIX))
            .count()
    }

    /// Add a volume finalizer; returns false when already present
    pub fn add_volume_finalizer(&mut self, volume: &str) -> bool {
        let finalizer = volume_finalizer(volume);
        let finalizers = self.finalizers_mut();
        if finalizers.contains(&finalizer) {
            return false;
        }
        finalizers.push(finalizer);
        true
    }

    /// Remove a volume finalizer; returns false when absent
    pub fn remove_volume_finalizer(&mut self, volume: &str) -> bool {
        let finalizer = volume_finalizer(volume);
        let finalizers = self.finalizers_mut();
        let before = finalizers.len();
        finalizers.retain(|f| f != &finalizer);
        before != finalizers.len()
    }

    /// Drop every volume finalizer, keeping only data protection
    pub fn reset_finalizers(&mut self) {
        self.metadata.finalizers = Some(vec![DRIVE_DATA_PROTECTION_FINALIZER.to_string()]);
    }

    /// Drop all finalizers so the drive can be deleted
    pub fn remove_finalizers(&mut self) {
        self.metadata.finalizers = Some(Vec::new());
    }

    // =========================================================================
    // Capacity Accounting
    // =========================================================================

    /// Reserve capacity for a volume
    pub fn allocate_capacity(&mut self, capacity: u64) -> Result<()> {
        let name = self.name_any();
        let status = self.status_mut();
        if status.free_capacity < capacity {
            return Err(Error::State(format!(
                "insufficient free capacity on drive {}; required={} free={}",
                name, capacity, status.free_capacity
            )));
        }
        status.free_capacity -= capacity;
        status.allocated_capacity = status.total_capacity - status.free_capacity;
        Ok(())
    }

    /// Return capacity from a released volume
    pub fn release_capacity(&mut self, capacity: u64) {
        let status = self.status_mut();
        status.free_capacity = (status.free_capacity + capacity).min(status.total_capacity);
        status.allocated_capacity = status.total_capacity - status.free_capacity;
    }

    /// Labels selectable by the user (everything except reserved keys)
    pub fn user_labels(&self) -> BTreeMap<String, String> {
        self.labels()
            .iter()
            .filter(|(k, _)| !labels::is_reserved_key(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Finalizer naming a volume on its drive
pub fn volume_finalizer(volume: &str) -> String {
    format!("{}.volume/{}", GROUP_NAME, volume)
}
