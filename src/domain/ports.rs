//! Domain Ports - Core trait definitions for the control plane
//!
//! These traits define the boundaries between the lifecycle, workflow and
//! node logic and the systems around them: the orchestrator's API server,
//! the node's kernel interfaces and the cluster's core resources.
//! Adapters implement these traits to provide concrete functionality.

use crate::crd::{DirectPVDrive, DirectPVInitRequest, DirectPVNode, DirectPVVolume};
use crate::device::Device;
use crate::error::Result;
use crate::store::LabelSelector;
use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{LocalObjectReference, SecurityContext, Toleration};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

// =============================================================================
// Resource Store
// =============================================================================

/// Objects the resource store can hold
pub trait StoreObject:
    kube::Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Debug + Send + Sync + 'static
{
}

impl<K> StoreObject for K where
    K: kube::Resource<DynamicType = ()>
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static
{
}

/// A change observed on a watched resource
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<K> {
    /// Added or modified
    Applied(K),
    /// Removed from the store
    Deleted(K),
}

impl<K> WatchEvent<K> {
    pub fn object(&self) -> &K {
        match self {
            WatchEvent::Applied(obj) | WatchEvent::Deleted(obj) => obj,
        }
    }

    pub fn into_object(self) -> K {
        match self {
            WatchEvent::Applied(obj) | WatchEvent::Deleted(obj) => obj,
        }
    }
}

/// Stream of watch events, ended by dropping it
pub type WatchStream<K> = BoxStream<'static, Result<WatchEvent<K>>>;

/// Typed accessor over the orchestrator's API server for one resource kind.
///
/// `update` is a compare-and-swap on the object's resource version and
/// fails with `Error::Conflict` when the stored object has moved on.
#[async_trait]
pub trait ResourceStore<K: StoreObject>: Send + Sync {
    /// Get an object by name
    async fn get(&self, name: &str) -> Result<K>;

    /// List objects matching a label selector
    async fn list(&self, selector: &LabelSelector) -> Result<Vec<K>>;

    /// Create a new object
    async fn create(&self, object: &K) -> Result<K>;

    /// Replace an object, guarded by its resource version
    async fn update(&self, object: &K) -> Result<K>;

    /// Delete an object; objects with finalizers are only marked for deletion
    async fn delete(&self, name: &str) -> Result<()>;

    /// Delete every object matching a label selector
    async fn delete_collection(&self, selector: &LabelSelector) -> Result<()>;

    /// Watch objects matching a label selector, starting with the current state
    async fn watch(&self, selector: &LabelSelector) -> Result<WatchStream<K>>;
}

pub type DriveStore = Arc<dyn ResourceStore<DirectPVDrive>>;
pub type VolumeStore = Arc<dyn ResourceStore<DirectPVVolume>>;
pub type NodeStore = Arc<dyn ResourceStore<DirectPVNode>>;
pub type InitRequestStore = Arc<dyn ResourceStore<DirectPVInitRequest>>;

// =============================================================================
// Device Source
// =============================================================================

/// Read-only view of the node's block devices
#[async_trait]
pub trait DeviceSource: Send + Sync {
    /// Probe every block device on the node
    async fn probe(&self) -> Result<Vec<Device>>;

    /// Probe the devices with the given major:minor numbers
    async fn probe_devices(&self, major_minors: &[String]) -> Result<Vec<Device>>;

    /// Current mount points keyed by major:minor
    async fn mounts(&self) -> Result<BTreeMap<String, Vec<String>>>;
}

// =============================================================================
// Filesystem Formatter
// =============================================================================

/// Filesystem facts read back after formatting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsInfo {
    pub fsuuid: String,
    pub label: String,
    pub total_capacity: u64,
    pub free_capacity: u64,
}

/// Formats, mounts and stamps drives
#[async_trait]
pub trait Formatter: Send + Sync {
    /// Create the filesystem with the given UUID
    async fn make_fs(&self, device: &str, fsuuid: &str, force: bool) -> Result<FsInfo>;

    /// Mount at `<mount-root>/<fsuuid>`
    async fn mount(&self, device: &str, fsuuid: &str) -> Result<()>;

    /// Forced lazy unmount; succeeds when nothing is mounted
    async fn unmount(&self, fsuuid: &str) -> Result<()>;

    /// Create the volume-root symlink and `.meta/info`
    async fn write_metadata(&self, fsuuid: &str) -> Result<()>;
}

// =============================================================================
// Cluster Resources
// =============================================================================

/// Lookup of PersistentVolume phases
#[async_trait]
pub trait PersistentVolumeLookup: Send + Sync {
    /// Phase of the named PV; `None` when it does not exist
    async fn phase(&self, name: &str) -> Result<Option<String>>;
}

/// Pod settings copied from the node-server DaemonSet into repair jobs
#[derive(Debug, Clone, Default)]
pub struct NodeServerTemplate {
    pub image: String,
    pub security_context: Option<SecurityContext>,
    pub image_pull_secrets: Vec<LocalObjectReference>,
    pub tolerations: Vec<Toleration>,
    pub annotations: BTreeMap<String, String>,
}

/// Batch job backend used by repair
#[async_trait]
pub trait RepairJobBackend: Send + Sync {
    async fn node_server_template(&self) -> Result<NodeServerTemplate>;

    async fn job_exists(&self, name: &str) -> Result<bool>;

    async fn create_job(&self, job: &Job) -> Result<()>;
}

/// Installation checks
#[async_trait]
pub trait InstallationProbe: Send + Sync {
    /// Names of installed CRDs
    async fn crd_names(&self) -> Result<Vec<String>>;
}

pub type SharedDeviceSource = Arc<dyn DeviceSource>;
pub type SharedFormatter = Arc<dyn Formatter>;
