//! Admin orchestrator
//!
//! Cluster-wide operations behind the admin subcommands. Each operation
//! compiles a selection, lists the matching resources, applies a lifecycle
//! transition to each and reports progress. Zero matches is
//! `Error::NoMatchingResourcesFound`.
//!
//! ```text
//!   selection ──▶ lister ──▶ DriveLifecycle ──▶ ResourceStore
//!                                  │
//!                                  └──▶ Progress
//! ```

pub mod cluster;
pub mod credential;
pub mod discover;
pub mod drives;
pub mod info;
pub mod init;
pub mod init_config;
pub mod labels;
pub mod repair;
pub mod volumes;

pub use cluster::KubeCluster;
pub use credential::Credential;
pub use info::NodeLevelInfo;
pub use init::InitResult;
pub use init_config::{DriveInfo, InitConfig, NodeInfo, DRIVE_SELECTED_VALUE, INIT_CONFIG_VERSION};
pub use labels::parse_label_changes;
pub use repair::{RepairArgs, RepairResult};

use crate::consts::DEFAULT_WATCH_TIMEOUT_SECS;
use crate::crd::{DirectPVDrive, DirectPVVolume};
use crate::domain::ports::{InstallationProbe, PersistentVolumeLookup, RepairJobBackend};
use crate::error::Result;
use crate::lifecycle::{DriveLifecycle, Transition};
use crate::progress::Progress;
use crate::store::{Clients, RetryConfig};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for admin operations
#[derive(Debug, Clone)]
pub struct AdminConfig {
    /// Bound on the discover and init watches
    pub watch_timeout: Duration,
    /// Compute and report changes without writing them
    pub dry_run: bool,
    pub retry: RetryConfig,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            watch_timeout: Duration::from_secs(DEFAULT_WATCH_TIMEOUT_SECS),
            dry_run: false,
            retry: RetryConfig::default(),
        }
    }
}

/// Core cluster resources the admin operations consult
#[derive(Clone)]
pub struct Cluster {
    pub persistent_volumes: Arc<dyn PersistentVolumeLookup>,
    pub jobs: Arc<dyn RepairJobBackend>,
    pub installation: Arc<dyn InstallationProbe>,
}

impl Cluster {
    /// All backends served by one API client
    pub fn kube(client: ::kube::Client) -> Self {
        let cluster = Arc::new(KubeCluster::new(client));
        Self {
            persistent_volumes: cluster.clone(),
            jobs: cluster.clone(),
            installation: cluster,
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// Outcome for one drive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveResult {
    pub node_id: String,
    pub drive_name: String,
    pub drive_id: String,
    /// False when the drive was already in the requested state
    pub changed: bool,
}

impl From<&Transition<DirectPVDrive>> for DriveResult {
    fn from(transition: &Transition<DirectPVDrive>) -> Self {
        let drive = transition.object();
        Self {
            node_id: drive.node_id().to_string(),
            drive_name: drive.drive_name().to_string(),
            drive_id: drive.drive_id(),
            changed: transition.is_changed(),
        }
    }
}

/// Outcome for one volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeResult {
    pub volume_name: String,
    pub node_id: String,
    pub drive_name: String,
    pub changed: bool,
}

impl From<&Transition<DirectPVVolume>> for VolumeResult {
    fn from(transition: &Transition<DirectPVVolume>) -> Self {
        let volume = transition.object();
        Self {
            volume_name: volume.name_any(),
            node_id: volume.node_id().to_string(),
            drive_name: volume.drive_name().to_string(),
            changed: transition.is_changed(),
        }
    }
}

// =============================================================================
// Admin
// =============================================================================

/// Entry point for admin operations
pub struct Admin {
    config: AdminConfig,
    clients: Clients,
    lifecycle: DriveLifecycle,
    cluster: Cluster,
}

impl Admin {
    pub fn new(config: AdminConfig, clients: Clients, cluster: Cluster) -> Arc<Self> {
        let lifecycle = DriveLifecycle::new(clients.clone())
            .dry_run(config.dry_run)
            .with_retry(config.retry.clone());
        Arc::new(Self {
            config,
            clients,
            lifecycle,
            cluster,
        })
    }

    pub fn config(&self) -> &AdminConfig {
        &self.config
    }

    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    pub fn lifecycle(&self) -> &DriveLifecycle {
        &self.lifecycle
    }
}

/// Close the progress channel with the operation's outcome
fn finish<T>(progress: Progress, result: Result<T>) -> Result<T> {
    progress.done(result.as_ref().err());
    result
}
