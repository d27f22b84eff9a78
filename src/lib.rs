//! DirectPV Control Plane
//!
//! Cluster-scoped control plane for direct-attached persistent volumes.
//! Discovers raw block devices on worker nodes, initializes selected ones
//! into XFS-formatted drives, tracks drive and volume lifecycle through
//! custom resources and drives the admin workflows over them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                          Admin Orchestrator (admin)                          │
//! │   discover · init · cordon · suspend · release · remove · move · label ...   │
//! ├──────────────┬───────────────────────────┬──────────────────────────────────┤
//! │   Selector   │     Drive Lifecycle       │      Progress Reporter           │
//! │  (selector)  │      (lifecycle)          │        (progress)                │
//! └──────┬───────┴─────────────┬─────────────┴──────────────────────────────────┘
//!        │                     │
//!        └──────────┬──────────┘
//!                   │
//!       ┌───────────┴───────────┐        Drive / Volume / Node / InitRequest
//!       │  Resource Store       │◄──────  custom resources on the API server
//!       │  (store, listers)     │
//!       └───────────┬───────────┘
//!                   │ watch
//! ┌─────────────────┴───────────────────────────────────────────────────────────┐
//! │                              Node Agent (node)                               │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌───────────────────────────┐  │
//! │  │  Device Probe    │  │   Formatter      │  │  Node API (api, SigV4)    │  │
//! │  │  (device)        │  │   (xfs)          │  │  /devices/list, /format   │  │
//! │  └──────────────────┘  └──────────────────┘  └───────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`crd`]: Drive, Volume, Node and InitRequest resources and their labels
//! - [`device`]: Block device probing over udev, sysfs and procfs
//! - [`xfs`]: Filesystem creation, mounting and superblock probing
//! - [`node`]: Node agent and its controllers
//! - [`store`]: Resource store adapters, conflict retry and listers
//! - [`selector`]: Argument parsing and ellipsis expansion
//! - [`lifecycle`]: Drive and volume state transitions and the reconciler
//! - [`admin`]: Cluster-level admin operations
//! - [`progress`]: Progress events for long-running operations
//! - [`api`]: Authenticated node API server and client
//! - [`error`]: Error types and handling

pub mod admin;
pub mod api;
pub mod consts;
pub mod crd;
pub mod device;
pub mod domain;
pub mod error;
pub mod lifecycle;
pub mod node;
pub mod progress;
pub mod selector;
pub mod store;
pub mod xfs;

// Re-export commonly used types
pub use admin::{Admin, AdminConfig, Cluster, Credential, InitConfig};

pub use api::{NodeApiClient, NodeApiServer, NodeApiServerConfig};

pub use crd::{
    AccessTier, DirectPVDrive, DirectPVInitRequest, DirectPVNode, DirectPVVolume, DriveStatus,
    InitStatus, VolumeStatus,
};

pub use device::{Device, DeviceProber, ProbeConfig};

pub use error::{Error, ErrorAction, Result};

pub use lifecycle::{DriveLifecycle, DriveReconciler, VolumeReconciler};

pub use node::{InitRequestController, NodeAgent, NodeAgentConfig, NodeController, NodeMetrics};

pub use progress::{Progress, ProgressMessage};

pub use selector::{DriveSelectorArgs, VolumeSelectorArgs};

pub use store::{Clients, RetryConfig};

pub use xfs::{XfsConfig, XfsFormatter};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
