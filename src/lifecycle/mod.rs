//! Drive and volume lifecycle
//!
//! `DriveLifecycle` performs admin-driven transitions against the stores;
//! the reconcilers run on each node and complete the transitions that need
//! local work (mounts, relabels, capacity release).

pub mod drive;
pub mod reconciler;

pub use drive::{ensure_no_volumes, DriveLifecycle, LabelChange, Transition};
pub use reconciler::{DriveReconciler, VolumeReconciler, MOUNT_ERROR_CONDITION};
