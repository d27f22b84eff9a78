//! Resource store
//!
//! Typed access to Drive, Volume, Node and InitRequest resources, backed
//! either by the API server or by an in-memory map with the same
//! concurrency semantics.

pub mod kube_store;
pub mod lister;
pub mod memory;
pub mod retry;
pub mod selector;

pub use kube_store::KubeStore;
pub use lister::{DriveLister, InitRequestLister, Lister, NodeLister, VolumeLister, WatchHandle};
pub use memory::MemoryStore;
pub use retry::{retry_on_conflict, retry_transient, retry_when, RetryConfig, TransientRetryStore};
pub use selector::{LabelSelector, MAX_SERVER_SELECTOR_VALUES};

use crate::domain::ports::{DriveStore, InitRequestStore, NodeStore, VolumeStore};
use std::sync::Arc;

/// One store per resource kind
#[derive(Clone)]
pub struct Clients {
    pub drives: DriveStore,
    pub volumes: VolumeStore,
    pub nodes: NodeStore,
    pub init_requests: InitRequestStore,
}

impl Clients {
    /// Stores talking to the API server, retrying transient failures
    pub fn kube(client: ::kube::Client, retry: RetryConfig) -> Self {
        Self {
            drives: Arc::new(TransientRetryStore::new(KubeStore::new(client.clone()), retry.clone())),
            volumes: Arc::new(TransientRetryStore::new(KubeStore::new(client.clone()), retry.clone())),
            nodes: Arc::new(TransientRetryStore::new(KubeStore::new(client.clone()), retry.clone())),
            init_requests: Arc::new(TransientRetryStore::new(KubeStore::new(client), retry)),
        }
    }

    /// Empty in-memory stores
    pub fn memory() -> Self {
        Self {
            drives: Arc::new(MemoryStore::new()),
            volumes: Arc::new(MemoryStore::new()),
            nodes: Arc::new(MemoryStore::new()),
            init_requests: Arc::new(MemoryStore::new()),
        }
    }

    pub fn drive_lister(&self) -> DriveLister {
        Lister::new(self.drives.clone())
    }

    pub fn volume_lister(&self) -> VolumeLister {
        Lister::new(self.volumes.clone())
    }

    pub fn node_lister(&self) -> NodeLister {
        Lister::new(self.nodes.clone())
    }

    pub fn init_request_lister(&self) -> InitRequestLister {
        Lister::new(self.init_requests.clone())
    }
}
