//! Streaming listers
//!
//! A lister is built with chainable selector setters and consumed with one
//! of three terminal operations: `get` collects everything, `list` streams
//! results over a channel and `watch` streams change events until stopped.
//!
//! Label-valued selectors go to the server; statuses and oversized value
//! lists are evaluated client-side. Name selectors are resolved with one
//! `get` per name.

use crate::crd::labels::normalize_label_values;
use crate::crd::{
    AccessTier, DirectPVDrive, DirectPVInitRequest, DirectPVNode, DirectPVVolume, DriveStatus,
    LabelKey, VolumeStatus,
};
use crate::domain::ports::{ResourceStore, StoreObject, WatchEvent};
use crate::error::Result;
use crate::store::selector::{LabelSelector, MAX_SERVER_SELECTOR_VALUES};
use futures::StreamExt;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 64;

type Predicate<K> = Arc<dyn Fn(&K) -> bool + Send + Sync>;

pub type DriveLister = Lister<DirectPVDrive>;
pub type VolumeLister = Lister<DirectPVVolume>;
pub type NodeLister = Lister<DirectPVNode>;
pub type InitRequestLister = Lister<DirectPVInitRequest>;

/// Selector builder and terminal operations for one kind
pub struct Lister<K: StoreObject> {
    store: Arc<dyn ResourceStore<K>>,
    names: Vec<String>,
    selector: LabelSelector,
    predicates: Vec<Predicate<K>>,
    ignore_not_found: bool,
    max_server_values: usize,
}

impl<K: StoreObject> Clone for Lister<K> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            names: self.names.clone(),
            selector: self.selector.clone(),
            predicates: self.predicates.clone(),
            ignore_not_found: self.ignore_not_found,
            max_server_values: self.max_server_values,
        }
    }
}

/// Stops a watch started by [`Lister::watch`]; dropping it also stops the watch
pub struct WatchHandle {
    token: CancellationToken,
}

impl WatchHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl<K: StoreObject> Lister<K> {
    pub fn new(store: Arc<dyn ResourceStore<K>>) -> Self {
        Self {
            store,
            names: Vec::new(),
            selector: LabelSelector::new(),
            predicates: Vec::new(),
            ignore_not_found: false,
            max_server_values: MAX_SERVER_SELECTOR_VALUES,
        }
    }

    /// Select objects by name
    pub fn names(mut self, names: Vec<String>) -> Self {
        for name in names {
            if !self.names.contains(&name) {
                self.names.push(name);
            }
        }
        self
    }

    /// Select on a reserved label; values are normalized first
    pub fn label_values(mut self, key: LabelKey, values: Vec<String>) -> Self {
        self.selector
            .add_values(key.key(), normalize_label_values(&values));
        self
    }

    /// Select on exact `key=value` pairs
    pub fn label_selector(mut self, labels: BTreeMap<String, String>) -> Self {
        for (key, value) in labels {
            self.selector.add_values(key, vec![value]);
        }
        self
    }

    /// Add a client-side predicate
    pub fn filter(mut self, predicate: impl Fn(&K) -> bool + Send + Sync + 'static) -> Self {
        self.predicates.push(Arc::new(predicate));
        self
    }

    /// Skip names that do not exist instead of reporting them
    pub fn ignore_not_found(mut self, ignore: bool) -> Self {
        self.ignore_not_found = ignore;
        self
    }

    /// Override the server-side value-list threshold
    pub fn max_server_values(mut self, max: usize) -> Self {
        self.max_server_values = max;
        self
    }

    fn accepts(&self, obj: &K) -> bool {
        (self.names.is_empty() || self.names.contains(&obj.name_any()))
            && self.selector.matches(obj.labels())
            && self.predicates.iter().all(|p| p(obj))
    }

    async fn send_all(&self, tx: &mpsc::Sender<Result<K>>, cancel: &CancellationToken) {
        if !self.names.is_empty() {
            for name in &self.names {
                if cancel.is_cancelled() {
                    return;
                }
                let item = match self.store.get(name).await {
                    Ok(obj) if self.accepts(&obj) => Ok(obj),
                    Ok(_) => continue,
                    Err(err) if err.is_not_found() && self.ignore_not_found => continue,
                    Err(err) => Err(err),
                };
                if tx.send(item).await.is_err() {
                    return;
                }
            }
            return;
        }

        let (server, _) = self.selector.split(self.max_server_values);
        let items = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            items = self.store.list(&server) => items,
        };
        match items {
            Ok(items) => {
                for obj in items.into_iter().filter(|obj| self.accepts(obj)) {
                    if cancel.is_cancelled() || tx.send(Ok(obj)).await.is_err() {
                        return;
                    }
                }
            }
            Err(err) => {
                let _ = tx.send(Err(err)).await;
            }
        }
    }

    /// Stream matching objects; the channel closes when done or cancelled
    pub fn list(self, cancel: CancellationToken) -> mpsc::Receiver<Result<K>> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            self.send_all(&tx, &cancel).await;
        });
        rx
    }

    /// Collect every matching object, failing on the first error
    pub async fn get(&self) -> Result<Vec<K>> {
        let mut rx = self.clone().list(CancellationToken::new());
        let mut objects = Vec::new();
        while let Some(item) = rx.recv().await {
            objects.push(item?);
        }
        Ok(objects)
    }

    /// Stream change events for matching objects until stopped or cancelled
    pub async fn watch(
        self,
        cancel: CancellationToken,
    ) -> Result<(mpsc::Receiver<Result<WatchEvent<K>>>, WatchHandle)> {
        let (server, _) = self.selector.split(self.max_server_values);
        let mut stream = self.store.watch(&server).await?;
        let token = cancel.child_token();
        let handle = WatchHandle {
            token: token.clone(),
        };

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    event = stream.next() => event,
                };
                let Some(event) = event else { break };
                let forward = match &event {
                    Ok(ev) => self.accepts(ev.object()),
                    Err(_) => true,
                };
                if forward && tx.send(event).await.is_err() {
                    break;
                }
            }
            debug!("Watch on {} stopped", K::kind(&()));
        });

        Ok((rx, handle))
    }
}

// =============================================================================
// Drive Lister
// =============================================================================

impl Lister<DirectPVDrive> {
    pub fn node_selector(self, nodes: Vec<String>) -> Self {
        self.label_values(LabelKey::Node, nodes)
    }

    pub fn drive_name_selector(self, names: Vec<String>) -> Self {
        self.label_values(LabelKey::DriveName, names)
    }

    pub fn access_tier_selector(self, tiers: Vec<AccessTier>) -> Self {
        let values = tiers.iter().map(|t| t.as_str().to_string()).collect();
        self.label_values(LabelKey::AccessTier, values)
    }

    pub fn drive_id_selector(self, ids: Vec<String>) -> Self {
        self.names(ids)
    }

    pub fn status_selector(self, statuses: Vec<DriveStatus>) -> Self {
        if statuses.is_empty() {
            return self;
        }
        self.filter(move |drive: &DirectPVDrive| statuses.contains(&drive.drive_status()))
    }
}

// =============================================================================
// Volume Lister
// =============================================================================

impl Lister<DirectPVVolume> {
    pub fn node_selector(self, nodes: Vec<String>) -> Self {
        self.label_values(LabelKey::Node, nodes)
    }

    pub fn drive_name_selector(self, names: Vec<String>) -> Self {
        self.label_values(LabelKey::DriveName, names)
    }

    pub fn drive_id_selector(self, ids: Vec<String>) -> Self {
        self.label_values(LabelKey::DriveId, ids)
    }

    pub fn pod_name_selector(self, names: Vec<String>) -> Self {
        self.label_values(LabelKey::PodName, names)
    }

    pub fn pod_namespace_selector(self, namespaces: Vec<String>) -> Self {
        self.label_values(LabelKey::PodNamespace, namespaces)
    }

    pub fn volume_name_selector(self, names: Vec<String>) -> Self {
        self.names(names)
    }

    pub fn status_selector(self, statuses: Vec<VolumeStatus>) -> Self {
        if statuses.is_empty() {
            return self;
        }
        self.filter(move |volume: &DirectPVVolume| statuses.contains(&volume.volume_status()))
    }
}

// =============================================================================
// Node and InitRequest Listers
// =============================================================================

impl Lister<DirectPVNode> {
    pub fn node_selector(self, nodes: Vec<String>) -> Self {
        self.names(nodes)
    }
}

impl Lister<DirectPVInitRequest> {
    pub fn node_selector(self, nodes: Vec<String>) -> Self {
        self.label_values(LabelKey::Node, nodes)
    }

    pub fn request_id_selector(self, ids: Vec<String>) -> Self {
        self.label_values(LabelKey::RequestId, ids)
    }

    pub fn init_request_name_selector(self, names: Vec<String>) -> Self {
        self.names(names)
    }
}
