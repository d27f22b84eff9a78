//! In-memory resource store
//!
//! Implements the same contract as the API server for a single kind:
//! resource-version compare-and-swap on update, finalizer-aware deletion
//! and watch streams that start with the current state. Used by tests and
//! by dry runs.

use crate::domain::ports::{ResourceStore, StoreObject, WatchEvent, WatchStream};
use crate::error::{Error, Result};
use crate::store::LabelSelector;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

const EVENT_BUFFER: usize = 1024;

/// Store backed by a map, keyed by object name
pub struct MemoryStore<K: StoreObject> {
    objects: RwLock<BTreeMap<String, K>>,
    version: AtomicU64,
    events: broadcast::Sender<WatchEvent<K>>,
}

impl<K: StoreObject> Default for MemoryStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: StoreObject> MemoryStore<K> {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            objects: RwLock::new(BTreeMap::new()),
            version: AtomicU64::new(0),
            events,
        }
    }

    fn kind() -> String {
        K::kind(&()).to_string()
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn publish(&self, event: WatchEvent<K>) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl<K: StoreObject> ResourceStore<K> for MemoryStore<K> {
    async fn get(&self, name: &str) -> Result<K> {
        self.objects
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(Self::kind(), name))
    }

    async fn list(&self, selector: &LabelSelector) -> Result<Vec<K>> {
        Ok(self
            .objects
            .read()
            .values()
            .filter(|obj| selector.matches(obj.labels()))
            .cloned()
            .collect())
    }

    async fn create(&self, object: &K) -> Result<K> {
        let name = object.meta().name.clone().unwrap_or_default();
        if name.is_empty() {
            return Err(Error::Validation(format!(
                "{} name must not be empty",
                Self::kind()
            )));
        }

        let created = {
            let mut objects = self.objects.write();
            if objects.contains_key(&name) {
                return Err(Error::AlreadyExists {
                    kind: Self::kind(),
                    name,
                });
            }

            let mut created = object.clone();
            let meta = created.meta_mut();
            meta.resource_version = Some(self.next_version());
            meta.uid = Some(uuid::Uuid::new_v4().to_string());
            meta.creation_timestamp = Some(Time(Utc::now()));
            meta.deletion_timestamp = None;
            objects.insert(name, created.clone());
            created
        };

        self.publish(WatchEvent::Applied(created.clone()));
        Ok(created)
    }

    async fn update(&self, object: &K) -> Result<K> {
        let name = object.name_any();
        let event = {
            let mut objects = self.objects.write();
            let current = objects
                .get(&name)
                .ok_or_else(|| Error::not_found(Self::kind(), &name))?;

            // Custom resources allow no unconditional updates
            match &object.meta().resource_version {
                Some(version) if current.meta().resource_version.as_ref() == Some(version) => {}
                _ => return Err(Error::conflict(Self::kind(), &name)),
            }

            let mut updated = object.clone();
            let deletion_timestamp = current.meta().deletion_timestamp.clone();
            let meta = updated.meta_mut();
            meta.uid = current.meta().uid.clone();
            meta.creation_timestamp = current.meta().creation_timestamp.clone();
            meta.deletion_timestamp = deletion_timestamp;
            meta.resource_version = Some(self.next_version());

            if updated.meta().deletion_timestamp.is_some() && updated.finalizers().is_empty() {
                objects.remove(&name);
                WatchEvent::Deleted(updated)
            } else {
                objects.insert(name, updated.clone());
                WatchEvent::Applied(updated)
            }
        };

        let updated = event.object().clone();
        self.publish(event);
        Ok(updated)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let event = {
            let mut objects = self.objects.write();
            let has_finalizers = objects
                .get(name)
                .map(|obj| !obj.finalizers().is_empty())
                .ok_or_else(|| Error::not_found(Self::kind(), name))?;

            if !has_finalizers {
                objects.remove(name).map(WatchEvent::Deleted)
            } else if let Some(current) = objects
                .get_mut(name)
                .filter(|obj| obj.meta().deletion_timestamp.is_none())
            {
                let meta = current.meta_mut();
                meta.deletion_timestamp = Some(Time(Utc::now()));
                meta.resource_version = Some(self.next_version());
                Some(WatchEvent::Applied(current.clone()))
            } else {
                None
            }
        };

        if let Some(event) = event {
            self.publish(event);
        }
        Ok(())
    }

    async fn delete_collection(&self, selector: &LabelSelector) -> Result<()> {
        let names: Vec<String> = self
            .list(selector)
            .await?
            .iter()
            .map(|obj| obj.name_any())
            .collect();
        for name in names {
            match self.delete(&name).await {
                Err(err) if err.is_not_found() => {}
                other => other?,
            }
        }
        Ok(())
    }

    async fn watch(&self, selector: &LabelSelector) -> Result<WatchStream<K>> {
        // Subscribe before the snapshot so nothing between them is missed
        let receiver = self.events.subscribe();
        let initial: Vec<Result<WatchEvent<K>>> = self
            .list(selector)
            .await?
            .into_iter()
            .map(|obj| Ok(WatchEvent::Applied(obj)))
            .collect();

        let selector = selector.clone();
        let live = futures::stream::unfold(receiver, move |mut receiver| {
            let selector = selector.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(event) => {
                            if selector.matches(event.object().labels()) {
                                return Some((Ok(event), receiver));
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            return Some((
                                Err(Error::Watch(format!(
                                    "watch fell behind by {} events",
                                    skipped
                                ))),
                                receiver,
                            ));
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(futures::stream::iter(initial).chain(live).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{DirectPVNode, DirectPVNodeSpec};
    use assert_matches::assert_matches;
    use futures::StreamExt;

    fn node(name: &str) -> DirectPVNode {
        DirectPVNode::with_devices(name, vec![])
    }

    #[tokio::test]
    async fn test_create_get_and_conflict() {
        let store = MemoryStore::<DirectPVNode>::new();
        let created = store.create(&node("n1")).await.unwrap();
        assert!(created.metadata.resource_version.is_some());
        assert_matches!(
            store.create(&node("n1")).await,
            Err(Error::AlreadyExists { .. })
        );

        let mut first = store.get("n1").await.unwrap();
        let mut second = first.clone();
        first.spec.refresh = true;
        store.update(&first).await.unwrap();

        second.spec = DirectPVNodeSpec { refresh: false };
        assert_matches!(store.update(&second).await, Err(Error::Conflict { .. }));
        assert!(store.get("n1").await.unwrap().spec.refresh);
    }

    #[tokio::test]
    async fn test_update_without_version_conflicts() {
        let store = MemoryStore::<DirectPVNode>::new();
        store.create(&node("n1")).await.unwrap();

        let mut unversioned = store.get("n1").await.unwrap();
        unversioned.metadata.resource_version = None;
        unversioned.spec.refresh = true;
        assert_matches!(store.update(&unversioned).await, Err(Error::Conflict { .. }));
        assert!(!store.get("n1").await.unwrap().spec.refresh);
    }

    #[tokio::test]
    async fn test_delete_with_finalizers() {
        let store = MemoryStore::<DirectPVNode>::new();
        let mut object = node("n1");
        object.metadata.finalizers = Some(vec!["example.com/hold".into()]);
        store.create(&object).await.unwrap();

        store.delete("n1").await.unwrap();
        let marked = store.get("n1").await.unwrap();
        assert!(marked.metadata.deletion_timestamp.is_some());

        let mut released = marked.clone();
        released.metadata.finalizers = Some(vec![]);
        store.update(&released).await.unwrap();
        assert!(store.get("n1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_and_delete_collection_by_label() {
        let store = MemoryStore::<DirectPVNode>::new();
        store.create(&node("n1")).await.unwrap();
        store.create(&node("n2")).await.unwrap();

        let selector = LabelSelector::new().with_label("directpv.min.io/node", "n2");
        let listed = store.list(&selector).await.unwrap();
        assert_eq!(listed.len(), 1);

        store.delete_collection(&selector).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_watch_starts_with_current_state() {
        let store = MemoryStore::<DirectPVNode>::new();
        store.create(&node("n1")).await.unwrap();

        let mut stream = store.watch(&LabelSelector::new()).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_matches!(first, WatchEvent::Applied(n) if n.name_any() == "n1");

        store.create(&node("n2")).await.unwrap();
        store.delete("n1").await.unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_matches!(second, WatchEvent::Applied(n) if n.name_any() == "n2");
        let third = stream.next().await.unwrap().unwrap();
        assert_matches!(third, WatchEvent::Deleted(n) if n.name_any() == "n1");
    }
}
