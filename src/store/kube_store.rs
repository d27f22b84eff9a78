//! API server backed resource store

use crate::domain::ports::{ResourceStore, StoreObject, WatchEvent, WatchStream};
use crate::error::{Error, Result};
use crate::store::LabelSelector;
use async_trait::async_trait;
use futures::StreamExt;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use tracing::debug;

/// Typed accessor for one cluster-scoped kind
pub struct KubeStore<K: StoreObject> {
    api: Api<K>,
}

impl<K: StoreObject> KubeStore<K> {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }

    fn kind() -> String {
        K::kind(&()).to_string()
    }
}

/// Map API status codes onto the store's error taxonomy
fn map_error(err: kube::Error, kind: String, name: &str) -> Error {
    match &err {
        kube::Error::Api(resp) if resp.code == 404 => Error::NotFound {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
            Error::AlreadyExists {
                kind,
                name: name.to_string(),
            }
        }
        kube::Error::Api(resp) if resp.code == 409 => Error::Conflict {
            kind,
            name: name.to_string(),
        },
        _ => Error::Kube(err),
    }
}

fn list_params(selector: &LabelSelector) -> ListParams {
    if selector.is_empty() {
        ListParams::default()
    } else {
        ListParams::default().labels(&selector.to_string())
    }
}

#[async_trait]
impl<K: StoreObject> ResourceStore<K> for KubeStore<K> {
    async fn get(&self, name: &str) -> Result<K> {
        self.api
            .get(name)
            .await
            .map_err(|e| map_error(e, Self::kind(), name))
    }

    async fn list(&self, selector: &LabelSelector) -> Result<Vec<K>> {
        let list = self
            .api
            .list(&list_params(selector))
            .await
            .map_err(|e| map_error(e, Self::kind(), ""))?;
        Ok(list.items)
    }

    async fn create(&self, object: &K) -> Result<K> {
        let name = object.name_any();
        debug!("Creating {} {}", Self::kind(), name);
        self.api
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| map_error(e, Self::kind(), &name))
    }

    async fn update(&self, object: &K) -> Result<K> {
        let name = object.name_any();
        self.api
            .replace(&name, &PostParams::default(), object)
            .await
            .map_err(|e| map_error(e, Self::kind(), &name))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        debug!("Deleting {} {}", Self::kind(), name);
        self.api
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_error(e, Self::kind(), name))?;
        Ok(())
    }

    async fn delete_collection(&self, selector: &LabelSelector) -> Result<()> {
        self.api
            .delete_collection(&DeleteParams::default(), &list_params(selector))
            .await
            .map_err(|e| map_error(e, Self::kind(), ""))?;
        Ok(())
    }

    async fn watch(&self, selector: &LabelSelector) -> Result<WatchStream<K>> {
        let mut config = watcher::Config::default();
        if !selector.is_empty() {
            config = config.labels(&selector.to_string());
        }

        let stream = watcher(self.api.clone(), config)
            .map(|event| -> Vec<Result<WatchEvent<K>>> {
                match event {
                    Ok(watcher::Event::Applied(obj)) => vec![Ok(WatchEvent::Applied(obj))],
                    Ok(watcher::Event::Deleted(obj)) => vec![Ok(WatchEvent::Deleted(obj))],
                    Ok(watcher::Event::Restarted(objs)) => objs
                        .into_iter()
                        .map(|obj| Ok(WatchEvent::Applied(obj)))
                        .collect(),
                    Err(e) => vec![Err(Error::Watch(e.to_string()))],
                }
            })
            .flat_map(futures::stream::iter)
            .boxed();
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "boom".into(),
            reason: reason.into(),
            code,
        })
    }

    #[test]
    fn test_error_mapping() {
        assert_matches!(
            map_error(api_error(404, "NotFound"), "DirectPVDrive".into(), "d1"),
            Error::NotFound { name, .. } if name == "d1"
        );
        assert_matches!(
            map_error(api_error(409, "AlreadyExists"), "DirectPVDrive".into(), "d1"),
            Error::AlreadyExists { .. }
        );
        assert_matches!(
            map_error(api_error(409, "Conflict"), "DirectPVDrive".into(), "d1"),
            Error::Conflict { .. }
        );
        assert!(map_error(api_error(503, "ServiceUnavailable"), "DirectPVDrive".into(), "d1")
            .is_transient());
    }
}
