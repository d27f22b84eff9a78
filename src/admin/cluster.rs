//! Core Kubernetes resources consulted by admin operations:
//! PersistentVolumes, the node-server DaemonSet, repair Jobs and CRDs.

use crate::consts::{NAMESPACE, NODE_SERVER_NAME};
use crate::domain::ports::{
    InstallationProbe, NodeServerTemplate, PersistentVolumeLookup, RepairJobBackend,
};
use crate::error::{ignore_not_found, Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::PersistentVolume;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, ListParams, PostParams};
use kube::{Client, ResourceExt};

/// Adapter over the API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn not_found(err: kube::Error) -> Error {
    match &err {
        kube::Error::Api(resp) if resp.code == 404 => Error::NotFound {
            kind: resp.reason.clone(),
            name: resp.message.clone(),
        },
        _ => Error::Kube(err),
    }
}

#[async_trait]
impl PersistentVolumeLookup for KubeCluster {
    async fn phase(&self, name: &str) -> Result<Option<String>> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        let pv = ignore_not_found(api.get(name).await.map_err(not_found))?;
        Ok(pv.map(|pv| pv.status.and_then(|s| s.phase).unwrap_or_default()))
    }
}

#[async_trait]
impl RepairJobBackend for KubeCluster {
    async fn node_server_template(&self) -> Result<NodeServerTemplate> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), NAMESPACE);
        let daemon_set = api.get(NODE_SERVER_NAME).await.map_err(not_found)?;
        if daemon_set.uid().unwrap_or_default().is_empty() {
            return Err(Error::State("invalid daemonset found".into()));
        }

        let template = daemon_set.spec.map(|s| s.template).unwrap_or_default();
        let pod = template.spec.unwrap_or_default();
        let container = pod.containers.iter().find(|c| c.name == NODE_SERVER_NAME);
        Ok(NodeServerTemplate {
            image: container.and_then(|c| c.image.clone()).unwrap_or_default(),
            security_context: container.and_then(|c| c.security_context.clone()),
            image_pull_secrets: pod.image_pull_secrets.unwrap_or_default(),
            tolerations: pod.tolerations.unwrap_or_default(),
            annotations: template
                .metadata
                .and_then(|m| m.annotations)
                .unwrap_or_default(),
        })
    }

    async fn job_exists(&self, name: &str) -> Result<bool> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), NAMESPACE);
        Ok(ignore_not_found(api.get(name).await.map_err(not_found))?.is_some())
    }

    async fn create_job(&self, job: &Job) -> Result<()> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), NAMESPACE);
        api.create(&PostParams::default(), job).await?;
        Ok(())
    }
}

#[async_trait]
impl InstallationProbe for KubeCluster {
    async fn crd_names(&self) -> Result<Vec<String>> {
        let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        let crds = api.list(&ListParams::default()).await?;
        Ok(crds.items.iter().map(|crd| crd.name_any()).collect())
    }
}
