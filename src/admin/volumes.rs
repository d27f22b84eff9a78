//! Volume operations: suspend, resume and clean

use super::{finish, Admin, VolumeResult};
use crate::crd::DirectPVVolume;
use crate::error::{Error, Result};
use crate::lifecycle::Transition;
use crate::progress::Progress;
use crate::selector::VolumeSelection;
use kube::ResourceExt;
use std::future::Future;
use tracing::{debug, info, warn};

/// PV phases after which the backing volume can be purged
const CLEANABLE_PV_PHASES: [&str; 2] = ["Released", "Failed"];

impl Admin {
    /// Volumes matching a selection; empty is an error
    pub async fn select_volumes(&self, selection: &VolumeSelection) -> Result<Vec<DirectPVVolume>> {
        let volumes = selection
            .apply(self.clients.volume_lister())
            .ignore_not_found(true)
            .get()
            .await?;
        if volumes.is_empty() {
            return Err(Error::NoMatchingResourcesFound);
        }
        Ok(volumes)
    }

    pub(super) async fn for_each_volume<F, Fut>(
        &self,
        selection: &VolumeSelection,
        verb: &str,
        progress: &Progress,
        op: F,
    ) -> Result<Vec<VolumeResult>>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<Transition<DirectPVVolume>>>,
    {
        let volumes = self.select_volumes(selection).await?;
        progress.start(volumes.len());

        let mut results = Vec::with_capacity(volumes.len());
        for (step, volume) in volumes.iter().enumerate() {
            let name = volume.name_any();
            progress.progress(format!("{} {}", verb, name), step + 1, name.as_str());
            let transition = op(name.clone()).await;
            progress.end(name.as_str(), transition.as_ref().err());
            let transition = transition?;
            if transition.is_changed() {
                info!("{} volume {}", verb, name);
            }
            results.push(VolumeResult::from(&transition));
        }
        Ok(results)
    }

    /// Suspend volumes; their mounts become read-only
    pub async fn suspend_volumes(
        &self,
        selection: &VolumeSelection,
        progress: Progress,
    ) -> Result<Vec<VolumeResult>> {
        let lifecycle = &self.lifecycle;
        let result = self
            .for_each_volume(selection, "suspend", &progress, move |name| async move {
                lifecycle.suspend_volume(&name).await
            })
            .await;
        finish(progress, result)
    }

    pub async fn resume_volumes(
        &self,
        selection: &VolumeSelection,
        progress: Progress,
    ) -> Result<Vec<VolumeResult>> {
        let lifecycle = &self.lifecycle;
        let result = self
            .for_each_volume(selection, "resume", &progress, move |name| async move {
                lifecycle.resume_volume(&name).await
            })
            .await;
        finish(progress, result)
    }

    /// Whether the PV backing `volume` is gone, Released or Failed.
    /// Lookup failures are logged and treated as not cleanable.
    async fn is_cleanable(&self, volume: &str) -> bool {
        match self.cluster.persistent_volumes.phase(volume).await {
            Ok(None) => true,
            Ok(Some(phase)) => CLEANABLE_PV_PHASES.contains(&phase.as_str()),
            Err(e) => {
                warn!("Unable to get PV for volume {}: {}", volume, e);
                false
            }
        }
    }

    /// Delete volumes whose PV no longer needs them. Returns the names of
    /// the removed volumes.
    pub async fn clean(&self, selection: &VolumeSelection, progress: Progress) -> Result<Vec<String>> {
        let result = self.clean_volumes(selection, &progress).await;
        finish(progress, result)
    }

    async fn clean_volumes(&self, selection: &VolumeSelection, progress: &Progress) -> Result<Vec<String>> {
        let volumes = self.select_volumes(selection).await?;
        progress.start(volumes.len());

        let mut removed = Vec::new();
        for (step, volume) in volumes.iter().enumerate() {
            let name = volume.name_any();
            progress.progress(format!("clean {}", name), step + 1, name.as_str());
            if !self.is_cleanable(&name).await {
                debug!("Volume {} is still in use", name);
                progress.end(name.as_str(), None);
                continue;
            }
            let purged = self.lifecycle.purge_volume(&name).await;
            progress.end(name.as_str(), purged.as_ref().err());
            match purged {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            info!("Removing volume {}", name);
            removed.push(name);
        }
        Ok(removed)
    }
}
