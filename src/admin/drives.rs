//! Drive operations: cordon, uncordon, suspend, resume, release, remove
//! and move.

use super::{finish, Admin, DriveResult};
use crate::crd::DirectPVDrive;
use crate::error::{Error, Result};
use crate::lifecycle::Transition;
use crate::progress::Progress;
use crate::selector::DriveSelection;
use std::future::Future;
use tracing::{error, info};

/// What to do when one drive fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnFailure {
    /// Stop and return the drive's error
    Abort,
    /// Keep going and fail the operation at the end
    Continue,
}

impl Admin {
    /// Drives matching a selection; empty is an error
    pub async fn select_drives(&self, selection: &DriveSelection) -> Result<Vec<DirectPVDrive>> {
        let drives = selection
            .apply(self.clients.drive_lister())
            .ignore_not_found(true)
            .get()
            .await?;
        if drives.is_empty() {
            return Err(Error::NoMatchingResourcesFound);
        }
        Ok(drives)
    }

    /// Apply `op` to every selected drive in listing order
    pub(super) async fn for_each_drive<F, Fut>(
        &self,
        selection: &DriveSelection,
        verb: &str,
        progress: &Progress,
        op: F,
    ) -> Result<Vec<DriveResult>>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<Transition<DirectPVDrive>>>,
    {
        self.for_each_drive_with(selection, verb, OnFailure::Abort, progress, op)
            .await
    }

    async fn for_each_drive_with<F, Fut>(
        &self,
        selection: &DriveSelection,
        verb: &str,
        on_failure: OnFailure,
        progress: &Progress,
        op: F,
    ) -> Result<Vec<DriveResult>>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<Transition<DirectPVDrive>>>,
    {
        let drives = self.select_drives(selection).await?;
        progress.start(drives.len());

        let mut results = Vec::with_capacity(drives.len());
        let mut failed = false;
        for (step, drive) in drives.iter().enumerate() {
            let component = format!("{}/{}", drive.node_id(), drive.drive_name());
            progress.progress(format!("{} {}", verb, component), step + 1, component.as_str());

            match op(drive.drive_id()).await {
                Ok(transition) => {
                    progress.end(component.as_str(), None);
                    if transition.is_changed() {
                        info!("{} drive {}", verb, component);
                    }
                    results.push(DriveResult::from(&transition));
                }
                Err(e) => {
                    progress.end(component.as_str(), Some(&e));
                    match on_failure {
                        OnFailure::Abort => return Err(e),
                        OnFailure::Continue => {
                            error!("{}: {}", component, e);
                            failed = true;
                        }
                    }
                }
            }
        }

        if failed {
            return Err(Error::OperationFailed(format!("unable to {} drive(s)", verb)));
        }
        Ok(results)
    }

    pub async fn cordon_drives(
        &self,
        selection: &DriveSelection,
        progress: Progress,
    ) -> Result<Vec<DriveResult>> {
        let lifecycle = &self.lifecycle;
        let result = self
            .for_each_drive(selection, "cordon", &progress, move |id| async move {
                lifecycle.cordon(&id).await
            })
            .await;
        finish(progress, result)
    }

    pub async fn uncordon_drives(
        &self,
        selection: &DriveSelection,
        progress: Progress,
    ) -> Result<Vec<DriveResult>> {
        let lifecycle = &self.lifecycle;
        let result = self
            .for_each_drive(selection, "uncordon", &progress, move |id| async move {
                lifecycle.uncordon(&id).await
            })
            .await;
        finish(progress, result)
    }

    /// Suspend drives; volumes on them become read-only
    pub async fn suspend_drives(
        &self,
        selection: &DriveSelection,
        progress: Progress,
    ) -> Result<Vec<DriveResult>> {
        let lifecycle = &self.lifecycle;
        let result = self
            .for_each_drive(selection, "suspend", &progress, move |id| async move {
                lifecycle.suspend(&id).await
            })
            .await;
        finish(progress, result)
    }

    pub async fn resume_drives(
        &self,
        selection: &DriveSelection,
        progress: Progress,
    ) -> Result<Vec<DriveResult>> {
        let lifecycle = &self.lifecycle;
        let result = self
            .for_each_drive(selection, "resume", &progress, move |id| async move {
                lifecycle.resume(&id).await
            })
            .await;
        finish(progress, result)
    }

    pub async fn release_drives(
        &self,
        selection: &DriveSelection,
        progress: Progress,
    ) -> Result<Vec<DriveResult>> {
        let lifecycle = &self.lifecycle;
        let result = self
            .for_each_drive(selection, "release", &progress, move |id| async move {
                lifecycle.release(&id).await
            })
            .await;
        finish(progress, result)
    }

    /// Remove drives. Every selected drive is attempted; any failure fails
    /// the operation after the rest were processed.
    pub async fn remove_drives(
        &self,
        selection: &DriveSelection,
        progress: Progress,
    ) -> Result<Vec<DriveResult>> {
        let lifecycle = &self.lifecycle;
        let result = self
            .for_each_drive_with(
                selection,
                "remove",
                OnFailure::Continue,
                &progress,
                move |id| async move { lifecycle.remove(&id).await },
            )
            .await;
        finish(progress, result)
    }

    /// Move all volumes of `source` onto `destination`. Returns the names
    /// of the moved volumes.
    pub async fn move_drive(
        &self,
        source: &str,
        destination: &str,
        progress: Progress,
    ) -> Result<Vec<String>> {
        progress.start(1);
        progress.progress(format!("move {} to {}", source, destination), 1, source);
        let result = self
            .lifecycle
            .move_volumes(source, destination)
            .await
            .map(|volumes| {
                volumes
                    .iter()
                    .map(|v| kube::ResourceExt::name_any(v))
                    .collect::<Vec<_>>()
            });
        progress.end(source, result.as_ref().err());
        if let Ok(moved) = &result {
            info!(
                "Moved {} volume(s) from drive {} to drive {}",
                moved.len(),
                source,
                destination
            );
        }
        finish(progress, result)
    }
}
