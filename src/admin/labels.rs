//! Label drives and volumes with `key=value` or remove with `key-`

use super::{finish, Admin, DriveResult, VolumeResult};
use crate::crd::labels::is_valid_label_value;
use crate::error::{Error, Result};
use crate::lifecycle::{LabelChange, Transition};
use crate::progress::Progress;
use crate::selector::{DriveSelection, VolumeSelection};

/// Parse `key=value` (set) and `key-` (remove) arguments
pub fn parse_label_changes(args: &[String]) -> Result<Vec<LabelChange>> {
    if args.is_empty() {
        return Err(Error::Validation("at least one label must be provided".into()));
    }
    args.iter()
        .map(|arg| {
            let arg = arg.trim();
            if let Some(key) = arg.strip_suffix('-').filter(|k| !k.contains('=')) {
                return LabelChange::remove(key);
            }
            let (key, value) = arg
                .split_once('=')
                .ok_or_else(|| Error::Validation(format!("invalid label {}", arg)))?;
            if value.is_empty() || !is_valid_label_value(value) {
                return Err(Error::Validation(format!("invalid label value {}", value)));
            }
            LabelChange::set(key, value)
        })
        .collect()
}

/// Apply every change in order; changed if any change applied
async fn apply_all<K, F, Fut>(changes: &[LabelChange], apply: F) -> Result<Transition<K>>
where
    F: Fn(LabelChange) -> Fut,
    Fut: std::future::Future<Output = Result<Transition<K>>>,
{
    let mut changed = false;
    let mut latest = None;
    for change in changes {
        let transition = apply(change.clone()).await?;
        changed |= transition.is_changed();
        latest = Some(transition.into_object());
    }
    let object = latest.ok_or_else(|| Error::Validation("no labels provided".into()))?;
    Ok(if changed {
        Transition::Changed(object)
    } else {
        Transition::Unchanged(object)
    })
}

impl Admin {
    pub async fn label_drives(
        &self,
        selection: &DriveSelection,
        changes: &[LabelChange],
        progress: Progress,
    ) -> Result<Vec<DriveResult>> {
        let lifecycle = &self.lifecycle;
        let result = self
            .for_each_drive(selection, "label", &progress, move |id| async move {
                apply_all(changes, |change| {
                    let id = id.clone();
                    async move { lifecycle.label_drive(&id, &change).await }
                })
                .await
            })
            .await;
        finish(progress, result)
    }

    pub async fn label_volumes(
        &self,
        selection: &VolumeSelection,
        changes: &[LabelChange],
        progress: Progress,
    ) -> Result<Vec<VolumeResult>> {
        let lifecycle = &self.lifecycle;
        let result = self
            .for_each_volume(selection, "label", &progress, move |name| async move {
                apply_all(changes, |change| {
                    let name = name.clone();
                    async move { lifecycle.label_volume(&name, &change).await }
                })
                .await
            })
            .await;
        finish(progress, result)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::admin;
    use super::*;
    use crate::consts::GROUP_NAME;
    use crate::crd::VolumeStatus;
    use crate::lifecycle::drive::tests::{create_drive, create_volume};
    use crate::store::Clients;
    use assert_matches::assert_matches;
    use kube::ResourceExt;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_parse_label_changes() {
        let changes = parse_label_changes(&args(&["tier=fast", "owner-", "example.com/team=a"])).unwrap();
        assert_eq!(changes[0].key, format!("{}/tier", GROUP_NAME));
        assert!(!changes[0].remove);
        assert!(changes[1].remove);
        assert_eq!(changes[2].key, "example.com/team");

        assert_matches!(parse_label_changes(&[]), Err(Error::Validation(_)));
        assert_matches!(parse_label_changes(&args(&["bad"])), Err(Error::Validation(_)));
        assert_matches!(parse_label_changes(&args(&["k=bad value"])), Err(Error::Validation(_)));
        // Reserved keys cannot be relabelled
        assert_matches!(parse_label_changes(&args(&["node=x"])), Err(Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_label_round_trip() {
        let clients = Clients::memory();
        create_drive(&clients, "d1", "n1", "sda", 1 << 30).await;
        create_volume(&clients, "v1", "d1", 1 << 20, VolumeStatus::Ready).await;
        let (admin, _) = admin(&clients);
        let before = clients.drives.get("d1").await.unwrap().labels().clone();

        let drives = DriveSelection {
            nodes: vec!["n1".into()],
            ..Default::default()
        };
        let set = parse_label_changes(&args(&["tier=fast"])).unwrap();
        let results = admin.label_drives(&drives, &set, Progress::none()).await.unwrap();
        assert!(results[0].changed);
        let key = format!("{}/tier", GROUP_NAME);
        assert_eq!(
            clients.drives.get("d1").await.unwrap().labels().get(&key).map(String::as_str),
            Some("fast")
        );

        let remove = parse_label_changes(&args(&["tier-"])).unwrap();
        admin.label_drives(&drives, &remove, Progress::none()).await.unwrap();
        assert_eq!(clients.drives.get("d1").await.unwrap().labels(), &before);

        let volumes = VolumeSelection {
            volume_names: vec!["v1".into()],
            ..Default::default()
        };
        let results = admin.label_volumes(&volumes, &set, Progress::none()).await.unwrap();
        assert_eq!(results[0].volume_name, "v1");
        // Same value again changes nothing
        let results = admin.label_volumes(&volumes, &set, Progress::none()).await.unwrap();
        assert!(!results[0].changed);
    }
}
