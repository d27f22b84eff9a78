//! XFS Formatter
//!
//! Formats devices with `mkfs.xfs`, mounts them under the mount root and
//! stamps the metadata marker the node agent uses to recognize its drives.

use super::superblock::Superblock;
use crate::consts::{
    APP_NAME, FS_LABEL, LATEST_API_VERSION, META_DIR_NAME, META_FILE_NAME, MOUNT_ROOT_DIR,
    VOLUME_ROOT_LINK_NAME,
};
use crate::device::sysfs::{parse_mountinfo, read_optional};
use crate::domain::ports::{Formatter, FsInfo};
use crate::error::{Error, Result};
use async_trait::async_trait;
use nix::errno::Errno;
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Size of the scratch image used by the reflink probe
const REFLINK_PROBE_IMAGE_SIZE: u64 = 16 * 1024 * 1024;

const MOUNT_OPTIONS: &str = "prjquota";

// =============================================================================
// Configuration
// =============================================================================

/// Formatter configuration
#[derive(Debug, Clone)]
pub struct XfsConfig {
    /// Drives are mounted at `<mount_root>/<fsuuid>`
    pub mount_root: PathBuf,
    /// mkfs binary
    pub mkfs_command: String,
    /// losetup binary, used by the reflink probe
    pub losetup_command: String,
    /// Scratch directory for the reflink probe
    pub scratch_dir: PathBuf,
    /// Bound on superblock reads
    pub probe_timeout: Duration,
}

impl Default for XfsConfig {
    fn default() -> Self {
        Self {
            mount_root: PathBuf::from(MOUNT_ROOT_DIR),
            mkfs_command: "mkfs.xfs".to_string(),
            losetup_command: "losetup".to_string(),
            scratch_dir: std::env::temp_dir(),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// Formatter
// =============================================================================

/// Formats and mounts XFS drives
pub struct XfsFormatter {
    config: XfsConfig,
    reflink: OnceCell<bool>,
}

impl XfsFormatter {
    pub fn new(config: XfsConfig) -> Self {
        Self {
            config,
            reflink: OnceCell::new(),
        }
    }

    /// Formatter with the reflink setting already known
    pub fn with_reflink(config: XfsConfig, reflink: bool) -> Self {
        Self {
            config,
            reflink: OnceCell::new_with(Some(reflink)),
        }
    }

    /// Mount point of a drive
    pub fn mount_point(&self, fsuuid: &str) -> PathBuf {
        self.config.mount_root.join(fsuuid)
    }

    /// Whether this kernel mounts reflink-enabled XFS; probed on first use
    pub async fn reflink_supported(&self) -> Result<bool> {
        let supported = self
            .reflink
            .get_or_try_init(|| async {
                let supported = self.probe_reflink().await?;
                if supported {
                    info!("Reflink support is enabled for XFS formatting");
                } else {
                    info!("Reflink support is disabled for XFS formatting");
                }
                Ok::<_, Error>(supported)
            })
            .await?;
        Ok(*supported)
    }

    async fn mkfs(&self, device: &str, fsuuid: &str, force: bool, reflink: bool) -> Result<()> {
        let args = mkfs_args(device, fsuuid, force, reflink);
        debug!("Running {} {}", self.config.mkfs_command, args.join(" "));

        let output = Command::new(&self.config.mkfs_command)
            .args(&args)
            .output()
            .await
            .map_err(|e| Error::Command {
                command: self.config.mkfs_command.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::Command {
                command: self.config.mkfs_command.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn read_superblock(&self, device: &str) -> Result<Superblock> {
        let path = PathBuf::from(device);
        let read = tokio::task::spawn_blocking(move || Superblock::read(&path));
        match tokio::time::timeout(self.config.probe_timeout, read).await {
            Ok(joined) => joined.map_err(|e| Error::Internal(e.to_string()))?,
            Err(_) => Err(Error::Timeout(format!("reading superblock of {}", device))),
        }
    }

    /// Format a scratch image, attach it and try to mount it.
    ///
    /// `Ok(false)` means only the mount failed.
    async fn check_xfs(&self, reflink: bool) -> Result<bool> {
        let config = self.config.clone();
        let mut scratch = blocking(move || Scratch::create(&config)).await?;
        let result = self.mount_scratch(&mut scratch, reflink).await;
        scratch.release().await;
        result
    }

    async fn mount_scratch(&self, scratch: &mut Scratch, reflink: bool) -> Result<bool> {
        let image = scratch.image.to_string_lossy().to_string();
        self.mkfs(&image, &uuid::Uuid::new_v4().to_string(), false, reflink)
            .await?;

        let output = Command::new(&self.config.losetup_command)
            .args(["--find", "--show", image.as_str()])
            .output()
            .await
            .map_err(|e| Error::Command {
                command: self.config.losetup_command.clone(),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(Error::Command {
                command: self.config.losetup_command.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let loop_device = String::from_utf8_lossy(&output.stdout).trim().to_string();
        scratch.loop_device = Some(loop_device.clone());

        let mount_dir = scratch.mount_dir.clone();
        if let Err(e) = blocking(move || Ok(mount_xfs(&loop_device, &mount_dir))).await? {
            debug!("Unable to mount XFS filesystem (reflink={}): {}", reflink, e);
            return Ok(false);
        }
        scratch.mounted = true;
        Ok(true)
    }

    async fn probe_reflink(&self) -> Result<bool> {
        if self.check_xfs(true).await? {
            return Ok(true);
        }
        if self.check_xfs(false).await? {
            return Ok(false);
        }
        Err(Error::Probe("unable to mount XFS filesystem".into()))
    }
}

#[async_trait]
impl Formatter for XfsFormatter {
    async fn make_fs(&self, device: &str, fsuuid: &str, force: bool) -> Result<FsInfo> {
        let reflink = self.reflink_supported().await?;
        self.mkfs(device, fsuuid, force, reflink).await?;

        let sb = self.read_superblock(device).await?;
        info!(
            "Formatted {} with fsuuid {} ({} bytes)",
            device,
            sb.fsuuid,
            sb.total_capacity()
        );
        Ok(FsInfo {
            fsuuid: sb.fsuuid.clone(),
            label: sb.label.clone(),
            total_capacity: sb.total_capacity(),
            free_capacity: sb.free_capacity(),
        })
    }

    async fn mount(&self, device: &str, fsuuid: &str) -> Result<()> {
        let target = self.mount_point(fsuuid);
        let device = device.to_string();
        blocking(move || mount_drive(&device, &target)).await
    }

    async fn unmount(&self, fsuuid: &str) -> Result<()> {
        let target = self.mount_point(fsuuid);
        blocking(move || unmount_drive(&target)).await
    }

    async fn write_metadata(&self, fsuuid: &str) -> Result<()> {
        let mount_point = self.mount_point(fsuuid);
        let fsuuid = fsuuid.to_string();
        blocking(move || write_metadata(&mount_point, &fsuuid)).await
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Run mount syscalls and file I/O off the async workers
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(e.to_string()))?
}

fn mount_drive(device: &str, target: &Path) -> Result<()> {
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o750)
        .create(target)?;

    match mount_xfs(device, target) {
        Ok(()) => {
            info!("Mounted {} at {}", device, target.display());
            Ok(())
        }
        Err(Errno::EBUSY) if is_mounted_at(target)? => {
            debug!("{} is already mounted at {}", device, target.display());
            Ok(())
        }
        Err(e) => Err(Error::device(
            device,
            format!("unable to mount at {}: {}", target.display(), e),
        )),
    }
}

fn unmount_drive(target: &Path) -> Result<()> {
    match umount2(target, MntFlags::MNT_FORCE | MntFlags::MNT_DETACH) {
        Ok(()) => {
            info!("Unmounted {}", target.display());
            Ok(())
        }
        Err(Errno::EINVAL) | Err(Errno::ENOENT) => Ok(()),
        Err(e) => Err(Error::Internal(format!(
            "unable to unmount {}: {}",
            target.display(),
            e
        ))),
    }
}

/// mkfs.xfs arguments for a drive
pub fn mkfs_args(device: &str, fsuuid: &str, force: bool, reflink: bool) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-i".into(),
        "maxpct=50".into(),
        "-m".into(),
        format!("uuid={}", fsuuid),
        "-L".into(),
        FS_LABEL.into(),
    ];
    if force {
        args.push("-f".into());
    }
    if !reflink {
        args.push("-m".into());
        args.push("reflink=0".into());
    }
    args.push(device.into());
    args
}

/// Content of the metadata marker file
pub fn metadata_content(fsuuid: &str) -> String {
    format!(
        "APP_NAME={}\nAPP_VERSION={}\nFSUUID={}\n",
        APP_NAME, LATEST_API_VERSION, fsuuid
    )
}

/// Write `.meta/info` and the `.directpv` self-link under a mounted drive
pub fn write_metadata(mount_point: &Path, fsuuid: &str) -> Result<()> {
    let meta_dir = mount_point.join(META_DIR_NAME);
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o750)
        .create(&meta_dir)?;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o640)
        .open(meta_dir.join(META_FILE_NAME))?;
    file.write_all(metadata_content(fsuuid).as_bytes())?;
    file.sync_all()?;

    match std::os::unix::fs::symlink(".", mount_point.join(VOLUME_ROOT_LINK_NAME)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Project quota ID of a volume
pub fn project_id(volume_name: &str) -> u32 {
    let digest = Sha256::digest(volume_name.as_bytes());
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

fn mount_xfs(device: &str, target: &Path) -> std::result::Result<(), Errno> {
    mount(
        Some(device),
        target,
        Some("xfs"),
        MsFlags::MS_NOATIME,
        Some(MOUNT_OPTIONS),
    )
}

fn is_mounted_at(target: &Path) -> Result<bool> {
    let mounts = parse_mountinfo(&read_optional(Path::new("/proc/self/mountinfo"))?)?;
    let target = target.to_string_lossy();
    Ok(mounts
        .values()
        .any(|points| points.iter().any(|p| *p == target)))
}

/// Scratch image, mount directory and loop device of one reflink probe.
/// `release` tears everything down in reverse order.
struct Scratch {
    image: PathBuf,
    mount_dir: PathBuf,
    losetup_command: String,
    loop_device: Option<String>,
    mounted: bool,
}

impl Scratch {
    fn create(config: &XfsConfig) -> Result<Self> {
        let id = uuid::Uuid::new_v4();
        let image = config.scratch_dir.join(format!("xfs.check.file.{}", id));
        let mount_dir = config.scratch_dir.join(format!("xfs.check.mnt.{}", id));

        std::fs::create_dir_all(&mount_dir)?;
        let scratch = Self {
            image,
            mount_dir,
            losetup_command: config.losetup_command.clone(),
            loop_device: None,
            mounted: false,
        };
        let file = std::fs::File::create(&scratch.image)?;
        file.set_len(REFLINK_PROBE_IMAGE_SIZE)?;
        Ok(scratch)
    }

    async fn release(self) {
        if self.mounted {
            let mount_dir = self.mount_dir.clone();
            let unmounted = blocking(move || {
                Ok(umount2(&mount_dir, MntFlags::MNT_FORCE | MntFlags::MNT_DETACH))
            })
            .await;
            if !matches!(unmounted, Ok(Ok(()))) {
                warn!("Unable to unmount {}", self.mount_dir.display());
            }
        }
        if let Some(loop_device) = &self.loop_device {
            let detached = Command::new(&self.losetup_command)
                .args(["-d", loop_device.as_str()])
                .status()
                .await;
            if !matches!(detached, Ok(status) if status.success()) {
                warn!("Unable to detach loop device {}", loop_device);
            }
        }
        let (mount_dir, image) = (self.mount_dir, self.image);
        let removed = blocking(move || {
            let _ = std::fs::remove_dir(&mount_dir);
            let _ = std::fs::remove_file(&image);
            Ok(())
        })
        .await;
        if let Err(e) = removed {
            warn!("Unable to remove reflink scratch files: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mkfs_args() {
        assert_eq!(
            mkfs_args("/dev/sdb", "abc", false, true),
            vec!["-i", "maxpct=50", "-m", "uuid=abc", "-L", "DIRECTPV", "/dev/sdb"]
        );
        assert_eq!(
            mkfs_args("/dev/sdb", "abc", true, false),
            vec![
                "-i",
                "maxpct=50",
                "-m",
                "uuid=abc",
                "-L",
                "DIRECTPV",
                "-f",
                "-m",
                "reflink=0",
                "/dev/sdb"
            ]
        );
    }

    #[test]
    fn test_write_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let fsuuid = "2b7d7c6e-7a4c-4f7a-9a3e-9d7b2a1c0f11";

        write_metadata(dir.path(), fsuuid).unwrap();
        // Second write keeps the existing link
        write_metadata(dir.path(), fsuuid).unwrap();

        let content = std::fs::read_to_string(dir.path().join(".meta/info")).unwrap();
        assert_eq!(
            content,
            format!("APP_NAME=directpv\nAPP_VERSION=v1beta1\nFSUUID={}\n", fsuuid)
        );
        let link = std::fs::read_link(dir.path().join(".directpv")).unwrap();
        assert_eq!(link, PathBuf::from("."));

        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(dir.path().join(".meta/info"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777 & !0o640, 0);
    }

    #[tokio::test]
    async fn test_formatter_writes_metadata_under_mount_root() {
        let root = tempfile::tempdir().unwrap();
        let formatter = XfsFormatter::with_reflink(
            XfsConfig {
                mount_root: root.path().to_path_buf(),
                ..Default::default()
            },
            true,
        );
        formatter.write_metadata("abc").await.unwrap();

        let content = std::fs::read_to_string(root.path().join("abc/.meta/info")).unwrap();
        assert!(content.ends_with("FSUUID=abc\n"));
    }

    #[tokio::test]
    async fn test_scratch_release_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = XfsConfig {
            scratch_dir: dir.path().to_path_buf(),
            losetup_command: "/nonexistent/losetup".into(),
            ..Default::default()
        };
        let scratch = Scratch::create(&config).unwrap();
        let (image, mount_dir) = (scratch.image.clone(), scratch.mount_dir.clone());
        assert_eq!(std::fs::metadata(&image).unwrap().len(), REFLINK_PROBE_IMAGE_SIZE);
        assert!(mount_dir.is_dir());

        scratch.release().await;
        assert!(!image.exists());
        assert!(!mount_dir.exists());
    }

    #[test]
    fn test_project_id() {
        let digest = Sha256::digest(b"pvc-1234");
        let expected = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
        assert_eq!(project_id("pvc-1234"), expected);
        assert_ne!(project_id("pvc-1234"), project_id("pvc-1235"));
    }

    #[tokio::test]
    async fn test_cached_reflink_skips_probe() {
        let config = XfsConfig {
            losetup_command: "/nonexistent/losetup".into(),
            mkfs_command: "/nonexistent/mkfs.xfs".into(),
            ..Default::default()
        };
        let formatter = XfsFormatter::with_reflink(config, false);
        assert!(!formatter.reflink_supported().await.unwrap());
        assert_eq!(
            formatter.mount_point("abc"),
            PathBuf::from("/var/lib/directpv/mnt/abc")
        );
    }

    #[tokio::test]
    async fn test_make_fs_reports_command_failure() {
        let config = XfsConfig {
            mkfs_command: "/nonexistent/mkfs.xfs".into(),
            ..Default::default()
        };
        let formatter = XfsFormatter::with_reflink(config, true);
        let err = formatter.make_fs("/dev/sdz", "abc", false).await.unwrap_err();
        assert!(matches!(err, Error::Command { .. }));
    }
}
