//! Readers and parsers for udev, sysfs and procfs
//!
//! Parsers take text so they can be tested without a live kernel; readers
//! resolve paths against configurable roots.

use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

// =============================================================================
// Parsers
// =============================================================================

/// Parse a udev database entry (`E:ID_FS_TYPE=xfs`, `S:disk/by-id/...`)
pub fn parse_udev_data(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once('=') {
            Some((key, value)) => (key.to_string(), value.trim().to_string()),
            None => (line.to_string(), String::new()),
        })
        .collect()
}

/// Extract `DEVNAME` from a sysfs uevent file
pub fn parse_uevent_devname(content: &str) -> Option<String> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("DEVNAME="))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

/// Map major:minor to mount points from a mountinfo file
pub fn parse_mountinfo(content: &str) -> Result<BTreeMap<String, Vec<String>>> {
    let mut mounts: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        let (head, _) = line
            .split_once(" - ")
            .ok_or_else(|| Error::Probe(format!("invalid mountinfo line: {}", line)))?;
        let fields: Vec<&str> = head.split_whitespace().collect();
        if fields.len() < 6 {
            return Err(Error::Probe(format!("invalid mountinfo line: {}", line)));
        }
        let mount_point = unescape_octal(fields[4]);
        let entry = mounts.entry(fields[2].to_string()).or_default();
        if !entry.contains(&mount_point) {
            entry.push(mount_point);
        }
    }
    Ok(mounts)
}

/// mountinfo escapes space, tab, newline and backslash as `\ooo`
fn unescape_octal(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if let Some(b) = value
                .get(i + 1..i + 4)
                .and_then(|digits| u8::from_str_radix(digits, 8).ok())
            {
                out.push(b);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Swap file names from /proc/swaps, skipping the header
pub fn parse_swaps(content: &str) -> Vec<String> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Drive names from the `drive name:` line of /proc/sys/dev/cdrom/info
pub fn parse_cdroms(content: &str) -> BTreeSet<String> {
    content
        .lines()
        .find_map(|line| line.split_once("drive name:").map(|(_, names)| names))
        .map(|names| names.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Parse `major:minor`
pub fn parse_major_minor(value: &str) -> Result<(u32, u32)> {
    let invalid = || Error::Probe(format!("unknown format of {}", value));
    let (major, minor) = value.split_once(':').ok_or_else(invalid)?;
    Ok((
        major.parse().map_err(|_| invalid())?,
        minor.parse().map_err(|_| invalid())?,
    ))
}

// =============================================================================
// Readers
// =============================================================================

/// First line of a file, trimmed; missing files read as empty
pub fn read_first_line(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content.lines().next().unwrap_or_default().trim().to_string()),
        Err(e) if is_absent(&e) => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

/// Entry names of a directory; a missing directory reads as empty
pub fn read_dir_names(path: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if is_absent(&e) => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    for entry in entries {
        names.push(entry?.file_name().to_string_lossy().to_string());
    }
    names.sort();
    Ok(names)
}

/// File content; a missing file reads as empty
pub fn read_optional(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if is_absent(&e) => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

/// Missing files and devices that vanished under us
fn is_absent(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::NotFound | ErrorKind::InvalidInput)
        || err.raw_os_error() == Some(nix::libc::ENODEV)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_udev_data() {
        let data = parse_udev_data("S:disk/by-id/wwn-0x5000\nE:ID_FS_TYPE=xfs\nE:ID_MODEL=Samsung SSD\nG:systemd\n");
        assert_eq!(data["E:ID_FS_TYPE"], "xfs");
        assert_eq!(data["E:ID_MODEL"], "Samsung SSD");
        assert_eq!(data["G:systemd"], "");
        assert_eq!(data["S:disk/by-id/wwn-0x5000"], "");
    }

    #[test]
    fn test_parse_uevent() {
        let uevent = "MAJOR=8\nMINOR=0\nDEVNAME=sda\nDEVTYPE=disk\n";
        assert_eq!(parse_uevent_devname(uevent), Some("sda".into()));
        assert_eq!(parse_uevent_devname("DEVNAME=\n"), None);
    }

    #[test]
    fn test_parse_mountinfo() {
        let content = "\
22 1 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw
30 22 8:16 / /var/lib/directpv/mnt/abc rw,noatime shared:2 - xfs /dev/sdb rw,prjquota
31 22 8:16 / /mnt/with\\040space rw - xfs /dev/sdb rw
";
        let mounts = parse_mountinfo(content).unwrap();
        assert_eq!(mounts["8:1"], vec!["/".to_string()]);
        assert_eq!(
            mounts["8:16"],
            vec![
                "/var/lib/directpv/mnt/abc".to_string(),
                "/mnt/with space".to_string()
            ]
        );
        assert!(parse_mountinfo("garbage line").is_err());
    }

    #[test]
    fn test_parse_swaps_and_cdroms() {
        let swaps = "Filename\tType\tSize\tUsed\tPriority\n/dev/sdc2 partition 1024 0 -2\n";
        assert_eq!(parse_swaps(swaps), vec!["/dev/sdc2".to_string()]);

        let cdrom = "CD-ROM information, Id: cdrom.c 3.20\n\ndrive name:\t\tsr1\tsr0\ndrive speed:\t\t1\n";
        let names = parse_cdroms(cdrom);
        assert!(names.contains("sr0"));
        assert!(names.contains("sr1"));
        assert!(parse_cdroms("").is_empty());
    }

    #[test]
    fn test_read_helpers_tolerate_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_first_line(&dir.path().join("missing")).unwrap(), "");
        assert!(read_dir_names(&dir.path().join("missing")).unwrap().is_empty());

        fs::write(dir.path().join("size"), "2048\n").unwrap();
        assert_eq!(read_first_line(&dir.path().join("size")).unwrap(), "2048");
        assert_eq!(parse_major_minor("259:3").unwrap(), (259, 3));
        assert!(parse_major_minor("259").is_err());
    }
}
