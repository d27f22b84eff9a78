//! XFS superblock probe
//!
//! Reads the primary superblock at offset 0 of a device. All fields are
//! big-endian; only the fields needed for identity and capacity are kept.

use crate::error::{Error, Result};
use std::io::Read;
use std::path::Path;

/// `XFSB`
pub const XFS_MAGIC: u32 = 0x5846_5342;

/// Bytes of the superblock we read (up to and including `sb_frextents`)
pub const SUPERBLOCK_SIZE: usize = 160;

const BLOCK_SIZE_OFFSET: usize = 4;
const DBLOCKS_OFFSET: usize = 8;
const UUID_OFFSET: usize = 32;
const FNAME_OFFSET: usize = 108;
const FNAME_LEN: usize = 12;
const FDBLOCKS_OFFSET: usize = 144;

/// Identity and capacity read from a superblock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    pub fsuuid: String,
    pub label: String,
    pub block_size: u32,
    pub total_blocks: u64,
    pub free_blocks: u64,
}

impl Superblock {
    /// Parse a raw superblock
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < SUPERBLOCK_SIZE {
            return Err(Error::Probe(format!(
                "short superblock read: {} bytes",
                buf.len()
            )));
        }

        if be_u32(buf, 0) != XFS_MAGIC {
            return Err(Error::Probe("filesystem not found".into()));
        }

        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&buf[UUID_OFFSET..UUID_OFFSET + 16]);

        let fname = &buf[FNAME_OFFSET..FNAME_OFFSET + FNAME_LEN];
        let end = fname.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);

        Ok(Self {
            fsuuid: format_uuid(&uuid),
            label: String::from_utf8_lossy(&fname[..end]).into_owned(),
            block_size: be_u32(buf, BLOCK_SIZE_OFFSET),
            total_blocks: be_u64(buf, DBLOCKS_OFFSET),
            free_blocks: be_u64(buf, FDBLOCKS_OFFSET),
        })
    }

    /// Read and parse the superblock of a device or image file
    pub fn read(path: &Path) -> Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        file.read_exact(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => Error::Probe("filesystem not found".into()),
            _ => Error::Io(e),
        })?;
        Self::parse(&buf)
    }

    pub fn total_capacity(&self) -> u64 {
        self.total_blocks * u64::from(self.block_size)
    }

    pub fn free_capacity(&self) -> u64 {
        self.free_blocks * u64::from(self.block_size)
    }
}

fn be_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_be_bytes(bytes)
}

fn be_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_be_bytes(bytes)
}

/// 8-4-4-4-12 lower-case hex
fn format_uuid(uuid: &[u8; 16]) -> String {
    format!(
        "{}-{}-{}-{}-{}",
        hex::encode(&uuid[0..4]),
        hex::encode(&uuid[4..6]),
        hex::encode(&uuid[6..8]),
        hex::encode(&uuid[8..10]),
        hex::encode(&uuid[10..16])
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_matches::assert_matches;

    /// Minimal superblock image with the given identity and geometry
    pub(crate) fn superblock_bytes(
        uuid: &[u8; 16],
        label: &str,
        block_size: u32,
        total_blocks: u64,
        free_blocks: u64,
    ) -> Vec<u8> {
        let mut buf = vec![0u8; 512];
        buf[0..4].copy_from_slice(&XFS_MAGIC.to_be_bytes());
        buf[4..8].copy_from_slice(&block_size.to_be_bytes());
        buf[8..16].copy_from_slice(&total_blocks.to_be_bytes());
        buf[32..48].copy_from_slice(uuid);
        buf[108..108 + label.len()].copy_from_slice(label.as_bytes());
        buf[144..152].copy_from_slice(&free_blocks.to_be_bytes());
        buf
    }

    const UUID: [u8; 16] = [
        0x2b, 0x7d, 0x7c, 0x6e, 0x7a, 0x4c, 0x4f, 0x7a, 0x9a, 0x3e, 0x9d, 0x7b, 0x2a, 0x1c, 0x0f,
        0x11,
    ];

    #[test]
    fn test_parse_superblock() {
        let buf = superblock_bytes(&UUID, "DIRECTPV", 4096, 262_144, 261_000);
        let sb = Superblock::parse(&buf).unwrap();

        assert_eq!(sb.fsuuid, "2b7d7c6e-7a4c-4f7a-9a3e-9d7b2a1c0f11");
        assert_eq!(sb.label, "DIRECTPV");
        assert_eq!(sb.total_capacity(), 262_144 * 4096);
        assert_eq!(sb.free_capacity(), 261_000 * 4096);
    }

    #[test]
    fn test_wrong_magic() {
        let mut buf = superblock_bytes(&UUID, "", 4096, 1, 1);
        buf[0..4].copy_from_slice(b"EXT4");
        assert_matches!(
            Superblock::parse(&buf),
            Err(Error::Probe(msg)) if msg == "filesystem not found"
        );
        assert_matches!(Superblock::parse(&buf[..64]), Err(Error::Probe(_)));
    }

    #[test]
    fn test_read_from_image() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("disk.img");
        std::fs::write(&image, superblock_bytes(&UUID, "data", 512, 100, 50)).unwrap();

        let sb = Superblock::read(&image).unwrap();
        assert_eq!(sb.label, "data");
        assert_eq!(sb.free_capacity(), 25_600);

        let empty = dir.path().join("empty.img");
        std::fs::write(&empty, b"").unwrap();
        assert_matches!(Superblock::read(&empty), Err(Error::Probe(_)));
    }
}
