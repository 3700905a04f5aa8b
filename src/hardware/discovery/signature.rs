//! On-Disk Signatures
//!
//! Recognises filesystem, volume manager, RAID and encryption superblocks
//! by magic bytes at fixed offsets, so a formatted device that is not
//! mounted is still reported as in use.

use crate::error::Result;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Bytes read from the start of a device; covers every magic below
pub const SIGNATURE_WINDOW: usize = 0x10048;

/// A magic byte string at a fixed offset from the start of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMagic {
    pub name: &'static str,
    pub magic: &'static [u8],
    pub offset: usize,
}

impl BlockMagic {
    pub fn matches(&self, head: &[u8]) -> bool {
        head.get(self.offset..self.offset + self.magic.len()) == Some(self.magic)
    }
}

const MD_MAGIC: &[u8] = &[0xfc, 0x4e, 0x2b, 0xa9];

/// Known signatures; containers come first so a LUKS or LVM header wins
/// over a stale filesystem magic further in
pub const BLOCK_MAGICS: &[BlockMagic] = &[
    BlockMagic { name: "crypto_LUKS", magic: b"LUKS\xba\xbe", offset: 0 },
    BlockMagic { name: "LVM2_member", magic: b"LVM2 001", offset: 0x218 },
    BlockMagic { name: "linux_raid_member", magic: MD_MAGIC, offset: 0x1000 },
    BlockMagic { name: "linux_raid_member", magic: MD_MAGIC, offset: 0 },
    BlockMagic { name: "xfs", magic: b"XFSB", offset: 0 },
    BlockMagic { name: "ext4", magic: &[0x53, 0xef], offset: 0x438 },
    BlockMagic { name: "btrfs", magic: b"_BHRfS_M", offset: 0x10040 },
    BlockMagic { name: "swap", magic: b"SWAPSPACE2", offset: 0xff6 },
    BlockMagic { name: "swap", magic: b"SWAP-SPACE", offset: 0xff6 },
    BlockMagic { name: "vfat", magic: b"FAT32   ", offset: 0x52 },
    BlockMagic { name: "vfat", magic: b"FAT16   ", offset: 0x36 },
    BlockMagic { name: "ntfs", magic: b"NTFS    ", offset: 3 },
    BlockMagic { name: "iso9660", magic: b"CD001", offset: 0x8001 },
];

// ext superblock lives at 1024; feature words are relative to it
const EXT_SUPERBLOCK: usize = 0x400;
const EXT_FEATURE_COMPAT: usize = EXT_SUPERBLOCK + 0x5c;
const EXT_FEATURE_INCOMPAT: usize = EXT_SUPERBLOCK + 0x60;
const EXT_COMPAT_HAS_JOURNAL: u32 = 0x4;
const EXT_INCOMPAT_EXT4: u32 = 0x40 | 0x80 | 0x200; // extents, 64bit, flex_bg

/// Signature name found in the leading bytes of a device
pub fn match_signature(head: &[u8]) -> Option<&'static str> {
    let magic = BLOCK_MAGICS.iter().find(|magic| magic.matches(head))?;
    match magic.name {
        "ext4" => Some(ext_variant(head)),
        name => Some(name),
    }
}

/// Read the start of `path` and match it against [`BLOCK_MAGICS`]
pub fn detect_signature(path: &Path) -> Result<Option<&'static str>> {
    let mut head = Vec::with_capacity(SIGNATURE_WINDOW);
    File::open(path)?
        .take(SIGNATURE_WINDOW as u64)
        .read_to_end(&mut head)?;
    Ok(match_signature(&head))
}

fn ext_variant(head: &[u8]) -> &'static str {
    let word = |offset: usize| {
        head.get(offset..offset + 4)
            .and_then(|bytes| bytes.try_into().ok())
            .map_or(0, u32::from_le_bytes)
    };

    if word(EXT_FEATURE_INCOMPAT) & EXT_INCOMPAT_EXT4 != 0 {
        "ext4"
    } else if word(EXT_FEATURE_COMPAT) & EXT_COMPAT_HAS_JOURNAL != 0 {
        "ext3"
    } else {
        "ext2"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn image(patches: &[(usize, &[u8])]) -> Vec<u8> {
        let mut head = vec![0u8; SIGNATURE_WINDOW];
        for (offset, bytes) in patches {
            head[*offset..*offset + bytes.len()].copy_from_slice(bytes);
        }
        head
    }

    #[test]
    fn test_blank_device_has_no_signature() {
        assert_eq!(match_signature(&image(&[])), None);
        assert_eq!(match_signature(&[]), None);
    }

    #[test]
    fn test_common_signatures() {
        assert_eq!(match_signature(&image(&[(0, b"XFSB")])), Some("xfs"));
        assert_eq!(
            match_signature(&image(&[(0x200, b"LABELONE"), (0x218, b"LVM2 001")])),
            Some("LVM2_member")
        );
        assert_eq!(
            match_signature(&image(&[(0x1000, MD_MAGIC)])),
            Some("linux_raid_member")
        );
        assert_eq!(
            match_signature(&image(&[(0xff6, b"SWAPSPACE2")])),
            Some("swap")
        );
        assert_eq!(
            match_signature(&image(&[(0x10040, b"_BHRfS_M")])),
            Some("btrfs")
        );
    }

    #[test]
    fn test_ext_generations() {
        let magic: (usize, &[u8]) = (0x438, &[0x53, 0xef]);

        assert_eq!(match_signature(&image(&[magic])), Some("ext2"));
        assert_eq!(
            match_signature(&image(&[magic, (EXT_FEATURE_COMPAT, &[0x04, 0, 0, 0])])),
            Some("ext3")
        );
        assert_eq!(
            match_signature(&image(&[
                magic,
                (EXT_FEATURE_COMPAT, &[0x04, 0, 0, 0]),
                (EXT_FEATURE_INCOMPAT, &[0x42, 0x02, 0, 0]),
            ])),
            Some("ext4")
        );
    }

    #[test]
    fn test_luks_header_wins() {
        let head = image(&[(0, b"LUKS\xba\xbe"), (0x438, &[0x53, 0xef])]);
        assert_eq!(match_signature(&head), Some("crypto_LUKS"));
    }

    #[test]
    fn test_detect_from_short_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("img");
        std::fs::write(&path, b"XFSB").unwrap();

        assert_eq!(detect_signature(&path).unwrap(), Some("xfs"));
        assert!(detect_signature(&tmp.path().join("missing")).is_err());
    }
}
