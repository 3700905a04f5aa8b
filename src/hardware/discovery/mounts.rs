//! Mount Table
//!
//! Reads the host mount table to find the filesystem type and mountpoint
//! of each block device. The default is init's view (`/proc/1/mounts`), so
//! a containerised daemon sees the same mounts it watches for changes.

use crate::error::Result;
use std::fs;
use std::path::Path;

/// Default mount table location
pub const PROC_MOUNTS: &str = "/proc/1/mounts";

/// One mounted block device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: String,
    pub fs_type: String,
}

/// Mounted block devices, in mount order
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    /// Read and parse a mount table, resolving `/dev/mapper/*` style
    /// symlinks to their device nodes
    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut table = Self::parse(&content);

        for entry in &mut table.entries {
            if let Ok(real) = fs::canonicalize(&entry.device) {
                entry.device = real.to_string_lossy().into_owned();
            }
        }

        Ok(table)
    }

    /// Parse mount table content; only `/dev/*` sources are kept
    pub fn parse(input: &str) -> Self {
        let entries = input
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let device = fields.next()?;
                let mount_point = fields.next()?;
                let fs_type = fields.next()?;

                device.starts_with("/dev/").then(|| MountEntry {
                    device: unescape_mount_field(device),
                    mount_point: unescape_mount_field(mount_point),
                    fs_type: fs_type.to_string(),
                })
            })
            .collect();

        Self { entries }
    }

    /// First mount of `device`
    pub fn lookup(&self, device: &str) -> Option<&MountEntry> {
        self.entries.iter().find(|entry| entry.device == device)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decode the `\040`-style octal escapes the kernel uses for whitespace
fn unescape_mount_field(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\' && index + 3 < bytes.len() {
            let digits = &bytes[index + 1..index + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let num = digits.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(num) = u8::try_from(num) {
                    output.push(num);
                    index += 4;
                    continue;
                }
            }
        }

        output.push(bytes[index]);
        index += 1;
    }

    String::from_utf8_lossy(&output).into_owned()
}
