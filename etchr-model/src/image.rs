use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Metadata describing a candidate image file.
///
/// Built by whatever selected the file (see [`crate::inspect`] for the
/// on-disk scanner). The classifier only reads it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Path to the image file, including every extension layer (`disk.img.xz`).
    pub path: PathBuf,
    /// Uncompressed size in bytes, when it is known without decompressing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Master boot record, present only when the content was scanned and one was found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mbr: Option<Mbr>,
}

impl ImageMetadata {
    /// Metadata carrying nothing but a path. The content has not been scanned.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The parts of a master boot record the UI cares about.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Mbr {
    pub disk_signature: u32,
    pub partitions: Vec<MbrPartition>,
}

/// A non-empty primary partition entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MbrPartition {
    pub bootable: bool,
    pub partition_type: u8,
    pub first_lba: u32,
    pub sectors: u32,
}

impl fmt::Display for MbrPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type 0x{:02x} at LBA {:<10} {:>10} sectors{}",
            self.partition_type,
            self.first_lba,
            self.sectors,
            if self.bootable { " [boot]" } else { "" }
        )
    }
}
