//! Decides whether a file is a flashable image, based on its path.
//!
//! Every decision here is driven by a table of `(extension, category)` pairs.
//! The table is fixed once a [`SupportedFormats`] is built; the default one is
//! [`SUPPORTED_FILE_TYPES`], but front-ends may load their own with
//! [`SupportedFormats::from_json`].
//!
//! A file is supported when its extension is an image or an archive. A
//! compressed extension is peeled off and the remaining name is checked again,
//! so `disk.img.xz` and `disk.img.gz.xz` are both accepted while `notes.txt.gz`
//! is not.
use crate::error::Result;
use crate::image::ImageMetadata;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

/// The role an extension plays in the unwrapping chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// A raw disk image that can be written as-is.
    Image,
    /// A container that is handed over without looking inside.
    Archive,
    /// A compression layer wrapping another file.
    Compressed,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Image, Category::Archive, Category::Compressed];
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Category::Image => "image",
            Category::Archive => "archive",
            Category::Compressed => "compressed",
        })
    }
}

/// A single registry entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileType {
    #[serde(rename = "type")]
    pub category: Category,
    /// Lowercase, without the leading dot.
    pub extension: Cow<'static, str>,
}

impl FileType {
    pub const fn new(category: Category, extension: &'static str) -> Self {
        Self {
            category,
            extension: Cow::Borrowed(extension),
        }
    }
}

/// File types understood by the image pipeline out of the box.
pub const SUPPORTED_FILE_TYPES: &[FileType] = &[
    FileType::new(Category::Archive, "zip"),
    FileType::new(Category::Archive, "etch"),
    FileType::new(Category::Compressed, "gz"),
    FileType::new(Category::Compressed, "xz"),
    FileType::new(Category::Compressed, "zst"),
    FileType::new(Category::Image, "img"),
    FileType::new(Category::Image, "iso"),
    FileType::new(Category::Image, "bin"),
    FileType::new(Category::Image, "dsk"),
    FileType::new(Category::Image, "hddimg"),
    FileType::new(Category::Image, "raw"),
    FileType::new(Category::Image, "dmg"),
    FileType::new(Category::Image, "sdcard"),
    FileType::new(Category::Image, "rpi-sdimg"),
    FileType::new(Category::Image, "wic"),
];

static WINDOWS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)windows|win7|win8|win10|winxp").expect("windows pattern is valid")
});

/// An immutable registry of supported file types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupportedFormats {
    types: Vec<FileType>,
}

impl Default for SupportedFormats {
    fn default() -> Self {
        Self::new(SUPPORTED_FILE_TYPES.iter().cloned())
    }
}

impl SupportedFormats {
    /// Builds a registry from arbitrary entries.
    ///
    /// Extensions are lowercased and stripped of a leading dot. A repeated
    /// `(category, extension)` pair is only kept the first time it appears.
    pub fn new(types: impl IntoIterator<Item = FileType>) -> Self {
        let mut unique: Vec<FileType> = Vec::new();
        for file_type in types {
            let extension = file_type.extension.trim_start_matches('.').to_lowercase();
            if extension.is_empty() {
                continue;
            }
            let duplicate = unique
                .iter()
                .any(|t| t.category == file_type.category && t.extension == extension);
            if !duplicate {
                unique.push(FileType {
                    category: file_type.category,
                    extension: Cow::Owned(extension),
                });
            }
        }
        Self { types: unique }
    }

    /// Parses a registry from a JSON array of `{ "type": ..., "extension": ... }` objects.
    pub fn from_json(json: &str) -> Result<Self> {
        let types: Vec<FileType> = serde_json::from_str(json)?;
        Ok(Self::new(types))
    }

    pub fn file_types(&self) -> &[FileType] {
        &self.types
    }

    /// Extensions registered under `category`, in registry order.
    pub fn extensions_of(&self, category: Category) -> Vec<&str> {
        self.types
            .iter()
            .filter(|t| t.category == category)
            .map(|t| &*t.extension)
            .collect()
    }

    pub fn compressed_extensions(&self) -> Vec<&str> {
        self.extensions_of(Category::Compressed)
    }

    /// Extensions of plain, directly writable images.
    pub fn non_compressed_extensions(&self) -> Vec<&str> {
        self.extensions_of(Category::Image)
    }

    pub fn archive_extensions(&self) -> Vec<&str> {
        self.extensions_of(Category::Archive)
    }

    /// Every registered extension, across all categories.
    pub fn all_extensions(&self) -> Vec<&str> {
        let mut all: Vec<&str> = Vec::with_capacity(self.types.len());
        for file_type in &self.types {
            if !all.contains(&&*file_type.extension) {
                all.push(&file_type.extension);
            }
        }
        all
    }

    /// Whether `extension` (lowercase, no dot) is registered under `category`.
    pub fn contains(&self, category: Category, extension: &str) -> bool {
        self.types
            .iter()
            .any(|t| t.category == category && t.extension == extension)
    }

    /// Whether the image can be flashed, unwrapping compression layers as needed.
    pub fn is_supported_image(&self, image: &ImageMetadata) -> bool {
        let mut path = image.path();

        loop {
            let extension = extension_of(path);

            if self.contains(Category::Image, &extension)
                || self.contains(Category::Archive, &extension)
            {
                debug!("{} is supported (.{})", image.path.display(), extension);
                return true;
            }

            if !self.contains(Category::Compressed, &extension) {
                debug!("{} is not supported", image.path.display());
                return false;
            }

            // Peel exactly one compression layer off the file name.
            match path.file_stem() {
                Some(stem) => path = Path::new(stem),
                None => return false,
            }
        }
    }
}

pub(crate) fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// Whether the file name suggests a Windows installer.
///
/// A naming heuristic only. It exists so the UI can warn that such images
/// usually need more than a raw write to boot.
pub fn looks_like_windows_image(image: &ImageMetadata) -> bool {
    image
        .path
        .file_name()
        .map(|name| WINDOWS_PATTERN.is_match(&name.to_string_lossy()))
        .unwrap_or(false)
}

/// Whether the scanned metadata carries no partition table.
///
/// Trusts whoever built the metadata. Nothing is read from disk.
pub fn missing_partition_table(image: &ImageMetadata) -> bool {
    image.mbr.is_none()
}
