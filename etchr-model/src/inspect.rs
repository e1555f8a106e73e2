//! Builds [`ImageMetadata`] from an image file on disk.
//!
//! Compressed images are decompressed on-the-fly, one layer per trailing
//! extension (`.gz`, `.xz`, `.zst`), until the first sector of the raw image
//! can be read. Only that sector is decoded; nothing is written anywhere.
use crate::error::{Error, Result};
use crate::formats::{Category, SupportedFormats, extension_of};
use crate::image::{ImageMetadata, Mbr, MbrPartition};
use flate2::read::GzDecoder;
use log::debug;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use xz2::read::XzDecoder;
use zstd::stream::read::Decoder as ZstdDecoder;

const SECTOR_SIZE: usize = 512;
const DISK_SIGNATURE_OFFSET: usize = 440;
const PARTITION_TABLE_OFFSET: usize = 446;
const PARTITION_ENTRY_SIZE: usize = 16;
const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];

/// Inspects an image using the built-in format registry.
pub fn inspect(path: &Path) -> Result<ImageMetadata> {
    inspect_with(path, &SupportedFormats::default())
}

/// Inspects an image, using `formats` to tell archives and compression layers apart.
///
/// # Errors
///
/// This function will return an error if:
/// - The file cannot be opened.
/// - A compression layer is registered but has no decoder (e.g. `lz4` in a custom registry).
/// - A decoder fails on corrupt input.
pub fn inspect_with(path: &Path, formats: &SupportedFormats) -> Result<ImageMetadata> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut metadata = ImageMetadata::from_path(path);

    let mut reader: Box<dyn Read> = Box::new(BufReader::new(file));
    let mut name = path;
    let mut compressed = false;

    loop {
        let ext = extension_of(name);

        if formats.contains(Category::Archive, &ext) {
            debug!("{} is an archive, skipping MBR scan", path.display());
            return Ok(metadata);
        }
        if !formats.contains(Category::Compressed, &ext) {
            break;
        }

        reader = match ext.as_str() {
            "gz" | "gzip" => Box::new(GzDecoder::new(reader)),
            "xz" => Box::new(XzDecoder::new(reader)),
            "zst" | "zstd" => Box::new(ZstdDecoder::new(reader)?),
            other => return Err(Error::UnsupportedCompression(other.to_string())),
        };
        compressed = true;

        match name.file_stem() {
            Some(stem) => name = Path::new(stem),
            None => break,
        }
    }

    // The uncompressed size is unknown without reading the whole stream.
    if !compressed {
        metadata.size = Some(file_len);
    }

    let mut sector = Vec::with_capacity(SECTOR_SIZE);
    reader.take(SECTOR_SIZE as u64).read_to_end(&mut sector)?;
    metadata.mbr = parse_mbr(&sector);

    match &metadata.mbr {
        Some(mbr) => debug!(
            "{}: MBR with {} partition(s)",
            path.display(),
            mbr.partitions.len()
        ),
        None => debug!("{}: no MBR found", path.display()),
    }

    Ok(metadata)
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Decodes a boot sector. Returns `None` for short input or a missing `55 AA` signature.
pub fn parse_mbr(sector: &[u8]) -> Option<Mbr> {
    if sector.len() < SECTOR_SIZE || sector[510..512] != BOOT_SIGNATURE {
        return None;
    }

    let partitions = (0..4)
        .map(|i| &sector[PARTITION_TABLE_OFFSET + i * PARTITION_ENTRY_SIZE..][..PARTITION_ENTRY_SIZE])
        .filter(|entry| entry[4] != 0)
        .map(|entry| MbrPartition {
            bootable: entry[0] == 0x80,
            partition_type: entry[4],
            first_lba: read_u32(entry, 8),
            sectors: read_u32(entry, 12),
        })
        .collect();

    Some(Mbr {
        disk_signature: read_u32(sector, DISK_SIGNATURE_OFFSET),
        partitions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::FileType;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use xz2::write::XzEncoder;

    /// A 1 MiB image with a bootable FAT32 partition and a Linux partition.
    fn raw_image() -> Vec<u8> {
        let mut image = vec![0u8; 1024 * 1024];
        image[440..444].copy_from_slice(&0xDEADBEEFu32.to_le_bytes());

        let first = &mut image[446..462];
        first[0] = 0x80;
        first[4] = 0x0c;
        first[8..12].copy_from_slice(&8192u32.to_le_bytes());
        first[12..16].copy_from_slice(&524288u32.to_le_bytes());

        let second = &mut image[462..478];
        second[4] = 0x83;
        second[8..12].copy_from_slice(&532480u32.to_le_bytes());
        second[12..16].copy_from_slice(&1048576u32.to_le_bytes());

        image[510] = 0x55;
        image[511] = 0xAA;
        image
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn xz(data: &[u8]) -> Vec<u8> {
        let mut encoder = XzEncoder::new(Vec::new(), 1);
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn write_file(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    fn assert_sample_mbr(mbr: &Mbr) {
        assert_eq!(mbr.disk_signature, 0xDEADBEEF);
        assert_eq!(
            mbr.partitions,
            vec![
                MbrPartition {
                    bootable: true,
                    partition_type: 0x0c,
                    first_lba: 8192,
                    sectors: 524288,
                },
                MbrPartition {
                    bootable: false,
                    partition_type: 0x83,
                    first_lba: 532480,
                    sectors: 1048576,
                },
            ]
        );
    }

    #[test]
    fn test_raw_image() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "disk.img", &raw_image());

        let metadata = inspect(&path).unwrap();
        assert_eq!(metadata.path, path);
        assert_eq!(metadata.size, Some(1024 * 1024));
        assert_sample_mbr(metadata.mbr.as_ref().unwrap());
    }

    #[test]
    fn test_compressed_layers() {
        let dir = TempDir::new().unwrap();
        let raw = raw_image();

        let gz = write_file(&dir, "disk.img.gz", &gzip(&raw));
        let xz_path = write_file(&dir, "disk.img.xz", &xz(&raw));
        let zst = write_file(&dir, "disk.img.zst", &zstd::encode_all(&raw[..], 1).unwrap());
        let chained = write_file(&dir, "disk.img.gz.xz", &xz(&gzip(&raw)));

        for path in [gz, xz_path, zst, chained] {
            let metadata = inspect(&path).unwrap();
            assert_eq!(metadata.size, None, "{}", path.display());
            assert_sample_mbr(metadata.mbr.as_ref().unwrap());
        }
    }

    #[test]
    fn test_image_without_partition_table() {
        let dir = TempDir::new().unwrap();
        let blank = write_file(&dir, "blank.img", &vec![0u8; 4096]);
        let short = write_file(&dir, "short.img", &[0x55, 0xAA]);

        assert_eq!(inspect(&blank).unwrap().mbr, None);
        let metadata = inspect(&short).unwrap();
        assert_eq!(metadata.mbr, None);
        assert_eq!(metadata.size, Some(2));
    }

    #[test]
    fn test_archives_are_not_opened() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "bundle.zip", b"PK\x03\x04not really a zip");

        let metadata = inspect(&path).unwrap();
        assert_eq!(metadata.mbr, None);
        assert_eq!(metadata.size, None);
    }

    #[test]
    fn test_registered_layer_without_decoder() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "disk.img.lz4", b"\x04\x22\x4d\x18");
        let formats = SupportedFormats::new([
            FileType::new(Category::Image, "img"),
            FileType::new(Category::Compressed, "lz4"),
        ]);

        let err = inspect_with(&path, &formats).unwrap_err();
        assert!(matches!(err, Error::UnsupportedCompression(ref ext) if ext == "lz4"));

        // Unregistered layers are never decoded, they just end the chain.
        let metadata = inspect(&path).unwrap();
        assert_eq!(metadata.mbr, None);
        assert_eq!(metadata.size, Some(4));
    }

    #[test]
    fn test_corrupt_stream_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "disk.img.gz", b"definitely not gzip");

        assert!(matches!(inspect(&path), Err(Error::Io(_))));
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = inspect(&dir.path().join("nope.img")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_parse_mbr_skips_empty_entries() {
        let mut sector = [0u8; 512];
        sector[510] = 0x55;
        sector[511] = 0xAA;
        let mbr = parse_mbr(&sector).unwrap();
        assert_eq!(mbr.disk_signature, 0);
        assert!(mbr.partitions.is_empty());

        sector[511] = 0x00;
        assert_eq!(parse_mbr(&sector), None);
    }
}
