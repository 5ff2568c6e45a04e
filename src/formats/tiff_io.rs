//! TIFF metadata I/O implementation (read only)

use std::io::{Read, Seek};

use crate::{
    error::{Error, Result},
    exif,
    formats::{ImageFormat, MetadataIO},
    metadata::PhotoMetadata,
    tiff::read_tiff,
    updates::{MetadataUpdate, Options},
};

/// TIFF metadata I/O implementation
///
/// A TIFF file is a bare EXIF block, so reading goes straight to the
/// directory reader. Rewriting TIFF files is not supported.
pub struct TiffIO;

impl TiffIO {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TiffIO {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataIO for TiffIO {
    fn format() -> ImageFormat {
        ImageFormat::Tiff
    }

    fn extensions() -> &'static [&'static str] {
        &["tif", "tiff"]
    }

    fn mime_types() -> &'static [&'static str] {
        &["image/tiff"]
    }

    fn detect(header: &[u8]) -> Option<ImageFormat> {
        (header.starts_with(b"II*\0") || header.starts_with(b"MM\0*")).then_some(ImageFormat::Tiff)
    }

    fn read_metadata<R: Read + Seek>(&self, source: &mut R, options: &Options) -> Result<PhotoMetadata> {
        let contents = read_tiff(source)?;
        Ok(exif::photo_metadata(&contents, options))
    }

    fn update(&self, _bytes: &[u8], _updates: &[MetadataUpdate], _options: &Options) -> Result<Vec<u8>> {
        Err(Error::write("Updating TIFF files is not supported"))
    }
}
