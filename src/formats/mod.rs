//! Format-specific handlers
//!
//! Each image format has a handler implementing [`MetadataIO`]: it reads the
//! metadata of a file and rewrites a file with updates applied. Dispatch is
//! by signature sniffing only.

use std::fmt;
use std::io::{Read, Seek};

use crate::{
    error::Result,
    metadata::PhotoMetadata,
    updates::{MetadataUpdate, Options},
};

/// Image formats this crate recognizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Tiff,
}

impl ImageFormat {
    /// Detect the format from the first bytes of a file
    pub fn detect(header: &[u8]) -> Option<Self> {
        #[cfg(feature = "jpeg")]
        if let Some(format) = JpegIO::detect(header) {
            return Some(format);
        }
        #[cfg(feature = "png")]
        if let Some(format) = PngIO::detect(header) {
            return Some(format);
        }
        TiffIO::detect(header)
    }

    /// Primary MIME type
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Tiff => "image/tiff",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImageFormat::Jpeg => "JPEG",
            ImageFormat::Png => "PNG",
            ImageFormat::Tiff => "TIFF",
        };
        f.write_str(name)
    }
}

/// Trait for format-specific metadata I/O
pub trait MetadataIO: Send + Sync {
    /// Format this handler manages
    fn format() -> ImageFormat
    where
        Self: Sized;

    /// File extensions this handler accepts (e.g., ["jpg", "jpeg"])
    fn extensions() -> &'static [&'static str]
    where
        Self: Sized;

    /// MIME types this handler accepts
    fn mime_types() -> &'static [&'static str]
    where
        Self: Sized;

    /// Returns the format if the header carries this handler's signature
    fn detect(header: &[u8]) -> Option<ImageFormat>
    where
        Self: Sized;

    /// Read the metadata of a file
    ///
    /// Blocks are merged with XMP taking precedence over EXIF, and EXIF over
    /// values from the image header.
    fn read_metadata<R: Read + Seek>(&self, source: &mut R, options: &Options) -> Result<PhotoMetadata>;

    /// Rewrite a file with `updates` applied
    ///
    /// Everything the updates do not touch is copied verbatim.
    fn update(&self, bytes: &[u8], updates: &[MetadataUpdate], options: &Options) -> Result<Vec<u8>>;
}

#[cfg(feature = "jpeg")]
pub mod jpeg;
#[cfg(feature = "jpeg")]
mod jpeg_io;

#[cfg(feature = "png")]
pub mod png;
#[cfg(feature = "png")]
mod png_io;

mod tiff_io;

#[cfg(feature = "jpeg")]
pub use jpeg_io::JpegIO;
#[cfg(feature = "png")]
pub use png_io::{PngIO, PngWriter};
pub use tiff_io::TiffIO;
