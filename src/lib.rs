//! Read and rewrite photo metadata without touching pixel data.
//!
//! This crate parses the metadata structures embedded in image files and
//! writes them back with edits applied, copying everything else verbatim:
//!
//! - **TIFF/EXIF**: offset-addressed directory graphs, read with cycle and
//!   bounds protection and serialized deterministically ([`tiff`])
//! - **JPEG**: marker segment scanning with fill-byte resynchronization,
//!   EXIF and XMP APP1 segments ([`formats::jpeg`])
//! - **PNG**: chunk streams with CRC-32, `eXIf` and text chunks
//!   ([`formats::png`], [`crc`])
//! - **XMP**: streaming packet rewrite ([`xmp`])
//!
//! # Quick Start
//!
//! ```no_run
//! use image_meta_io::{DateTimeZone, MetadataUpdate, Options, PhotoRating};
//!
//! # fn main() -> image_meta_io::Result<()> {
//! let bytes = std::fs::read("photo.jpg")?;
//!
//! // Dates are rendered in UTC rather than the host's zone
//! let options = Options::new().time_zone(DateTimeZone::Utc);
//! let updated = image_meta_io::update_with(
//!     &bytes,
//!     &[
//!         MetadataUpdate::Rating(PhotoRating::FiveStars),
//!         MetadataUpdate::TakenDate(Some(1_689_166_125_401)),
//!     ],
//!     &options,
//! )?;
//!
//! let metadata = image_meta_io::read_metadata_with(&updated, &options)?;
//! assert_eq!(metadata.rating, Some(PhotoRating::FiveStars));
//! assert_eq!(metadata.taken_date, Some(1_689_166_125_401));
//! # Ok(())
//! # }
//! ```
//!
//! # Handler-Specific API
//!
//! For more control, use a format handler directly:
//!
//! ```no_run
//! use image_meta_io::{JpegIO, MetadataIO, Options};
//! use std::fs::File;
//!
//! # fn main() -> image_meta_io::Result<()> {
//! let mut file = File::open("photo.jpg")?;
//! let metadata = JpegIO::new().read_metadata(&mut file, &Options::default())?;
//! if let Some(gps) = metadata.gps_coordinates {
//!     println!("Taken at {}", gps);
//! }
//! # Ok(())
//! # }
//! ```

use std::io::{Cursor, Read, Seek, SeekFrom};

pub mod crc;
mod error;
pub mod exif;
pub mod formats;
pub mod metadata;
pub mod tiff;
pub mod updates;
pub mod xmp;

pub use error::{Error, Result};
#[cfg(feature = "jpeg")]
pub use formats::JpegIO;
#[cfg(feature = "png")]
pub use formats::{PngIO, PngWriter};
pub use formats::{ImageFormat, MetadataIO, TiffIO};
pub use metadata::{
    GpsCoordinates, Location, PhotoMetadata, PhotoRating, RegionArea, TiffOrientation,
};
pub use tiff::{read_tiff, read_tiff_bytes, ByteOrder, TiffContents};
pub use updates::{DateTimeZone, MetadataUpdate, Options};

// Test utilities - only compiled for tests or when explicitly enabled
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

/// Apply `updates` to an image with default [`Options`].
///
/// See [`update_with`].
pub fn update(bytes: &[u8], updates: &[MetadataUpdate]) -> Result<Vec<u8>> {
    update_with(bytes, updates, &Options::default())
}

/// Apply `updates` to the JPEG or PNG image in `bytes`.
///
/// Returns the new file; fields not named by an update and all image data
/// are preserved. TIFF files and unrecognized data are write errors.
pub fn update_with(bytes: &[u8], updates: &[MetadataUpdate], options: &Options) -> Result<Vec<u8>> {
    match ImageFormat::detect(bytes) {
        #[cfg(feature = "jpeg")]
        Some(ImageFormat::Jpeg) => JpegIO::new().update(bytes, updates, options),
        #[cfg(feature = "png")]
        Some(ImageFormat::Png) => PngIO::new().update(bytes, updates, options),
        Some(ImageFormat::Tiff) => TiffIO::new().update(bytes, updates, options),
        _ => Err(Error::UnsupportedFormat),
    }
}

/// Read the metadata of an image held in memory with default [`Options`].
pub fn read_metadata(bytes: &[u8]) -> Result<PhotoMetadata> {
    read_metadata_with(bytes, &Options::default())
}

/// Read the metadata of a JPEG, PNG or TIFF image held in memory.
pub fn read_metadata_with(bytes: &[u8], options: &Options) -> Result<PhotoMetadata> {
    read_metadata_from(&mut Cursor::new(bytes), options)
}

/// Read the metadata of an image from a seekable source.
///
/// The format is sniffed from the first bytes; the source is rewound
/// before the handler reads it.
pub fn read_metadata_from<R: Read + Seek>(source: &mut R, options: &Options) -> Result<PhotoMetadata> {
    let start = source.stream_position()?;
    let mut header = Vec::with_capacity(8);
    source.by_ref().take(8).read_to_end(&mut header)?;
    source.seek(SeekFrom::Start(start))?;

    match ImageFormat::detect(&header) {
        #[cfg(feature = "jpeg")]
        Some(ImageFormat::Jpeg) => JpegIO::new().read_metadata(source, options),
        #[cfg(feature = "png")]
        Some(ImageFormat::Png) => PngIO::new().read_metadata(source, options),
        Some(ImageFormat::Tiff) => TiffIO::new().read_metadata(source, options),
        _ => Err(Error::format("Unknown image format")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{fixture_bytes, sample_exif, EXIF_PNG, XMP_JPEG};

    #[test]
    fn test_read_dispatch() {
        let options = Options::new().time_zone(DateTimeZone::Utc);
        let jpeg = read_metadata_with(&fixture_bytes(XMP_JPEG).unwrap(), &options).unwrap();
        assert_eq!(jpeg.rating, Some(PhotoRating::ThreeStars));

        let png = read_metadata_with(&fixture_bytes(EXIF_PNG).unwrap(), &options).unwrap();
        assert_eq!(png.camera_make.as_deref(), Some("Canon"));

        let tiff = read_metadata(&sample_exif(ByteOrder::BigEndian)).unwrap();
        assert_eq!(tiff.camera_model.as_deref(), Some("Canon EOS 90D"));

        assert!(read_metadata(b"GIF89a").unwrap_err().is_read_error());
    }

    #[test]
    fn test_read_from_offset_source() {
        let mut bytes = b"junk".to_vec();
        bytes.extend(fixture_bytes(XMP_JPEG).unwrap());
        let mut source = Cursor::new(bytes);
        source.set_position(4);
        let metadata = read_metadata_from(&mut source, &Options::default()).unwrap();
        assert_eq!(metadata.keywords.len(), 2);

        let mut bytes = b"junk".to_vec();
        bytes.extend(sample_exif(ByteOrder::BigEndian));
        let mut source = Cursor::new(bytes);
        source.set_position(4);
        let metadata = read_metadata_from(&mut source, &Options::default()).unwrap();
        assert_eq!(metadata.camera_model.as_deref(), Some("Canon EOS 90D"));
        assert_eq!(metadata.orientation, Some(TiffOrientation::RotateRight));
        assert!(metadata.gps_coordinates.is_some());
    }

    #[test]
    fn test_update_dispatch() {
        let rating = [MetadataUpdate::Rating(PhotoRating::OneStar)];
        let err = update(&sample_exif(ByteOrder::LittleEndian), &rating).unwrap_err();
        assert!(matches!(err, Error::Write(_)));
        let err = update(b"GIF89a", &rating).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat));
        assert!(err.is_write_error());
    }
}
