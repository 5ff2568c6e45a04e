//! JPEG metadata I/O implementation

use std::io::{Read, Seek, Write};

use crate::{
    error::Result,
    exif,
    formats::{
        jpeg::{
            extract_metadata_bytes, parse_xmp_segment, scan_segments, write_segment, JpegSegments,
            APP0, APP1, EXIF_IDENTIFIER, MARKER_PREFIX, SOI, XMP_IDENTIFIER,
        },
        ImageFormat, MetadataIO,
    },
    metadata::PhotoMetadata,
    tiff::read_tiff_bytes,
    updates::{MetadataUpdate, Options},
    xmp,
};

/// JPEG metadata I/O implementation
pub struct JpegIO;

impl JpegIO {
    /// Create a new JPEG I/O implementation
    pub fn new() -> Self {
        Self
    }

    /// Metadata from the header bytes returned by [`extract_metadata_bytes`]
    fn metadata_from_header(header: &[u8], options: &Options) -> Result<PhotoMetadata> {
        let layout = scan_segments(header)?;

        let mut frame = PhotoMetadata::default();
        if let Some((width, height)) = layout.frame_size(header) {
            frame.width_px = Some(width);
            frame.height_px = Some(height);
        }

        let exif = match layout.find_exif(header) {
            Some(index) => {
                let payload = layout.segments[index].payload(header);
                let contents = read_tiff_bytes(&payload[EXIF_IDENTIFIER.len()..])?;
                Some(exif::photo_metadata(&contents, options))
            }
            None => None,
        };

        let xmp = match layout.find_xmp(header) {
            Some(index) => {
                let packet = parse_xmp_segment(layout.segments[index].payload(header))?;
                Some(xmp::photo_metadata(&packet, options)?)
            }
            None => None,
        };

        let merged = crate::metadata::merge(xmp, exif);
        Ok(crate::metadata::merge(merged, Some(frame)).unwrap_or_default())
    }

    /// Rewrite the segment list of `bytes` with the given EXIF block and XMP
    /// packet, copying everything else verbatim.
    ///
    /// A new XMP packet replaces the whole document, so extended XMP
    /// segments belonging to the old one are dropped.
    fn rewrite<W: Write>(
        bytes: &[u8],
        layout: &JpegSegments,
        exif: Option<&[u8]>,
        xmp: Option<&str>,
        writer: &mut W,
    ) -> Result<()> {
        let exif_index = layout.find_exif(bytes);
        let xmp_index = layout.find_xmp(bytes);

        // New segments go after the leading JFIF segments
        let insert_at = layout
            .segments
            .iter()
            .position(|s| s.marker != APP0)
            .unwrap_or(layout.segments.len());

        writer.write_all(&[MARKER_PREFIX, SOI])?;
        for (index, segment) in layout.segments.iter().enumerate() {
            if index == insert_at {
                write_missing(writer, exif_index, xmp_index, exif, xmp)?;
            }
            match (exif, xmp) {
                (Some(exif), _) if Some(index) == exif_index => {
                    write_segment(writer, APP1, &[EXIF_IDENTIFIER, exif])?;
                }
                (_, Some(xmp)) if Some(index) == xmp_index => {
                    write_segment(writer, APP1, &[XMP_IDENTIFIER, xmp.as_bytes()])?;
                }
                (_, Some(_)) if segment.is_extended_xmp(bytes) => {
                    log::debug!(
                        "Dropping extended XMP segment at offset {}",
                        segment.range.start
                    );
                }
                _ => writer.write_all(segment.raw(bytes))?,
            }
        }
        if insert_at == layout.segments.len() {
            write_missing(writer, exif_index, xmp_index, exif, xmp)?;
        }

        writer.write_all(&bytes[layout.scan_offset..])?;
        Ok(())
    }
}

/// Insert the blocks the original file did not have, EXIF first.
fn write_missing<W: Write>(
    writer: &mut W,
    exif_index: Option<usize>,
    xmp_index: Option<usize>,
    exif: Option<&[u8]>,
    xmp: Option<&str>,
) -> Result<()> {
    if let (Some(exif), None) = (exif, exif_index) {
        write_segment(writer, APP1, &[EXIF_IDENTIFIER, exif])?;
    }
    if let (Some(xmp), None) = (xmp, xmp_index) {
        write_segment(writer, APP1, &[XMP_IDENTIFIER, xmp.as_bytes()])?;
    }
    Ok(())
}

impl Default for JpegIO {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataIO for JpegIO {
    fn format() -> ImageFormat {
        ImageFormat::Jpeg
    }

    fn extensions() -> &'static [&'static str] {
        &["jpg", "jpeg", "jpe", "jfif"]
    }

    fn mime_types() -> &'static [&'static str] {
        &["image/jpeg", "image/jpg"]
    }

    fn detect(header: &[u8]) -> Option<ImageFormat> {
        // JPEG magic bytes: FF D8
        header
            .starts_with(&[MARKER_PREFIX, SOI])
            .then_some(ImageFormat::Jpeg)
    }

    fn read_metadata<R: Read + Seek>(&self, source: &mut R, options: &Options) -> Result<PhotoMetadata> {
        let header = extract_metadata_bytes(source)?;
        Self::metadata_from_header(&header, options)
    }

    fn update(&self, bytes: &[u8], updates: &[MetadataUpdate], options: &Options) -> Result<Vec<u8>> {
        if updates.is_empty() {
            return Ok(bytes.to_vec());
        }
        let layout = scan_segments(bytes)?;

        let exif = if options.needs_exif_rewrite(updates) {
            let existing = layout
                .find_exif(bytes)
                .map(|index| &layout.segments[index].payload(bytes)[EXIF_IDENTIFIER.len()..]);
            Some(exif::update_exif(existing, updates, options)?)
        } else {
            None
        };

        let existing_xmp = layout
            .find_xmp(bytes)
            .map(|index| parse_xmp_segment(layout.segments[index].payload(bytes)))
            .transpose()?;
        let xmp = xmp::apply_updates(existing_xmp.as_deref(), updates, options)?;

        log::debug!(
            "Rewriting JPEG with {} segments (exif: {}, xmp: {} bytes)",
            layout.segments.len(),
            exif.as_ref().map_or(0, Vec::len),
            xmp.len()
        );

        let mut out = Vec::with_capacity(bytes.len() + xmp.len());
        Self::rewrite(bytes, &layout, exif.as_deref(), Some(xmp.as_str()), &mut out)?;
        Ok(out)
    }
}
